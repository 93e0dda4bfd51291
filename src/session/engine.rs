//! Recognition capability consumed by the session controller.
//!
//! A platform hands out engine instances; each instance reports its lifecycle
//! through an [`EngineEventSink`] tagged with the instance's [`EngineId`], so
//! events from a torn-down instance can be told apart from the current one.

use std::fmt;

use anyhow::Result;
use tokio::sync::mpsc;

/// Identity of one engine instance. Never reused within a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineId(pub(crate) u64);

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Settings applied to every engine instance before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub continuous: bool,      // Keep listening across utterances
    pub interim_results: bool, // Report results before they are final
    pub language: String,      // Locale tag (e.g. en-US)
}

/// One candidate transcript for a result.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionAlternative {
    pub transcript: String,
    pub confidence: f32,
}

/// A recognized fragment, possibly still subject to revision.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub is_final: bool,
    pub alternatives: Vec<RecognitionAlternative>,
}

impl RecognitionResult {
    /// Build a single-alternative interim result.
    pub fn interim(text: impl Into<String>) -> Self {
        Self { is_final: false, alternatives: vec![RecognitionAlternative { transcript: text.into(), confidence: 0.0 }] }
    }

    /// Build a single-alternative final result.
    pub fn finalized(text: impl Into<String>, confidence: f32) -> Self {
        Self { is_final: true, alternatives: vec![RecognitionAlternative { transcript: text.into(), confidence }] }
    }

    /// Transcript of the best alternative.
    pub fn transcript(&self) -> Option<&str> {
        self.alternatives.first().map(|alt| alt.transcript.as_str())
    }
}

/// Error codes an engine can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorCode {
    /// Transient failure of a network-backed recognizer. Retried.
    #[allow(dead_code)] // never raised by the local engine
    Network,
    /// The instance was stopped while running.
    Aborted,
    /// The microphone stream failed.
    AudioCapture,
}

impl EngineErrorCode {
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network)
    }
}

impl fmt::Display for EngineErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Aborted => write!(f, "aborted"),
            Self::AudioCapture => write!(f, "audio-capture"),
        }
    }
}

/// Lifecycle callbacks of an engine instance.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Started,
    Result { results: Vec<RecognitionResult>, result_index: usize },
    Error(EngineErrorCode),
    Ended,
}

impl EngineEvent {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            EngineEvent::Started => "start",
            EngineEvent::Result { .. } => "result",
            EngineEvent::Error(_) => "error",
            EngineEvent::Ended => "end",
        }
    }
}

/// Input of the controller's event loop.
#[derive(Debug)]
pub enum Signal {
    /// A callback from an engine instance.
    Engine { id: EngineId, event: EngineEvent },
    /// The backoff scheduled after instance `after` failed has elapsed.
    RestartDue { after: EngineId },
}

/// Handle an engine uses to report events. Cheap to clone across threads.
#[derive(Debug, Clone)]
pub struct EngineEventSink {
    id: EngineId,
    tx: mpsc::UnboundedSender<Signal>,
}

impl EngineEventSink {
    pub(crate) fn new(id: EngineId, tx: mpsc::UnboundedSender<Signal>) -> Self {
        Self { id, tx }
    }

    /// Identity of the instance this sink belongs to.
    pub fn id(&self) -> EngineId {
        self.id
    }

    /// Deliver an event. Returns `false` once the controller is gone.
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.tx.send(Signal::Engine { id: self.id, event }).is_ok()
    }
}

/// One live handle to the recognition capability.
///
/// `stop` must be safe to call more than once and after the engine ended.
pub trait RecognitionEngine: Send {
    /// Begin recognition. `Started` is reported through the sink.
    fn start(&mut self) -> Result<()>;

    /// Request termination. `Ended` is reported through the sink.
    fn stop(&mut self) -> Result<()>;
}

/// Factory for engine instances.
pub trait RecognitionPlatform {
    /// Whether recognition can be offered at all.
    fn is_available(&self) -> bool;

    /// Create and configure a fresh, not yet started, engine instance.
    fn create(&self, config: &EngineConfig, sink: EngineEventSink) -> Result<Box<dyn RecognitionEngine>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_use_platform_names() {
        assert_eq!(EngineErrorCode::Network.to_string(), "network");
        assert_eq!(EngineErrorCode::Aborted.to_string(), "aborted");
        assert_eq!(EngineErrorCode::AudioCapture.to_string(), "audio-capture");
        assert!(EngineErrorCode::Network.is_network());
        assert!(!EngineErrorCode::Aborted.is_network());
        assert!(!EngineErrorCode::AudioCapture.is_network());
    }

    #[test]
    fn test_sink_tags_events_with_instance() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EngineEventSink::new(EngineId(7), tx);
        assert!(sink.emit(EngineEvent::Started));

        match rx.try_recv() {
            Ok(Signal::Engine { id, event }) => {
                assert_eq!(id, EngineId(7));
                assert_eq!(event, EngineEvent::Started);
            }
            other => panic!("unexpected signal: {:?}", other),
        }

        drop(rx);
        assert!(!sink.emit(EngineEvent::Ended));
    }

    #[test]
    fn test_result_transcript_uses_first_alternative() {
        let result = RecognitionResult {
            is_final: true,
            alternatives: vec![
                RecognitionAlternative { transcript: "lights on".into(), confidence: 0.9 },
                RecognitionAlternative { transcript: "light son".into(), confidence: 0.1 },
            ],
        };
        assert_eq!(result.transcript(), Some("lights on"));
        assert_eq!(RecognitionResult { is_final: false, alternatives: vec![] }.transcript(), None);
    }
}

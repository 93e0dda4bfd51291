//! On-device recognition engine.
//!
//! Each [`SherpaEngine`] owns one microphone stream and one transcription
//! thread. The capture thread runs VAD and forwards finished segments; the
//! transcription thread runs Whisper and reports through the engine's sink.
//! `Ended` is emitted exactly once, by the transcription thread, after the
//! last buffered segment has been handled.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use super::recognizer::{Recognizer, strip_wake_word};
use crate::audio::{Capture, has_input_device};
use crate::config::AppConfig;
use crate::session::{EngineConfig, EngineErrorCode, EngineEvent, EngineEventSink, RecognitionEngine, RecognitionPlatform, RecognitionResult};

/// Segments queued between VAD and Whisper before new ones are dropped.
const SEGMENT_QUEUE: usize = 8;

/// How often the transcription thread checks the silence timeout.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Interim text reported while the user is speaking.
const SPEECH_PLACEHOLDER: &str = "…";

/// Whisper reports no confidence; final results carry this one.
const FINAL_CONFIDENCE: f32 = 1.0;

enum CaptureMessage {
    SpeechStarted,
    Segment(Vec<f32>),
}

#[derive(Debug, Clone)]
struct EngineSettings {
    sample_rate: u32,
    silence_timeout: Duration,
    continuous: bool,
    interim_results: bool,
    wake_word: Option<String>,
}

/// Recognition backed by Silero VAD and Whisper.
///
/// Models are loaded once here and shared by every engine instance.
pub struct SherpaPlatform {
    recognizer: Option<Arc<Recognizer>>,
    sample_rate: u32,
    silence_timeout: Duration,
    wake_word: Option<String>,
}

impl SherpaPlatform {
    /// Load the recognition models.
    ///
    /// Missing or broken models leave the platform unavailable rather than failing.
    pub fn new(config: &AppConfig) -> Self {
        let missing = config.missing_stt_models();
        let recognizer = if !missing.is_empty() {
            for path in &missing {
                warn!("Speech model not found: {}", path.display());
            }
            None
        } else {
            match Recognizer::new(config) {
                Ok(recognizer) => Some(Arc::new(recognizer)),
                Err(e) => {
                    error!("Failed to load speech recognition models: {:#}", e);
                    None
                }
            }
        };

        Self { recognizer, sample_rate: config.sample_rate, silence_timeout: config.silence_timeout(), wake_word: config.wake_word.clone() }
    }
}

impl RecognitionPlatform for SherpaPlatform {
    fn is_available(&self) -> bool {
        self.recognizer.is_some() && has_input_device()
    }

    fn create(&self, config: &EngineConfig, sink: EngineEventSink) -> Result<Box<dyn RecognitionEngine>> {
        let recognizer = self.recognizer.clone().context("Speech recognition models are not loaded")?;
        debug!("Creating engine {} (language {}, continuous {})", sink.id(), config.language, config.continuous);

        let settings = EngineSettings {
            sample_rate: self.sample_rate,
            silence_timeout: self.silence_timeout,
            continuous: config.continuous,
            interim_results: config.interim_results,
            wake_word: self.wake_word.clone(),
        };

        Ok(Box::new(SherpaEngine { recognizer, settings, sink, capture: None, started: false }))
    }
}

/// One microphone session.
pub struct SherpaEngine {
    recognizer: Arc<Recognizer>,
    settings: EngineSettings,
    sink: EngineEventSink,
    capture: Option<Capture>,
    started: bool,
}

impl RecognitionEngine for SherpaEngine {
    fn start(&mut self) -> Result<()> {
        if self.started {
            anyhow::bail!("Engine {} was already started", self.sink.id());
        }
        self.started = true;
        self.recognizer.reset();

        let (tx, rx) = mpsc::sync_channel(SEGMENT_QUEUE);
        let capture_recognizer = self.recognizer.clone();
        let error_sink = self.sink.clone();

        let capture = Capture::start(
            self.settings.sample_rate,
            move |samples| forward_speech(&capture_recognizer, &tx, samples),
            move |message| {
                warn!("Audio capture error: {}", message);
                error_sink.emit(EngineEvent::Error(EngineErrorCode::AudioCapture));
            },
        )?;

        let recognizer = self.recognizer.clone();
        let sink = self.sink.clone();
        let settings = self.settings.clone();
        std::thread::Builder::new()
            .name(format!("transcribe-{}", self.sink.id()))
            .spawn(move || transcription_loop(rx, |samples| recognizer.transcribe(samples), &sink, &settings))
            .context("Failed to spawn transcription thread")?;

        self.capture = Some(capture);
        self.sink.emit(EngineEvent::Started);
        info!("👂 Listening (engine {})", self.sink.id());
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        // Closing the stream drops the segment sender, which lets the
        // transcription thread finish the queue and report the end.
        if let Some(mut capture) = self.capture.take() {
            debug!("Stopping engine {}", self.sink.id());
            capture.stop();
            self.sink.emit(EngineEvent::Error(EngineErrorCode::Aborted));
        }
        Ok(())
    }
}

impl Drop for SherpaEngine {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            debug!("Failed to stop engine on drop: {}", e);
        }
    }
}

/// Capture-thread side: run VAD and hand events to the transcription thread.
fn forward_speech(recognizer: &Recognizer, tx: &SyncSender<CaptureMessage>, samples: &[f32]) {
    let output = recognizer.accept_waveform(samples);

    if output.speech_started {
        // Losing an onset notice only costs the interim placeholder
        let _ = tx.try_send(CaptureMessage::SpeechStarted);
    }

    if let Some(segment) = output.segment {
        match tx.try_send(CaptureMessage::Segment(segment)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("Transcription is falling behind, dropping a speech segment"),
            Err(TrySendError::Disconnected(_)) => debug!("Transcription thread is gone, discarding segment"),
        }
    }
}

/// Transcription-thread side: turn segments into results until the stream
/// closes, the silence timeout elapses, or a single-shot engine got its result.
fn transcription_loop<T>(rx: Receiver<CaptureMessage>, transcribe: T, sink: &EngineEventSink, settings: &EngineSettings)
where
    T: Fn(&[f32]) -> Option<String>,
{
    let mut last_activity = Instant::now();

    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(CaptureMessage::SpeechStarted) => {
                last_activity = Instant::now();
                if settings.interim_results {
                    sink.emit(EngineEvent::Result { results: vec![RecognitionResult::interim(SPEECH_PLACEHOLDER)], result_index: 0 });
                }
            }
            Ok(CaptureMessage::Segment(samples)) => {
                last_activity = Instant::now();
                let Some(text) = transcribe(&samples) else {
                    continue;
                };

                let text = match settings.wake_word.as_deref() {
                    Some(wake_word) => match strip_wake_word(&text, wake_word) {
                        Some(text) => text,
                        None => {
                            debug!("Ignoring speech without wake word: {}", text);
                            continue;
                        }
                    },
                    None => text,
                };

                info!("🗣️  You: {}", text);
                if !sink.emit(EngineEvent::Result { results: vec![RecognitionResult::finalized(text, FINAL_CONFIDENCE)], result_index: 0 }) {
                    return;
                }
                if !settings.continuous {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if last_activity.elapsed() >= settings.silence_timeout {
                    info!("No speech for {}s, closing listening window", settings.silence_timeout.as_secs());
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!("Engine {} ended", sink.id());
    sink.emit(EngineEvent::Ended);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{EngineId, Signal};
    use tokio::sync::mpsc as tokio_mpsc;

    fn settings() -> EngineSettings {
        EngineSettings {
            sample_rate: 16000,
            silence_timeout: Duration::from_secs(60),
            continuous: true,
            interim_results: true,
            wake_word: None,
        }
    }

    fn events(rx: &mut tokio_mpsc::UnboundedReceiver<Signal>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            if let Signal::Engine { event, .. } = signal {
                events.push(event);
            }
        }
        events
    }

    fn run(messages: Vec<CaptureMessage>, settings: EngineSettings) -> Vec<EngineEvent> {
        let (signal_tx, mut signal_rx) = tokio_mpsc::unbounded_channel();
        let sink = EngineEventSink::new(EngineId(1), signal_tx);
        let (tx, rx) = mpsc::sync_channel(SEGMENT_QUEUE);
        for message in messages {
            tx.send(message).unwrap();
        }
        drop(tx);

        transcription_loop(rx, |samples: &[f32]| (!samples.is_empty()).then(|| format!("{} samples", samples.len())), &sink, &settings);
        events(&mut signal_rx)
    }

    fn final_text(event: &EngineEvent) -> Option<&str> {
        match event {
            EngineEvent::Result { results, .. } if results[0].is_final => results[0].transcript(),
            _ => None,
        }
    }

    #[test]
    fn test_queued_segments_are_reported_before_end() {
        let events = run(vec![CaptureMessage::SpeechStarted, CaptureMessage::Segment(vec![0.0; 4])], settings());

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], EngineEvent::Result { results, .. } if !results[0].is_final));
        assert_eq!(final_text(&events[1]), Some("4 samples"));
        assert_eq!(events[2], EngineEvent::Ended);
    }

    #[test]
    fn test_interim_results_can_be_disabled() {
        let settings = EngineSettings { interim_results: false, ..settings() };
        let events = run(vec![CaptureMessage::SpeechStarted], settings);
        assert_eq!(events, vec![EngineEvent::Ended]);
    }

    #[test]
    fn test_empty_transcriptions_are_skipped() {
        let events = run(vec![CaptureMessage::Segment(Vec::new())], settings());
        assert_eq!(events, vec![EngineEvent::Ended]);
    }

    #[test]
    fn test_single_shot_ends_after_first_result() {
        let settings = EngineSettings { continuous: false, ..settings() };
        let events = run(vec![CaptureMessage::Segment(vec![0.0; 2]), CaptureMessage::Segment(vec![0.0; 3])], settings);

        assert_eq!(events.len(), 2);
        assert_eq!(final_text(&events[0]), Some("2 samples"));
        assert_eq!(events[1], EngineEvent::Ended);
    }

    #[test]
    fn test_wake_word_filters_results() {
        let (signal_tx, mut signal_rx) = tokio_mpsc::unbounded_channel();
        let sink = EngineEventSink::new(EngineId(2), signal_tx);
        let (tx, rx) = mpsc::sync_channel(SEGMENT_QUEUE);
        tx.send(CaptureMessage::Segment(vec![0.0])).unwrap();
        tx.send(CaptureMessage::Segment(vec![0.0, 0.0])).unwrap();
        drop(tx);

        let settings = EngineSettings { wake_word: Some("computer".to_string()), ..settings() };
        transcription_loop(
            rx,
            |samples: &[f32]| Some(if samples.len() == 1 { "play music".to_string() } else { "Computer, play music".to_string() }),
            &sink,
            &settings,
        );

        let events = events(&mut signal_rx);
        assert_eq!(events.len(), 2);
        assert_eq!(final_text(&events[0]), Some("play music"));
        assert_eq!(events[1], EngineEvent::Ended);
    }

    #[test]
    fn test_silence_timeout_ends_without_error() {
        let (signal_tx, mut signal_rx) = tokio_mpsc::unbounded_channel();
        let sink = EngineEventSink::new(EngineId(3), signal_tx);
        let (_tx, rx) = mpsc::sync_channel::<CaptureMessage>(SEGMENT_QUEUE);

        let settings = EngineSettings { silence_timeout: Duration::from_millis(150), ..settings() };
        transcription_loop(rx, |_: &[f32]| None, &sink, &settings);

        assert_eq!(events(&mut signal_rx), vec![EngineEvent::Ended]);
    }
}

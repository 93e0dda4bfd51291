//! Voice session controller.
//!
//! Owns a single continuous recognition session. Transient failures (network
//! errors, engines that end on their own) are retried behind the caller's back
//! up to a configured ceiling; only transcripts and terminal errors escape.
//!
//! The controller is driven by an event loop: engine callbacks and restart
//! timers arrive through [`VoiceSessionController::next_signal`] and are applied
//! with [`VoiceSessionController::handle_signal`]. Nothing here blocks.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::engine::{EngineConfig, EngineErrorCode, EngineEventSink, EngineEvent, EngineId, RecognitionEngine, RecognitionPlatform, RecognitionResult, Signal};
use super::error::VoiceError;

/// Default recognizer locale.
pub const DEFAULT_LANGUAGE: &str = "en-US";

/// Default ceiling on consecutive network-error restarts.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Session tuning, fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub language: String,         // Locale tag passed to every engine instance
    pub max_retries: u32,         // Consecutive network retries before giving up
    pub retry_backoff: Duration,  // Delay before restarting after a network error
    pub restart_delay: Duration,  // Delay before restarting after an unexpected end
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: Duration::from_millis(1000),
            restart_delay: Duration::from_millis(300),
        }
    }
}

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Listening,
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Starting => write!(f, "starting"),
            SessionState::Listening => write!(f, "listening"),
            SessionState::Stopping => write!(f, "stopping"),
        }
    }
}

/// What the caller gets to see.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Latest recognized text, interim or final.
    Transcript(String),
    /// A finalized utterance.
    Final(String),
    /// A terminal error; the session is back to `Idle`.
    Error(VoiceError),
}

/// Mutable record of the current session.
#[derive(Debug, Default)]
struct Session {
    state: SessionState,
    transcript: String,
    retry_count: u32,
}

/// The engine instance currently owned by the controller.
struct ActiveEngine {
    id: EngineId,
    engine: Box<dyn RecognitionEngine>,
}

/// A restart waiting for its backoff to elapse.
#[derive(Debug, Clone, Copy)]
struct PendingRestart {
    due: Instant,
    after: EngineId,
}

/// Controller for one continuous speech-recognition session.
pub struct VoiceSessionController<P: RecognitionPlatform> {
    platform: P,
    config: SessionConfig,
    session: Session,
    engine: Option<ActiveEngine>,
    next_engine_id: u64,
    manually_stopped: bool,
    pending_restart: Option<PendingRestart>,
    last_error: Option<VoiceError>,
    signal_tx: mpsc::UnboundedSender<Signal>,
    signal_rx: mpsc::UnboundedReceiver<Signal>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl<P: RecognitionPlatform> VoiceSessionController<P> {
    /// Create an idle controller.
    ///
    /// # Returns
    /// A tuple of (controller, receiver for session events)
    pub fn new(platform: P, config: SessionConfig) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();

        let controller = Self {
            platform,
            config,
            session: Session::default(),
            engine: None,
            next_engine_id: 0,
            manually_stopped: false,
            pending_restart: None,
            last_error: None,
            signal_tx,
            signal_rx,
            events,
        };

        (controller, events_rx)
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    /// True while an engine is starting or listening, including during silent restarts.
    pub fn is_listening(&self) -> bool {
        matches!(self.session.state, SessionState::Starting | SessionState::Listening)
    }

    pub fn transcript(&self) -> &str {
        &self.session.transcript
    }

    pub fn retry_count(&self) -> u32 {
        self.session.retry_count
    }

    pub fn last_error(&self) -> Option<&VoiceError> {
        self.last_error.as_ref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start a new session, tearing down any instance that is still active.
    ///
    /// Fails immediately with `UnsupportedPlatform` (reported as an event)
    /// when the platform cannot recognize speech. Any active session is ended
    /// first.
    pub fn start_listening(&mut self) {
        if !self.platform.is_available() {
            warn!("Speech recognition capability is not available");
            self.fail(VoiceError::UnsupportedPlatform);
            return;
        }

        if self.engine.is_some() || self.session.state != SessionState::Idle {
            info!("Replacing active recognition session");
            self.release_engine();
        }

        self.pending_restart = None;
        self.manually_stopped = false;
        self.last_error = None;
        self.session.transcript.clear();
        self.session.retry_count = 0;
        self.set_state(SessionState::Starting);
        self.launch_engine();
    }

    /// Stop the session. Safe to call in any state.
    pub fn stop_listening(&mut self) {
        self.pending_restart = None;

        if self.session.state == SessionState::Idle && self.engine.is_none() {
            debug!("Stop requested while idle");
            return;
        }

        self.manually_stopped = true;

        let Some(active) = self.engine.as_mut() else {
            // Waiting out a restart backoff: nothing to stop.
            self.set_state(SessionState::Idle);
            return;
        };

        if self.session.state == SessionState::Stopping {
            return;
        }

        match active.engine.stop() {
            Ok(()) => {
                info!("Voice recognition stopped manually");
                self.set_state(SessionState::Stopping);
            }
            Err(e) => {
                warn!("Error stopping recognition: {:#}", e);
                self.engine = None;
                self.set_state(SessionState::Idle);
            }
        }
    }

    /// Tear the session down unconditionally, without emitting events.
    pub fn shutdown(&mut self) {
        self.pending_restart = None;
        self.manually_stopped = true;
        self.release_engine();
        self.set_state(SessionState::Idle);
    }

    /// Wait for the next engine callback or restart timer.
    ///
    /// Returns `None` only if the signal channel closed.
    pub async fn next_signal(&mut self) -> Option<Signal> {
        let restart = self.pending_restart;

        tokio::select! {
            biased;
            signal = self.signal_rx.recv() => signal,
            after = wait_for_restart(restart) => Some(Signal::RestartDue { after }),
        }
    }

    /// Wait for and apply the next signal.
    pub async fn process_next(&mut self) -> bool {
        match self.next_signal().await {
            Some(signal) => {
                self.handle_signal(signal);
                true
            }
            None => false,
        }
    }

    /// Apply one signal to the state machine.
    pub fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::RestartDue { after } => self.on_restart_due(after),
            Signal::Engine { id, event } => {
                if self.engine.as_ref().map(|active| active.id) != Some(id) {
                    debug!("Discarding '{}' from stale engine {}", event.name(), id);
                    return;
                }

                match event {
                    EngineEvent::Started => self.on_started(),
                    EngineEvent::Result { results, result_index } => self.on_result(&results, result_index),
                    EngineEvent::Error(code) => self.on_error(code),
                    EngineEvent::Ended => self.on_ended(),
                }
            }
        }
    }

    fn on_started(&mut self) {
        if self.session.state == SessionState::Starting {
            info!("Voice recognition started");
            self.set_state(SessionState::Listening);
        }
    }

    fn on_result(&mut self, results: &[RecognitionResult], result_index: usize) {
        let Some(result) = results.get(result_index) else {
            warn!("Result index {} out of range ({} results)", result_index, results.len());
            return;
        };
        let Some(text) = result.transcript() else {
            debug!("Result without alternatives");
            return;
        };

        if self.session.state == SessionState::Starting {
            self.set_state(SessionState::Listening);
        }

        self.session.transcript = text.to_string();
        self.emit(SessionEvent::Transcript(self.session.transcript.clone()));

        if result.is_final {
            self.session.retry_count = 0;
            debug!("Final result: \"{}\"", text);
            self.emit(SessionEvent::Final(self.session.transcript.clone()));
        }
    }

    fn on_error(&mut self, code: EngineErrorCode) {
        if self.manually_stopped {
            debug!("Ignoring engine error '{}' after manual stop", code);
            return;
        }

        if !code.is_network() {
            self.fail(VoiceError::Engine { code });
            return;
        }

        if self.session.retry_count < self.config.max_retries {
            self.session.retry_count += 1;
            info!("Retrying connection ({}/{})", self.session.retry_count, self.config.max_retries);
            self.schedule_restart(VoiceError::TransientNetwork, self.config.retry_backoff);
        } else {
            self.fail(VoiceError::RetryExhausted { attempts: self.session.retry_count });
        }
    }

    fn on_ended(&mut self) {
        if self.manually_stopped || self.session.state == SessionState::Stopping {
            info!("Voice recognition ended");
            self.release_engine();
            self.set_state(SessionState::Idle);
            return;
        }

        if self.session.retry_count < self.config.max_retries {
            self.schedule_restart(VoiceError::UnexpectedTermination, self.config.restart_delay);
        } else {
            info!("Voice recognition ended with no retries remaining");
            self.release_engine();
            self.set_state(SessionState::Idle);
        }
    }

    fn on_restart_due(&mut self, after: EngineId) {
        match self.pending_restart {
            Some(pending) if pending.after == after => self.pending_restart = None,
            _ => {
                debug!("Discarding stale restart after engine {}", after);
                return;
            }
        }

        if self.manually_stopped {
            return;
        }

        info!("Restarting recognition after engine {}", after);
        self.launch_engine();
    }

    /// Release the current instance and restart after `delay`.
    fn schedule_restart(&mut self, cause: VoiceError, delay: Duration) {
        let Some(failed) = self.engine.as_ref().map(|active| active.id) else {
            return;
        };

        debug!("{} (engine {}), restarting in {:?}", cause, failed, delay);
        self.release_engine();
        self.set_state(SessionState::Starting);
        self.pending_restart = Some(PendingRestart { due: Instant::now() + delay, after: failed });
    }

    /// Create, configure and start a fresh engine instance.
    fn launch_engine(&mut self) {
        self.next_engine_id += 1;
        let id = EngineId(self.next_engine_id);
        let sink = EngineEventSink::new(id, self.signal_tx.clone());
        let engine_config = EngineConfig { continuous: true, interim_results: true, language: self.config.language.clone() };

        let launched = self.platform.create(&engine_config, sink).and_then(|mut engine| {
            engine.start()?;
            Ok(engine)
        });

        match launched {
            Ok(engine) => {
                debug!("Voice recognition requested to start (engine {})", id);
                self.engine = Some(ActiveEngine { id, engine });
            }
            Err(e) => self.fail(VoiceError::StartFailed(format!("{:#}", e))),
        }
    }

    /// Stop and drop the current instance; its later callbacks become stale.
    fn release_engine(&mut self) {
        if let Some(mut active) = self.engine.take()
            && let Err(e) = active.engine.stop()
        {
            warn!("Error stopping engine {}: {:#}", active.id, e);
        }
    }

    /// End the session with a terminal error.
    fn fail(&mut self, error: VoiceError) {
        debug_assert!(error.is_fatal());
        self.pending_restart = None;
        self.release_engine();
        self.set_state(SessionState::Idle);
        self.report(error);
    }

    fn report(&mut self, error: VoiceError) {
        error!("❌ {}", error);
        self.last_error = Some(error.clone());
        self.emit(SessionEvent::Error(error));
    }

    fn set_state(&mut self, state: SessionState) {
        if self.session.state != state {
            debug!("Session {} -> {}", self.session.state, state);
            self.session.state = state;
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("Session event receiver dropped");
        }
    }
}

impl<P: RecognitionPlatform> Drop for VoiceSessionController<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn wait_for_restart(restart: Option<PendingRestart>) -> EngineId {
    match restart {
        Some(pending) => {
            tokio::time::sleep_until(pending.due).await;
            pending.after
        }
        None => std::future::pending().await,
    }
}

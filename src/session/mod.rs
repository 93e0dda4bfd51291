//! Voice input session management.
//!
//! Wraps a platform speech-recognition capability in a bounded-retry state
//! machine so callers only see meaningful transcripts and terminal errors.

mod controller;
mod engine;
mod error;

pub use controller::{SessionConfig, SessionEvent, SessionState, VoiceSessionController};
pub use engine::{EngineConfig, EngineErrorCode, EngineEvent, EngineEventSink, RecognitionEngine, RecognitionPlatform, RecognitionResult};
pub use error::VoiceError;

#[cfg(test)]
pub(crate) use engine::{EngineId, Signal};

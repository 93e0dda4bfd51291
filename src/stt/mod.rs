//! Speech-to-text module using sherpa-rs.
//!
//! Exposes on-device recognition (Silero VAD + Whisper) as a
//! [`RecognitionPlatform`](crate::session::RecognitionPlatform).

mod engine;
mod recognizer;

pub use engine::SherpaPlatform;

//! Text-to-speech module using sherpa-rs.
//!
//! Provides speech synthesis using Kokoro models and a [`Speaker`] that
//! plays replies one utterance at a time.

mod speaker;
mod synthesizer;

pub use speaker::{Speaker, SpeakerSettings, SpeechEvent};
pub use synthesizer::{Synthesize, Synthesizer};

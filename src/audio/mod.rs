//! Audio I/O module for capturing and playing back audio samples.
//!
//! Capture and playback go through cpal; rate conversion uses rubato.

mod capture;
mod playback;
pub mod resampler;
pub mod util;

pub use capture::{Capture, has_input_device};
pub use playback::Player;

/// Destination for synthesized speech.
pub trait AudioSink: Send + Sync {
    /// Play mono samples, blocking until they are done.
    ///
    /// Returns `false` if playback was interrupted or timed out.
    fn play(&self, samples: &[f32]) -> bool;

    /// Cut the current playback short. Safe to call from any thread.
    fn interrupt(&self);
}

//! Error taxonomy for voice sessions.

use thiserror::Error;

use super::engine::EngineErrorCode;

/// Conditions a voice session can run into.
///
/// `TransientNetwork` and `UnexpectedTermination` are resolved inside the
/// controller; everything else reaches the caller through
/// [`SessionEvent::Error`](super::SessionEvent::Error).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoiceError {
    /// The host has no usable recognition capability.
    #[error("Speech recognition is not supported on this platform")]
    UnsupportedPlatform,

    /// A network-class engine error that will be retried.
    #[error("Speech recognition network error. Please check your internet connection.")]
    TransientNetwork,

    /// Network errors kept recurring after every allowed retry.
    #[error("Speech recognition network error after {attempts} retries. Please check your internet connection.")]
    RetryExhausted { attempts: u32 },

    /// Any other engine error code.
    #[error("Speech recognition error: {code}")]
    Engine { code: EngineErrorCode },

    /// The engine ended without being asked to and without reporting an error.
    #[error("Speech recognition ended unexpectedly")]
    UnexpectedTermination,

    /// The engine could not be created or refused to start.
    #[error("Could not start speech recognition: {0}")]
    StartFailed(String),
}

impl VoiceError {
    /// Whether this error ends the session and is surfaced to the caller.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, VoiceError::TransientNetwork | VoiceError::UnexpectedTermination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_not_fatal() {
        assert!(!VoiceError::TransientNetwork.is_fatal());
        assert!(!VoiceError::UnexpectedTermination.is_fatal());
        assert!(VoiceError::UnsupportedPlatform.is_fatal());
        assert!(VoiceError::RetryExhausted { attempts: 3 }.is_fatal());
        assert!(VoiceError::StartFailed("busy".into()).is_fatal());
    }

    #[test]
    fn test_engine_error_message_names_code() {
        let err = VoiceError::Engine { code: EngineErrorCode::AudioCapture };
        assert_eq!(err.to_string(), "Speech recognition error: audio-capture");
    }
}

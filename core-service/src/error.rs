use bridge_traits::BridgeError;
use core_playback::PlaybackError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Nothing has been finalized yet, or the recording was released.
    #[error("No recording available")]
    NoRecording,

    /// The service could not be reached at all.
    #[error("Synthesis service unreachable: {0}")]
    Unreachable(String),

    /// The service answered with a non-2xx status.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Transport error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),
}

impl CoreError {
    /// Text suitable for showing to the person who asked for speech.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::Unreachable(_) => {
                "Cannot reach the server. Check that the TTS service is running.".to_string()
            }
            CoreError::Rejected { message, .. } => message.clone(),
            CoreError::Playback(PlaybackError::EmptyStream { .. }) => {
                "The server returned empty audio. Please try again.".to_string()
            }
            other => format!("Audio generation failed: {}", other),
        }
    }

    /// Whether sending the same request again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Unreachable(_) => true,
            CoreError::Rejected { status, .. } => *status >= 500,
            CoreError::Bridge(BridgeError::Timeout | BridgeError::ConnectionFailed(_)) => true,
            CoreError::Playback(err) => err.is_transient(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        let rejected = CoreError::Rejected {
            status: 422,
            message: "Text too long".to_string(),
        };
        assert_eq!(rejected.to_string(), "Text too long");
        assert_eq!(rejected.user_message(), "Text too long");
        assert!(!rejected.is_retryable());

        let empty = CoreError::from(PlaybackError::EmptyStream { skipped: 0 });
        assert_eq!(
            empty.user_message(),
            "The server returned empty audio. Please try again."
        );

        let down = CoreError::Unreachable("connection refused".to_string());
        assert!(down.user_message().starts_with("Cannot reach the server"));
        assert!(down.is_retryable());
    }

    #[test]
    fn test_server_errors_are_retryable() {
        let err = CoreError::Rejected {
            status: 503,
            message: "Server error: 503".to_string(),
        };
        assert!(err.is_retryable());
        assert!(!CoreError::NoRecording.is_retryable());
    }
}

//! Error types for the Chalktalk orchestration layer
//!
//! Failures are captured at component boundaries and surfaced either as a
//! user-visible status string or a log entry; nothing propagates far enough
//! to halt the orchestrator loop.

use thiserror::Error;

/// Chalktalk errors
#[derive(Error, Debug, Clone)]
pub enum ChalkError {
    /// Speech capture unavailable or failed mid-utterance
    #[error("Capture error: {0}")]
    CaptureError(String),

    /// Model request or stream failure
    #[error("Completion error: {0}")]
    CompletionError(String),

    /// Speech synthesis failure
    #[error("Synthesis error: {0}")]
    SynthesisError(String),

    /// Board channel connectivity error
    #[error("Board channel error: {0}")]
    ChannelError(String),

    /// Internal channel communication error
    #[error("Internal error: {0}")]
    InternalError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<std::io::Error> for ChalkError {
    fn from(e: std::io::Error) -> Self {
        ChalkError::InternalError(e.to_string())
    }
}

impl ChalkError {
    /// Check if this error is recoverable
    ///
    /// Recoverable errors let the conversation keep advancing; non-recoverable
    /// ones end the current session.
    pub fn is_recoverable(&self) -> bool {
        match self {
            // A missing or broken capture engine ends the turn cycle
            ChalkError::CaptureError(_) => false,
            // A failed model request cannot produce a turn
            ChalkError::CompletionError(_) => false,
            // Playback failures must not strand the session in Speaking
            ChalkError::SynthesisError(_) => true,
            // Connectivity degrades to local simulation instead of failing out
            ChalkError::ChannelError(_) => true,
            // Internal channel breakage means a worker is gone
            ChalkError::InternalError(_) => false,
            // Config errors require user intervention
            ChalkError::ConfigError(_) => false,
        }
    }

    /// Get a user-friendly description of the error
    ///
    /// Returns a message suitable for display as session status.
    pub fn user_message(&self) -> String {
        match self {
            ChalkError::CaptureError(_) => {
                "Speech capture failed. Please check your microphone.".to_string()
            }
            ChalkError::CompletionError(_) => {
                "The tutor could not produce a response. Please try again.".to_string()
            }
            ChalkError::SynthesisError(_) => {
                "Voice playback failed. The conversation will continue.".to_string()
            }
            ChalkError::ChannelError(_) => {
                "Board connection lost. Drawing commands run in local mode.".to_string()
            }
            ChalkError::InternalError(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
            ChalkError::ConfigError(_) => {
                "Configuration error. Please check settings.".to_string()
            }
        }
    }
}

/// Result type alias for Chalktalk operations
pub type Result<T> = std::result::Result<T, ChalkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverability() {
        assert!(!ChalkError::CaptureError("no device".into()).is_recoverable());
        assert!(!ChalkError::CompletionError("timeout".into()).is_recoverable());
        assert!(ChalkError::SynthesisError("interrupted".into()).is_recoverable());
        assert!(ChalkError::ChannelError("abnormal close".into()).is_recoverable());
    }

    #[test]
    fn test_user_messages_are_nonempty() {
        let errors = [
            ChalkError::CaptureError("x".into()),
            ChalkError::CompletionError("x".into()),
            ChalkError::SynthesisError("x".into()),
            ChalkError::ChannelError("x".into()),
            ChalkError::InternalError("x".into()),
            ChalkError::ConfigError("x".into()),
        ];
        for e in errors {
            assert!(!e.user_message().is_empty());
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: ChalkError = io.into();
        assert!(matches!(err, ChalkError::InternalError(_)));
    }
}

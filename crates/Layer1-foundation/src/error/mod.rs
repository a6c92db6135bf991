//! Error types for Tether
//!
//! Every fallible operation in the workspace returns [`Result`]. The variants
//! map onto the four caller-visible categories (not found, invalid state,
//! spawn/transport failure, and the non-error timeout which is modelled by
//! [`crate::WaitOutcome`] instead).

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Tether error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Lookup
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No active debug session")]
    NoActiveSession,

    // ========================================================================
    // State
    // ========================================================================
    #[error("Invalid state: {0}")]
    InvalidState(String),

    // ========================================================================
    // Process / protocol
    // ========================================================================
    #[error("Spawn failed: {0}")]
    Spawn(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Adapter error: {command} - {message}")]
    Adapter { command: String, message: String },

    // ========================================================================
    // Input / configuration
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // External conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable category for the request/response surface
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::NoActiveSession => "no_active_session",
            Error::InvalidState(_) => "invalid_state",
            Error::Spawn(_) => "spawn_failure",
            Error::Transport(_) | Error::Adapter { .. } => "transport_failure",
            Error::Config(_) => "config",
            Error::InvalidInput(_) | Error::Json(_) => "invalid_input",
            Error::Io(_) | Error::Internal(_) => "internal",
        }
    }

    /// Whether the error is caused by the caller's request rather than the engine
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::NoActiveSession
                | Error::InvalidState(_)
                | Error::InvalidInput(_)
        )
    }

    /// Adapter-reported failure helper
    pub fn adapter(command: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Adapter {
            command: command.into(),
            message: message.into(),
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_maps_taxonomy() {
        assert_eq!(Error::NotFound("x".into()).kind(), "not_found");
        assert_eq!(Error::InvalidState("x".into()).kind(), "invalid_state");
        assert_eq!(Error::Spawn("x".into()).kind(), "spawn_failure");
        assert_eq!(Error::adapter("stackTrace", "boom").kind(), "transport_failure");
        assert_eq!(Error::NoActiveSession.kind(), "no_active_session");
    }

    #[test]
    fn test_adapter_display() {
        let err = Error::adapter("evaluate", "not available");
        assert_eq!(err.to_string(), "Adapter error: evaluate - not available");
        assert!(!err.is_user_facing());
    }
}

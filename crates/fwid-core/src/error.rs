//! Core error types for the identity agent

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for the agent crates
#[derive(Error, Debug)]
pub enum FwidError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An event source failed to start
    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),

    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Re-login request error
    #[error("Re-login error: {0}")]
    ReLogin(#[from] ReLoginError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// JSON serialize error
    #[error("JSON serialize error: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Errors raised while starting an event source (monitor, detector, control surface)
///
/// These are the only errors allowed to abort agent startup.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// The credential cache location could not be determined
    #[error("Cannot resolve credential cache path: {0}")]
    CCachePath(String),

    /// Watching a directory failed
    #[error("Cannot watch {path}: {reason}")]
    Watch { path: PathBuf, reason: String },

    /// The source was started twice
    #[error("Already started")]
    AlreadyStarted,

    /// Binding a socket or another I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Source specific failure
    #[error("{0}")]
    Other(String),
}

/// Session client errors
///
/// All of them are transient: the session client logs them and retries
/// on its own timer.
#[derive(Error, Debug)]
pub enum SessionError {
    /// No credential for the realm, or no way to turn one into a token
    #[error("Authentication material missing: {0}")]
    AuthMaterialMissing(String),

    /// Negotiate token could not be produced
    #[error("Token error: {0}")]
    Token(String),

    /// Transport failure talking to the service
    #[error("Communication error: {0}")]
    Communication(String),

    /// Service answered with a non-success status
    #[error("Service returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body could not be read
    #[error("Backend error: {0}")]
    Backend(String),

    /// Request did not complete in time
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl SessionError {
    /// Stable numeric code for logs
    pub fn code(&self) -> u32 {
        match self {
            SessionError::AuthMaterialMissing(_) => 1,
            SessionError::Token(_) => 2,
            SessionError::Communication(_) | SessionError::Timeout(_) => 100,
            SessionError::Status { .. } | SessionError::Backend(_) => 101,
        }
    }
}

/// Errors returned to the requester of a re-login
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReLoginError {
    /// Re-login is only possible on a trusted network
    #[error("not on a trusted network")]
    NotTrusted,

    /// The agent stopped before answering
    #[error("agent is not running")]
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_codes() {
        assert_eq!(SessionError::AuthMaterialMissing("no tgt".into()).code(), 1);
        assert_eq!(SessionError::Token("helper".into()).code(), 2);
        assert_eq!(SessionError::Timeout(Duration::from_secs(1)).code(), 100);
        assert_eq!(
            SessionError::Status {
                status: 403,
                body: "denied".into()
            }
            .code(),
            101
        );
    }

    #[test]
    fn test_error_display() {
        let err = SessionError::Status {
            status: 500,
            body: "oops".into(),
        };
        assert_eq!(err.to_string(), "Service returned status 500: oops");
        assert_eq!(ReLoginError::NotTrusted.to_string(), "not on a trusted network");

        let top: FwidError = ConfigError::MissingField("realm".into()).into();
        assert_eq!(
            top.to_string(),
            "Configuration error: Missing required field: realm"
        );
    }
}

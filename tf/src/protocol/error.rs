//! Protocol error types

use thiserror::Error;

/// Errors raised by protocol modules and their sessions
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out after {timeout_ms}ms waiting for {waiting_for} from {host}")]
    Timeout {
        host: String,
        waiting_for: String,
        timeout_ms: u64,
    },

    #[error("Connection to {host} closed")]
    ConnectionClosed { host: String },

    #[error("Authentication on {host} failed: {reason}")]
    AuthenticationFailed { host: String, reason: String },

    #[error("Missing {what} for {host}")]
    MissingCredentials { host: String, what: String },

    #[error("Invalid {name} pattern: {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("Session is not connected")]
    NotConnected,

    #[error("Command '{command}' failed on {host}: {reason}")]
    CommandFailed {
        host: String,
        command: String,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = ProtocolError::Timeout {
            host: "r1.example.com".to_string(),
            waiting_for: "prompt".to_string(),
            timeout_ms: 1500,
        };

        let msg = err.to_string();
        assert!(msg.contains("r1.example.com"));
        assert!(msg.contains("1500ms"));
        assert!(msg.contains("prompt"));
    }
}

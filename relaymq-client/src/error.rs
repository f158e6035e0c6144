//! Error types for the RelayMQ client library

use thiserror::Error;

/// Main error type for RelayMQ client operations
#[derive(Debug, Error)]
pub enum RelaymqClientError {
    /// Connection-related errors
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// The operation requires an established connection
    #[error("Not connected to broker")]
    NotConnected,

    /// Wire protocol errors from the shared codec
    #[error("Protocol error: {0}")]
    Protocol(#[from] relaymq::RelaymqError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection attempt exceeded its timeout
    #[error("Connection timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl RelaymqClientError {
    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a new invalid config error
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Check if this error is retryable by a reconnect attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::NotConnected | Self::Timeout { .. } | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(RelaymqClientError::NotConnected.is_retryable());
        assert!(RelaymqClientError::timeout(1000).is_retryable());
        assert!(RelaymqClientError::connection("refused").is_retryable());
        assert!(!RelaymqClientError::invalid_config("bad").is_retryable());
    }
}

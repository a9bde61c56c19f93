//! Error types for key/value store operations
//!
//! This module defines the error type shared by the store backends, the
//! session store and the event bus.

use thiserror::Error;

/// Main error type for store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection error - the backend could not be reached
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms: {context}")]
    TimeoutError { timeout_ms: u64, context: String },

    /// Storage capacity exhausted and nothing left to evict
    #[error("Store capacity exceeded: limit is {limit_bytes} bytes")]
    CapacityError { limit_bytes: usize },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Value stored under a key has the wrong shape for the command
    #[error("Wrong value type for key {key}: {expected}")]
    WrongType { key: String, expected: &'static str },

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl StoreError {
    /// Whether retrying the operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::ConnectionError(_) | StoreError::TimeoutError { .. }
        )
    }
}

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::SerializationError(e.to_string())
    }
}

impl From<String> for StoreError {
    fn from(s: String) -> Self {
        StoreError::Other(s)
    }
}

impl From<&str> for StoreError {
    fn from(s: &str) -> Self {
        StoreError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = StoreError::ConnectionError("refused".to_string());
        assert_eq!(error.to_string(), "Connection error: refused");

        let timeout_error = StoreError::TimeoutError {
            timeout_ms: 250,
            context: "GET vitals:p1:latest".to_string(),
        };
        assert!(timeout_error.to_string().contains("timed out after 250ms"));

        let capacity = StoreError::CapacityError { limit_bytes: 1024 };
        assert!(capacity.to_string().contains("1024 bytes"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::ConnectionError("down".into()).is_transient());
        assert!(StoreError::TimeoutError {
            timeout_ms: 1,
            context: "x".into()
        }
        .is_transient());
        assert!(!StoreError::SerializationError("bad".into()).is_transient());
        assert!(!StoreError::ConfigError("bad".into()).is_transient());
    }

    #[test]
    fn test_error_conversion() {
        let error: StoreError = "test error".into();
        assert!(matches!(error, StoreError::Other(_)));

        let json_err = serde_json::from_str::<u32>("not a number").unwrap_err();
        let error: StoreError = json_err.into();
        assert!(matches!(error, StoreError::SerializationError(_)));
    }
}

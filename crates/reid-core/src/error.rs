//! Error types for the re-identification system.

use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for re-identification operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Malformed or degenerate embedding (wrong rank, all-zero, non-finite).
    /// Always fatal to the single call that produced it.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A collaborator call (detection, embedding, web intelligence, report) failed.
    #[error("{service} service error: {message}")]
    ExternalService { service: String, message: String },

    /// A collaborator call exceeded its deadline.
    #[error("{service} timed out after {secs}s")]
    Timeout { service: String, secs: u64 },

    /// Similarity index write failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Investigation queue is at capacity
    #[error("Queue full: {0}")]
    QueueFull(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for an [`Error::ExternalService`].
    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    /// True for failures caused by a collaborator rather than by local state.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Error::ExternalService { .. } | Error::Timeout { .. } | Error::Request(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_validation() {
        let err = Error::Validation("embedding is all zeros".to_string());
        assert_eq!(err.to_string(), "Validation error: embedding is all zeros");
    }

    #[test]
    fn test_error_display_external_service() {
        let err = Error::external("detection", "HTTP 503");
        assert_eq!(err.to_string(), "detection service error: HTTP 503");
    }

    #[test]
    fn test_error_display_timeout() {
        let err = Error::Timeout {
            service: "embedding".to_string(),
            secs: 30,
        };
        assert_eq!(err.to_string(), "embedding timed out after 30s");
    }

    #[test]
    fn test_error_display_storage() {
        let err = Error::Storage("backend unavailable".to_string());
        assert_eq!(err.to_string(), "Storage error: backend unavailable");
    }

    #[test]
    fn test_error_display_queue_full() {
        let err = Error::QueueFull("capacity 64".to_string());
        assert_eq!(err.to_string(), "Queue full: capacity 64");
    }

    #[test]
    fn test_is_external() {
        assert!(Error::external("web_intel", "boom").is_external());
        assert!(Error::Timeout {
            service: "report".into(),
            secs: 1
        }
        .is_external());
        assert!(Error::Request("refused".into()).is_external());
        assert!(!Error::Validation("bad".into()).is_external());
        assert!(!Error::Storage("bad".into()).is_external());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number");
        assert!(json_err.is_err());

        let err: Error = json_err.unwrap_err().into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}

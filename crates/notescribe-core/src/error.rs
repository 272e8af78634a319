//! Error types for notescribe.

use thiserror::Error;

/// Result type alias using notescribe's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for notescribe operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Resource not found (note, attachment, processor)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Frontmatter could not be read or would not serialize to valid YAML
    #[error("Frontmatter error: {0}")]
    Frontmatter(String),

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

    /// An external operation (script, remote task) reported failure
    #[error("Operation failed: {0}")]
    Operation(String),

    /// An operation attempt exceeded its wall-clock budget
    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// Persisting processing state or a body edit to a note failed
    #[error("State write failed: {0}")]
    StateWrite(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

impl Error {
    /// Reclassify a failed note update. Already-wrapped errors pass through.
    pub fn into_state_write(self) -> Self {
        match self {
            Error::StateWrite(_) => self,
            other => Error::StateWrite(other.to_string()),
        }
    }

    /// Whether another attempt of the same operation could succeed.
    ///
    /// Configuration and input problems fail the same way every time, so the
    /// execution engine gives up on them immediately. A failed state write
    /// leaves the operation's side effects unknown and is never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::Config(_)
                | Error::InvalidInput(_)
                | Error::Frontmatter(_)
                | Error::StateWrite(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("rec.m4a".to_string());
        assert_eq!(err.to_string(), "Not found: rec.m4a");
    }

    #[test]
    fn test_error_display_frontmatter() {
        let err = Error::Frontmatter("invalid header".to_string());
        assert_eq!(err.to_string(), "Frontmatter error: invalid header");
    }

    #[test]
    fn test_error_display_timeout() {
        let err = Error::Timeout(300);
        assert_eq!(err.to_string(), "Timed out after 300s");
    }

    #[test]
    fn test_error_display_operation() {
        let err = Error::Operation("exit status 1".to_string());
        assert_eq!(err.to_string(), "Operation failed: exit status 1");
    }

    #[test]
    fn test_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().starts_with("I/O error:"));
    }

    #[test]
    fn test_error_from_serde_yaml() {
        let yaml_err = serde_yaml::from_str::<serde_yaml::Value>("key: [unclosed").unwrap_err();
        let err: Error = yaml_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_into_state_write_wraps_once() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = Error::Io(io).into_state_write();
        assert_eq!(err.to_string(), "State write failed: I/O error: gone");
        let again = err.into_state_write();
        assert_eq!(again.to_string(), "State write failed: I/O error: gone");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Timeout(1).is_retryable());
        assert!(Error::Operation("x".into()).is_retryable());
        assert!(Error::Request("x".into()).is_retryable());
        assert!(!Error::Frontmatter("x".into()).is_retryable());
        assert!(!Error::Config("x".into()).is_retryable());
        assert!(!Error::InvalidInput("x".into()).is_retryable());
        assert!(!Error::StateWrite("x".into()).is_retryable());
        let io = std::io::Error::new(std::io::ErrorKind::Other, "broken pipe");
        assert!(Error::Io(io).is_retryable());
    }
}

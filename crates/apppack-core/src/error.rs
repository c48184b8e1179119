//! Error types for apppack

use thiserror::Error;

/// Main error type for package building and delivery
#[derive(Error, Debug)]
pub enum PackError {
    /// A required build input is missing or inconsistent
    #[error("Validation error: {0}")]
    Validation(String),

    /// General I/O error (filesystem or stream)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Key wrap/unwrap, cipher or digest failure
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// The agent answered with the `error` sentinel during delivery
    #[error("Agent rejected the request: {0}")]
    AgentRejected(String),

    /// Socket connect/write or TLS handshake failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Framing or sequence violation, or premature end of the exchange
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The client certificate expired before a connection was attempted
    #[error("Credential expired: {0}")]
    ExpiredCredential(String),

    /// Malformed manifest, container or bundle layout
    #[error("Format error: {0}")]
    Format(String),

    /// JSON encoding/decoding failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Certificate or key material could not be parsed
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// The external jar encryption tool failed; carries its combined output
    #[error("{0}")]
    JarEncryption(String),

    /// A helper executable failed or described itself incorrectly
    #[error("Helper error: {0}")]
    Helper(String),
}

impl PackError {
    /// Process exit code used by the installer stub for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            PackError::Validation(_) => 2,
            PackError::Format(_) | PackError::Serialization(_) => 5,
            PackError::Certificate(_) => 6,
            PackError::ExpiredCredential(_) => 7,
            PackError::AgentRejected(_) | PackError::Protocol(_) => 8,
            PackError::Io(_) | PackError::Crypto(_) => 9,
            PackError::Transport(_) => 12,
            PackError::JarEncryption(_) | PackError::Helper(_) => 1,
        }
    }
}

impl From<serde_json::Error> for PackError {
    fn from(e: serde_json::Error) -> Self {
        PackError::Serialization(e.to_string())
    }
}

/// Result type alias using PackError
pub type PackResult<T> = Result<T, PackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PackError::AgentRejected("app already installed".to_string());
        assert_eq!(
            format!("{}", err),
            "Agent rejected the request: app already installed"
        );
    }

    #[test]
    fn test_jar_encryption_error_is_verbatim() {
        let err = PackError::JarEncryption("Exception in thread \"main\"".to_string());
        assert_eq!(err.to_string(), "Exception in thread \"main\"");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PackError = io_err.into();
        assert!(matches!(err, PackError::Io(_)));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(PackError::ExpiredCredential("x".into()).exit_code(), 7);
        assert_eq!(PackError::Transport("x".into()).exit_code(), 12);
        assert_eq!(PackError::Protocol("x".into()).exit_code(), 8);
    }
}

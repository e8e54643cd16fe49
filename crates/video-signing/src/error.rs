use std::fmt;
use std::time::Duration;

/// The closed set of failure kinds a provider or session can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    UnsupportedAlgorithm,
    KeyError,
    ResourceExhausted,
    NotReady,
    NotSupported,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::UnsupportedAlgorithm => "unsupported algorithm",
            ErrorKind::KeyError => "key error",
            ErrorKind::ResourceExhausted => "resource exhausted",
            ErrorKind::NotReady => "not ready",
            ErrorKind::NotSupported => "not supported",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SigningError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("Key error: {0}")]
    Key(String),
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("Not ready: {0}")]
    NotReady(String),
    #[error("Operation not supported: {0}")]
    NotSupported(String),
    #[error("No signature after {0:?}")]
    Timeout(Duration),
    #[error("Signing backend failed: {0}")]
    Backend(String),
}

impl SigningError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SigningError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            SigningError::UnsupportedAlgorithm(_) => ErrorKind::UnsupportedAlgorithm,
            SigningError::Key(_) => ErrorKind::KeyError,
            SigningError::ResourceExhausted(_) | SigningError::Backend(_) => {
                ErrorKind::ResourceExhausted
            }
            SigningError::NotReady(_) | SigningError::Timeout(_) => ErrorKind::NotReady,
            SigningError::NotSupported(_) => ErrorKind::NotSupported,
        }
    }

    /// Configuration errors are never worth retrying with the same inputs.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidArgument | ErrorKind::UnsupportedAlgorithm | ErrorKind::KeyError
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_error_is_configuration() {
        let error = SigningError::Key("bad pem".into());
        assert_eq!(error.kind(), ErrorKind::KeyError);
        assert!(error.is_configuration());
    }

    #[test]
    fn timeout_maps_to_not_ready() {
        let error = SigningError::Timeout(Duration::from_millis(5));
        assert_eq!(error.kind(), ErrorKind::NotReady);
        assert!(!error.is_configuration());
    }

    #[test]
    fn backend_failure_maps_to_resource_exhausted() {
        let error = SigningError::Backend("worker gone".into());
        assert_eq!(error.kind(), ErrorKind::ResourceExhausted);
    }

    #[test]
    fn message_includes_detail() {
        let error = SigningError::InvalidArgument("hash is 20 bytes".into());
        assert_eq!(error.to_string(), "Invalid argument: hash is 20 bytes");
    }
}

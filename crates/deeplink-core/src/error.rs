//! Error types for deeplink.
//!
//! One crate-level error enum covers both collaborators. Registration
//! failures and coordination failures are separate variant families so an
//! embedder can decide how each affects its own lifetime.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the deeplink library.
#[derive(Debug, Error)]
pub enum DeeplinkError {
    // Scheme / configuration errors
    #[error("Invalid scheme {scheme:?}: {reason}")]
    InvalidScheme { scheme: String, reason: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // Registration errors
    #[error("Failed to update association for {scheme}: {message}")]
    Registration {
        scheme: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("No association registered for scheme {scheme}")]
    NotFound { scheme: String },

    #[error("Scheme registration is not supported on {platform}")]
    UnsupportedPlatform { platform: &'static str },

    // Coordination errors
    #[error("Failed to bind coordination listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not reach primary instance at {addr} after {attempts} attempt(s): {source}")]
    Connect {
        addr: SocketAddr,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out after {timeout:?} connecting to primary instance at {addr}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },

    #[error("Message of {size} bytes exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Invalid payload: {message}")]
    InvalidPayload { message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },
}

/// Result type alias for deeplink operations.
pub type Result<T> = std::result::Result<T, DeeplinkError>;

impl From<std::io::Error> for DeeplinkError {
    fn from(err: std::io::Error) -> Self {
        DeeplinkError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl DeeplinkError {
    /// Create a registration error wrapping an IO failure.
    pub fn registration(
        scheme: impl Into<String>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        DeeplinkError::Registration {
            scheme: scheme.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        DeeplinkError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// True for failures to create, modify, read or delete an association.
    pub fn is_registration_error(&self) -> bool {
        matches!(
            self,
            DeeplinkError::Registration { .. }
                | DeeplinkError::NotFound { .. }
                | DeeplinkError::UnsupportedPlatform { .. }
        )
    }

    /// True for failures of the single-instance protocol.
    pub fn is_coordination_error(&self) -> bool {
        matches!(
            self,
            DeeplinkError::Bind { .. }
                | DeeplinkError::Connect { .. }
                | DeeplinkError::ConnectTimeout { .. }
                | DeeplinkError::MessageTooLarge { .. }
                | DeeplinkError::InvalidPayload { .. }
        )
    }

    /// Check if this error may go away when the operation is retried.
    ///
    /// A secondary that could not reach the primary may succeed once the
    /// primary finishes starting up (or a new primary takes over the port).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeeplinkError::Connect { .. } | DeeplinkError::ConnectTimeout { .. }
        )
    }

    /// Map the error to a process exit status for command-line embedders.
    ///
    /// - 1: coordination failure (could not hand off, app not started)
    /// - 2: registration failure
    /// - 3: association not found
    /// - 64: invalid usage or configuration
    /// - 74: other IO failure
    pub fn exit_code(&self) -> i32 {
        match self {
            DeeplinkError::NotFound { .. } => 3,
            DeeplinkError::Registration { .. } | DeeplinkError::UnsupportedPlatform { .. } => 2,
            DeeplinkError::InvalidScheme { .. } | DeeplinkError::Config { .. } => 64,
            DeeplinkError::Io { .. } => 74,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_error_display() {
        let err = DeeplinkError::NotFound {
            scheme: "myapp".into(),
        };
        assert_eq!(err.to_string(), "No association registered for scheme myapp");
    }

    #[test]
    fn test_error_classification() {
        let connect = DeeplinkError::Connect {
            addr: loopback(4000),
            attempts: 3,
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        assert!(connect.is_coordination_error());
        assert!(!connect.is_registration_error());
        assert!(connect.is_retryable());

        let not_found = DeeplinkError::NotFound {
            scheme: "myapp".into(),
        };
        assert!(not_found.is_registration_error());
        assert!(!not_found.is_retryable());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            DeeplinkError::ConnectTimeout {
                addr: loopback(4000),
                timeout: Duration::from_secs(2),
            }
            .exit_code(),
            1
        );
        assert_eq!(
            DeeplinkError::NotFound {
                scheme: "myapp".into()
            }
            .exit_code(),
            3
        );
        assert_eq!(
            DeeplinkError::InvalidScheme {
                scheme: "".into(),
                reason: "empty".into()
            }
            .exit_code(),
            64
        );
    }
}

//! Error types for Sockrelay
//!
//! This module defines the error taxonomy shared by the connect and listen
//! controllers, and the mapping from each error to its retry class.

use crate::retry::RetryClass;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Main error type for endpoint establishment
#[derive(Error, Debug)]
pub enum RelayError {
    /// Configuration error (wrong arity, invalid range, conflicting options)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Name or port could not be resolved
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// Every port of the source port range is in use
    #[error("No port available in range {low}:{high}")]
    PortsExhausted {
        /// Lower bound of the range
        low: u16,
        /// Upper bound of the range
        high: u16,
    },

    /// Binding the local address failed
    #[error("Bind to {addr} failed: {source}")]
    Bind {
        /// Local address that was requested
        addr: SocketAddr,
        /// Underlying OS error
        source: io::Error,
    },

    /// Connecting to the remote address failed
    #[error("Connect to {addr} failed: {source}")]
    Connect {
        /// Remote address
        addr: SocketAddr,
        /// Underlying OS error
        source: io::Error,
    },

    /// Socket creation or option application failed
    #[error("Socket error: {0}")]
    Socket(io::Error),

    /// A session task could not be spawned
    #[error("Session spawn failed: {0}")]
    Spawn(String),

    /// The retry budget ran out while a transient error was pending
    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts performed
        attempts: u64,
        /// The error of the final attempt
        last: Box<RelayError>,
    },

    /// A finalize or accept collaborator failed
    #[error("Collaborator failed: {0:#}")]
    Collaborator(anyhow::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl RelayError {
    /// Classify this error for the retry loop
    pub fn retry_class(&self) -> RetryClass {
        match self {
            RelayError::Resolution(_) | RelayError::PortsExhausted { .. } | RelayError::Spawn(_) => {
                RetryClass::Later
            }
            RelayError::Bind { source, .. } | RelayError::Connect { source, .. } => {
                RetryClass::from(source)
            }
            RelayError::Config(_)
            | RelayError::Socket(_)
            | RelayError::RetriesExhausted { .. }
            | RelayError::Collaborator(_)
            | RelayError::Io(_) => RetryClass::Never,
        }
    }

    /// Whether this error is a configuration error
    pub fn is_config(&self) -> bool {
        matches!(self, RelayError::Config(_))
    }
}

/// Result alias for endpoint establishment
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn test_relay_error_display() {
        let err = RelayError::Config("wrong number of parameters".to_string());
        assert_eq!(
            format!("{}", err),
            "Configuration error: wrong number of parameters"
        );

        let err = RelayError::PortsExhausted {
            low: 40000,
            high: 40002,
        };
        assert_eq!(format!("{}", err), "No port available in range 40000:40002");

        let err = RelayError::Connect {
            addr: addr(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert_eq!(
            format!("{}", err),
            "Connect to 127.0.0.1:9000 failed: refused"
        );

        let err = RelayError::RetriesExhausted {
            attempts: 3,
            last: Box::new(RelayError::Resolution("no such host".to_string())),
        };
        assert_eq!(
            format!("{}", err),
            "Giving up after 3 attempts: Resolution error: no such host"
        );
    }

    #[test]
    fn test_retry_class_of_connect_errors() {
        let refused = RelayError::Connect {
            addr: addr(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert_eq!(refused.retry_class(), RetryClass::Now);

        let timeout = RelayError::Connect {
            addr: addr(),
            source: io::Error::new(io::ErrorKind::TimedOut, "timeout"),
        };
        assert_eq!(timeout.retry_class(), RetryClass::Later);

        let denied = RelayError::Connect {
            addr: addr(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(denied.retry_class(), RetryClass::Never);
    }

    #[test]
    fn test_retry_class_of_other_errors() {
        assert_eq!(
            RelayError::Resolution("x".into()).retry_class(),
            RetryClass::Later
        );
        assert_eq!(
            RelayError::PortsExhausted { low: 1, high: 2 }.retry_class(),
            RetryClass::Later
        );
        assert_eq!(RelayError::Spawn("x".into()).retry_class(), RetryClass::Later);
        assert_eq!(RelayError::Config("x".into()).retry_class(), RetryClass::Never);
        assert_eq!(
            RelayError::Collaborator(anyhow::anyhow!("x")).retry_class(),
            RetryClass::Never
        );
        assert_eq!(
            RelayError::Socket(io::Error::new(io::ErrorKind::Other, "x")).retry_class(),
            RetryClass::Never
        );
    }

    #[test]
    fn test_relay_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::Other, "io error");
        let err: RelayError = io_err.into();
        assert!(matches!(err, RelayError::Io(_)));
        assert!(!err.is_config());
        assert!(RelayError::Config("x".into()).is_config());
    }
}

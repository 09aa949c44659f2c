//! The session-level error type.
//!
//! Every crate in the workspace has its own error enum close to the code that
//! produces it (`TransportError`, `LeaseError`, `ProxyError`). They all convert
//! into [`Error`], which classifies a failure by how far it propagates:
//!
//! - [`ErrorKind::Connection`] and [`ErrorKind::Lease`] fail the whole session,
//!   since the build cannot start without a machine.
//! - [`ErrorKind::Forwarding`] is local to one RPC and never tears down the tunnel.
//! - [`ErrorKind::Unimplemented`] covers the fixed set of methods the tunnel
//!   refuses to forward.

use std::fmt;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

/// Boxed error used as a source.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias defaulting to [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Classification of session errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The tunnel to the build machine could not be established.
    Connection,
    /// The control plane refused, failed, or returned a malformed descriptor.
    Lease,
    /// A single forwarded RPC failed mid-flight.
    Forwarding,
    /// The method is deliberately not served through the tunnel.
    Unimplemented,
    /// An operation ran out of time.
    Timeout,
    /// The governing session was cancelled.
    Cancelled,
    /// Configuration was missing or invalid.
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Lease => write!(f, "lease"),
            Self::Forwarding => write!(f, "forwarding"),
            Self::Unimplemented => write!(f, "unimplemented"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Config => write!(f, "config"),
        }
    }
}

/// The session-level error type.
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// The tunnel could not be dialed within the retry budget.
    #[error("connection error: {message}")]
    #[diagnostic(
        code(buildtunnel::connection),
        help("the build machine may still be starting; check network reachability")
    )]
    Connection {
        /// Human-readable description.
        message: String,
        /// Underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// The control plane could not provide a machine.
    #[error("lease error: {message}")]
    #[diagnostic(code(buildtunnel::lease))]
    Lease {
        /// Human-readable description.
        message: String,
        /// Underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// A forwarded call failed.
    #[error("forwarding {method} failed: {message}")]
    #[diagnostic(code(buildtunnel::forwarding))]
    Forwarding {
        /// The RPC route that failed.
        method: String,
        /// Human-readable description.
        message: String,
    },

    /// The method is not served through the tunnel.
    #[error("{method} is not implemented by the tunnel")]
    #[diagnostic(code(buildtunnel::unimplemented))]
    Unimplemented {
        /// The RPC route.
        method: String,
    },

    /// An operation timed out.
    #[error("{operation} timed out after {duration:?}")]
    #[diagnostic(
        code(buildtunnel::timeout),
        help("no build machine became available within the retry budget")
    )]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// How long it waited.
        duration: Duration,
    },

    /// The session was cancelled.
    #[error("{operation} cancelled")]
    #[diagnostic(code(buildtunnel::cancelled))]
    Cancelled {
        /// The operation that was interrupted.
        operation: String,
    },

    /// Configuration was missing or invalid.
    #[error("invalid configuration: {message}")]
    #[diagnostic(code(buildtunnel::config))]
    Config {
        /// Human-readable description.
        message: String,
    },
}

impl Error {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with a source.
    pub fn connection_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a lease error.
    pub fn lease(message: impl Into<String>) -> Self {
        Self::Lease {
            message: message.into(),
            source: None,
        }
    }

    /// Create a lease error with a source.
    pub fn lease_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Lease {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a forwarding error.
    pub fn forwarding(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Forwarding {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Lease { .. } => ErrorKind::Lease,
            Self::Forwarding { .. } => ErrorKind::Forwarding,
            Self::Unimplemented { .. } => ErrorKind::Unimplemented,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Config { .. } => ErrorKind::Config,
        }
    }

    /// Whether this error ends the whole session rather than a single call.
    #[must_use]
    pub const fn is_session_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Connection | ErrorKind::Lease | ErrorKind::Timeout | ErrorKind::Config
        )
    }

    /// Whether this error is the result of cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::connection("refused").kind(), ErrorKind::Connection);
        assert_eq!(Error::lease("bad").kind(), ErrorKind::Lease);
        assert_eq!(
            Error::forwarding("/svc/Method", "reset").kind(),
            ErrorKind::Forwarding
        );
        assert_eq!(Error::cancelled("acquire").kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_forwarding_is_not_session_fatal() {
        assert!(Error::connection("refused").is_session_fatal());
        assert!(Error::lease("unauthorized").is_session_fatal());
        assert!(!Error::forwarding("/svc/Method", "reset").is_session_fatal());
        assert!(
            !Error::Unimplemented {
                method: "/svc/Info".to_string()
            }
            .is_session_fatal()
        );
    }

    #[test]
    fn test_display() {
        let err = Error::Timeout {
            operation: "dial".to_string(),
            duration: Duration::from_secs(300),
        };
        assert_eq!(err.to_string(), "dial timed out after 300s");

        let err = Error::forwarding("/moby.buildkit.v1.Control/Session", "stream reset");
        assert_eq!(
            err.to_string(),
            "forwarding /moby.buildkit.v1.Control/Session failed: stream reset"
        );
    }

    #[test]
    fn test_source_is_preserved() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::connection_with_source("dial failed", io);
        assert!(err.source().is_some());
    }
}

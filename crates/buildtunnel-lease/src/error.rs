//! Lease error types.

use std::time::Duration;

use buildtunnel_core::Error;
use buildtunnel_transport::TransportError;
use thiserror::Error;

/// Errors that can occur while acquiring, holding or releasing a lease.
#[derive(Error, Debug)]
pub enum LeaseError {
    /// The control plane could not be reached.
    #[error("control plane request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The control plane answered with a non-success status.
    #[error("control plane returned {status}{}: {message}", code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error code from the response body, if it carried one.
        code: Option<String>,
        /// Error message or raw response body.
        message: String,
    },

    /// The control plane answered with something we do not understand.
    #[error("control plane protocol error: {message}")]
    Protocol {
        /// What was wrong with the response.
        message: String,
    },

    /// The control plane handed out an unusable connection descriptor.
    #[error("malformed connection descriptor: {message}")]
    MalformedDescriptor {
        /// What was wrong with the descriptor.
        message: String,
    },

    /// Required configuration was missing or invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// No machine became available in time.
    #[error("no build machine became available after {0:?}")]
    Timeout(Duration),

    /// The operation was cancelled.
    #[error("{operation} cancelled")]
    Cancelled {
        /// The operation that was interrupted.
        operation: &'static str,
    },

    /// The lease has not been acquired yet.
    #[error("lease has not been acquired")]
    NotAcquired,

    /// The lease was already released.
    #[error("lease already released")]
    Released,

    /// Dialing the machine failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl LeaseError {
    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this error is the result of cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::Transport(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

impl From<LeaseError> for Error {
    fn from(err: LeaseError) -> Self {
        match err {
            LeaseError::Cancelled { operation } => Self::cancelled(operation),
            LeaseError::Timeout(duration) => Self::Timeout {
                operation: "acquire".to_string(),
                duration,
            },
            LeaseError::Config { message } => Self::config(message),
            LeaseError::Transport(err) => err.into(),
            other => Self::lease_with_source(other.to_string(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildtunnel_core::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_display() {
        let err = LeaseError::Status {
            status: 401,
            code: Some("unauthenticated".to_string()),
            message: "token expired".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "control plane returned 401 (unauthenticated): token expired"
        );

        let err = LeaseError::Status {
            status: 502,
            code: None,
            message: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "control plane returned 502: bad gateway");
    }

    #[test]
    fn test_cancellation_detection() {
        assert!(LeaseError::Cancelled { operation: "acquire" }.is_cancelled());
        assert!(LeaseError::from(TransportError::Cancelled { operation: "dial" }).is_cancelled());
        assert!(!LeaseError::protocol("empty response").is_cancelled());
    }

    #[test]
    fn test_core_error_conversion() {
        let err: Error = LeaseError::Timeout(Duration::from_secs(900)).into();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        let err: Error = LeaseError::protocol("neither active nor pending").into();
        assert_eq!(err.kind(), ErrorKind::Lease);

        let err: Error = LeaseError::from(TransportError::InvalidServerName("x y".to_string())).into();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }
}

//! Proxy error types.

use std::time::Duration;

use buildtunnel_transport::TransportError;
use thiserror::Error;

/// Errors from serving the proxy.
///
/// Failures of individual forwarded calls never appear here; they are
/// reported to that call's caller as a gRPC status.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// The gRPC server failed.
    #[error("proxy server failed: {0}")]
    Serve(#[from] tonic::transport::Error),

    /// The local transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Connections were still open when the shutdown grace period ran out.
    #[error("connections still open after {0:?} shutdown grace period")]
    GraceExpired(Duration),
}

impl ProxyError {
    /// Whether the proxy had to abandon open connections on shutdown.
    #[must_use]
    pub const fn is_grace_expired(&self) -> bool {
        matches!(self, Self::GraceExpired(_))
    }
}

impl From<ProxyError> for buildtunnel_core::Error {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::Transport(err) => err.into(),
            ProxyError::GraceExpired(duration) => Self::Timeout {
                operation: "proxy shutdown".to_string(),
                duration,
            },
            err @ ProxyError::Serve(_) => Self::connection_with_source("proxy server failed", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildtunnel_core::ErrorKind;

    #[test]
    fn test_grace_expired_is_timeout() {
        let err = ProxyError::GraceExpired(Duration::from_secs(5));
        assert!(err.is_grace_expired());

        let core: buildtunnel_core::Error = err.into();
        assert_eq!(core.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_transport_error_keeps_kind() {
        let err = ProxyError::from(TransportError::Cancelled { operation: "dial" });
        let core: buildtunnel_core::Error = err.into();
        assert_eq!(core.kind(), ErrorKind::Cancelled);
    }
}

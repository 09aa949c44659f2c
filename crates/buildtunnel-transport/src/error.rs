//! Transport error types.

use std::time::Duration;

use buildtunnel_core::Error;
use thiserror::Error;

/// Classification of transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The remote end could not be reached.
    ConnectionFailed,
    /// The connection was reset or closed by the peer.
    ConnectionClosed,
    /// The TLS handshake or TLS material was rejected.
    Tls,
    /// An attempt or the whole dial budget ran out.
    Timeout,
    /// The supplied endpoint, certificates or server name are unusable.
    InvalidConfig,
    /// The governing token was cancelled.
    Cancelled,
    /// A child process could not be started.
    Process,
}

/// Errors that can occur while dialing, listening or relaying.
#[derive(Error, Debug)]
pub enum TransportError {
    /// I/O error from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The endpoint string is not a usable `tcp://host:port` address.
    #[error("invalid endpoint '{endpoint}': {message}")]
    InvalidEndpoint {
        /// The endpoint as given.
        endpoint: String,
        /// What is wrong with it.
        message: String,
    },

    /// The CA certificate could not be loaded.
    #[error("invalid CA certificate: {message}")]
    InvalidCaCertificate {
        /// Error message.
        message: String,
    },

    /// The client certificate or key could not be loaded.
    #[error("invalid client identity: {message}")]
    InvalidClientIdentity {
        /// Error message.
        message: String,
    },

    /// The server name is not a valid DNS name or IP address.
    #[error("invalid server name '{0}'")]
    InvalidServerName(String),

    /// TLS configuration error.
    #[error("TLS error: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),

    /// A single dial attempt did not complete in time.
    #[error("dial attempt timed out after {0:?}")]
    AttemptTimeout(Duration),

    /// Every dial attempt failed.
    #[error("gave up dialing {endpoint} after {attempts} attempts in {elapsed:?}: {last}")]
    Exhausted {
        /// The endpoint being dialed.
        endpoint: String,
        /// How many attempts were made.
        attempts: u32,
        /// Time spent dialing.
        elapsed: Duration,
        /// The error from the final attempt.
        #[source]
        last: Box<TransportError>,
    },

    /// The operation was cancelled.
    #[error("{operation} cancelled")]
    Cancelled {
        /// The operation that was interrupted.
        operation: &'static str,
    },

    /// Building an HTTP/2 channel over the tunnel failed.
    #[error("channel error: {0}")]
    Channel(#[from] tonic::transport::Error),

    /// A child process could not be started.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// The program that was launched.
        program: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    /// Create an invalid endpoint error.
    pub fn invalid_endpoint(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Get the transport error kind.
    #[must_use]
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            Self::Io(e) => match e.kind() {
                std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof => TransportErrorKind::ConnectionClosed,
                std::io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
                std::io::ErrorKind::InvalidData => TransportErrorKind::Tls,
                _ => TransportErrorKind::ConnectionFailed,
            },
            Self::InvalidEndpoint { .. }
            | Self::InvalidCaCertificate { .. }
            | Self::InvalidClientIdentity { .. }
            | Self::InvalidServerName(_) => TransportErrorKind::InvalidConfig,
            Self::Tls(_) => TransportErrorKind::Tls,
            Self::AttemptTimeout(_) => TransportErrorKind::Timeout,
            Self::Exhausted { last, .. } => last.kind(),
            Self::Cancelled { .. } => TransportErrorKind::Cancelled,
            Self::Channel(_) => TransportErrorKind::ConnectionFailed,
            Self::Spawn { .. } => TransportErrorKind::Process,
        }
    }

    /// Whether another dial attempt could succeed.
    ///
    /// Bad certificate material and malformed endpoints never fix themselves.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind(),
            TransportErrorKind::InvalidConfig
                | TransportErrorKind::Cancelled
                | TransportErrorKind::Process
        )
    }

    /// Whether this error is the result of cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled { operation } => Self::cancelled(operation),
            other => Self::connection_with_source(other.to_string(), other),
        }
    }
}

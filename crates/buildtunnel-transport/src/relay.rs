//! Byte-level relay between local connections and fresh upstream tunnels.
//!
//! Every accepted local connection gets its own upstream stream from a
//! [`Dialer`], and bytes are copied in both directions until either side
//! closes. The relay knows nothing about the protocol on top.
//!
//! A failing connection never stops the accept loop. Each failure is
//! recorded in the [`RelayReport`] returned when the relay stops.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dial::{TlsDialer, TunnelStream};
use crate::error::TransportError;
use crate::listener::LocalListener;

/// Something that can open a new upstream byte stream.
pub trait Dialer: Send + Sync + 'static {
    /// The stream type produced.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a new stream, giving up when `cancel` fires.
    fn dial(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Self::Stream, TransportError>> + Send;
}

impl Dialer for TlsDialer {
    type Stream = TunnelStream;

    fn dial(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Self::Stream, TransportError>> + Send {
        Self::dial(self, cancel)
    }
}

/// One local connection that could not be relayed.
#[derive(Debug)]
pub struct RelayFailure {
    /// The local peer.
    pub peer: SocketAddr,
    /// What went wrong.
    pub error: TransportError,
}

/// Summary of a finished relay.
#[derive(Debug, Default)]
pub struct RelayReport {
    /// Connections accepted.
    pub connections: u64,
    /// Connections that failed, in the order they failed.
    pub failures: Vec<RelayFailure>,
}

impl RelayReport {
    /// Whether every connection was relayed cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// The most recent failure, if any.
    #[must_use]
    pub fn last_failure(&self) -> Option<&RelayFailure> {
        self.failures.last()
    }
}

/// Relays accepted local connections to upstream streams.
#[derive(Debug)]
pub struct Relay<D> {
    dialer: Arc<D>,
}

impl<D: Dialer> Relay<D> {
    /// Create a relay that dials through `dialer`.
    pub fn new(dialer: Arc<D>) -> Self {
        Self { dialer }
    }

    /// Accept and relay connections until `cancel` fires.
    ///
    /// In-flight connections are closed when the relay stops.
    ///
    /// # Errors
    ///
    /// Only a failure of the listener itself is returned; per-connection
    /// failures are collected in the report.
    pub async fn serve(
        &self,
        listener: LocalListener,
        cancel: CancellationToken,
    ) -> Result<RelayReport, TransportError> {
        let failures = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = JoinSet::new();
        let mut connections = 0u64;

        info!(addr = %listener.local_addr(), "relay accepting connections");

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept(&cancel) => accepted,
                Some(_) = tasks.join_next(), if !tasks.is_empty() => continue,
            };
            let Some((stream, peer)) = accepted? else {
                break;
            };

            connections += 1;
            debug!(%peer, "relaying connection");

            let dialer = Arc::clone(&self.dialer);
            let failures = Arc::clone(&failures);
            let cancel = cancel.child_token();
            tasks.spawn(async move {
                match relay_connection(&*dialer, stream, &cancel).await {
                    Ok((sent, received)) => {
                        debug!(%peer, sent, received, "connection closed");
                    }
                    Err(error) if error.is_cancelled() => {}
                    Err(error) => {
                        warn!(%peer, %error, "relay connection failed");
                        failures
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(RelayFailure { peer, error });
                    }
                }
            });
        }

        tasks.shutdown().await;

        let failures = std::mem::take(&mut *failures.lock().unwrap_or_else(PoisonError::into_inner));
        info!(connections, failed = failures.len(), "relay stopped");
        Ok(RelayReport {
            connections,
            failures,
        })
    }
}

async fn relay_connection<D: Dialer>(
    dialer: &D,
    mut local: TcpStream,
    cancel: &CancellationToken,
) -> Result<(u64, u64), TransportError> {
    let mut upstream = dialer.dial(cancel).await?;
    tokio::select! {
        () = cancel.cancelled() => Err(TransportError::Cancelled { operation: "relay" }),
        copied = tokio::io::copy_bidirectional(&mut local, &mut upstream) => Ok(copied?),
    }
}

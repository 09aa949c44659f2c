//! Loopback listener whose address is handed to a child process.

use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;

use futures::{Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::TransportError;

/// Environment variable a BuildKit client reads its daemon address from.
pub const BUILDKIT_HOST_ENV: &str = "BUILDKIT_HOST";

/// Stream of accepted connections that ends when its token is cancelled.
pub type Incoming = Pin<Box<dyn Stream<Item = std::io::Result<TcpStream>> + Send>>;

/// A TCP listener on the loopback interface.
#[derive(Debug)]
pub struct LocalListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl LocalListener {
    /// Bind `127.0.0.1` on an ephemeral port.
    pub async fn bind() -> Result<Self, TransportError> {
        Self::bind_addr(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).await
    }

    /// Bind a specific address.
    pub async fn bind_addr(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "local listener bound");
        Ok(Self { listener, addr })
    }

    /// The bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// The address as a `tcp://` URL, the form BuildKit clients expect.
    #[must_use]
    pub fn url(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    /// The `BUILDKIT_HOST` entry for a child's environment.
    #[must_use]
    pub fn env(&self) -> (&'static str, String) {
        (BUILDKIT_HOST_ENV, self.url())
    }

    /// Accept one connection, or `None` once `cancel` fires.
    pub async fn accept(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<(TcpStream, SocketAddr)>, TransportError> {
        tokio::select! {
            () = cancel.cancelled() => Ok(None),
            accepted = self.listener.accept() => {
                let (stream, peer) = accepted?;
                stream.set_nodelay(true)?;
                Ok(Some((stream, peer)))
            }
        }
    }

    /// Turn the listener into a connection stream for a server.
    ///
    /// The stream ends, and the socket closes, once `cancel` fires.
    #[must_use]
    pub fn into_incoming(self, cancel: CancellationToken) -> Incoming {
        let stopped = async move { cancel.cancelled().await };
        Box::pin(TcpListenerStream::new(self.listener).take_until(stopped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_loopback() {
        let listener = LocalListener::bind().await.unwrap();
        let addr = listener.local_addr();

        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
        assert_eq!(listener.url(), format!("tcp://127.0.0.1:{}", addr.port()));

        let (key, value) = listener.env();
        assert_eq!(key, "BUILDKIT_HOST");
        assert_eq!(value, listener.url());
    }

    #[tokio::test]
    async fn test_accept_returns_none_after_cancel() {
        let listener = LocalListener::bind().await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(listener.accept(&cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_incoming_ends_on_cancel() {
        let listener = LocalListener::bind().await.unwrap();
        let addr = listener.local_addr();
        let cancel = CancellationToken::new();
        let mut incoming = listener.into_incoming(cancel.clone());

        let _client = TcpStream::connect(addr).await.unwrap();
        assert!(incoming.next().await.unwrap().is_ok());

        cancel.cancel();
        assert!(incoming.next().await.is_none());
    }
}

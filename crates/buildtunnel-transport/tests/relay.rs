//! Byte relay tests with plain TCP upstreams.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use buildtunnel_transport::relay::{Dialer, Relay};
use buildtunnel_transport::{LocalListener, TransportError};
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// Dials a plain TCP address; fails the first `failures` attempts.
struct TcpDialer {
    addr: SocketAddr,
    failures: usize,
    calls: AtomicUsize,
}

impl TcpDialer {
    fn new(addr: SocketAddr, failures: usize) -> Self {
        Self {
            addr,
            failures,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Dialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self, _cancel: &CancellationToken) -> Result<TcpStream, TransportError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(TransportError::invalid_endpoint("tcp://upstream", "refused by test"));
        }
        Ok(TcpStream::connect(self.addr).await?)
    }
}

async fn spawn_upstream_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut read, mut write) = stream.split();
                let _ = tokio::io::copy(&mut read, &mut write).await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn test_relays_bytes_both_ways() {
    let upstream = spawn_upstream_echo().await;
    let listener = LocalListener::bind().await.unwrap();
    let local = listener.local_addr();
    let cancel = CancellationToken::new();

    let relay = Relay::new(Arc::new(TcpDialer::new(upstream, 0)));
    let serve = tokio::spawn({
        let cancel = cancel.clone();
        async move { relay.serve(listener, cancel).await }
    });

    for payload in [&b"first"[..], &b"second"[..]] {
        let mut client = TcpStream::connect(local).await.unwrap();
        client.write_all(payload).await.unwrap();
        let mut buf = vec![0u8; payload.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, payload);
    }

    cancel.cancel();
    let report = tokio::time::timeout(Duration::from_secs(5), serve)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.connections, 2);
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_failures_are_collected_and_accepting_continues() {
    let upstream = spawn_upstream_echo().await;
    let listener = LocalListener::bind().await.unwrap();
    let local = listener.local_addr();
    let cancel = CancellationToken::new();

    let relay = Relay::new(Arc::new(TcpDialer::new(upstream, 2)));
    let serve = tokio::spawn({
        let cancel = cancel.clone();
        async move { relay.serve(listener, cancel).await }
    });

    for _ in 0..2 {
        let mut client = TcpStream::connect(local).await.unwrap();
        let mut buf = Vec::new();
        // The relay drops the local side when dialing fails.
        client.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    let mut client = TcpStream::connect(local).await.unwrap();
    client.write_all(b"third").await.unwrap();
    let mut buf = [0u8; 5];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"third");

    cancel.cancel();
    let report = serve.await.unwrap().unwrap();
    assert_eq!(report.connections, 3);
    assert_eq!(report.failures.len(), 2);
    assert!(report.last_failure().is_some());
}

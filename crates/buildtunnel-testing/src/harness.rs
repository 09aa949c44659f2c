//! Wiring a proxy to a fake daemon in memory or over TLS.
//!
//! ```text
//! client ──duplex──▶ Proxy ──duplex──▶ FakeDaemon
//! ```

use std::io;
use std::net::SocketAddr;

use buildtunnel_proxy::rpc::{ContentServer, ControlServer, HealthServer};
use buildtunnel_proxy::{Proxy, ProxyConfig, ProxyError, Upstream};
use buildtunnel_transport::{ChannelConfig, DuplexStream, into_channel};
use futures::stream::{self, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Router;
use tonic::transport::{Channel, Server};

use crate::daemon::FakeDaemon;
use crate::fixtures;

/// Buffer size of the in-memory pipes.
const PIPE_CAPACITY: usize = 64 * 1024;

fn daemon_router(daemon: &FakeDaemon) -> Router {
    Server::builder()
        .add_service(ControlServer::new(daemon.clone()))
        .add_service(ContentServer::new(daemon.clone()))
        .add_service(HealthServer::new(daemon.clone()))
}

/// Serve `daemon` over an in-memory pipe and return a channel to it.
///
/// # Panics
///
/// Panics if the channel cannot be established.
pub async fn connect_daemon(daemon: &FakeDaemon) -> Channel {
    let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
    let router = daemon_router(daemon);
    tokio::spawn(async move {
        let incoming = stream::iter([Ok::<_, io::Error>(server)]).chain(stream::pending());
        let _ = router.serve_with_incoming(incoming).await;
    });
    into_channel(client, "localhost", &ChannelConfig::default())
        .await
        .expect("in-memory daemon channel")
}

/// Serve `daemon` over TLS with the fixture PKI, returning its address.
///
/// # Panics
///
/// Panics if no local port can be bound.
pub async fn serve_daemon_tls(daemon: &FakeDaemon) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind TLS daemon");
    let addr = listener.local_addr().expect("TLS daemon address");
    let acceptor = fixtures::tls_acceptor(false);
    let (tx, rx) = mpsc::channel(8);

    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Ok(tls) = acceptor.accept(tcp).await {
                    let (read, write) = tokio::io::split(tls);
                    let _ = tx.send(Ok::<_, io::Error>(DuplexStream::new(read, write))).await;
                }
            });
        }
    });

    let router = daemon_router(daemon);
    tokio::spawn(async move {
        let _ = router.serve_with_incoming(ReceiverStream::new(rx)).await;
    });
    addr
}

/// A proxy served over an in-memory pipe.
#[derive(Debug)]
pub struct ProxyHarness {
    /// Raw client talking to the proxy.
    pub client: Upstream,
    /// Token governing the proxy.
    pub cancel: CancellationToken,
    /// The proxy's serve task.
    pub task: JoinHandle<Result<(), ProxyError>>,
}

impl ProxyHarness {
    /// Start a proxy in front of `daemon`.
    ///
    /// # Panics
    ///
    /// Panics if either in-memory channel cannot be established.
    pub async fn start(daemon: &FakeDaemon, config: ProxyConfig) -> Self {
        let upstream = connect_daemon(daemon).await;
        let cancel = CancellationToken::new();
        let max_message_size = config.max_message_size;
        let proxy = Proxy::new(upstream, config, cancel.clone());

        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        let task = tokio::spawn(async move { proxy.serve_io(server).await });
        let channel = into_channel(client, "localhost", &ChannelConfig::default())
            .await
            .expect("in-memory proxy channel");

        Self {
            client: Upstream::new(channel, max_message_size),
            cancel,
            task,
        }
    }
}

//! Serving the proxied services on a local transport.
//!
//! The proxy is a cleartext HTTP/2 gRPC server. It can be served on a stream
//! of accepted connections (the loopback listener) or on a single
//! connection (the process's stdio).
//!
//! Shutdown is driven by the session's cancellation token. When it fires,
//! the server stops accepting, every forwarded stream is cancelled, and
//! open connections get [`ProxyConfig::shutdown_grace`] to finish before
//! the server is abandoned.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use buildtunnel_core::{BoxError, Platform};
use buildtunnel_transport::LocalListener;
use futures::{Stream, StreamExt, stream};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::{CancellationToken, DropGuard};
use tonic::transport::server::{Connected, Router};
use tonic::transport::{Channel, Server};
use tracing::{debug, info, warn};

use crate::error::ProxyError;
use crate::rpc::{
    ContentServer, ControlServer, HealthServer, LLBBridgeServer, LeasesServer, TraceServiceServer,
};
use crate::service::{
    ContentService, ControlService, Forwarder, GatewayService, HealthService, LeasesService,
    TelemetryService,
};
use crate::upstream::Upstream;

/// Default maximum message size in either direction (16 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default time open connections get to finish after shutdown starts.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// =============================================================================
// Configuration
// =============================================================================

/// Proxy settings.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Platform of the leased machine, used for synthesized answers.
    pub platform: Platform,
    /// Maximum message size, applied locally and upstream.
    pub max_message_size: usize,
    /// Grace period for open connections after shutdown starts.
    pub shutdown_grace: Duration,
    /// HTTP/2 keepalive interval on local connections.
    pub keepalive_interval: Option<Duration>,
}

impl ProxyConfig {
    /// Default settings for a machine of `platform`.
    #[must_use]
    pub const fn new(platform: Platform) -> Self {
        Self {
            platform,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            keepalive_interval: None,
        }
    }

    /// Set the maximum message size.
    #[must_use]
    pub const fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the HTTP/2 keepalive interval.
    #[must_use]
    pub const fn keepalive_interval(mut self, interval: Option<Duration>) -> Self {
        self.keepalive_interval = interval;
        self
    }
}

// =============================================================================
// Proxy
// =============================================================================

/// The local gRPC face of a remote daemon.
#[derive(Debug, Clone)]
pub struct Proxy {
    config: ProxyConfig,
    forwarder: Forwarder,
    cancel: CancellationToken,
}

impl Proxy {
    /// Create a proxy forwarding to `channel`.
    ///
    /// Cancelling `cancel` shuts the proxy down and ends every stream it
    /// forwards.
    #[must_use]
    pub fn new(channel: Channel, config: ProxyConfig, cancel: CancellationToken) -> Self {
        let upstream = Upstream::new(channel, config.max_message_size);
        let forwarder = Forwarder::new(upstream, cancel.clone());
        Self {
            config,
            forwarder,
            cancel,
        }
    }

    /// The proxy's settings.
    #[must_use]
    pub const fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// The token governing the proxy.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Build a router carrying all six services.
    #[must_use]
    pub fn router(&self) -> Router {
        let size = self.config.max_message_size;
        let platform = &self.config.platform;
        let forwarder = &self.forwarder;

        Server::builder()
            .http2_keepalive_interval(self.config.keepalive_interval)
            .add_service(
                ControlServer::new(ControlService::new(forwarder.clone(), platform.clone()))
                    .max_decoding_message_size(size)
                    .max_encoding_message_size(size),
            )
            .add_service(
                LLBBridgeServer::new(GatewayService::new(forwarder.clone(), platform.clone()))
                    .max_decoding_message_size(size)
                    .max_encoding_message_size(size),
            )
            .add_service(
                ContentServer::new(ContentService::new(forwarder.clone()))
                    .max_decoding_message_size(size)
                    .max_encoding_message_size(size),
            )
            .add_service(
                LeasesServer::new(LeasesService::new(forwarder.clone()))
                    .max_decoding_message_size(size)
                    .max_encoding_message_size(size),
            )
            .add_service(
                HealthServer::new(HealthService::new(forwarder.clone()))
                    .max_decoding_message_size(size)
                    .max_encoding_message_size(size),
            )
            .add_service(
                TraceServiceServer::new(TelemetryService::new(forwarder.clone()))
                    .max_decoding_message_size(size)
                    .max_encoding_message_size(size),
            )
    }

    /// Serve every connection `incoming` yields until the token fires.
    pub async fn serve_incoming<I, IO, IE>(&self, incoming: I) -> Result<(), ProxyError>
    where
        I: Stream<Item = Result<IO, IE>> + Send + 'static,
        IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
        IO::ConnectInfo: Clone + Send + Sync + 'static,
        IE: Into<BoxError>,
    {
        self.serve_until(incoming, self.cancel.clone()).await
    }

    /// Serve connections accepted on `listener` until the token fires.
    pub async fn serve_listener(&self, listener: LocalListener) -> Result<(), ProxyError> {
        info!(addr = %listener.local_addr(), "serving proxy on local listener");
        self.serve_incoming(listener.into_incoming(self.cancel.clone()))
            .await
    }

    /// Serve a single connection.
    ///
    /// Returns once the peer closes the connection or the token fires.
    pub async fn serve_io<IO>(&self, conn: IO) -> Result<(), ProxyError>
    where
        IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
        IO::ConnectInfo: Clone + Send + Sync + 'static,
    {
        let closed = self.cancel.child_token();
        let conn = Guarded {
            io: conn,
            _guard: closed.clone().drop_guard(),
        };
        // The incoming stream must stay open: the server stops serving as
        // soon as it ends.
        let incoming = stream::iter([Ok::<_, io::Error>(conn)]).chain(stream::pending());
        debug!("serving proxy on a single connection");
        self.serve_until(incoming, closed).await
    }

    async fn serve_until<I, IO, IE>(
        &self,
        incoming: I,
        stop: CancellationToken,
    ) -> Result<(), ProxyError>
    where
        I: Stream<Item = Result<IO, IE>> + Send + 'static,
        IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
        IO::ConnectInfo: Clone + Send + Sync + 'static,
        IE: Into<BoxError>,
    {
        let signal = {
            let stop = stop.clone();
            async move { stop.cancelled().await }
        };
        let serve = self
            .router()
            .serve_with_incoming_shutdown(incoming, signal);
        tokio::pin!(serve);

        tokio::select! {
            result = &mut serve => return result.map_err(ProxyError::from),
            () = stop.cancelled() => {}
        }

        let grace = self.config.shutdown_grace;
        debug!(?grace, "proxy shutting down");
        match tokio::time::timeout(grace, serve).await {
            Ok(result) => {
                info!("proxy stopped");
                result.map_err(ProxyError::from)
            }
            Err(_) => {
                warn!(?grace, "connections still open after grace period, abandoning them");
                Err(ProxyError::GraceExpired(grace))
            }
        }
    }
}

pin_project! {
    /// A connection that fires a token once the server drops it.
    struct Guarded<IO> {
        #[pin]
        io: IO,
        _guard: DropGuard,
    }
}

impl<IO: AsyncRead> AsyncRead for Guarded<IO> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.project().io.poll_read(cx, buf)
    }
}

impl<IO: AsyncWrite> AsyncWrite for Guarded<IO> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().io.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().io.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().io.poll_shutdown(cx)
    }
}

impl<IO: Connected> Connected for Guarded<IO> {
    type ConnectInfo = IO::ConnectInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        self.io.connect_info()
    }
}

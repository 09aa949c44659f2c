//! A build session: one lease, one local transport, one local client.
//!
//! A session acquires a machine, exposes it locally in one of three
//! [`Mode`]s, and releases the machine when the local side is done:
//!
//! - [`Mode::DialStdio`]: the proxy is served on this process's stdin and
//!   stdout until the parent hangs up.
//! - [`Mode::Exec`]: the proxy is served on a loopback listener and a child
//!   process runs with `BUILDKIT_HOST` pointing at it.
//! - [`Mode::Relay`]: like `Exec`, but every local connection is relayed as
//!   raw bytes over its own TLS tunnel.

use std::process::ExitStatus;
use std::sync::Arc;

use buildtunnel_core::{Error, LeaseRequest, Result};
use buildtunnel_lease::{
    ClientCell, ControlPlane, HttpControlPlane, Lease, LeaseConfig, LeaseSettings, host_platform,
};
use buildtunnel_proxy::{Proxy, ProxyConfig, ProxyError};
use buildtunnel_transport::{
    ChildCommand, LocalListener, Relay, RelayReport, TransportError, stdio,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Connected;
use tracing::{error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Settings for a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Lease settings.
    pub lease: LeaseConfig,
    /// Proxy settings. The platform is replaced by the leased machine's.
    pub proxy: ProxyConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lease: LeaseConfig::default(),
            proxy: ProxyConfig::new(host_platform()),
        }
    }
}

impl SessionConfig {
    /// Set the lease settings.
    #[must_use]
    pub fn lease(mut self, lease: LeaseConfig) -> Self {
        self.lease = lease;
        self
    }

    /// Set the proxy settings.
    #[must_use]
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = proxy;
        self
    }
}

// =============================================================================
// Modes
// =============================================================================

/// How the machine is exposed locally.
///
/// The binary builds one from its command line with [`Cli::mode`](crate::Cli::mode).
#[derive(Debug, Clone)]
pub enum Mode {
    /// Serve the proxy on this process's stdio.
    DialStdio,
    /// Serve the proxy on a local listener and run a child against it.
    Exec(ChildCommand),
    /// Relay raw bytes from a local listener and run a child against it.
    Relay(ChildCommand),
}

/// How a session ended.
#[derive(Debug)]
pub enum Outcome {
    /// The stdio peer hung up.
    Disconnected,
    /// The child process exited while the proxy served it.
    ChildExited(ExitStatus),
    /// The child process exited while its connections were relayed.
    Relayed {
        /// The child's exit status.
        status: ExitStatus,
        /// What happened to the relayed connections.
        report: RelayReport,
    },
}

impl Outcome {
    /// The process exit code this outcome maps to.
    ///
    /// A child killed by a signal maps to 1.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        let status = match self {
            Self::Disconnected => return 0,
            Self::ChildExited(status) | Self::Relayed { status, .. } => status,
        };
        match status.code() {
            Some(code) => u8::try_from(code).unwrap_or(1),
            None => 1,
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// One lease exposed through one local transport.
pub struct Session<C> {
    lease: Lease<C>,
    proxy: ProxyConfig,
    cancel: CancellationToken,
}

impl<C> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("lease", &self.lease)
            .field("proxy", &self.proxy)
            .finish_non_exhaustive()
    }
}

impl Session<HttpControlPlane> {
    /// Create a session talking to the HTTP control plane.
    pub fn from_settings(
        settings: LeaseSettings,
        config: SessionConfig,
        parent: &CancellationToken,
    ) -> Self {
        let control_plane = settings.control_plane;
        let cell = ClientCell::new(move || HttpControlPlane::new(&control_plane));
        Self::new(settings.request, cell, config, parent)
    }
}

impl<C: ControlPlane> Session<C> {
    /// Create a session. Nothing happens until a mode is run.
    pub fn new(
        request: LeaseRequest,
        client: ClientCell<C>,
        config: SessionConfig,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let lease = Lease::new(request, client, config.lease, &cancel);
        Self {
            lease,
            proxy: config.proxy,
            cancel,
        }
    }

    /// The session's lease.
    #[must_use]
    pub const fn lease(&self) -> &Lease<C> {
        &self.lease
    }

    /// The token governing the session.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Acquire the machine and build a proxy to it.
    pub async fn proxy(&self) -> Result<Proxy> {
        let descriptor = self.lease.acquire().await?;
        let channel = self.lease.upstream().await?;
        let config = ProxyConfig {
            platform: descriptor.platform,
            ..self.proxy.clone()
        };
        Ok(Proxy::new(channel, config, self.cancel.child_token()))
    }

    /// Serve the proxy on one connection until the peer hangs up.
    pub async fn serve_io<IO>(&self, conn: IO) -> Result<Outcome>
    where
        IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
        IO::ConnectInfo: Clone + Send + Sync + 'static,
    {
        let proxy = self.proxy().await?;
        settle(proxy.serve_io(conn).await)?;
        Ok(Outcome::Disconnected)
    }

    /// Serve the proxy on this process's stdin and stdout.
    pub async fn serve_stdio(&self) -> Result<Outcome> {
        self.serve_io(stdio()).await
    }

    /// Run `command` against a proxy on a local listener.
    ///
    /// The proxy stops once the child exits. If the proxy stops first the
    /// child is killed.
    pub async fn exec(&self, command: ChildCommand) -> Result<Outcome> {
        let proxy = self.proxy().await?;
        let listener = LocalListener::bind().await?;
        let (key, value) = listener.env();
        let mut child = command.env(key, value).spawn()?;

        let serve = proxy.serve_listener(listener);
        tokio::pin!(serve);

        let status = tokio::select! {
            status = child.wait() => status.map_err(TransportError::from)?,
            result = &mut serve => {
                stop_child(&mut child).await;
                settle(result)?;
                return Err(Error::cancelled("build session"));
            }
        };

        info!(?status, "child process exited");
        proxy.token().cancel();
        settle(serve.await)?;
        Ok(Outcome::ChildExited(status))
    }

    /// Run `command` against a byte relay on a local listener.
    pub async fn relay(&self, command: ChildCommand) -> Result<Outcome> {
        self.lease.acquire().await?;
        let dialer = Arc::new(self.lease.dialer()?);
        let listener = LocalListener::bind().await?;
        let (key, value) = listener.env();
        let mut child = command.env(key, value).spawn()?;

        let stop = self.cancel.child_token();
        let relay = Relay::new(dialer);
        let serve = relay.serve(listener, stop.clone());
        tokio::pin!(serve);

        let status = tokio::select! {
            status = child.wait() => status.map_err(TransportError::from)?,
            result = &mut serve => {
                stop_child(&mut child).await;
                result?;
                return Err(Error::cancelled("build session"));
            }
        };

        info!(?status, "child process exited");
        stop.cancel();
        let report = serve.await?;
        if let Some(failure) = report.last_failure() {
            warn!(
                peer = %failure.peer,
                error = %failure.error,
                failures = report.failures.len(),
                connections = report.connections,
                "some connections could not be relayed"
            );
        }
        Ok(Outcome::Relayed { status, report })
    }

    /// Run `mode`, releasing the lease afterwards whatever the result.
    pub async fn run(&self, mode: Mode) -> Result<Outcome> {
        let result = match mode {
            Mode::DialStdio => self.serve_stdio().await,
            Mode::Exec(command) => self.exec(command).await,
            Mode::Relay(command) => self.relay(command).await,
        };
        if let Err(e) = &result {
            if e.is_session_fatal() {
                error!(error = %e, "build session failed");
            }
        }
        self.close().await;
        result
    }

    /// Release the lease and stop everything the session started.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.lease.release().await;
    }
}

/// Treat an expired shutdown grace as a clean stop.
fn settle(result: std::result::Result<(), ProxyError>) -> Result<()> {
    match result {
        Err(ProxyError::GraceExpired(grace)) => {
            warn!(?grace, "open connections dropped after shutdown grace");
            Ok(())
        }
        other => other.map_err(Error::from),
    }
}

async fn stop_child(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to stop child process");
    }
}

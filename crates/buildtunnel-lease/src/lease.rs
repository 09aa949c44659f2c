//! The lease on one remote build machine.
//!
//! A [`Lease`] walks `Acquiring → Acquired → Released`:
//!
//! 1. [`Lease::acquire`] polls the control plane until a machine is active,
//!    sleeping for as long as the control plane asks between polls. The
//!    health heartbeat starts as soon as acquisition begins so the control
//!    plane knows the build is still waiting.
//! 2. [`Lease::upstream`] dials the machine once and keeps the resulting
//!    HTTP/2 channel for every later caller. [`Lease::dial`] opens extra raw
//!    tunnels for the byte relay.
//! 3. [`Lease::release`] stops the heartbeat, cancels the lease token and
//!    drops the cached channel. It is safe to call more than once.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use buildtunnel_core::{ConnectionDescriptor, LeaseRequest, LeaseState};
use buildtunnel_transport::{ChannelConfig, DialConfig, TlsDialer, TunnelStream, into_channel};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tracing::{debug, info, warn};

use crate::cell::ClientCell;
use crate::control::{ConnectionResponse, ControlPlane};
use crate::error::LeaseError;

/// Default heartbeat interval.
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(5);

/// Default limit on how long acquisition may stay pending.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Settings for a [`Lease`].
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    /// Interval between health reports.
    pub health_interval: Duration,
    /// Give up acquiring after this long; `None` waits as long as the
    /// control plane keeps answering pending.
    pub acquire_timeout: Option<Duration>,
    /// Dial retry settings.
    pub dial: DialConfig,
    /// HTTP/2 settings for the upstream channel.
    pub channel: ChannelConfig,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            health_interval: DEFAULT_HEALTH_INTERVAL,
            acquire_timeout: Some(DEFAULT_ACQUIRE_TIMEOUT),
            dial: DialConfig::default(),
            channel: ChannelConfig::default(),
        }
    }
}

impl LeaseConfig {
    /// Set the heartbeat interval.
    #[must_use]
    pub const fn health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    /// Set the acquisition limit.
    #[must_use]
    pub const fn acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the dial retry settings.
    #[must_use]
    pub fn dial(mut self, dial: DialConfig) -> Self {
        self.dial = dial;
        self
    }

    /// Set the channel settings.
    #[must_use]
    pub fn channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }
}

struct Acquired {
    descriptor: ConnectionDescriptor,
    dialer: TlsDialer,
}

struct HealthLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// A lease on one remote build machine.
pub struct Lease<C> {
    request: LeaseRequest,
    config: LeaseConfig,
    client: Arc<ClientCell<C>>,
    state: watch::Sender<LeaseState>,
    acquired: OnceLock<Acquired>,
    upstream: tokio::sync::Mutex<Option<Channel>>,
    health: Mutex<Option<HealthLoop>>,
    cancel: CancellationToken,
}

impl<C> std::fmt::Debug for Lease<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("request", &self.request)
            .field("state", &*self.state.borrow())
            .field("descriptor", &self.acquired.get().map(|a| &a.descriptor))
            .finish_non_exhaustive()
    }
}

impl<C: ControlPlane> Lease<C> {
    /// Create a lease in the `Acquiring` state.
    ///
    /// The lease lives until [`Lease::release`] or until `parent` is
    /// cancelled.
    pub fn new(
        request: LeaseRequest,
        client: ClientCell<C>,
        config: LeaseConfig,
        parent: &CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(LeaseState::Acquiring);
        Self {
            request,
            config,
            client: Arc::new(client),
            state,
            acquired: OnceLock::new(),
            upstream: tokio::sync::Mutex::new(None),
            health: Mutex::new(None),
            cancel: parent.child_token(),
        }
    }

    /// The request this lease was created for.
    #[must_use]
    pub const fn request(&self) -> &LeaseRequest {
        &self.request
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> LeaseState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LeaseState> {
        self.state.subscribe()
    }

    /// The token governing everything tied to this lease.
    ///
    /// It is cancelled on release, so proxies and relays serving this lease
    /// should run on it or on a child of it.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The descriptor, once acquired.
    #[must_use]
    pub fn descriptor(&self) -> Option<&ConnectionDescriptor> {
        self.acquired.get().map(|a| &a.descriptor)
    }

    /// A dialer for the acquired machine.
    pub fn dialer(&self) -> Result<TlsDialer, LeaseError> {
        self.acquired
            .get()
            .map(|a| a.dialer.clone())
            .ok_or(LeaseError::NotAcquired)
    }

    /// Whether the health loop is running.
    #[must_use]
    pub fn is_reporting_health(&self) -> bool {
        self.health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.handle.is_finished())
    }

    /// Poll the control plane until a machine is active.
    ///
    /// On failure or cancellation the lease is released.
    pub async fn acquire(&self) -> Result<ConnectionDescriptor, LeaseError> {
        if let Some(descriptor) = self.descriptor() {
            return Ok(descriptor.clone());
        }
        if self.state() == LeaseState::Released {
            return Err(LeaseError::Released);
        }

        self.start_health_loop();
        info!(build_id = %self.request.build_id, platform = %self.request.platform, "acquiring build machine");

        match self.poll_connection().await {
            Ok(acquired) => {
                let descriptor = acquired.descriptor.clone();
                // Concurrent acquires keep the first descriptor.
                let _ = self.acquired.set(acquired);
                self.transition(LeaseState::Acquired);
                info!(endpoint = %descriptor.endpoint, platform = %descriptor.platform, "build machine acquired");
                Ok(descriptor)
            }
            Err(err) => {
                if !err.is_cancelled() {
                    warn!(error = %err, "failed to acquire build machine");
                }
                self.release().await;
                Err(err)
            }
        }
    }

    async fn poll_connection(&self) -> Result<Acquired, LeaseError> {
        let started = Instant::now();
        let mut polls = 0u32;

        loop {
            let client = self.client.get()?;
            let response = tokio::select! {
                () = self.cancel.cancelled() => {
                    return Err(LeaseError::Cancelled { operation: "acquire" });
                }
                response = client.get_connection(&self.request) => response?,
            };
            polls += 1;

            match response {
                ConnectionResponse::Active(descriptor) => {
                    descriptor.validate().map_err(|e| LeaseError::MalformedDescriptor {
                        message: e.to_string(),
                    })?;
                    let dialer = TlsDialer::new(&descriptor, self.config.dial.clone())?;
                    debug!(polls, "control plane returned an active machine");
                    return Ok(Acquired { descriptor, dialer });
                }
                ConnectionResponse::Pending { wait } => {
                    if let Some(limit) = self.config.acquire_timeout {
                        if started.elapsed() + wait > limit {
                            return Err(LeaseError::Timeout(limit));
                        }
                    }
                    debug!(polls, wait_ms = wait.as_millis() as u64, "build machine pending");
                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            return Err(LeaseError::Cancelled { operation: "acquire" });
                        }
                        () = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
    }

    fn start_health_loop(&self) {
        let mut health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
        if health.is_some() {
            return;
        }
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(report_health(
            Arc::clone(&self.client),
            self.request.clone(),
            self.config.health_interval,
            cancel.clone(),
        ));
        *health = Some(HealthLoop { cancel, handle });
    }

    /// The upstream channel, dialing it on first use.
    ///
    /// Concurrent callers share one dial; every caller gets a clone of the
    /// same channel.
    pub async fn upstream(&self) -> Result<Channel, LeaseError> {
        let mut slot = self.upstream.lock().await;
        if self.state() == LeaseState::Released {
            return Err(LeaseError::Released);
        }
        if let Some(channel) = slot.as_ref() {
            return Ok(channel.clone());
        }

        let acquired = self.acquired.get().ok_or(LeaseError::NotAcquired)?;
        let stream = acquired.dialer.dial(&self.cancel).await?;
        let authority = if acquired.descriptor.server_name.is_empty() {
            acquired.dialer.endpoint().trim_start_matches("tcp://")
        } else {
            acquired.descriptor.server_name.as_str()
        };
        let channel = into_channel(stream, authority, &self.config.channel).await?;
        *slot = Some(channel.clone());
        Ok(channel)
    }

    /// Open a fresh TLS stream to the machine.
    pub async fn dial(&self) -> Result<TunnelStream, LeaseError> {
        if self.state() == LeaseState::Released {
            return Err(LeaseError::Released);
        }
        let dialer = self.dialer()?;
        Ok(dialer.dial(&self.cancel).await?)
    }

    /// Stop the heartbeat and close the upstream connection.
    ///
    /// Calling this again is a no-op.
    pub async fn release(&self) {
        if !self.transition(LeaseState::Released) {
            return;
        }

        self.cancel.cancel();
        let health = self
            .health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(health) = health {
            health.cancel.cancel();
            if let Err(e) = health.handle.await {
                warn!(error = %e, "health loop ended abnormally");
            }
        }

        if self.upstream.lock().await.take().is_some() {
            debug!("upstream connection closed");
        }
        info!(build_id = %self.request.build_id, "lease released");
    }

    fn transition(&self, next: LeaseState) -> bool {
        self.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        })
    }
}

impl<C> Drop for Lease<C> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Report health every `interval` until `cancel` fires.
///
/// Failures are logged and the client is recreated for the next tick; the
/// loop never stops on its own.
async fn report_health<C: ControlPlane>(
    client: Arc<ClientCell<C>>,
    request: LeaseRequest,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = match client.get() {
            Ok(control) => tokio::select! {
                () = cancel.cancelled() => break,
                result = control.report_health(&request) => result,
            },
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => debug!(build_id = %request.build_id, "health reported"),
            Err(err) if err.is_cancelled() => break,
            Err(err) => {
                warn!(build_id = %request.build_id, error = %err, "health report failed");
                client.reset();
            }
        }
    }
    debug!(build_id = %request.build_id, "health loop stopped");
}

//! One adapter per proxied service.
//!
//! Each adapter implements a generated service trait. Most methods hand the
//! call to a shared [`Forwarder`]; the few that are answered locally or
//! rewritten say so in their own module.

pub mod content;
pub mod control;
pub mod gateway;
pub mod health;
pub mod leases;
pub mod telemetry;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, warn};

use crate::forward::{self, ForwardStream};
use crate::upstream::{Upstream, inbound, outbound};

pub use content::ContentService;
pub use control::ControlService;
pub use gateway::GatewayService;
pub use health::HealthService;
pub use leases::LeasesService;
pub use telemetry::TelemetryService;

/// Forwards calls of any shape to the upstream daemon.
///
/// Streams opened through a forwarder end when its token is cancelled.
#[derive(Debug, Clone)]
pub struct Forwarder {
    upstream: Upstream,
    cancel: CancellationToken,
}

impl Forwarder {
    /// Create a forwarder whose streams are governed by `cancel`.
    #[must_use]
    pub const fn new(upstream: Upstream, cancel: CancellationToken) -> Self {
        Self { upstream, cancel }
    }

    /// Forward a unary call, returning the upstream answer verbatim.
    pub async fn unary(
        &self,
        route: &'static str,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, Status> {
        debug!(route, "forwarding unary call");
        self.upstream
            .unary(route, outbound(request))
            .await
            .map(inbound)
            .inspect_err(|status| {
                warn!(route, code = ?status.code(), error = %status.message(), "upstream call failed");
            })
    }

    /// Forward a server-streaming call.
    pub async fn server_streaming(
        &self,
        route: &'static str,
        request: Request<Bytes>,
    ) -> Result<Response<ForwardStream>, Status> {
        debug!(route, "forwarding server stream");
        forward::server_streaming(&self.upstream, route, request, &self.cancel)
            .await
            .inspect_err(|status| {
                warn!(route, code = ?status.code(), error = %status.message(), "upstream stream refused");
            })
    }

    /// Forward a bidirectional call.
    pub async fn bidi(
        &self,
        route: &'static str,
        request: Request<Streaming<Bytes>>,
    ) -> Result<Response<ForwardStream>, Status> {
        debug!(route, "forwarding bidirectional stream");
        forward::bidi(&self.upstream, route, request, &self.cancel)
            .await
            .inspect_err(|status| {
                warn!(route, code = ?status.code(), error = %status.message(), "upstream stream refused");
            })
    }
}

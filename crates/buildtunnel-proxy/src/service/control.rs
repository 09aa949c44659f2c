//! `moby.buildkit.v1.Control`, the daemon's main build API.
//!
//! Solve is rewritten so the remote side never exports; the result is
//! exported locally. Worker discovery and the disk-usage and history
//! bookkeeping calls are answered without asking the daemon. Info and
//! ListenBuildHistory are refused.

use buildtunnel_core::Platform;
use bytes::Bytes;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, warn};

use super::Forwarder;
use crate::forward::ForwardStream;
use crate::rpc::Control;
use crate::solve::rewrite_solve_request;
use crate::workers::list_workers_response;

const PRUNE: &str = "/moby.buildkit.v1.Control/Prune";
const SOLVE: &str = "/moby.buildkit.v1.Control/Solve";
const STATUS: &str = "/moby.buildkit.v1.Control/Status";
const SESSION: &str = "/moby.buildkit.v1.Control/Session";

/// Adapter for the `Control` service.
#[derive(Debug, Clone)]
pub struct ControlService {
    forwarder: Forwarder,
    platform: Platform,
}

impl ControlService {
    /// Create the adapter for a machine of `platform`.
    #[must_use]
    pub const fn new(forwarder: Forwarder, platform: Platform) -> Self {
        Self {
            forwarder,
            platform,
        }
    }
}

fn unimplemented(method: &str) -> Status {
    Status::unimplemented(format!("{method} is not available through buildtunnel"))
}

#[tonic::async_trait]
impl Control for ControlService {
    async fn disk_usage(&self, _request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        Ok(Response::new(Bytes::new()))
    }

    type PruneStream = ForwardStream;

    async fn prune(&self, request: Request<Bytes>) -> Result<Response<ForwardStream>, Status> {
        self.forwarder.server_streaming(PRUNE, request).await
    }

    async fn solve(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        let (metadata, extensions, body) = request.into_parts();
        let body = rewrite_solve_request(&body).map_err(|e| {
            warn!(error = %e, "rejecting malformed solve request");
            Status::invalid_argument(format!("malformed solve request: {e}"))
        })?;
        self.forwarder
            .unary(SOLVE, Request::from_parts(metadata, extensions, body))
            .await
    }

    type StatusStream = ForwardStream;

    async fn status(&self, request: Request<Bytes>) -> Result<Response<ForwardStream>, Status> {
        self.forwarder.server_streaming(STATUS, request).await
    }

    type SessionStream = ForwardStream;

    async fn session(
        &self,
        request: Request<Streaming<Bytes>>,
    ) -> Result<Response<ForwardStream>, Status> {
        self.forwarder.bidi(SESSION, request).await
    }

    async fn list_workers(&self, _request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        debug!(platform = %self.platform, "answering ListWorkers locally");
        Ok(Response::new(list_workers_response(&self.platform)))
    }

    async fn info(&self, _request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        Err(unimplemented("Control.Info"))
    }

    type ListenBuildHistoryStream = ForwardStream;

    async fn listen_build_history(
        &self,
        _request: Request<Bytes>,
    ) -> Result<Response<ForwardStream>, Status> {
        Err(unimplemented("Control.ListenBuildHistory"))
    }

    async fn update_build_history(
        &self,
        _request: Request<Bytes>,
    ) -> Result<Response<Bytes>, Status> {
        Ok(Response::new(Bytes::new()))
    }
}

//! `moby.buildkit.v1.frontend.LLBBridge`, the frontend gateway.
//!
//! Everything is forwarded except Ping, which advertises the capability
//! set and worker list locally.

use buildtunnel_core::Platform;
use bytes::Bytes;
use tonic::{Request, Response, Status, Streaming};
use tracing::debug;

use super::Forwarder;
use crate::forward::ForwardStream;
use crate::rpc::LLBBridge;
use crate::workers::pong_response;

const RESOLVE_IMAGE_CONFIG: &str = "/moby.buildkit.v1.frontend.LLBBridge/ResolveImageConfig";
const RESOLVE_SOURCE_META: &str = "/moby.buildkit.v1.frontend.LLBBridge/ResolveSourceMeta";
const SOLVE: &str = "/moby.buildkit.v1.frontend.LLBBridge/Solve";
const READ_FILE: &str = "/moby.buildkit.v1.frontend.LLBBridge/ReadFile";
const READ_DIR: &str = "/moby.buildkit.v1.frontend.LLBBridge/ReadDir";
const STAT_FILE: &str = "/moby.buildkit.v1.frontend.LLBBridge/StatFile";
const EVALUATE: &str = "/moby.buildkit.v1.frontend.LLBBridge/Evaluate";
const RETURN: &str = "/moby.buildkit.v1.frontend.LLBBridge/Return";
const INPUTS: &str = "/moby.buildkit.v1.frontend.LLBBridge/Inputs";
const NEW_CONTAINER: &str = "/moby.buildkit.v1.frontend.LLBBridge/NewContainer";
const RELEASE_CONTAINER: &str = "/moby.buildkit.v1.frontend.LLBBridge/ReleaseContainer";
const EXEC_PROCESS: &str = "/moby.buildkit.v1.frontend.LLBBridge/ExecProcess";
const WARN: &str = "/moby.buildkit.v1.frontend.LLBBridge/Warn";

/// Adapter for the `LLBBridge` service.
#[derive(Debug, Clone)]
pub struct GatewayService {
    forwarder: Forwarder,
    platform: Platform,
}

impl GatewayService {
    /// Create the adapter for a machine of `platform`.
    #[must_use]
    pub const fn new(forwarder: Forwarder, platform: Platform) -> Self {
        Self {
            forwarder,
            platform,
        }
    }
}

#[tonic::async_trait]
impl LLBBridge for GatewayService {
    async fn resolve_image_config(
        &self,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(RESOLVE_IMAGE_CONFIG, request).await
    }

    async fn resolve_source_meta(
        &self,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(RESOLVE_SOURCE_META, request).await
    }

    async fn solve(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(SOLVE, request).await
    }

    async fn read_file(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(READ_FILE, request).await
    }

    async fn read_dir(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(READ_DIR, request).await
    }

    async fn stat_file(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(STAT_FILE, request).await
    }

    async fn evaluate(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(EVALUATE, request).await
    }

    async fn ping(&self, _request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        debug!(platform = %self.platform, "answering Ping locally");
        Ok(Response::new(pong_response(&self.platform)))
    }

    async fn return_result(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(RETURN, request).await
    }

    async fn inputs(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(INPUTS, request).await
    }

    async fn new_container(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(NEW_CONTAINER, request).await
    }

    async fn release_container(
        &self,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(RELEASE_CONTAINER, request).await
    }

    type ExecProcessStream = ForwardStream;

    async fn exec_process(
        &self,
        request: Request<Streaming<Bytes>>,
    ) -> Result<Response<ForwardStream>, Status> {
        self.forwarder.bidi(EXEC_PROCESS, request).await
    }

    async fn warn(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(WARN, request).await
    }
}

//! `grpc.health.v1.Health`, answered by the remote daemon.

use bytes::Bytes;
use tonic::{Request, Response, Status};

use super::Forwarder;
use crate::forward::ForwardStream;
use crate::rpc::Health;

const CHECK: &str = "/grpc.health.v1.Health/Check";
const WATCH: &str = "/grpc.health.v1.Health/Watch";

/// Adapter for the gRPC health service.
#[derive(Debug, Clone)]
pub struct HealthService {
    forwarder: Forwarder,
}

impl HealthService {
    /// Create the adapter.
    #[must_use]
    pub const fn new(forwarder: Forwarder) -> Self {
        Self { forwarder }
    }
}

#[tonic::async_trait]
impl Health for HealthService {
    async fn check(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(CHECK, request).await
    }

    type WatchStream = ForwardStream;

    async fn watch(&self, request: Request<Bytes>) -> Result<Response<ForwardStream>, Status> {
        self.forwarder.server_streaming(WATCH, request).await
    }
}

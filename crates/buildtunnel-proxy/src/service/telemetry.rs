//! `opentelemetry.proto.collector.trace.v1.TraceService`.
//!
//! Build clients export their spans to the daemon; the spans are passed on
//! unchanged.

use bytes::Bytes;
use tonic::{Request, Response, Status};

use super::Forwarder;
use crate::rpc::TraceService;

const EXPORT: &str = "/opentelemetry.proto.collector.trace.v1.TraceService/Export";

/// Adapter for the OpenTelemetry trace collector.
#[derive(Debug, Clone)]
pub struct TelemetryService {
    forwarder: Forwarder,
}

impl TelemetryService {
    /// Create the adapter.
    #[must_use]
    pub const fn new(forwarder: Forwarder) -> Self {
        Self { forwarder }
    }
}

#[tonic::async_trait]
impl TraceService for TelemetryService {
    async fn export(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(EXPORT, request).await
    }
}

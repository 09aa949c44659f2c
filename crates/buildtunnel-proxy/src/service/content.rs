//! `containerd.services.content.v1.Content`, forwarded as-is.

use bytes::Bytes;
use tonic::{Request, Response, Status, Streaming};

use super::Forwarder;
use crate::forward::ForwardStream;
use crate::rpc::Content;

const INFO: &str = "/containerd.services.content.v1.Content/Info";
const UPDATE: &str = "/containerd.services.content.v1.Content/Update";
const LIST: &str = "/containerd.services.content.v1.Content/List";
const DELETE: &str = "/containerd.services.content.v1.Content/Delete";
const READ: &str = "/containerd.services.content.v1.Content/Read";
const STATUS: &str = "/containerd.services.content.v1.Content/Status";
const LIST_STATUSES: &str = "/containerd.services.content.v1.Content/ListStatuses";
const WRITE: &str = "/containerd.services.content.v1.Content/Write";
const ABORT: &str = "/containerd.services.content.v1.Content/Abort";

/// Adapter for the `Content` service.
#[derive(Debug, Clone)]
pub struct ContentService {
    forwarder: Forwarder,
}

impl ContentService {
    /// Create the adapter.
    #[must_use]
    pub const fn new(forwarder: Forwarder) -> Self {
        Self { forwarder }
    }
}

#[tonic::async_trait]
impl Content for ContentService {
    async fn info(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(INFO, request).await
    }

    async fn update(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(UPDATE, request).await
    }

    type ListStream = ForwardStream;

    async fn list(&self, request: Request<Bytes>) -> Result<Response<ForwardStream>, Status> {
        self.forwarder.server_streaming(LIST, request).await
    }

    async fn delete(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(DELETE, request).await
    }

    type ReadStream = ForwardStream;

    async fn read(&self, request: Request<Bytes>) -> Result<Response<ForwardStream>, Status> {
        self.forwarder.server_streaming(READ, request).await
    }

    async fn status(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(STATUS, request).await
    }

    async fn list_statuses(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(LIST_STATUSES, request).await
    }

    type WriteStream = ForwardStream;

    async fn write(
        &self,
        request: Request<Streaming<Bytes>>,
    ) -> Result<Response<ForwardStream>, Status> {
        self.forwarder.bidi(WRITE, request).await
    }

    async fn abort(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(ABORT, request).await
    }
}

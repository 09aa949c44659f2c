//! `containerd.services.leases.v1.Leases`, forwarded as-is.

use bytes::Bytes;
use tonic::{Request, Response, Status};

use super::Forwarder;
use crate::rpc::Leases;

const CREATE: &str = "/containerd.services.leases.v1.Leases/Create";
const DELETE: &str = "/containerd.services.leases.v1.Leases/Delete";
const LIST: &str = "/containerd.services.leases.v1.Leases/List";
const ADD_RESOURCE: &str = "/containerd.services.leases.v1.Leases/AddResource";
const DELETE_RESOURCE: &str = "/containerd.services.leases.v1.Leases/DeleteResource";
const LIST_RESOURCES: &str = "/containerd.services.leases.v1.Leases/ListResources";

/// Adapter for the containerd `Leases` service.
#[derive(Debug, Clone)]
pub struct LeasesService {
    forwarder: Forwarder,
}

impl LeasesService {
    /// Create the adapter.
    #[must_use]
    pub const fn new(forwarder: Forwarder) -> Self {
        Self { forwarder }
    }
}

#[tonic::async_trait]
impl Leases for LeasesService {
    async fn create(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(CREATE, request).await
    }

    async fn delete(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(DELETE, request).await
    }

    async fn list(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(LIST, request).await
    }

    async fn add_resource(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(ADD_RESOURCE, request).await
    }

    async fn delete_resource(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(DELETE_RESOURCE, request).await
    }

    async fn list_resources(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.forwarder.unary(LIST_RESOURCES, request).await
    }
}

//! Generated server traits for the proxied services.
//!
//! One module per service, produced by the build script. Every method takes
//! and returns raw frames through [`RawCodec`](crate::codec::RawCodec).

#![allow(missing_docs, clippy::pedantic, clippy::nursery)]

include!(concat!(env!("OUT_DIR"), "/moby.buildkit.v1.Control.rs"));
include!(concat!(env!("OUT_DIR"), "/moby.buildkit.v1.frontend.LLBBridge.rs"));
include!(concat!(env!("OUT_DIR"), "/containerd.services.content.v1.Content.rs"));
include!(concat!(env!("OUT_DIR"), "/containerd.services.leases.v1.Leases.rs"));
include!(concat!(env!("OUT_DIR"), "/grpc.health.v1.Health.rs"));
include!(concat!(env!("OUT_DIR"), "/opentelemetry.proto.collector.trace.v1.TraceService.rs"));

pub use content_server::{Content, ContentServer};
pub use control_server::{Control, ControlServer};
pub use health_server::{Health, HealthServer};
pub use l_l_b_bridge_server::{LLBBridge, LLBBridgeServer};
pub use leases_server::{Leases, LeasesServer};
pub use trace_service_server::{TraceService, TraceServiceServer};

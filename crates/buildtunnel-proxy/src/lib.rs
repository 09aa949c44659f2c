//! gRPC proxy re-exposing a remote BuildKit daemon locally.
//!
//! The proxy serves six services on a local transport and forwards each call
//! over one upstream channel to the leased machine:
//!
//! | Service | Notes |
//! |---------|-------|
//! | `moby.buildkit.v1.Control` | Solve is rewritten; ListWorkers, DiskUsage and UpdateBuildHistory are answered locally; Info and ListenBuildHistory are refused |
//! | `moby.buildkit.v1.frontend.LLBBridge` | Ping is answered locally |
//! | `containerd.services.content.v1.Content` | forwarded |
//! | `containerd.services.leases.v1.Leases` | forwarded |
//! | `grpc.health.v1.Health` | forwarded |
//! | `opentelemetry.proto.collector.trace.v1.TraceService` | forwarded |
//!
//! Messages travel as raw protobuf frames; only the calls listed above ever
//! look inside one.
//!
//! # Example
//!
//! ```no_run
//! use buildtunnel_core::Platform;
//! use buildtunnel_proxy::{Proxy, ProxyConfig};
//! use buildtunnel_transport::LocalListener;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(channel: tonic::transport::Channel) -> Result<(), Box<dyn std::error::Error>> {
//! let cancel = CancellationToken::new();
//! let proxy = Proxy::new(channel, ProxyConfig::new(Platform::Amd64), cancel);
//! let listener = LocalListener::bind().await?;
//! proxy.serve_listener(listener).await?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod caps;
pub mod codec;
pub mod error;
pub mod forward;
pub mod rpc;
pub mod server;
pub mod service;
pub mod solve;
pub mod upstream;
pub mod workers;

pub use codec::RawCodec;
pub use error::ProxyError;
pub use forward::{ForwardStream, PumpEnd};
pub use server::{DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_SHUTDOWN_GRACE, Proxy, ProxyConfig};
pub use service::Forwarder;
pub use solve::rewrite_solve_request;
pub use upstream::Upstream;
pub use workers::{list_workers_response, platform_variants, pong_response};

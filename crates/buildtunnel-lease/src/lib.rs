//! Leases on remote build machines.
//!
//! - [`Lease`]: acquisition, health heartbeat, upstream connection, release
//! - [`ControlPlane`]: the API that hands out machines, with
//!   [`HttpControlPlane`] as the production implementation
//! - [`ClientCell`]: the memoized control-plane client shared by the
//!   acquire loop and the heartbeat
//!
//! # Example
//!
//! ```no_run
//! use buildtunnel_core::{LeaseRequest, Platform};
//! use buildtunnel_lease::{
//!     ClientCell, ControlPlaneConfig, HttpControlPlane, Lease, LeaseConfig, LeaseSettings,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), buildtunnel_lease::LeaseError> {
//! let settings = LeaseSettings::new(
//!     ControlPlaneConfig::default(),
//!     LeaseRequest::new("build-42", "secret", Platform::Amd64),
//! );
//! let control_plane = settings.control_plane.clone();
//! let cell = ClientCell::new(move || HttpControlPlane::new(&control_plane));
//!
//! let lease = Lease::new(settings.request, cell, LeaseConfig::default(), &CancellationToken::new());
//! lease.acquire().await?;
//! let channel = lease.upstream().await?;
//! # drop(channel);
//! lease.release().await;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod cell;
pub mod config;
pub mod control;
pub mod error;
pub mod lease;

pub use cell::ClientCell;
pub use config::{LeaseSettings, host_platform, new_build_id};
pub use control::{ConnectionResponse, ControlPlane, ControlPlaneConfig, HttpControlPlane};
pub use error::LeaseError;
pub use lease::{Lease, LeaseConfig};

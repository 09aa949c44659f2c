//! Prelude module for convenient imports.
//!
//! ```rust
//! use buildtunnel::prelude::*;
//!
//! let config = SessionConfig::default()
//!     .proxy(ProxyConfig::new(Platform::Arm64));
//! assert_eq!(config.proxy.platform, Platform::Arm64);
//! ```

pub use buildtunnel_core::{
    ConnectionDescriptor, Error, ErrorKind, LeaseRequest, LeaseState, Platform, Result,
};
pub use buildtunnel_lease::{
    ClientCell, ControlPlane, ControlPlaneConfig, HttpControlPlane, Lease, LeaseConfig,
    LeaseSettings,
};
pub use buildtunnel_proxy::{Proxy, ProxyConfig};
pub use buildtunnel_transport::{ChildCommand, DialConfig, LocalListener, Relay};
pub use tokio_util::sync::CancellationToken;

pub use crate::session::{Mode, Outcome, Session, SessionConfig};

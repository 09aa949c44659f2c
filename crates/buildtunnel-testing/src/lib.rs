//! Testing utilities for buildtunnel.
//!
//! - [`ScriptedControlPlane`]: a control plane answering from a script
//! - [`FakeDaemon`]: a BuildKit stand-in that records what reaches it
//! - [`ProxyHarness`]: a proxy wired to a fake daemon in memory
//! - [`fixtures`]: a private PKI and canned descriptors
//! - [`assertions`]: status checks for forwarded calls
//!
//! # Example
//!
//! ```no_run
//! use buildtunnel_core::Platform;
//! use buildtunnel_proxy::ProxyConfig;
//! use buildtunnel_testing::{FakeDaemon, ProxyHarness};
//!
//! # async fn example() {
//! let daemon = FakeDaemon::new();
//! let harness = ProxyHarness::start(&daemon, ProxyConfig::new(Platform::Amd64)).await;
//! # drop(harness);
//! # }
//! ```

#![deny(missing_docs)]

pub mod assertions;
pub mod control;
pub mod daemon;
pub mod fixtures;
pub mod harness;

pub use assertions::{assert_code, wait_until};
pub use control::ScriptedControlPlane;
pub use daemon::{FakeDaemon, SOLVE_RESPONSE};
pub use harness::{ProxyHarness, connect_daemon, serve_daemon_tls};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::assertions::{assert_code, wait_until};
    pub use crate::control::ScriptedControlPlane;
    pub use crate::daemon::FakeDaemon;
    pub use crate::fixtures;
    pub use crate::harness::ProxyHarness;
}

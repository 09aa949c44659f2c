//! # buildtunnel
//!
//! Run BuildKit builds on leased remote machines as if the daemon were local.
//!
//! A [`Session`] leases a machine from the control plane, opens a mutually
//! authenticated TLS tunnel to its BuildKit daemon and serves a gRPC proxy
//! locally. The local client never sees the tunnel: it talks to a
//! `tcp://127.0.0.1:<port>` listener or to the stdio of a `dial-stdio`
//! helper.
//!
//! ## Quick Start
//!
//! ```no_run
//! use buildtunnel::prelude::*;
//!
//! # async fn example() -> buildtunnel::Result<()> {
//! let settings = LeaseSettings::new(
//!     ControlPlaneConfig::default(),
//!     LeaseRequest::new("build-42", "secret", Platform::Amd64),
//! );
//! let cancel = CancellationToken::new();
//! let session = Session::from_settings(settings, SessionConfig::default(), &cancel);
//!
//! let outcome = session
//!     .run(Mode::Exec(ChildCommand::new("buildctl").args(["debug", "workers"])))
//!     .await?;
//! std::process::exit(i32::from(outcome.exit_code()));
//! # }
//! ```
//!
//! ## Crate Organization
//!
//! - [`buildtunnel_core`]: descriptors, platforms, lease states and the error type
//! - [`buildtunnel_transport`]: TLS dialing, listeners, stdio and the byte relay
//! - [`buildtunnel_lease`]: the control-plane client and the lease lifecycle
//! - [`buildtunnel_proxy`]: the gRPC proxy for the BuildKit services

#![deny(missing_docs)]
#![warn(clippy::unwrap_used)]

pub use buildtunnel_core::*;

pub mod cli;
pub mod prelude;
pub mod session;

pub use cli::Cli;
pub use session::{Mode, Outcome, Session, SessionConfig};

/// Transport re-exports.
pub mod transport {
    //! TLS dialing, local listeners and relaying.
    pub use buildtunnel_transport::*;
}

/// Lease re-exports.
pub mod lease {
    //! Control-plane client and lease lifecycle.
    pub use buildtunnel_lease::*;
}

/// Proxy re-exports.
pub mod proxy {
    //! The gRPC proxy.
    pub use buildtunnel_proxy::*;
}

//! Transport plumbing for buildtunnel.
//!
//! This crate moves bytes; it knows nothing about gRPC services.
//!
//! - [`dial`]: TLS dialing of a leased build machine with bounded retry
//! - [`tunnel`]: turning one dialed stream into an HTTP/2 channel
//! - [`listener`]: a loopback listener whose address is handed to a child
//! - [`stdio`]: the process's stdin/stdout as one duplex stream
//! - [`child`]: launching the build client as a child process
//! - [`relay`]: protocol-unaware byte relaying to fresh tunnels
//!
//! # Example
//!
//! ```no_run
//! use buildtunnel_core::ConnectionDescriptor;
//! use buildtunnel_transport::{ChannelConfig, DialConfig, TlsDialer, into_channel};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(descriptor: ConnectionDescriptor) -> Result<(), buildtunnel_transport::TransportError> {
//! let stream = TlsDialer::new(&descriptor, DialConfig::default())?
//!     .dial(&CancellationToken::new())
//!     .await?;
//! let channel = into_channel(stream, &descriptor.server_name, &ChannelConfig::default()).await?;
//! # drop(channel);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod child;
pub mod dial;
pub mod error;
pub mod listener;
pub mod relay;
pub mod stdio;
pub mod tunnel;

pub use child::ChildCommand;
pub use dial::{DialConfig, TlsDialer, TunnelStream};
pub use error::{TransportError, TransportErrorKind};
pub use listener::{BUILDKIT_HOST_ENV, Incoming, LocalListener};
pub use relay::{Dialer, Relay, RelayFailure, RelayReport};
pub use stdio::{DuplexStream, StdioStream, stdio};
pub use tunnel::{ChannelConfig, into_channel};

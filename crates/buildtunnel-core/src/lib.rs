//! Core types for buildtunnel.
//!
//! This crate holds the types shared by every other buildtunnel crate:
//!
//! - [`ConnectionDescriptor`]: endpoint and TLS material for an acquired build machine
//! - [`Platform`]: the CPU architecture a build machine runs
//! - [`LeaseRequest`] and [`LeaseState`]: the identity and lifecycle of a lease
//! - [`Error`]: the session-level error taxonomy every crate converts into
//!
//! It has no async runtime dependency.

#![deny(missing_docs)]

pub mod descriptor;
pub mod error;
pub mod lease;
pub mod platform;

pub use descriptor::ConnectionDescriptor;
pub use error::{BoxError, Error, ErrorKind, Result};
pub use lease::{LeaseRequest, LeaseState};
pub use platform::Platform;

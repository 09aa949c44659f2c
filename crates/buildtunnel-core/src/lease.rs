//! Lease identity and lifecycle states.

use std::fmt;

use crate::platform::Platform;

/// Identifies the build a machine is requested for.
#[derive(Clone, PartialEq, Eq)]
pub struct LeaseRequest {
    /// Build the machine is leased to.
    pub build_id: String,
    /// Bearer credential for the control plane.
    pub token: String,
    /// Requested machine platform.
    pub platform: Platform,
}

impl LeaseRequest {
    /// Create a new lease request.
    #[must_use]
    pub fn new(build_id: impl Into<String>, token: impl Into<String>, platform: Platform) -> Self {
        Self {
            build_id: build_id.into(),
            token: token.into(),
            platform,
        }
    }
}

impl fmt::Debug for LeaseRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseRequest")
            .field("build_id", &self.build_id)
            .field("token", &"<redacted>")
            .field("platform", &self.platform)
            .finish()
    }
}

/// Lifecycle of a lease: `Acquiring → Acquired → Released`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseState {
    /// Waiting for the control plane to hand out a machine.
    Acquiring,
    /// A machine is assigned and reachable.
    Acquired,
    /// The lease is finished. Terminal.
    Released,
}

impl LeaseState {
    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Released)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Acquiring, Self::Acquired)
                | (Self::Acquiring, Self::Released)
                | (Self::Acquired, Self::Released)
        )
    }
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acquiring => write!(f, "acquiring"),
            Self::Acquired => write!(f, "acquired"),
            Self::Released => write!(f, "released"),
        }
    }
}

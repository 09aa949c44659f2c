//! Settings for starting a lease.

use buildtunnel_core::{LeaseRequest, Platform};

use crate::control::ControlPlaneConfig;

/// Everything needed to start a lease.
#[derive(Debug, Clone)]
pub struct LeaseSettings {
    /// Control-plane client settings.
    pub control_plane: ControlPlaneConfig,
    /// Identity of the lease.
    pub request: LeaseRequest,
}

impl LeaseSettings {
    /// Lease `request` from the control plane at `control_plane`.
    #[must_use]
    pub const fn new(control_plane: ControlPlaneConfig, request: LeaseRequest) -> Self {
        Self {
            control_plane,
            request,
        }
    }
}

/// A fresh build ID for builds that did not bring their own.
#[must_use]
pub fn new_build_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// The platform matching the architecture this binary was built for.
#[must_use]
pub fn host_platform() -> Platform {
    match std::env::consts::ARCH {
        "x86_64" => Platform::Amd64,
        "aarch64" => Platform::Arm64,
        other => Platform::from(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_ids_are_unique_uuids() {
        let first = new_build_id();
        assert!(uuid::Uuid::parse_str(&first).is_ok());
        assert_ne!(first, new_build_id());
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_host_platform() {
        assert_eq!(host_platform(), Platform::Amd64);
    }
}

//! Locally synthesized worker and capability answers.
//!
//! `Control.ListWorkers` and `LLBBridge.Ping` are answered without a round
//! trip. The worker list is derived from the leased machine's platform: the
//! native architecture first, then the variants it can also execute.

use std::collections::HashMap;

use buildtunnel_core::Platform;
use bytes::Bytes;
use prost::Message;

use crate::caps::{FRONTEND_CAPS, LLB_CAPS};

/// Identifier of the single synthesized worker.
pub const WORKER_ID: &str = "buildtunnel";

/// Version reported for the synthesized worker.
pub const BUILDKIT_VERSION: &str = "v0.16.0";

const BUILDKIT_PACKAGE: &str = "github.com/moby/buildkit";

const WORKER_LABELS: &[(&str, &str)] = &[
    ("org.mobyproject.buildkit.worker.executor", "oci"),
    ("org.mobyproject.buildkit.worker.snapshotter", "overlayfs"),
    ("org.mobyproject.buildkit.worker.network", "host"),
];

// =============================================================================
// Wire messages
// =============================================================================

/// `pb.Platform`.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct PlatformRecord {
    /// CPU architecture, e.g. `amd64`.
    #[prost(string, tag = "1")]
    pub architecture: String,
    /// Operating system, always `linux` here.
    #[prost(string, tag = "2")]
    pub os: String,
    /// Architecture variant, e.g. `v2`.
    #[prost(string, tag = "3")]
    pub variant: String,
    /// OS version.
    #[prost(string, tag = "4")]
    pub os_version: String,
    /// OS features.
    #[prost(string, repeated, tag = "5")]
    pub os_features: Vec<String>,
}

/// `types.BuildkitVersion`.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct BuildkitVersion {
    /// Go package path.
    #[prost(string, tag = "1")]
    pub package: String,
    /// Release version.
    #[prost(string, tag = "2")]
    pub version: String,
    /// Source revision.
    #[prost(string, tag = "3")]
    pub revision: String,
}

/// `types.WorkerRecord`.
#[derive(Clone, PartialEq, Message)]
pub struct WorkerRecord {
    /// Worker identifier.
    #[prost(string, tag = "1")]
    pub id: String,
    /// Worker labels.
    #[prost(map = "string, string", tag = "2")]
    pub labels: HashMap<String, String>,
    /// Platforms the worker can execute.
    #[prost(message, repeated, tag = "3")]
    pub platforms: Vec<PlatformRecord>,
    /// Daemon version.
    #[prost(message, optional, tag = "5")]
    pub buildkit_version: Option<BuildkitVersion>,
}

/// `moby.buildkit.v1.ListWorkersResponse`.
#[derive(Clone, PartialEq, Message)]
pub struct ListWorkersResponse {
    /// Available workers.
    #[prost(message, repeated, tag = "1")]
    pub record: Vec<WorkerRecord>,
}

/// `moby.buildkit.v1.apicaps.APICap`.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct ApiCap {
    /// Capability ID.
    #[prost(string, tag = "1")]
    pub id: String,
    /// Whether the capability is usable.
    #[prost(bool, tag = "2")]
    pub enabled: bool,
    /// Whether the capability is deprecated.
    #[prost(bool, tag = "3")]
    pub deprecated: bool,
    /// Why the capability is disabled.
    #[prost(string, tag = "4")]
    pub disabled_reason: String,
    /// Human-readable disabled reason.
    #[prost(string, tag = "5")]
    pub disabled_reason_msg: String,
    /// Suggested replacement.
    #[prost(string, tag = "6")]
    pub disabled_alternative: String,
}

/// `moby.buildkit.v1.frontend.PongResponse`.
#[derive(Clone, PartialEq, Message)]
pub struct PongResponse {
    /// Frontend gateway capabilities.
    #[prost(message, repeated, tag = "1")]
    pub frontend_api_caps: Vec<ApiCap>,
    /// LLB capabilities.
    #[prost(message, repeated, tag = "2")]
    pub llb_caps: Vec<ApiCap>,
    /// Available workers.
    #[prost(message, repeated, tag = "3")]
    pub workers: Vec<WorkerRecord>,
}

// =============================================================================
// Synthesis
// =============================================================================

/// Platform strings a machine of `platform` can execute, native first.
#[must_use]
pub fn platform_variants(platform: &Platform) -> &'static [&'static str] {
    match platform {
        Platform::Amd64 => &["amd64", "amd64/v2", "amd64/v3", "amd64/v4", "386"],
        Platform::Arm64 => &["arm64", "arm/v8", "arm/v7", "arm/v6"],
        Platform::Other(_) => &[],
    }
}

fn platform_record(spec: &str) -> PlatformRecord {
    let (architecture, variant) = spec.split_once('/').unwrap_or((spec, ""));
    PlatformRecord {
        architecture: architecture.to_string(),
        os: "linux".to_string(),
        variant: variant.to_string(),
        ..PlatformRecord::default()
    }
}

/// The worker list for a machine of `platform`.
///
/// Unknown platforms yield no workers at all.
#[must_use]
pub fn workers(platform: &Platform) -> Vec<WorkerRecord> {
    let variants = platform_variants(platform);
    if variants.is_empty() {
        return Vec::new();
    }
    vec![WorkerRecord {
        id: WORKER_ID.to_string(),
        labels: WORKER_LABELS
            .iter()
            .map(|&(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        platforms: variants.iter().copied().map(platform_record).collect(),
        buildkit_version: Some(BuildkitVersion {
            package: BUILDKIT_PACKAGE.to_string(),
            version: BUILDKIT_VERSION.to_string(),
            revision: String::new(),
        }),
    }]
}

fn enabled(caps: &[&str]) -> Vec<ApiCap> {
    caps.iter()
        .map(|id| ApiCap {
            id: (*id).to_string(),
            enabled: true,
            ..ApiCap::default()
        })
        .collect()
}

/// Encoded `ListWorkersResponse` for a machine of `platform`.
#[must_use]
pub fn list_workers_response(platform: &Platform) -> Bytes {
    let response = ListWorkersResponse {
        record: workers(platform),
    };
    Bytes::from(response.encode_to_vec())
}

/// Encoded `PongResponse` for a machine of `platform`.
#[must_use]
pub fn pong_response(platform: &Platform) -> Bytes {
    let response = PongResponse {
        frontend_api_caps: enabled(FRONTEND_CAPS),
        llb_caps: enabled(LLB_CAPS),
        workers: workers(platform),
    };
    Bytes::from(response.encode_to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn platforms(records: &[WorkerRecord]) -> Vec<(String, String)> {
        records[0]
            .platforms
            .iter()
            .map(|p| (p.architecture.clone(), p.variant.clone()))
            .collect()
    }

    #[test]
    fn test_amd64_variants_in_order() {
        let records = workers(&Platform::Amd64);
        assert_eq!(records.len(), 1);
        assert_eq!(
            platforms(&records),
            vec![
                ("amd64".to_string(), String::new()),
                ("amd64".to_string(), "v2".to_string()),
                ("amd64".to_string(), "v3".to_string()),
                ("amd64".to_string(), "v4".to_string()),
                ("386".to_string(), String::new()),
            ]
        );
        assert!(records[0].platforms.iter().all(|p| p.os == "linux"));
    }

    #[test]
    fn test_arm64_variants_in_order() {
        let records = workers(&Platform::Arm64);
        assert_eq!(
            platforms(&records),
            vec![
                ("arm64".to_string(), String::new()),
                ("arm".to_string(), "v8".to_string()),
                ("arm".to_string(), "v7".to_string()),
                ("arm".to_string(), "v6".to_string()),
            ]
        );
    }

    #[test]
    fn test_unknown_platform_has_no_workers() {
        assert!(workers(&Platform::from("riscv64")).is_empty());

        let decoded =
            ListWorkersResponse::decode(list_workers_response(&Platform::from("s390x"))).unwrap();
        assert!(decoded.record.is_empty());
    }

    #[test]
    fn test_worker_labels() {
        let record = &workers(&Platform::Amd64)[0];
        assert_eq!(
            record.labels["org.mobyproject.buildkit.worker.executor"],
            "oci"
        );
        assert_eq!(
            record.buildkit_version.as_ref().unwrap().version,
            BUILDKIT_VERSION
        );
    }

    #[test]
    fn test_pong_enables_every_cap() {
        let pong = PongResponse::decode(pong_response(&Platform::Arm64)).unwrap();
        assert_eq!(pong.frontend_api_caps.len(), FRONTEND_CAPS.len());
        assert_eq!(pong.llb_caps.len(), LLB_CAPS.len());
        assert!(
            pong.frontend_api_caps
                .iter()
                .chain(&pong.llb_caps)
                .all(|cap| cap.enabled && !cap.deprecated)
        );
        assert_eq!(pong.workers, workers(&Platform::Arm64));
    }
}

//! Capability IDs advertised in the synthesized `LLBBridge.Ping` answer.
//!
//! Clients check these before using a frontend or LLB feature. The remote
//! daemon is never asked; the proxy claims the set it knows the daemon
//! supports.

/// Frontend gateway capabilities.
pub const FRONTEND_CAPS: &[&str] = &[
    "solve.base",
    "solve.inlinereturn",
    "resolveimage",
    "resolveimage.resolvemode",
    "readfile",
    "readdir",
    "statfile",
    "return",
    "returnmap",
    "importcaches",
    "proto.refarray",
    "reference.output",
    "frontend.inputs",
    "frontend.caps",
    "frontend.subrequests",
    "gateway.solve.metadata",
    "gateway.exec",
    "gateway.exec.extrahosts",
    "gateway.exec.secretenv",
    "gateway.exec.secretgid",
    "gateway.evaluate",
    "gateway.evaluatesolve",
    "gateway.warnings",
    "gateway.sbom",
    "source.policy",
];

/// LLB definition capabilities.
pub const LLB_CAPS: &[&str] = &[
    "source.image",
    "source.image.resolvemode",
    "source.image.layerlimit",
    "source.local",
    "source.local.unique",
    "source.local.sessionid",
    "source.local.includepatterns",
    "source.local.excludepatterns",
    "source.local.followpaths",
    "source.local.sharedkeyhint",
    "source.local.differ",
    "source.git",
    "source.git.keepgitdir",
    "source.git.fullurl",
    "source.git.httpauth",
    "source.git.knownsshhosts",
    "source.git.mountsshsock",
    "source.git.submodule",
    "source.http",
    "source.http.checksum",
    "source.http.perm",
    "source.http.uidgid",
    "source.oci",
    "exec.meta.base",
    "exec.meta.cgroup.parent",
    "exec.meta.proxy",
    "exec.meta.network",
    "exec.meta.security.device",
    "exec.meta.setsecurity",
    "exec.meta.ulimit",
    "exec.meta.rmhostname",
    "exec.mount.bind",
    "exec.mount.bind.readonly",
    "exec.mount.cache",
    "exec.mount.cache.sharing",
    "exec.mount.selector",
    "exec.mount.tmpfs",
    "exec.mount.tmpfs.size",
    "exec.mount.secret",
    "exec.mount.ssh",
    "exec.secret.env",
    "exec.validexitcode",
    "constraints",
    "platform",
    "meta.ignorecache",
    "meta.description",
    "meta.exportcache",
    "remotecache.gha",
    "remotecache.s3",
    "file.base",
    "file.copy.includeexcludepatterns",
    "file.rm.wildcard",
    "merge.op",
    "diff.op",
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_caps_are_unique() {
        for caps in [FRONTEND_CAPS, LLB_CAPS] {
            let unique: HashSet<_> = caps.iter().collect();
            assert_eq!(unique.len(), caps.len());
        }
    }

    #[test]
    fn test_core_caps_present() {
        assert!(FRONTEND_CAPS.contains(&"solve.base"));
        assert!(LLB_CAPS.contains(&"source.image"));
        assert!(LLB_CAPS.contains(&"exec.mount.cache"));
    }
}

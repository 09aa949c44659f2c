//! Connection descriptors for acquired build machines.

use std::fmt;

use crate::error::Error;
use crate::platform::Platform;

/// Everything needed to reach an acquired build machine.
///
/// A descriptor is immutable once the control plane hands it out and is
/// owned by the lease for its whole lifetime. `Debug` output never includes
/// the private key.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    /// Remote endpoint, usually `tcp://host:port`.
    pub endpoint: String,
    /// Name the machine's certificate is issued for.
    pub server_name: String,
    /// PEM-encoded certificate authority bundle.
    pub ca_cert: String,
    /// PEM-encoded client certificate chain.
    pub cert: Option<String>,
    /// PEM-encoded client private key.
    pub key: Option<String>,
    /// Platform the machine runs.
    pub platform: Platform,
}

impl ConnectionDescriptor {
    /// Create a descriptor without a client identity.
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        server_name: impl Into<String>,
        ca_cert: impl Into<String>,
        platform: Platform,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            server_name: server_name.into(),
            ca_cert: ca_cert.into(),
            cert: None,
            key: None,
            platform,
        }
    }

    /// Attach a client certificate and key.
    #[must_use]
    pub fn with_client_identity(mut self, cert: impl Into<String>, key: impl Into<String>) -> Self {
        self.cert = Some(cert.into());
        self.key = Some(key.into());
        self
    }

    /// The client certificate and key, when both are present and non-empty.
    #[must_use]
    pub fn client_identity(&self) -> Option<(&str, &str)> {
        match (self.cert.as_deref(), self.key.as_deref()) {
            (Some(cert), Some(key)) if !cert.is_empty() && !key.is_empty() => Some((cert, key)),
            _ => None,
        }
    }

    /// Reject descriptors that cannot possibly be dialed.
    pub fn validate(&self) -> Result<(), Error> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::lease("descriptor has no endpoint"));
        }
        if self.ca_cert.trim().is_empty() {
            return Err(Error::lease("descriptor has no CA certificate"));
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("endpoint", &self.endpoint)
            .field("server_name", &self.server_name)
            .field("ca_cert", &format_args!("<{} bytes>", self.ca_cert.len()))
            .field("cert", &self.cert.as_ref().map(|c| format!("<{} bytes>", c.len())))
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("platform", &self.platform)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor::new("tcp://10.0.0.1:443", "machine", "-----BEGIN", Platform::Amd64)
    }

    #[test]
    fn test_client_identity_requires_both_parts() {
        let mut desc = descriptor();
        assert!(desc.client_identity().is_none());

        desc.cert = Some("cert".to_string());
        assert!(desc.client_identity().is_none());

        let desc = descriptor().with_client_identity("cert", "key");
        assert_eq!(desc.client_identity(), Some(("cert", "key")));
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        assert!(descriptor().validate().is_ok());

        let mut desc = descriptor();
        desc.endpoint = String::new();
        assert!(desc.validate().is_err());

        let mut desc = descriptor();
        desc.ca_cert = "  ".to_string();
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let desc = descriptor().with_client_identity("cert", "super-secret");
        let debug = format!("{desc:?}");
        assert!(debug.contains("tcp://10.0.0.1:443"));
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }
}

//! TLS dialing with a bounded retry loop.
//!
//! A freshly leased build machine is usually still booting when its
//! descriptor arrives, so the dialer keeps trying at a fixed interval until
//! the connection succeeds, the budget runs out, or the session is
//! cancelled. Problems with the descriptor itself (unparseable
//! certificates, a bad server name) are reported before the first attempt.
//!
//! # Example
//!
//! ```no_run
//! use buildtunnel_core::{ConnectionDescriptor, Platform};
//! use buildtunnel_transport::dial::{DialConfig, TlsDialer};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(ca: String) -> Result<(), buildtunnel_transport::TransportError> {
//! let descriptor =
//!     ConnectionDescriptor::new("tcp://10.0.0.7:443", "builder.internal", ca, Platform::Amd64);
//! let dialer = TlsDialer::new(&descriptor, DialConfig::default())?;
//! let stream = dialer.dial(&CancellationToken::new()).await?;
//! # drop(stream);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use buildtunnel_core::ConnectionDescriptor;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::TransportError;

/// Default overall dial budget (5 minutes).
pub const DEFAULT_DIAL_BUDGET: Duration = Duration::from_secs(5 * 60);

/// Default pause between dial attempts.
pub const DEFAULT_DIAL_INTERVAL: Duration = Duration::from_secs(1);

/// Default maximum number of dial attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 120;

/// Default bound on one TCP connect plus TLS handshake.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// A TLS stream to the build machine.
pub type TunnelStream = tokio_rustls::client::TlsStream<TcpStream>;

/// Retry settings for [`TlsDialer`].
#[derive(Debug, Clone)]
pub struct DialConfig {
    /// Total time allowed for all attempts.
    pub budget: Duration,
    /// Pause between attempts.
    pub interval: Duration,
    /// Maximum number of attempts.
    pub max_attempts: u32,
    /// Bound on a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            budget: DEFAULT_DIAL_BUDGET,
            interval: DEFAULT_DIAL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

impl DialConfig {
    /// Create a config with the default retry settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the overall budget.
    #[must_use]
    pub const fn budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Set the pause between attempts.
    #[must_use]
    pub const fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the maximum number of attempts.
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub const fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }
}

/// Dials the endpoint of a [`ConnectionDescriptor`] over TLS.
///
/// Construction validates all TLS material, so a dialer that exists can
/// only fail for network reasons.
#[derive(Clone)]
pub struct TlsDialer {
    endpoint: String,
    host: String,
    port: u16,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    config: DialConfig,
}

impl std::fmt::Debug for TlsDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsDialer")
            .field("endpoint", &self.endpoint)
            .field("server_name", &self.server_name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TlsDialer {
    /// Build a dialer for `descriptor`.
    ///
    /// When the descriptor carries no server name the endpoint host is
    /// verified instead.
    ///
    /// # Errors
    ///
    /// Fails without touching the network if the endpoint, CA certificate,
    /// client identity or server name cannot be used.
    pub fn new(descriptor: &ConnectionDescriptor, config: DialConfig) -> Result<Self, TransportError> {
        let (host, port) = parse_endpoint(&descriptor.endpoint)?;
        let name = if descriptor.server_name.is_empty() {
            host.clone()
        } else {
            descriptor.server_name.clone()
        };
        let server_name = ServerName::try_from(name.clone())
            .map_err(|_| TransportError::InvalidServerName(name))?;
        let tls = client_config(descriptor)?;

        Ok(Self {
            endpoint: descriptor.endpoint.clone(),
            host,
            port,
            server_name,
            connector: TlsConnector::from(Arc::new(tls)),
            config,
        })
    }

    /// The endpoint this dialer connects to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The retry settings.
    #[must_use]
    pub const fn config(&self) -> &DialConfig {
        &self.config
    }

    /// Dial until success, cancellation, or budget exhaustion.
    ///
    /// Cancellation interrupts both an in-flight attempt and the pause
    /// between attempts.
    pub async fn dial(&self, cancel: &CancellationToken) -> Result<TunnelStream, TransportError> {
        let started = Instant::now();
        let deadline = started + self.config.budget;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let attempt = tokio::time::timeout(self.config.attempt_timeout, self.dial_once());
            let result = tokio::select! {
                () = cancel.cancelled() => {
                    debug!(endpoint = %self.endpoint, attempts, "dial cancelled");
                    return Err(TransportError::Cancelled { operation: "dial" });
                }
                result = attempt => result
                    .unwrap_or_else(|_| Err(TransportError::AttemptTimeout(self.config.attempt_timeout))),
            };

            let err = match result {
                Ok(stream) => {
                    info!(endpoint = %self.endpoint, attempts, "tunnel established");
                    return Ok(stream);
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => err,
            };

            if attempts >= self.config.max_attempts
                || Instant::now() + self.config.interval >= deadline
            {
                warn!(endpoint = %self.endpoint, attempts, error = %err, "giving up on dial");
                return Err(TransportError::Exhausted {
                    endpoint: self.endpoint.clone(),
                    attempts,
                    elapsed: started.elapsed(),
                    last: Box::new(err),
                });
            }

            debug!(endpoint = %self.endpoint, attempt = attempts, error = %err, "dial failed, retrying");

            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(TransportError::Cancelled { operation: "dial" });
                }
                () = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }

    async fn dial_once(&self) -> Result<TunnelStream, TransportError> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port)).await?;
        tcp.set_nodelay(true)?;
        let stream = self.connector.connect(self.server_name.clone(), tcp).await?;
        Ok(stream)
    }
}

/// Build a dialer for `descriptor` and dial it.
pub async fn dial(
    descriptor: &ConnectionDescriptor,
    config: DialConfig,
    cancel: &CancellationToken,
) -> Result<TunnelStream, TransportError> {
    TlsDialer::new(descriptor, config)?.dial(cancel).await
}

/// Split a `tcp://host:port` (or bare `host:port`) endpoint.
pub fn parse_endpoint(endpoint: &str) -> Result<(String, u16), TransportError> {
    let normalized = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("tcp://{endpoint}")
    };
    let url = Url::parse(&normalized)
        .map_err(|e| TransportError::invalid_endpoint(endpoint, e.to_string()))?;

    if url.scheme() != "tcp" {
        return Err(TransportError::invalid_endpoint(
            endpoint,
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| TransportError::invalid_endpoint(endpoint, "missing host"))?;
    let port = url
        .port()
        .ok_or_else(|| TransportError::invalid_endpoint(endpoint, "missing port"))?;

    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok((host.to_string(), port))
}

fn client_config(descriptor: &ConnectionDescriptor) -> Result<ClientConfig, TransportError> {
    let ca = read_certificates(&descriptor.ca_cert)
        .map_err(|message| TransportError::InvalidCaCertificate { message })?;
    let mut roots = RootCertStore::empty();
    let (added, _ignored) = roots.add_parsable_certificates(ca);
    if added == 0 {
        return Err(TransportError::InvalidCaCertificate {
            message: "no usable certificates in bundle".to_string(),
        });
    }

    let builder = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots);

    let mut config = match descriptor.client_identity() {
        Some((cert, key)) => {
            let chain = read_certificates(cert)
                .map_err(|message| TransportError::InvalidClientIdentity { message })?;
            let key = rustls_pemfile::private_key(&mut key.as_bytes())
                .map_err(|e| TransportError::InvalidClientIdentity {
                    message: e.to_string(),
                })?
                .ok_or_else(|| TransportError::InvalidClientIdentity {
                    message: "no private key found".to_string(),
                })?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| TransportError::InvalidClientIdentity {
                    message: e.to_string(),
                })?
        }
        None => builder.with_no_client_auth(),
    };
    config.alpn_protocols = vec![b"h2".to_vec()];
    Ok(config)
}

fn read_certificates(pem: &str) -> Result<Vec<CertificateDer<'static>>, String> {
    let certs = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;
    if certs.is_empty() {
        return Err("no PEM certificates found".to_string());
    }
    Ok(certs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint("tcp://10.1.2.3:8372").unwrap(),
            ("10.1.2.3".to_string(), 8372)
        );
        assert_eq!(
            parse_endpoint("builder.example.com:443").unwrap(),
            ("builder.example.com".to_string(), 443)
        );
        assert_eq!(
            parse_endpoint("tcp://[::1]:9000").unwrap(),
            ("::1".to_string(), 9000)
        );
    }

    #[test]
    fn test_parse_endpoint_rejects_garbage() {
        assert!(parse_endpoint("tcp://10.1.2.3").is_err());
        assert!(parse_endpoint("unix:///run/buildkit.sock").is_err());
        assert!(parse_endpoint("").is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = DialConfig::new()
            .budget(Duration::from_secs(30))
            .interval(Duration::from_millis(250))
            .max_attempts(3)
            .attempt_timeout(Duration::from_secs(2));

        assert_eq!(config.budget, Duration::from_secs(30));
        assert_eq!(config.interval, Duration::from_millis(250));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.attempt_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_default_config() {
        let config = DialConfig::default();
        assert_eq!(config.budget, Duration::from_secs(300));
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.max_attempts, 120);
    }

    #[test]
    fn test_read_certificates_rejects_non_pem() {
        assert!(read_certificates("not a certificate").is_err());
        assert!(read_certificates("").is_err());
    }
}

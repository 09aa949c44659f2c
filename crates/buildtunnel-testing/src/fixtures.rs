//! TLS material and canned values for tests.
//!
//! The certificates form a small private PKI: one CA signing a server
//! certificate (valid for `builder.test`, `localhost` and `127.0.0.1`) and a
//! client certificate.

use std::net::SocketAddr;
use std::sync::Arc;

use buildtunnel_core::{ConnectionDescriptor, LeaseRequest, Platform};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{RootCertStore, ServerConfig};

/// PEM of the test CA.
pub const CA_CERT: &str = include_str!("../fixtures/ca.pem");
/// PEM of the server certificate.
pub const SERVER_CERT: &str = include_str!("../fixtures/server.pem");
/// PEM of the server private key.
pub const SERVER_KEY: &str = include_str!("../fixtures/server.key");
/// PEM of the client certificate.
pub const CLIENT_CERT: &str = include_str!("../fixtures/client.pem");
/// PEM of the client private key.
pub const CLIENT_KEY: &str = include_str!("../fixtures/client.key");

/// Name the server certificate is issued for.
pub const SERVER_NAME: &str = "builder.test";

/// Build ID used by [`lease_request`].
pub const BUILD_ID: &str = "build-0001";

/// Token used by [`lease_request`].
pub const TOKEN: &str = "test-token";

/// A descriptor for a machine listening on `addr` with the test PKI.
#[must_use]
pub fn descriptor(addr: SocketAddr) -> ConnectionDescriptor {
    ConnectionDescriptor::new(format!("tcp://{addr}"), SERVER_NAME, CA_CERT, Platform::Amd64)
}

/// A lease request for an amd64 machine.
#[must_use]
pub fn lease_request() -> LeaseRequest {
    LeaseRequest::new(BUILD_ID, TOKEN, Platform::Amd64)
}

/// Parse the certificates in `pem`.
///
/// # Panics
///
/// Panics if `pem` is malformed.
#[must_use]
pub fn certs(pem: &str) -> Vec<CertificateDer<'static>> {
    rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .expect("fixture certificates parse")
}

/// Parse the first private key in `pem`.
///
/// # Panics
///
/// Panics if `pem` holds no valid key.
#[must_use]
pub fn key(pem: &str) -> PrivateKeyDer<'static> {
    rustls_pemfile::private_key(&mut pem.as_bytes())
        .expect("fixture key parses")
        .expect("fixture holds a key")
}

/// Server TLS settings offering `h2`, optionally requiring a client
/// certificate signed by the test CA.
///
/// # Panics
///
/// Panics if the fixtures are unusable.
#[must_use]
pub fn server_config(require_client_cert: bool) -> ServerConfig {
    let provider = Arc::new(ring::default_provider());
    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .expect("ring supports the default versions");
    let builder = if require_client_cert {
        let mut roots = RootCertStore::empty();
        roots.add_parsable_certificates(certs(CA_CERT));
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .expect("client verifier builds");
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_no_client_auth()
    };
    let mut config = builder
        .with_single_cert(certs(SERVER_CERT), key(SERVER_KEY))
        .expect("server certificate matches its key");
    config.alpn_protocols = vec![b"h2".to_vec()];
    config
}

/// A TLS acceptor over [`server_config`].
#[must_use]
pub fn tls_acceptor(require_client_cert: bool) -> TlsAcceptor {
    TlsAcceptor::from(Arc::new(server_config(require_client_cert)))
}

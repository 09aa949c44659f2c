//! Dialer tests against a local TLS server.

use std::net::SocketAddr;
use std::time::Duration;

use buildtunnel_core::ConnectionDescriptor;
use buildtunnel_testing::fixtures::{self, CLIENT_CERT, CLIENT_KEY};
use buildtunnel_transport::dial::{DialConfig, TlsDialer};
use buildtunnel_transport::{TransportError, TransportErrorKind};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Accept TLS connections and echo one line back on each.
async fn spawn_echo_server(listener: TcpListener, require_client_cert: bool) {
    let acceptor = fixtures::tls_acceptor(require_client_cert);
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(mut tls) = acceptor.accept(tcp).await else {
                    return;
                };
                let mut buf = [0u8; 5];
                if tls.read_exact(&mut buf).await.is_ok() {
                    let _ = tls.write_all(&buf).await;
                    let _ = tls.flush().await;
                }
            });
        }
    });
}

fn descriptor(addr: SocketAddr) -> ConnectionDescriptor {
    fixtures::descriptor(addr)
}

async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn fast_retry() -> DialConfig {
    DialConfig::new()
        .interval(Duration::from_millis(20))
        .attempt_timeout(Duration::from_secs(2))
        .budget(Duration::from_secs(30))
}

#[tokio::test]
async fn test_dial_and_exchange_bytes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    spawn_echo_server(listener, false).await;

    let dialer = TlsDialer::new(&descriptor(addr), fast_retry()).unwrap();
    let mut stream = dialer.dial(&CancellationToken::new()).await.unwrap();

    let (_, session) = stream.get_ref();
    assert_eq!(session.alpn_protocol(), Some(&b"h2"[..]));

    stream.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");
}

#[tokio::test]
async fn test_dial_with_client_identity() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    spawn_echo_server(listener, true).await;

    let descriptor = descriptor(addr).with_client_identity(CLIENT_CERT, CLIENT_KEY);
    let mut stream = buildtunnel_transport::dial::dial(
        &descriptor,
        fast_retry(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    stream.write_all(b"mtls!").await.unwrap();
    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"mtls!");
}

#[tokio::test]
async fn test_malformed_ca_fails_immediately() {
    let mut descriptor = descriptor(unused_addr().await);
    descriptor.ca_cert = "-----BEGIN CERTIFICATE-----\nnot base64!\n-----END CERTIFICATE-----\n".to_string();

    let err = TlsDialer::new(&descriptor, DialConfig::default()).unwrap_err();
    assert!(matches!(err, TransportError::InvalidCaCertificate { .. }));
    assert_eq!(err.kind(), TransportErrorKind::InvalidConfig);
}

#[tokio::test]
async fn test_malformed_client_key_fails_immediately() {
    let descriptor =
        descriptor(unused_addr().await).with_client_identity(CLIENT_CERT, "garbage key material");

    let err = TlsDialer::new(&descriptor, DialConfig::default()).unwrap_err();
    assert!(matches!(err, TransportError::InvalidClientIdentity { .. }));
}

#[tokio::test]
async fn test_invalid_server_name_fails_immediately() {
    let mut descriptor = descriptor(unused_addr().await);
    descriptor.server_name = "not a valid name!".to_string();

    let err = TlsDialer::new(&descriptor, DialConfig::default()).unwrap_err();
    assert!(matches!(err, TransportError::InvalidServerName(_)));
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let addr = unused_addr().await;
    let dialer = TlsDialer::new(&descriptor(addr), fast_retry().max_attempts(3)).unwrap();

    let err = dialer.dial(&CancellationToken::new()).await.unwrap_err();
    match err {
        TransportError::Exhausted { attempts, last, .. } => {
            assert_eq!(attempts, 3);
            assert_eq!(last.kind(), TransportErrorKind::ConnectionFailed);
        }
        other => panic!("expected exhaustion, got {other}"),
    }
}

#[tokio::test]
async fn test_retries_until_server_comes_up() {
    let addr = unused_addr().await;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let listener = TcpListener::bind(addr).await.unwrap();
        spawn_echo_server(listener, false).await;
    });

    let dialer = TlsDialer::new(&descriptor(addr), fast_retry()).unwrap();
    let mut stream = dialer.dial(&CancellationToken::new()).await.unwrap();
    stream.write_all(b"later").await.unwrap();
    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"later");
}

#[tokio::test]
async fn test_cancel_interrupts_backoff() {
    let addr = unused_addr().await;
    let dialer = TlsDialer::new(
        &descriptor(addr),
        DialConfig::new().interval(Duration::from_secs(3600)),
    )
    .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(5), dialer.dial(&cancel))
        .await
        .expect("dial should stop promptly after cancellation");
    assert!(result.unwrap_err().is_cancelled());
}

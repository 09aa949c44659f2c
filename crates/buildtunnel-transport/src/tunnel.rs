//! HTTP/2 channels over an already established stream.
//!
//! The upstream connection must ride on exactly the tunnel the dialer
//! produced. The connector hands that one stream to the channel on first
//! use; any later reconnect attempt fails instead of silently dialing a new
//! machine.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::debug;

use crate::error::TransportError;

/// HTTP/2 settings for a tunnel channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Interval between HTTP/2 keepalive pings, if any.
    pub keepalive_interval: Option<Duration>,
    /// How long to wait for a keepalive acknowledgement.
    pub keepalive_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_timeout: Duration::from_secs(20),
        }
    }
}

impl ChannelConfig {
    /// Set the keepalive interval.
    #[must_use]
    pub const fn keepalive_interval(mut self, interval: Option<Duration>) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Set the keepalive timeout.
    #[must_use]
    pub const fn keepalive_timeout(mut self, timeout: Duration) -> Self {
        self.keepalive_timeout = timeout;
        self
    }
}

/// Turn `stream` into a gRPC channel that owns it.
///
/// `authority` becomes the `:authority` of every request, normally the TLS
/// server name.
pub async fn into_channel<S>(
    stream: S,
    authority: &str,
    config: &ChannelConfig,
) -> Result<Channel, TransportError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let authority = if authority.is_empty() {
        "localhost"
    } else {
        authority
    };
    let mut endpoint = Endpoint::from_shared(format!("http://{authority}"))?
        .keep_alive_timeout(config.keepalive_timeout);
    if let Some(interval) = config.keepalive_interval {
        endpoint = endpoint
            .http2_keep_alive_interval(interval)
            .keep_alive_while_idle(true);
    }

    let slot = Arc::new(Mutex::new(Some(stream)));
    let channel = endpoint
        .connect_with_connector(service_fn(move |_: Uri| {
            let slot = Arc::clone(&slot);
            async move {
                let stream = slot
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take()
                    .ok_or_else(|| {
                        std::io::Error::new(
                            std::io::ErrorKind::NotConnected,
                            "tunnel stream already consumed",
                        )
                    })?;
                Ok::<_, std::io::Error>(TokioIo::new(stream))
            }
        }))
        .await?;

    debug!(authority, "channel established over tunnel");
    Ok(channel)
}

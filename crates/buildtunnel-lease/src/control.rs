//! The control-plane API that hands out build machines.
//!
//! [`ControlPlane`] is the seam the lease talks through. [`HttpControlPlane`]
//! implements it as JSON over HTTP: each RPC is a `POST` of a JSON body to
//! `{base}/{service}/{method}`, answered by a JSON body, with errors carried
//! in non-2xx responses.

use std::future::Future;
use std::time::Duration;

use buildtunnel_core::{ConnectionDescriptor, LeaseRequest, Platform};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;
use url::Url;

use crate::error::LeaseError;

/// Service path of the machine API.
pub const MACHINE_SERVICE: &str = "buildtunnel.v1.MachineService";

/// Default control-plane base URL.
pub const DEFAULT_API_URL: &str = "https://api.buildtunnel.dev";

/// Answer to a connection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionResponse {
    /// A machine is ready.
    Active(ConnectionDescriptor),
    /// No machine yet; ask again after `wait`.
    Pending {
        /// How long the control plane asks us to wait.
        wait: Duration,
    },
}

/// The control-plane operations a lease needs.
pub trait ControlPlane: Send + Sync + 'static {
    /// Ask for a machine for `request`.
    fn get_connection(
        &self,
        request: &LeaseRequest,
    ) -> impl Future<Output = Result<ConnectionResponse, LeaseError>> + Send;

    /// Tell the control plane the build identified by `request` is alive.
    fn report_health(
        &self,
        request: &LeaseRequest,
    ) -> impl Future<Output = Result<(), LeaseError>> + Send;
}

/// Settings for [`HttpControlPlane`].
#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    /// Base URL of the API.
    pub base_url: String,
    /// Connect timeout for each request.
    pub connect_timeout: Duration,
    /// Overall timeout for each request.
    pub request_timeout: Duration,
    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            user_agent: format!("buildtunnel/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ControlPlaneConfig {
    /// Create a config for `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the user agent.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// JSON-over-HTTP control-plane client.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: Client,
    base_url: Url,
}

impl HttpControlPlane {
    /// Create a client for `config`.
    pub fn new(config: &ControlPlaneConfig) -> Result<Self, LeaseError> {
        let mut base_url = Url::parse(&config.base_url)
            .map_err(|e| LeaseError::config(format!("invalid API URL '{}': {e}", config.base_url)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self { client, base_url })
    }

    /// The URL for `method` on the machine service.
    fn method_url(&self, method: &str) -> Result<Url, LeaseError> {
        self.base_url
            .join(&format!("{MACHINE_SERVICE}/{method}"))
            .map_err(|e| LeaseError::config(format!("invalid API URL: {e}")))
    }

    fn headers(token: &str) -> Result<HeaderMap, LeaseError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let mut bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| LeaseError::config("token contains characters not allowed in a header"))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }

    async fn call<B, R>(&self, method: &str, token: &str, body: &B) -> Result<R, LeaseError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = self.method_url(method)?;
        debug!(%url, "control plane request");
        let response = self
            .client
            .post(url)
            .headers(Self::headers(token)?)
            .json(body)
            .send()
            .await?;
        let response = check_status(response).await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return serde_json::from_slice(b"{}")
                .map_err(|e| LeaseError::protocol(format!("empty {method} response: {e}")));
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| LeaseError::protocol(format!("invalid {method} response: {e}")))
    }
}

impl ControlPlane for HttpControlPlane {
    async fn get_connection(&self, request: &LeaseRequest) -> Result<ConnectionResponse, LeaseError> {
        let body = MachineRequest::from(request);
        let response: GetConnectionResponse =
            self.call("GetConnection", &request.token, &body).await?;
        response.into_connection(&request.platform)
    }

    async fn report_health(&self, request: &LeaseRequest) -> Result<(), LeaseError> {
        let body = MachineRequest::from(request);
        let _: serde_json::Value = self.call("ReportHealth", &request.token, &body).await?;
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response, LeaseError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(err) => (err.code, err.message.unwrap_or_default()),
        Err(_) => (None, body),
    };
    Err(LeaseError::Status {
        status: status.as_u16(),
        code,
        message,
    })
}

// =============================================================================
// Wire format
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MachineRequest<'a> {
    build_id: &'a str,
    platform: &'a str,
}

impl<'a> From<&'a LeaseRequest> for MachineRequest<'a> {
    fn from(request: &'a LeaseRequest) -> Self {
        Self {
            build_id: &request.build_id,
            platform: request.platform.as_str(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetConnectionResponse {
    active: Option<ActiveConnection>,
    pending: Option<PendingConnection>,
}

impl GetConnectionResponse {
    fn into_connection(self, requested: &Platform) -> Result<ConnectionResponse, LeaseError> {
        match (self.active, self.pending) {
            (Some(active), _) => Ok(ConnectionResponse::Active(active.into_descriptor(requested))),
            (None, Some(pending)) => Ok(ConnectionResponse::Pending {
                wait: Duration::from_millis(pending.wait_ms),
            }),
            (None, None) => Err(LeaseError::protocol(
                "connection response is neither active nor pending",
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveConnection {
    endpoint: String,
    #[serde(default)]
    server_name: String,
    ca_cert: String,
    #[serde(default)]
    cert: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    platform: Option<String>,
}

impl ActiveConnection {
    fn into_descriptor(self, requested: &Platform) -> ConnectionDescriptor {
        let platform = self
            .platform
            .filter(|p| !p.is_empty())
            .map_or_else(|| requested.clone(), Platform::from);
        ConnectionDescriptor {
            endpoint: self.endpoint,
            server_name: self.server_name,
            ca_cert: self.ca_cert,
            cert: self.cert,
            key: self.key,
            platform,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingConnection {
    #[serde(default, deserialize_with = "u64_lenient")]
    wait_ms: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// 64-bit integers arrive as JSON strings from protobuf-JSON encoders.
fn u64_lenient<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(u64),
        Text(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Number(n) => Ok(n),
        Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(json: &str) -> Result<ConnectionResponse, LeaseError> {
        serde_json::from_str::<GetConnectionResponse>(json)
            .unwrap()
            .into_connection(&Platform::Arm64)
    }

    #[test]
    fn test_active_response() {
        let response = parse(
            r#"{"active":{"endpoint":"tcp://10.0.0.9:443","serverName":"m-1.builders","caCert":"CA","cert":"C","key":"K"}}"#,
        )
        .unwrap();

        let ConnectionResponse::Active(descriptor) = response else {
            panic!("expected active response");
        };
        assert_eq!(descriptor.endpoint, "tcp://10.0.0.9:443");
        assert_eq!(descriptor.server_name, "m-1.builders");
        assert_eq!(descriptor.client_identity(), Some(("C", "K")));
        assert_eq!(descriptor.platform, Platform::Arm64);
    }

    #[test]
    fn test_pending_response() {
        assert_eq!(
            parse(r#"{"pending":{"waitMs":2500}}"#).unwrap(),
            ConnectionResponse::Pending {
                wait: Duration::from_millis(2500)
            }
        );
        assert_eq!(
            parse(r#"{"pending":{"waitMs":"750"}}"#).unwrap(),
            ConnectionResponse::Pending {
                wait: Duration::from_millis(750)
            }
        );
        assert_eq!(
            parse(r#"{"pending":{}}"#).unwrap(),
            ConnectionResponse::Pending {
                wait: Duration::ZERO
            }
        );
    }

    #[test]
    fn test_empty_response_is_protocol_error() {
        let err = parse("{}").unwrap_err();
        assert!(matches!(err, LeaseError::Protocol { .. }));
    }

    #[test]
    fn test_method_url_keeps_base_path() {
        let client = HttpControlPlane::new(&ControlPlaneConfig::new("http://localhost:9000/api")).unwrap();
        assert_eq!(
            client.method_url("GetConnection").unwrap().as_str(),
            "http://localhost:9000/api/buildtunnel.v1.MachineService/GetConnection"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let err = HttpControlPlane::new(&ControlPlaneConfig::new("not a url")).unwrap_err();
        assert!(matches!(err, LeaseError::Config { .. }));
    }
}

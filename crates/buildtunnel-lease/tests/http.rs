//! HTTP control-plane client tests against an axum stand-in.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use buildtunnel_core::{LeaseRequest, LeaseState, Platform};
use buildtunnel_lease::{
    ClientCell, ConnectionResponse, ControlPlane, ControlPlaneConfig, HttpControlPlane, Lease,
    LeaseConfig, LeaseError,
};
use buildtunnel_testing::fixtures;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

const TOKEN: &str = "test-token";

#[derive(Default)]
struct MachineApi {
    polls: AtomicUsize,
    health: AtomicUsize,
    pending_polls: usize,
    last_body: std::sync::Mutex<Option<Value>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

fn unauthenticated() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"code": "unauthenticated", "message": "invalid token"})),
    )
        .into_response()
}

async fn get_connection(
    State(api): State<Arc<MachineApi>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthenticated();
    }
    *api.last_body.lock().unwrap() = Some(body);
    let poll = api.polls.fetch_add(1, Ordering::SeqCst);
    if poll < api.pending_polls {
        return Json(json!({"pending": {"waitMs": "10"}})).into_response();
    }
    Json(json!({
        "active": {
            "endpoint": "tcp://127.0.0.1:9",
            "serverName": fixtures::SERVER_NAME,
            "caCert": fixtures::CA_CERT,
            "platform": "arm64",
        }
    }))
    .into_response()
}

async fn report_health(State(api): State<Arc<MachineApi>>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthenticated();
    }
    api.health.fetch_add(1, Ordering::SeqCst);
    Json(json!({})).into_response()
}

async fn serve(api: Arc<MachineApi>) -> SocketAddr {
    let app = Router::new()
        .route(
            "/api/buildtunnel.v1.MachineService/GetConnection",
            post(get_connection),
        )
        .route(
            "/api/buildtunnel.v1.MachineService/ReportHealth",
            post(report_health),
        )
        .with_state(api);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client(addr: SocketAddr) -> HttpControlPlane {
    HttpControlPlane::new(&ControlPlaneConfig::new(format!("http://{addr}/api"))).unwrap()
}

fn request(token: &str) -> LeaseRequest {
    LeaseRequest::new("build-1234", token, Platform::Amd64)
}

#[tokio::test]
async fn test_get_connection_pending_then_active() {
    let api = Arc::new(MachineApi {
        pending_polls: 1,
        ..MachineApi::default()
    });
    let client = client(serve(Arc::clone(&api)).await);

    let first = client.get_connection(&request(TOKEN)).await.unwrap();
    assert_eq!(
        first,
        ConnectionResponse::Pending {
            wait: std::time::Duration::from_millis(10)
        }
    );

    let second = client.get_connection(&request(TOKEN)).await.unwrap();
    let ConnectionResponse::Active(descriptor) = second else {
        panic!("expected an active machine");
    };
    assert_eq!(descriptor.server_name, fixtures::SERVER_NAME);
    assert_eq!(descriptor.platform, Platform::Arm64);

    let body = api.last_body.lock().unwrap().clone().unwrap();
    assert_eq!(body, json!({"buildId": "build-1234", "platform": "amd64"}));
}

#[tokio::test]
async fn test_report_health() {
    let api = Arc::new(MachineApi::default());
    let client = client(serve(Arc::clone(&api)).await);

    client.report_health(&request(TOKEN)).await.unwrap();
    client.report_health(&request(TOKEN)).await.unwrap();
    assert_eq!(api.health.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_status_error_carries_code() {
    let api = Arc::new(MachineApi::default());
    let client = client(serve(api).await);

    let err = client.get_connection(&request("wrong")).await.unwrap_err();
    match err {
        LeaseError::Status {
            status,
            code,
            message,
        } => {
            assert_eq!(status, 401);
            assert_eq!(code.as_deref(), Some("unauthenticated"));
            assert_eq!(message, "invalid token");
        }
        other => panic!("expected status error, got {other}"),
    }
}

#[tokio::test]
async fn test_lease_over_http() {
    let api = Arc::new(MachineApi {
        pending_polls: 2,
        ..MachineApi::default()
    });
    let addr = serve(Arc::clone(&api)).await;
    let config = ControlPlaneConfig::new(format!("http://{addr}/api"));

    let lease = Lease::new(
        request(TOKEN),
        ClientCell::new(move || HttpControlPlane::new(&config)),
        LeaseConfig::default(),
        &CancellationToken::new(),
    );

    let descriptor = lease.acquire().await.unwrap();
    assert_eq!(descriptor.endpoint, "tcp://127.0.0.1:9");
    assert_eq!(api.polls.load(Ordering::SeqCst), 3);
    assert_eq!(lease.state(), LeaseState::Acquired);

    lease.release().await;
}

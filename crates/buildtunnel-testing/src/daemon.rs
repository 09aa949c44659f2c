//! A fake BuildKit daemon speaking raw frames.
//!
//! [`FakeDaemon`] implements the `Control`, `Content` and `Health` services
//! with predictable behaviour and records what it receives, so a test can
//! compare what a client sent through the proxy with what arrived.
//!
//! | Method | Behaviour |
//! |--------|-----------|
//! | `Control.Solve` | records the body, answers [`SOLVE_RESPONSE`] |
//! | `Control.Status` | streams `status-0`, `status-1`, `status-2`, with header `x-upstream: status` |
//! | `Control.Prune` | streams `pruned`, then fails with `ResourceExhausted` |
//! | `Control.Session` | echoes every message, then sends `closed:<n>` and trailer `x-session-messages: <n>`; tracks how many sessions are open |
//! | `Content.Write` | fails with `DataLoss` after the first message |
//! | `Health.Check` | echoes the body and the `x-request-id` header |
//! | `Health.Watch` | never yields; tracks how many watches are open |
//!
//! Every method the proxy answers locally fails here with `Internal`, so a
//! test notices if the proxy forwarded it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::Poll;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::{MetadataMap, MetadataValue};
use tonic::{Code, Request, Response, Status, Streaming};

use buildtunnel_proxy::rpc::{Content, Control, Health};

/// Body the fake daemon answers `Control.Solve` with.
pub const SOLVE_RESPONSE: &[u8] = b"\x0a\x08solve-ok";

type FrameStream = BoxStream<'static, Result<Bytes, Status>>;

#[derive(Debug, Default)]
struct Inner {
    solves: Mutex<Vec<Bytes>>,
    unexpected: AtomicUsize,
    open_watches: AtomicUsize,
    open_sessions: AtomicUsize,
    sessions_closed: AtomicUsize,
}

/// The fake daemon. Clones share their records.
#[derive(Debug, Clone, Default)]
pub struct FakeDaemon {
    inner: Arc<Inner>,
}

impl FakeDaemon {
    /// Create a daemon with empty records.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bodies of every `Control.Solve` received, in order.
    #[must_use]
    pub fn solves(&self) -> Vec<Bytes> {
        self.inner
            .solves
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Calls to methods the proxy should have answered itself.
    #[must_use]
    pub fn unexpected_calls(&self) -> usize {
        self.inner.unexpected.load(Ordering::SeqCst)
    }

    /// `Health.Watch` streams currently open.
    #[must_use]
    pub fn open_watches(&self) -> usize {
        self.inner.open_watches.load(Ordering::SeqCst)
    }

    /// `Control.Session` streams still being served.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.inner.open_sessions.load(Ordering::SeqCst)
    }

    /// `Control.Session` streams whose client closed its send side.
    #[must_use]
    pub fn sessions_closed(&self) -> usize {
        self.inner.sessions_closed.load(Ordering::SeqCst)
    }

    fn unexpected<T>(&self, method: &str) -> Result<T, Status> {
        self.inner.unexpected.fetch_add(1, Ordering::SeqCst);
        Err(Status::internal(format!("{method} must not reach the daemon")))
    }
}

/// Which open-stream counter a [`StreamGuard`] holds.
#[derive(Clone, Copy)]
enum Gauge {
    Watches,
    Sessions,
}

/// Counts one open stream until dropped.
struct StreamGuard {
    inner: Arc<Inner>,
    gauge: Gauge,
}

impl StreamGuard {
    fn open(inner: &Arc<Inner>, gauge: Gauge) -> Self {
        let guard = Self {
            inner: Arc::clone(inner),
            gauge,
        };
        guard.counter().fetch_add(1, Ordering::SeqCst);
        guard
    }

    fn counter(&self) -> &AtomicUsize {
        match self.gauge {
            Gauge::Watches => &self.inner.open_watches,
            Gauge::Sessions => &self.inner.open_sessions,
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.counter().fetch_sub(1, Ordering::SeqCst);
    }
}

#[tonic::async_trait]
impl Control for FakeDaemon {
    async fn disk_usage(&self, _request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.unexpected("DiskUsage")
    }

    type PruneStream = FrameStream;

    async fn prune(&self, _request: Request<Bytes>) -> Result<Response<FrameStream>, Status> {
        let frames = [
            Ok(Bytes::from_static(b"pruned")),
            Err(Status::resource_exhausted("disk full")),
        ];
        Ok(Response::new(stream::iter(frames).boxed()))
    }

    async fn solve(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.inner
            .solves
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.into_inner());
        Ok(Response::new(Bytes::from_static(SOLVE_RESPONSE)))
    }

    type StatusStream = FrameStream;

    async fn status(&self, _request: Request<Bytes>) -> Result<Response<FrameStream>, Status> {
        let frames = (0..3).map(|i| Ok(Bytes::from(format!("status-{i}"))));
        let mut response = Response::new(stream::iter(frames).boxed());
        response
            .metadata_mut()
            .insert("x-upstream", MetadataValue::from_static("status"));
        Ok(response)
    }

    type SessionStream = FrameStream;

    async fn session(
        &self,
        request: Request<Streaming<Bytes>>,
    ) -> Result<Response<FrameStream>, Status> {
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(16);
        let inner = Arc::clone(&self.inner);
        let guard = StreamGuard::open(&self.inner, Gauge::Sessions);

        tokio::spawn(async move {
            let _open = guard;
            let mut count = 0usize;
            loop {
                match inbound.message().await {
                    Ok(Some(message)) => {
                        count += 1;
                        if tx.send(Ok(message)).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(_) => return,
                }
            }
            inner.sessions_closed.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(Ok(Bytes::from(format!("closed:{count}")))).await;

            let mut trailers = MetadataMap::new();
            if let Ok(value) = MetadataValue::try_from(count.to_string()) {
                trailers.insert("x-session-messages", value);
            }
            let _ = tx
                .send(Err(Status::with_metadata(Code::Ok, "", trailers)))
                .await;
        });

        Ok(Response::new(ReceiverStream::new(rx).boxed()))
    }

    async fn list_workers(&self, _request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.unexpected("ListWorkers")
    }

    async fn info(&self, _request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        self.unexpected("Info")
    }

    type ListenBuildHistoryStream = FrameStream;

    async fn listen_build_history(
        &self,
        _request: Request<Bytes>,
    ) -> Result<Response<FrameStream>, Status> {
        self.unexpected("ListenBuildHistory")
    }

    async fn update_build_history(
        &self,
        _request: Request<Bytes>,
    ) -> Result<Response<Bytes>, Status> {
        self.unexpected("UpdateBuildHistory")
    }
}

#[tonic::async_trait]
impl Content for FakeDaemon {
    async fn info(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        Ok(Response::new(request.into_inner()))
    }

    async fn update(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        Ok(Response::new(request.into_inner()))
    }

    type ListStream = FrameStream;

    async fn list(&self, _request: Request<Bytes>) -> Result<Response<FrameStream>, Status> {
        Ok(Response::new(stream::empty().boxed()))
    }

    async fn delete(&self, _request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        Ok(Response::new(Bytes::new()))
    }

    type ReadStream = FrameStream;

    async fn read(&self, request: Request<Bytes>) -> Result<Response<FrameStream>, Status> {
        let body = request.into_inner();
        Ok(Response::new(stream::iter([Ok(body)]).boxed()))
    }

    async fn status(&self, _request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        Err(Status::not_found("no such ingest"))
    }

    async fn list_statuses(&self, _request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        Ok(Response::new(Bytes::new()))
    }

    type WriteStream = FrameStream;

    async fn write(
        &self,
        request: Request<Streaming<Bytes>>,
    ) -> Result<Response<FrameStream>, Status> {
        let mut inbound = request.into_inner();
        let frames = stream::once(async move {
            match inbound.message().await {
                Ok(Some(_)) => Err(Status::data_loss("disk gone")),
                Ok(None) => Ok(Bytes::new()),
                Err(status) => Err(status),
            }
        });
        Ok(Response::new(frames.boxed()))
    }

    async fn abort(&self, _request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        Ok(Response::new(Bytes::new()))
    }
}

#[tonic::async_trait]
impl Health for FakeDaemon {
    async fn check(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        let request_id = request.metadata().get("x-request-id").cloned();
        let mut response = Response::new(request.into_inner());
        if let Some(id) = request_id {
            response.metadata_mut().insert("x-request-id", id);
        }
        Ok(response)
    }

    type WatchStream = FrameStream;

    async fn watch(&self, _request: Request<Bytes>) -> Result<Response<FrameStream>, Status> {
        let guard = StreamGuard::open(&self.inner, Gauge::Watches);
        let frames = stream::poll_fn(move |_| {
            let _open = &guard;
            Poll::<Option<Result<Bytes, Status>>>::Pending
        });
        Ok(Response::new(frames.boxed()))
    }
}

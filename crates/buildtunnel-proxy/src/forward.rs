//! Message pumps for streaming calls.
//!
//! Server-streaming calls get a single pump from upstream to the local
//! caller. Bidirectional calls get a [`StreamSession`]: one pump per
//! direction, each posting a single completion into a two-slot queue that
//! an orchestrator task drains.
//!
//! The orchestrator applies these rules:
//!
//! - the local side ending cleanly closes the upstream send side, and
//!   upstream keeps draining to the local caller;
//! - upstream ending cleanly finishes the session, forwarding its trailers;
//! - an error in either direction cancels both pumps and reports
//!   `Internal` to the local caller.
//!
//! Every pump watches the session's cancellation token, and the
//! orchestrator joins both pumps before it exits.

use std::future::Future;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;
use tonic::{Code, Extensions, Request, Response, Status, Streaming};
use tracing::{debug, warn};

use crate::upstream::{Upstream, outbound};

/// Messages buffered per direction before a pump waits for its reader.
const PUMP_BUFFER: usize = 16;

/// Stream returned to the local caller for forwarded streaming calls.
pub type ForwardStream = ReceiverStream<Result<Bytes, Status>>;

/// A source of messages for a pump.
pub trait MessageSource: Send {
    /// The next message, `None` at a clean end of stream.
    fn next_message(&mut self) -> impl Future<Output = Result<Option<Bytes>, Status>> + Send;

    /// Trailing metadata, available after a clean end of stream.
    fn trailers(&mut self) -> impl Future<Output = Result<Option<MetadataMap>, Status>> + Send {
        async { Ok(None) }
    }
}

impl MessageSource for Streaming<Bytes> {
    fn next_message(&mut self) -> impl Future<Output = Result<Option<Bytes>, Status>> + Send {
        self.message()
    }

    fn trailers(&mut self) -> impl Future<Output = Result<Option<MetadataMap>, Status>> + Send {
        Streaming::trailers(self)
    }
}

impl MessageSource for mpsc::Receiver<Bytes> {
    async fn next_message(&mut self) -> Result<Option<Bytes>, Status> {
        Ok(self.recv().await)
    }
}

/// How a pump stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpEnd {
    /// The source reached a clean end of stream.
    Eof,
    /// The receiving side went away.
    SinkClosed,
    /// The session token fired.
    Cancelled,
}

/// Move messages from `source` to `sink` until one side ends.
///
/// The sink counts as gone as soon as its receiver is dropped, even while
/// the source has nothing to send.
///
/// A source error is returned to the caller rather than forwarded, so each
/// call site decides how the other side learns about it.
pub async fn pump<S, T>(
    source: &mut S,
    sink: &mpsc::Sender<T>,
    wrap: impl Fn(Bytes) -> T + Send,
    cancel: &CancellationToken,
) -> Result<PumpEnd, Status>
where
    S: MessageSource,
    T: Send,
{
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(PumpEnd::Cancelled),
            // An idle source must not keep a stream nobody reads.
            () = sink.closed() => return Ok(PumpEnd::SinkClosed),
            next = source.next_message() => next?,
        };
        let Some(message) = next else {
            return Ok(PumpEnd::Eof);
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(PumpEnd::Cancelled),
            sent = sink.send(wrap(message)) => {
                if sent.is_err() {
                    return Ok(PumpEnd::SinkClosed);
                }
            }
        }
    }
}

/// Send upstream trailers to the local caller.
///
/// A status with code `Ok` ends the local stream successfully while still
/// carrying the trailing metadata.
async fn forward_trailers<S: MessageSource>(
    source: &mut S,
    sink: &mpsc::Sender<Result<Bytes, Status>>,
) {
    match source.trailers().await {
        Ok(Some(trailers)) if !trailers.is_empty() => {
            let _ = sink
                .send(Err(Status::with_metadata(Code::Ok, "", trailers)))
                .await;
        }
        Ok(_) => {}
        Err(status) => {
            let _ = sink.send(Err(status)).await;
        }
    }
}

/// Forward a server-streaming call.
///
/// Upstream headers become the local response headers. An upstream error,
/// at open or mid-stream, reaches the local caller unchanged.
pub async fn server_streaming(
    upstream: &Upstream,
    route: &'static str,
    request: Request<Bytes>,
    parent: &CancellationToken,
) -> Result<Response<ForwardStream>, Status> {
    let response = upstream.server_streaming(route, outbound(request)).await?;
    let (metadata, mut source, _) = response.into_parts();
    let (tx, rx) = mpsc::channel(PUMP_BUFFER);
    let cancel = parent.child_token();

    tokio::spawn(async move {
        match pump(&mut source, &tx, Ok, &cancel).await {
            Ok(PumpEnd::Eof) => forward_trailers(&mut source, &tx).await,
            Ok(end) => debug!(route, ?end, "server stream stopped"),
            Err(status) => {
                debug!(route, code = ?status.code(), "upstream stream failed");
                let _ = tx.send(Err(status)).await;
            }
        }
    });

    Ok(Response::from_parts(
        metadata,
        ReceiverStream::new(rx),
        Extensions::default(),
    ))
}

#[derive(Debug)]
enum Completion {
    Local(Result<PumpEnd, Status>),
    Upstream(Result<PumpEnd, Status>),
}

/// One in-flight bidirectional call.
#[derive(Debug)]
pub struct StreamSession {
    route: &'static str,
    cancel: CancellationToken,
    done_tx: mpsc::Sender<Completion>,
    done_rx: mpsc::Receiver<Completion>,
    local_pump: JoinHandle<()>,
}

impl StreamSession {
    /// Start pumping the local caller's messages and return the stream that
    /// feeds the upstream call.
    fn open(
        route: &'static str,
        mut local: Streaming<Bytes>,
        parent: &CancellationToken,
    ) -> (Self, ReceiverStream<Bytes>) {
        let cancel = parent.child_token();
        let (done_tx, done_rx) = mpsc::channel(2);
        let (to_upstream, upstream_rx) = mpsc::channel(PUMP_BUFFER);

        let local_pump = tokio::spawn({
            let cancel = cancel.clone();
            let done = done_tx.clone();
            async move {
                let result = pump(&mut local, &to_upstream, |m| m, &cancel).await;
                // Dropping the sender half-closes the upstream request stream.
                drop(to_upstream);
                let _ = done.send(Completion::Local(result)).await;
            }
        });

        let session = Self {
            route,
            cancel,
            done_tx,
            done_rx,
            local_pump,
        };
        (session, ReceiverStream::new(upstream_rx))
    }

    /// Abandon the session before upstream answered.
    async fn abort(self) {
        self.cancel.cancel();
        let _ = self.local_pump.await;
    }

    /// Pump upstream messages to the local caller and supervise both pumps.
    fn run(self, mut upstream: Streaming<Bytes>) -> ForwardStream {
        let (to_local, local_rx) = mpsc::channel(PUMP_BUFFER);

        let upstream_pump = tokio::spawn({
            let cancel = self.cancel.clone();
            let done = self.done_tx.clone();
            let to_local = to_local.clone();
            async move {
                let result = pump(&mut upstream, &to_local, Ok, &cancel).await;
                if matches!(result, Ok(PumpEnd::Eof)) {
                    forward_trailers(&mut upstream, &to_local).await;
                }
                let _ = done.send(Completion::Upstream(result)).await;
            }
        });

        tokio::spawn(self.supervise(to_local, upstream_pump));
        ReceiverStream::new(local_rx)
    }

    async fn supervise(
        self,
        to_local: mpsc::Sender<Result<Bytes, Status>>,
        upstream_pump: JoinHandle<()>,
    ) {
        let Self {
            route,
            cancel,
            done_tx,
            mut done_rx,
            local_pump,
        } = self;
        drop(done_tx);

        while let Some(completion) = done_rx.recv().await {
            match completion {
                Completion::Local(Ok(PumpEnd::Eof | PumpEnd::SinkClosed)) => {
                    debug!(route, "local side closed send");
                }
                Completion::Upstream(Ok(PumpEnd::Eof)) => {
                    debug!(route, "upstream finished");
                    break;
                }
                Completion::Upstream(Ok(PumpEnd::SinkClosed)) => {
                    debug!(route, "local caller went away");
                    break;
                }
                Completion::Local(Ok(PumpEnd::Cancelled))
                | Completion::Upstream(Ok(PumpEnd::Cancelled)) => {
                    debug!(route, "stream cancelled");
                    let _ = to_local.try_send(Err(Status::cancelled("proxy is shutting down")));
                    break;
                }
                Completion::Local(Err(status)) | Completion::Upstream(Err(status)) => {
                    warn!(route, code = ?status.code(), error = %status.message(), "stream forwarding failed");
                    cancel.cancel();
                    let _ = to_local
                        .send(Err(Status::internal(format!(
                            "forwarding {route} failed: {}",
                            status.message()
                        ))))
                        .await;
                    break;
                }
            }
        }

        cancel.cancel();
        drop(to_local);
        let _ = local_pump.await;
        let _ = upstream_pump.await;
    }
}

/// Forward a bidirectional call.
pub async fn bidi(
    upstream: &Upstream,
    route: &'static str,
    request: Request<Streaming<Bytes>>,
    parent: &CancellationToken,
) -> Result<Response<ForwardStream>, Status> {
    let (metadata, _, local) = request.into_parts();
    let (session, upstream_requests) = StreamSession::open(route, local, parent);

    let outbound = Request::from_parts(metadata, Extensions::default(), upstream_requests);
    let response = match upstream.streaming(route, outbound).await {
        Ok(response) => response,
        Err(status) => {
            session.abort().await;
            return Err(status);
        }
    };

    let (metadata, upstream_responses, _) = response.into_parts();
    let stream = session.run(upstream_responses);
    Ok(Response::from_parts(metadata, stream, Extensions::default()))
}

//! A duplex stream over the process's own stdin and stdout.
//!
//! In dial-stdio mode the parent process talks HTTP/2 to us over our stdio
//! pipes, so the proxy is served directly on [`StdioStream`]. Logging must
//! go to stderr while this stream is in use.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tonic::transport::server::Connected;

pin_project! {
    /// Joins a read half and a write half into one bidirectional stream.
    #[derive(Debug)]
    pub struct DuplexStream<R, W> {
        #[pin]
        reader: R,
        #[pin]
        writer: W,
    }
}

impl<R, W> DuplexStream<R, W> {
    /// Join `reader` and `writer`.
    pub const fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Split back into the two halves.
    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

/// The process's stdin and stdout as one stream.
pub type StdioStream = DuplexStream<tokio::io::Stdin, tokio::io::Stdout>;

/// Open the process's stdio as a duplex stream.
#[must_use]
pub fn stdio() -> StdioStream {
    DuplexStream::new(tokio::io::stdin(), tokio::io::stdout())
}

impl<R: AsyncRead, W> AsyncRead for DuplexStream<R, W> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.project().reader.poll_read(cx, buf)
    }
}

impl<R, W: AsyncWrite> AsyncWrite for DuplexStream<R, W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().writer.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().writer.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().writer.poll_shutdown(cx)
    }
}

impl<R, W> Connected for DuplexStream<R, W> {
    type ConnectInfo = ();

    fn connect_info(&self) -> Self::ConnectInfo {}
}

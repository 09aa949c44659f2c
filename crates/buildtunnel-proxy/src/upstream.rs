//! Calls onto the remote daemon over the shared upstream channel.

use bytes::Bytes;
use futures::Stream;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic::{Extensions, Request, Response, Status, Streaming};

use crate::codec::RawCodec;

/// A raw-frame gRPC client for the upstream daemon.
///
/// Cloning is cheap; every clone multiplexes onto the same HTTP/2
/// connection.
#[derive(Debug, Clone)]
pub struct Upstream {
    grpc: tonic::client::Grpc<Channel>,
}

impl Upstream {
    /// Wrap `channel`, allowing messages up to `max_message_size` bytes.
    #[must_use]
    pub fn new(channel: Channel, max_message_size: usize) -> Self {
        let grpc = tonic::client::Grpc::new(channel)
            .max_decoding_message_size(max_message_size)
            .max_encoding_message_size(max_message_size);
        Self { grpc }
    }

    async fn ready(&self) -> Result<tonic::client::Grpc<Channel>, Status> {
        let mut grpc = self.grpc.clone();
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("upstream connection is not ready: {e}")))?;
        Ok(grpc)
    }

    /// Forward a unary call.
    pub async fn unary(
        &self,
        route: &'static str,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, Status> {
        let mut grpc = self.ready().await?;
        grpc.unary(request, PathAndQuery::from_static(route), RawCodec)
            .await
    }

    /// Open a server-streaming call.
    pub async fn server_streaming(
        &self,
        route: &'static str,
        request: Request<Bytes>,
    ) -> Result<Response<Streaming<Bytes>>, Status> {
        let mut grpc = self.ready().await?;
        grpc.server_streaming(request, PathAndQuery::from_static(route), RawCodec)
            .await
    }

    /// Open a bidirectional call fed by `request`'s message stream.
    pub async fn streaming<S>(
        &self,
        route: &'static str,
        request: Request<S>,
    ) -> Result<Response<Streaming<Bytes>>, Status>
    where
        S: Stream<Item = Bytes> + Send + 'static,
    {
        let mut grpc = self.ready().await?;
        grpc.streaming(request, PathAndQuery::from_static(route), RawCodec)
            .await
    }
}

/// Rebuild an inbound request for the upstream call, keeping its metadata.
///
/// Extensions describe the local connection and are not forwarded.
pub fn outbound<T>(request: Request<T>) -> Request<T> {
    let (metadata, _, message) = request.into_parts();
    Request::from_parts(metadata, Extensions::default(), message)
}

/// Rebuild an upstream response for the local caller, keeping its metadata.
pub fn inbound<T>(response: Response<T>) -> Response<T> {
    let (metadata, message, _) = response.into_parts();
    Response::from_parts(metadata, message, Extensions::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::metadata::MetadataValue;

    #[test]
    fn test_outbound_keeps_metadata() {
        let mut request = Request::new(Bytes::from_static(b"\x0a\x01x"));
        request
            .metadata_mut()
            .insert("buildkit-session-id", MetadataValue::from_static("s-1"));
        request.extensions_mut().insert(7u32);

        let forwarded = outbound(request);
        assert_eq!(
            forwarded.metadata().get("buildkit-session-id").unwrap(),
            "s-1"
        );
        assert!(forwarded.extensions().get::<u32>().is_none());
        assert_eq!(forwarded.get_ref().as_ref(), b"\x0a\x01x");
    }
}

//! Rewriting `Control.Solve` requests in wire form.
//!
//! Exports happen on the local side, so the remote solve must not run an
//! exporter and must be marked internal. The request is rewritten at the
//! protobuf field level: the exporter fields are dropped, `internal` is
//! set, and every other field is copied through byte for byte.

use bytes::{Buf, Bytes, BytesMut};
use prost::DecodeError;
use prost::encoding::{DecodeContext, WireType, decode_key, encode_key, encode_varint, skip_field};

/// `SolveRequest.Exporter` (deprecated single exporter name).
pub const FIELD_EXPORTER: u32 = 3;
/// `SolveRequest.ExporterAttrs`.
pub const FIELD_EXPORTER_ATTRS: u32 = 4;
/// `SolveRequest.Internal`.
pub const FIELD_INTERNAL: u32 = 11;
/// `SolveRequest.Exporters`.
pub const FIELD_EXPORTERS: u32 = 13;

/// Strip exporter settings from an encoded `SolveRequest` and force
/// `internal = true`.
///
/// Fails if `body` is not a well-formed protobuf message.
pub fn rewrite_solve_request(body: &Bytes) -> Result<Bytes, DecodeError> {
    let total = body.len();
    let mut out = BytesMut::with_capacity(total + 2);
    let mut buf = body.clone();

    while buf.has_remaining() {
        let start = total - buf.remaining();
        let (tag, wire_type) = decode_key(&mut buf)?;
        skip_field(wire_type, tag, &mut buf, DecodeContext::default())?;
        let end = total - buf.remaining();

        if matches!(
            tag,
            FIELD_EXPORTER | FIELD_EXPORTER_ATTRS | FIELD_EXPORTERS | FIELD_INTERNAL
        ) {
            continue;
        }
        out.extend_from_slice(&body[start..end]);
    }

    encode_key(FIELD_INTERNAL, WireType::Varint, &mut out);
    encode_varint(1, &mut out);
    Ok(out.freeze())
}

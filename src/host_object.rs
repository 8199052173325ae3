//! Pluggable extension seam for the `HostObject` wire tag (`\`), which lets
//! an application escape to its own wire format inside a V8 stream.
//!
//! The default implementation reproduces Node.js's encoding of
//! `ArrayBuffer` views (`lib/v8.js`'s typed-array host object format):
//! varint `view_code`, varint `byte_length`, `<raw bytes>` — the same
//! varint stream primitive used for every other integer on the wire.

use crate::de::{Input, ParseError, ParseErrorKind};
use crate::ser::write_varint_to;
use crate::ser::SerializationError;
use crate::value::ArrayBufferViewKind;

/// Implemented by applications that want to read/write `HostObject` tag
/// data. The decoder driver registers the resulting buffer/view pair in
/// the heap itself; the handler only deals with the raw bytes.
pub trait HostObjectHandler {
  /// Whether this handler wants to take over encoding a view of this kind.
  /// Declining (`false`) falls through to the ordinary `ArrayBufferView`
  /// wire representation.
  fn supports(&self, kind: ArrayBufferViewKind) -> bool;

  fn serialize_host_object(
    &self,
    out: &mut Vec<u8>,
    kind: ArrayBufferViewKind,
    data: &[u8],
  ) -> Result<(), SerializationError>;

  fn deserialize_host_object(
    &self,
    input: &mut Input<'_>,
  ) -> Result<(ArrayBufferViewKind, Vec<u8>), ParseError>;
}

/// Node.js's `v8.js` view-code table. `FastBuffer` (10) is Node's
/// internally-shared `Uint8Array` variant; we round-trip it as a plain
/// `Uint8Array`.
fn nodejs_view_code(kind: ArrayBufferViewKind) -> Option<u32> {
  Some(match kind {
    ArrayBufferViewKind::Int8Array => 0,
    ArrayBufferViewKind::Uint8Array => 1,
    ArrayBufferViewKind::Uint8ClampedArray => 2,
    ArrayBufferViewKind::Int16Array => 3,
    ArrayBufferViewKind::Uint16Array => 4,
    ArrayBufferViewKind::Int32Array => 5,
    ArrayBufferViewKind::Uint32Array => 6,
    ArrayBufferViewKind::Float32Array => 7,
    ArrayBufferViewKind::Float64Array => 8,
    ArrayBufferViewKind::DataView => 9,
    ArrayBufferViewKind::BigInt64Array => 11,
    ArrayBufferViewKind::BigUint64Array => 12,
  })
}

fn kind_from_nodejs_view_code(code: u32) -> Option<ArrayBufferViewKind> {
  Some(match code {
    0 => ArrayBufferViewKind::Int8Array,
    1 => ArrayBufferViewKind::Uint8Array,
    2 => ArrayBufferViewKind::Uint8ClampedArray,
    3 => ArrayBufferViewKind::Int16Array,
    4 => ArrayBufferViewKind::Uint16Array,
    5 => ArrayBufferViewKind::Int32Array,
    6 => ArrayBufferViewKind::Uint32Array,
    7 => ArrayBufferViewKind::Float32Array,
    8 => ArrayBufferViewKind::Float64Array,
    9 => ArrayBufferViewKind::DataView,
    // FastBuffer: Node's shared-backing-store Uint8Array variant.
    10 => ArrayBufferViewKind::Uint8Array,
    11 => ArrayBufferViewKind::BigInt64Array,
    12 => ArrayBufferViewKind::BigUint64Array,
    _ => return None,
  })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NodeJsArrayBufferViewHostObjectHandler;

impl HostObjectHandler for NodeJsArrayBufferViewHostObjectHandler {
  fn supports(&self, kind: ArrayBufferViewKind) -> bool {
    nodejs_view_code(kind).is_some()
  }

  fn serialize_host_object(
    &self,
    out: &mut Vec<u8>,
    kind: ArrayBufferViewKind,
    data: &[u8],
  ) -> Result<(), SerializationError> {
    let code = nodejs_view_code(kind)
      .expect("supports() must be checked before calling serialize_host_object");
    write_varint_to(out, code);
    let byte_length: u32 = data
      .len()
      .try_into()
      .map_err(|_| SerializationError::HostObjectPayloadTooLarge)?;
    write_varint_to(out, byte_length);
    out.extend_from_slice(data);
    Ok(())
  }

  fn deserialize_host_object(
    &self,
    input: &mut Input<'_>,
  ) -> Result<(ArrayBufferViewKind, Vec<u8>), ParseError> {
    let raw_code = input.read_varint()?;
    let byte_length = input.read_varint()? as usize;
    let kind = kind_from_nodejs_view_code(raw_code).ok_or_else(|| {
      input.err_current(ParseErrorKind::HostObjectViewCodeUnknown(raw_code))
    })?;
    let data = input.read_bytes(byte_length)?.to_vec();
    Ok((kind, data))
  }
}

use std::collections::HashMap;

use num_bigint::BigInt;
use thiserror::Error;

use crate::array_storage::ArrayStorage;
use crate::array_storage::ElementOrder;
use crate::array_storage::JsArrayStorage;
use crate::array_storage::SparseArrayStorage;
use crate::features::FeatureSet;
use crate::host_object::HostObjectHandler;
use crate::tags::ArrayBufferViewTag;
use crate::tags::ErrorTag;
use crate::tags::SerializationTag;
use crate::value::ArrayBuffer;
use crate::value::ArrayBufferView;
use crate::value::ArrayBufferViewKind;
use crate::value::Date;
use crate::value::Error;
use crate::value::ErrorName;
use crate::value::JsArray;
use crate::value::Map;
use crate::value::Object;
use crate::value::PropertyKey;
use crate::value::RegExp;
use crate::value::RegExpFlags;
use crate::value::Set;
use crate::Heap;
use crate::HeapReference;
use crate::HeapValue;
use crate::StringValue;
use crate::Value;

#[derive(Debug, Error)]
pub enum SerializationError {
  #[error("recursion depth limit exceeded")]
  RecursionDepthLimitExceeded,
  #[error("a dangling heap reference was encountered")]
  DanglingHeapReference,
  #[error("a string was too long to serialize")]
  StringTooLong,
  #[error("a BigInt was too large to serialize")]
  BigIntTooLarge,
  #[error("an object has too many properties to serialize")]
  TooManyObjectProperties,
  #[error("an array has too many elements to serialize")]
  ArrayTooLong,
  #[error("a map has too many entries to serialize")]
  MapTooLarge,
  #[error("a set has too many entries to serialize")]
  SetTooLarge,
  #[error("a host object's payload was too large to serialize")]
  HostObjectPayloadTooLarge,
  #[error("a JS Map cannot use itself, even transitively, as one of its own keys")]
  IllegalCyclicMapKey,
  #[error("{0:?} requires a feature not enabled on this serializer")]
  FeatureNotEnabled(&'static str),
}

/// Why a `HeapReference` is currently in `ValueSerializer::acyclic_guards`,
/// so the guard hit in `write_heap_reference` can be reported as the right
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcyclicGuardReason {
  /// A JS Map cannot use itself, even transitively, as one of its own keys.
  MapKey,
  /// `Error.cause` cycling back to the error requires `CIRCULAR_ERROR_CAUSE`.
  ErrorCause,
}

pub struct ValueSerializer {
  data: Vec<u8>,
  id_map: HashMap<HeapReference, u32>,
  recursion_depth: usize,
  features: FeatureSet,
  acyclic_guards: HashMap<HeapReference, AcyclicGuardReason>,
  host_object_handler: Option<Box<dyn HostObjectHandler>>,
}

impl Default for ValueSerializer {
  fn default() -> Self {
    Self {
      data: Vec::new(),
      id_map: HashMap::new(),
      recursion_depth: 0,
      features: FeatureSet::default(),
      acyclic_guards: HashMap::new(),
      host_object_handler: None,
    }
  }
}

const RECURSION_DEPTH_LIMIT: usize = 256;
const WIRE_FORMAT_VERSION: u32 = 15;

/// Writes an unsigned integer as a base-128 varint, 7 bits at a time from
/// the least significant end. Each byte except the last has the MSB set.
/// See also https://developers.google.com/protocol-buffers/docs/encoding
///
/// Exposed crate-wide so `host_object.rs` can encode `HostObject` payload
/// fields (e.g. Node.js's `view_code`/`byte_length`) the same way every
/// other integer on the wire is encoded.
pub(crate) fn write_varint_to(out: &mut Vec<u8>, value: u32) {
  let mut value = value;
  while value >= 0x80 {
    out.push(((value & 0x7f) | 0x80) as u8);
    value >>= 7;
  }
  out.push(value as u8);
}

impl ValueSerializer {
  /// Restricts the optional wire features this serializer may emit, e.g.
  /// `FeatureSet::for_version(...)` to target an older V8.
  pub fn set_features(&mut self, features: FeatureSet) {
    self.features = features;
  }

  /// Registers the handler used to encode `ArrayBufferView`s that it
  /// claims via `HostObjectHandler::supports`.
  pub fn set_host_object_handler(
    &mut self,
    handler: Box<dyn HostObjectHandler>,
  ) {
    self.host_object_handler = Some(handler);
  }

  pub fn finish(
    mut self,
    heap: &Heap,
    value: &Value,
  ) -> Result<Vec<u8>, SerializationError> {
    self.write_header();
    self.write_value(heap, value)?;
    Ok(self.data)
  }

  fn write_header(&mut self) {
    self.write_tag(SerializationTag::Version);
    self.write_varint(WIRE_FORMAT_VERSION);
  }

  fn write_value(
    &mut self,
    heap: &Heap,
    value: &Value,
  ) -> Result<(), SerializationError> {
    match value {
      Value::Undefined => self.write_tag(SerializationTag::Undefined),
      Value::Null => self.write_tag(SerializationTag::Null),
      Value::Bool(true) => self.write_tag(SerializationTag::True),
      Value::Bool(false) => self.write_tag(SerializationTag::False),
      Value::I32(smi) => self.write_smi(*smi),
      Value::U32(int) => self.write_u32(int),
      Value::Double(double) => self.write_number(*double),
      Value::BigInt(bigint) => self.write_bigint(bigint)?,
      Value::String(str) => self.write_string(str)?,
      Value::HeapReference(reference) => {
        self.recursion_depth += 1;
        self.write_heap_reference(heap, *reference)?;
        self.recursion_depth -= 1;
      }
    };
    Ok(())
  }

  fn write_tag(&mut self, tag: SerializationTag) {
    self.data.push(tag as u8)
  }

  fn write_varint(&mut self, value: u32) {
    write_varint_to(&mut self.data, value);
  }

  fn write_varint_u8(&mut self, value: u8) {
    self.write_varint(value as u32);
  }

  fn write_zigzag(&mut self, value: i32) {
    // Writes a signed integer as a varint using ZigZag encoding (i.e. 0 is
    // encoded as 0, -1 as 1, 1 as 2, -2 as 3, and so on).
    // See also https://developers.google.com/protocol-buffers/docs/encoding
    self.write_varint(
      ((value << 1) ^ (value >> (i32::BITS as usize - 1))) as u32,
    );
  }

  fn write_double(&mut self, value: f64) {
    self.data.extend_from_slice(&value.to_le_bytes());
  }

  fn write_smi(&mut self, val: i32) {
    self.write_tag(SerializationTag::Int32);
    self.write_zigzag(val);
  }

  fn write_u32(&mut self, int: &u32) {
    self.write_tag(SerializationTag::Uint32);
    self.write_varint(*int);
  }

  fn write_number(&mut self, val: f64) {
    self.write_tag(SerializationTag::Double);
    self.write_double(val);
  }

  fn write_bigint(&mut self, val: &BigInt) -> Result<(), SerializationError> {
    self.write_tag(SerializationTag::BigInt);
    self.write_bigint_contents(val)?;
    Ok(())
  }

  fn write_bigint_contents(
    &mut self,
    val: &BigInt,
  ) -> Result<(), SerializationError> {
    let (sign, bytes) = val.to_bytes_le();
    let mut bitfield = 0u32;
    if sign == num_bigint::Sign::Minus {
      bitfield |= 1;
    }
    let length: u32 = bytes
      .len()
      .try_into()
      .map_err(|_| SerializationError::BigIntTooLarge)?;
    if length > 0x7fff_ffff {
      return Err(SerializationError::BigIntTooLarge);
    }
    bitfield |= length << 1;
    self.write_varint(bitfield);
    self.data.extend_from_slice(&bytes);
    Ok(())
  }

  fn write_string(
    &mut self,
    str: &StringValue,
  ) -> Result<(), SerializationError> {
    match str {
      StringValue::Wtf8(wtf8) => {
        self.write_tag(SerializationTag::Utf8String);
        let bytes = wtf8.as_bytes();
        let length: u32 = bytes
          .len()
          .try_into()
          .map_err(|_| SerializationError::StringTooLong)?;
        self.write_varint(length);
        self.data.extend_from_slice(bytes);
      }
      StringValue::OneByte(str) => {
        self.write_tag(SerializationTag::OneByteString);
        let bytes = str.as_bytes();
        let length: u32 = str
          .as_bytes()
          .len()
          .try_into()
          .map_err(|_| SerializationError::StringTooLong)?;
        self.write_varint(length);
        self.data.extend_from_slice(bytes);
      }
      StringValue::TwoByte(str) => {
        let bytes = str.as_u8_bytes();
        let length: u32 = bytes
          .len()
          .try_into()
          .map_err(|_| SerializationError::StringTooLong)?;
        if (self.data.len() + 1 + bytes_needed_for_varint(length)) & 0x1 == 1 {
          self.write_tag(SerializationTag::Padding);
        }
        self.write_tag(SerializationTag::TwoByteString);
        self.write_varint(length);
        self.data.extend_from_slice(bytes);
      }
    }
    Ok(())
  }

  fn write_heap_reference(
    &mut self,
    heap: &Heap,
    reference: HeapReference,
  ) -> Result<(), SerializationError> {
    let Some(value) = reference.try_open(heap) else {
      return Err(SerializationError::DanglingHeapReference);
    };
    if let Some(reason) = self.acyclic_guards.get(&reference) {
      return Err(match reason {
        AcyclicGuardReason::MapKey => SerializationError::IllegalCyclicMapKey,
        AcyclicGuardReason::ErrorCause => {
          SerializationError::FeatureNotEnabled("circular Error.cause")
        }
      });
    }
    let handled_as_host_object = matches!(value, HeapValue::ArrayBufferView(abv)
      if self.host_object_handler.as_ref().is_some_and(|h| h.supports(abv.kind)));
    match value {
      HeapValue::ArrayBufferView(abv)
        if !self.id_map.contains_key(&reference)
          && !handled_as_host_object =>
      {
        self.recursion_depth += 1;
        self.write_heap_reference(heap, abv.buffer)?;
        self.recursion_depth -= 1;
        self.write_heap_value_inner(heap, reference, value)
      }
      _ => self.write_heap_value_inner(heap, reference, value),
    }
  }

  fn write_heap_value_inner(
    &mut self,
    heap: &Heap,
    reference: HeapReference,
    value: &HeapValue,
  ) -> Result<(), SerializationError> {
    let next_id: u32 = self.id_map.len() as u32;
    match self.id_map.entry(reference) {
      std::collections::hash_map::Entry::Occupied(entry) => {
        let id = *entry.get();
        self.write_tag(SerializationTag::ObjectReference);
        self.write_varint(id);
        return Ok(());
      }
      std::collections::hash_map::Entry::Vacant(entry) => {
        entry.insert(next_id);
        next_id
      }
    };

    if self.recursion_depth > RECURSION_DEPTH_LIMIT {
      return Err(SerializationError::RecursionDepthLimitExceeded);
    }

    match value {
      HeapValue::BooleanObject(true) => {
        self.write_tag(SerializationTag::TrueObject);
      }
      HeapValue::BooleanObject(false) => {
        self.write_tag(SerializationTag::FalseObject);
      }
      HeapValue::NumberObject(double) => {
        self.write_tag(SerializationTag::NumberObject);
        self.write_double(*double);
      }
      HeapValue::BigIntObject(bigint) => {
        self.write_tag(SerializationTag::BigIntObject);
        self.write_bigint_contents(bigint)?;
      }
      HeapValue::StringObject(str) => {
        self.write_tag(SerializationTag::StringObject);
        self.write_string(str)?;
      }
      HeapValue::RegExp(regexp) => self.write_regexp(regexp)?,
      HeapValue::Date(date) => {
        self.write_date(date);
      }
      HeapValue::Object(obj) => self.write_object(heap, obj)?,
      HeapValue::Array(arr) => self.write_array(heap, arr)?,
      HeapValue::Map(map) => self.write_map(heap, reference, map)?,
      HeapValue::Set(set) => self.write_set(heap, set)?,
      HeapValue::ArrayBuffer(ab) => self.write_array_buffer(ab)?,
      HeapValue::ArrayBufferView(abv) => self.write_array_buffer_view(heap, abv)?,
      HeapValue::Error(err) => self.write_error(heap, reference, err)?,
      HeapValue::SharedArrayBuffer(id) => {
        self.write_tag(SerializationTag::SharedArrayBuffer);
        self.write_varint(*id);
      }
      HeapValue::WasmModuleTransfer(id) => {
        self.write_tag(SerializationTag::WasmModuleTransfer);
        self.write_varint(*id);
      }
      HeapValue::WasmMemoryTransfer {
        shared_array_buffer,
        maximum_pages,
      } => {
        self.write_tag(SerializationTag::WasmMemoryTransfer);
        self.write_varint(*maximum_pages as u32);
        let Some(HeapValue::SharedArrayBuffer(id)) =
          shared_array_buffer.try_open(heap)
        else {
          return Err(SerializationError::DanglingHeapReference);
        };
        self.write_tag(SerializationTag::SharedArrayBuffer);
        self.write_varint(*id);
      }
      HeapValue::SharedObject(id) => {
        self.write_tag(SerializationTag::SharedObject);
        self.write_varint(*id);
      }
    };
    Ok(())
  }

  fn write_regexp(
    &mut self,
    regexp: &RegExp,
  ) -> Result<(), SerializationError> {
    if regexp.flags.contains(RegExpFlags::UNICODE_SETS)
      && !self.features.contains(FeatureSet::REGEXP_UNICODE_SETS)
    {
      return Err(SerializationError::FeatureNotEnabled(
        "RegExp UnicodeSets",
      ));
    }
    self.write_tag(SerializationTag::RegExp);
    self.write_string(&regexp.pattern)?;
    self.write_varint(regexp.flags.bits());
    Ok(())
  }

  fn write_date(&mut self, date: &Date) {
    self.write_tag(SerializationTag::Date);
    self.write_double(date.time_since_epoch);
  }

  fn write_object(
    &mut self,
    heap: &Heap,
    obj: &Object,
  ) -> Result<(), SerializationError> {
    self.write_tag(SerializationTag::BeginJsObject);
    self.write_object_properties(
      heap,
      &obj.properties,
      SerializationTag::EndJsObject,
    )?;
    Ok(())
  }

  fn write_object_properties(
    &mut self,
    heap: &Heap,
    properties: &[(PropertyKey, Value)],
    end_tag: SerializationTag,
  ) -> Result<(), SerializationError> {
    let property_count: u32 = properties
      .len()
      .try_into()
      .map_err(|_| SerializationError::TooManyObjectProperties)?;
    for (key, value) in properties {
      match key {
        PropertyKey::I32(smi) => self.write_smi(*smi),
        PropertyKey::U32(num) => self.write_u32(num),
        PropertyKey::Double(double) => self.write_number(*double),
        PropertyKey::String(str) => self.write_string(str)?,
      }
      self.write_value(heap, value)?;
    }
    self.write_tag(end_tag);
    self.write_varint(property_count);
    Ok(())
  }

  fn write_array(
    &mut self,
    heap: &Heap,
    arr: &JsArray,
  ) -> Result<(), SerializationError> {
    match &arr.storage {
      JsArrayStorage::Dense(_) => self.write_dense_array(heap, arr),
      JsArrayStorage::Sparse(storage) => {
        self.write_sparse_array(heap, arr, storage)
      }
    }
  }

  fn write_sparse_array(
    &mut self,
    heap: &Heap,
    arr: &JsArray,
    storage: &SparseArrayStorage,
  ) -> Result<(), SerializationError> {
    self.write_tag(SerializationTag::BeginSparseJsArray);
    let length = storage.len();
    self.write_varint(length);
    let property_count: u32 = storage
      .elements_used()
      .checked_add(arr.properties.len() as u32)
      .ok_or(SerializationError::TooManyObjectProperties)?;
    for index in storage.element_indexes(ElementOrder::Ascending) {
      let value = storage.get(index).expect("index came from element_indexes");
      self.write_u32(&index);
      self.write_value(heap, value)?;
    }
    for (key, value) in &arr.properties {
      match key {
        PropertyKey::I32(smi) => self.write_smi(*smi),
        PropertyKey::U32(num) => self.write_u32(num),
        PropertyKey::Double(double) => self.write_number(*double),
        PropertyKey::String(str) => self.write_string(str)?,
      }
      self.write_value(heap, value)?;
    }
    self.write_tag(SerializationTag::EndSparseJsArray);
    self.write_varint(property_count);
    self.write_varint(length);
    Ok(())
  }

  fn write_dense_array(
    &mut self,
    heap: &Heap,
    arr: &JsArray,
  ) -> Result<(), SerializationError> {
    self.write_tag(SerializationTag::BeginDenseJsArray);
    let length = arr.len();
    self.write_varint(length);
    let elements = arr
      .dense_elements()
      .expect("write_dense_array called on non-dense storage");
    for value in elements {
      if let Some(value) = value {
        self.write_value(heap, value)?;
      } else {
        self.write_tag(SerializationTag::TheHole);
      }
    }
    self.write_object_properties(
      heap,
      &arr.properties,
      SerializationTag::EndDenseJsArray,
    )?;
    self.write_varint(length);
    Ok(())
  }

  fn write_map(
    &mut self,
    heap: &Heap,
    reference: HeapReference,
    map: &Map,
  ) -> Result<(), SerializationError> {
    let size: u32 = map
      .entries
      .len()
      .try_into()
      .map_err(|_| SerializationError::MapTooLarge)?;
    let length = size.checked_mul(2).ok_or(SerializationError::MapTooLarge)?;
    self.write_tag(SerializationTag::BeginJsMap);
    for (key, value) in &map.entries {
      self
        .acyclic_guards
        .insert(reference, AcyclicGuardReason::MapKey);
      let key_result = self.write_value(heap, key);
      self.acyclic_guards.remove(&reference);
      key_result?;
      self.write_value(heap, value)?;
    }
    self.write_tag(SerializationTag::EndJsMap);
    self.write_varint(length);
    Ok(())
  }

  fn write_set(
    &mut self,
    heap: &Heap,
    set: &Set,
  ) -> Result<(), SerializationError> {
    let size: u32 = set
      .values
      .len()
      .try_into()
      .map_err(|_| SerializationError::SetTooLarge)?;
    self.write_tag(SerializationTag::BeginJsSet);
    for value in &set.values {
      self.write_value(heap, value)?;
    }
    self.write_tag(SerializationTag::EndJsSet);
    self.write_varint(size);
    Ok(())
  }

  fn write_array_buffer(
    &mut self,
    ab: &ArrayBuffer,
  ) -> Result<(), SerializationError> {
    if let Some(max_byte_length) = ab.max_byte_length {
      if !self.features.contains(FeatureSet::RESIZABLE_ARRAY_BUFFER) {
        return Err(SerializationError::FeatureNotEnabled(
          "ResizableArrayBuffer",
        ));
      }
      self.write_tag(SerializationTag::ResizableArrayBuffer);
      self.write_varint(ab.byte_length());
      self.write_varint(max_byte_length);
    } else {
      self.write_tag(SerializationTag::ArrayBuffer);
      self.write_varint(ab.byte_length());
    }
    self.data.extend_from_slice(ab.as_u8_slice());
    Ok(())
  }

  fn write_array_buffer_view(
    &mut self,
    heap: &Heap,
    abv: &ArrayBufferView,
  ) -> Result<(), SerializationError> {
    if let Some(handler) = &self.host_object_handler {
      if handler.supports(abv.kind) {
        let Some(HeapValue::ArrayBuffer(ab)) = abv.buffer.try_open(heap)
        else {
          return Err(SerializationError::DanglingHeapReference);
        };
        let byte_offset = abv.byte_offset as usize;
        let byte_length = (abv.length * abv.kind.byte_width()) as usize;
        let bytes = &ab.as_u8_slice()[byte_offset..byte_offset + byte_length];
        self.write_tag(SerializationTag::HostObject);
        let mut encoded = Vec::new();
        handler.serialize_host_object(&mut encoded, abv.kind, bytes)?;
        self.data.extend_from_slice(&encoded);
        return Ok(());
      }
    }
    self.write_array_buffer_view_inner(abv)
  }

  fn write_array_buffer_view_inner(
    &mut self,
    abv: &ArrayBufferView,
  ) -> Result<(), SerializationError> {
    if abv.kind == ArrayBufferViewKind::Float16Array
      && !self.features.contains(FeatureSet::FLOAT16_ARRAY)
    {
      return Err(SerializationError::FeatureNotEnabled("Float16Array"));
    }
    self.write_tag(SerializationTag::ArrayBufferView);
    let tag = match abv.kind {
      ArrayBufferViewKind::Int8Array => ArrayBufferViewTag::Int8Array,
      ArrayBufferViewKind::Uint8Array => ArrayBufferViewTag::Uint8Array,
      ArrayBufferViewKind::Uint8ClampedArray => {
        ArrayBufferViewTag::Uint8ClampedArray
      }
      ArrayBufferViewKind::Int16Array => ArrayBufferViewTag::Int16Array,
      ArrayBufferViewKind::Uint16Array => ArrayBufferViewTag::Uint16Array,
      ArrayBufferViewKind::Int32Array => ArrayBufferViewTag::Int32Array,
      ArrayBufferViewKind::Uint32Array => ArrayBufferViewTag::Uint32Array,
      ArrayBufferViewKind::Float16Array => ArrayBufferViewTag::Float16Array,
      ArrayBufferViewKind::Float32Array => ArrayBufferViewTag::Float32Array,
      ArrayBufferViewKind::Float64Array => ArrayBufferViewTag::Float64Array,
      ArrayBufferViewKind::BigInt64Array => ArrayBufferViewTag::BigInt64Array,
      ArrayBufferViewKind::BigUint64Array => ArrayBufferViewTag::BigUint64Array,
      ArrayBufferViewKind::DataView => ArrayBufferViewTag::DataView,
    };
    self.write_varint_u8(tag as u8);
    self.write_varint(abv.byte_offset);
    self.write_varint(abv.length * abv.kind.byte_width());
    let mut flags = 0u32;
    if abv.is_length_tracking {
      flags |= 0b1;
    }
    if abv.is_backed_by_rab {
      flags |= 0b10;
    }
    self.write_varint(flags);
    Ok(())
  }

  fn write_error(
    &mut self,
    heap: &Heap,
    reference: HeapReference,
    err: &Error,
  ) -> Result<(), SerializationError> {
    self.write_tag(SerializationTag::Error);
    let name_tag = match err.name {
      ErrorName::Error => None,
      ErrorName::EvalError => Some(ErrorTag::EvalErrorPrototype),
      ErrorName::RangeError => Some(ErrorTag::RangeErrorPrototype),
      ErrorName::ReferenceError => Some(ErrorTag::ReferenceErrorPrototype),
      ErrorName::SyntaxError => Some(ErrorTag::SyntaxErrorPrototype),
      ErrorName::TypeError => Some(ErrorTag::TypeErrorPrototype),
      ErrorName::UriError => Some(ErrorTag::UriErrorPrototype),
    };
    if let Some(tag) = name_tag {
      self.write_varint(tag as u32);
    }
    if let Some(message) = &err.message {
      self.write_varint(ErrorTag::Message as u32);
      self.write_string(message)?;
    }
    if let Some(cause) = &err.cause {
      self.write_varint(ErrorTag::Cause as u32);
      let guard_inserted =
        !self.features.contains(FeatureSet::CIRCULAR_ERROR_CAUSE);
      if guard_inserted {
        self
          .acyclic_guards
          .insert(reference, AcyclicGuardReason::ErrorCause);
      }
      let cause_result = self.write_value(heap, cause);
      if guard_inserted {
        self.acyclic_guards.remove(&reference);
      }
      cause_result?;
    }
    if let Some(stack) = &err.stack {
      self.write_varint(ErrorTag::Stack as u32);
      self.write_string(stack)?;
    }

    self.write_varint(ErrorTag::End as u32);

    Ok(())
  }
}

fn bytes_needed_for_varint(value: u32) -> usize {
  let mut value = value;
  let mut bytes = 1;
  while value >= 0x80 {
    bytes += 1;
    value >>= 7;
  }
  bytes
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::de::ValueDeserializer;
  use crate::value::HeapBuilder;
  use crate::TwoByteString;

  fn finish(value: &Value, heap: &Heap) -> Vec<u8> {
    ValueSerializer::default().finish(heap, value).unwrap()
  }

  #[test]
  fn version_and_int32_scenario() {
    let heap = HeapBuilder::default().build().unwrap();
    assert_eq!(
      finish(&Value::I32(21), &heap),
      vec![0xFF, 0x0F, 0x49, 0x2A]
    );
  }

  #[test]
  fn empty_one_byte_string_scenario() {
    let heap = HeapBuilder::default().build().unwrap();
    let value = Value::String(StringValue::new(String::new()));
    assert_eq!(finish(&value, &heap), vec![0xFF, 0x0F, 0x22, 0x00]);
  }

  #[test]
  fn empty_object_scenario() {
    let mut builder = HeapBuilder::default();
    let object = builder.insert(HeapValue::Object(Object { properties: vec![] }));
    let heap = builder.build().unwrap();
    assert_eq!(
      finish(&Value::HeapReference(object), &heap),
      vec![0xFF, 0x0F, 0x6F, 0x7B, 0x00]
    );
  }

  #[test]
  fn two_byte_string_data_starts_on_even_offset() {
    // Encode a handful of values of varying length ahead of a two-byte
    // string, and check the string's payload always lands on an even
    // offset, regardless of how much odd-length padding precedes it.
    for prefix_len in 0..8 {
      let mut ser = ValueSerializer::default();
      ser.write_header();
      for _ in 0..prefix_len {
        ser.data.push(0);
      }
      let before_tag = ser.data.len();
      ser
        .write_string(&StringValue::TwoByte(TwoByteString::new(vec![
          'x' as u16,
        ])))
        .unwrap();
      // Find the TwoByteString tag we just wrote and confirm the two data
      // bytes right after the tag + length varint sit at an even offset.
      let tag_pos = ser.data[before_tag..]
        .iter()
        .position(|&b| b == SerializationTag::TwoByteString as u8)
        .map(|p| p + before_tag)
        .unwrap();
      let data_start = tag_pos + 1 + 1; // tag byte + 1-byte length varint
      assert_eq!(data_start % 2, 0, "prefix_len={prefix_len}");
    }
  }

  #[test]
  fn cyclic_map_key_is_rejected() {
    let mut builder = HeapBuilder::default();
    let map_ref = builder.reserve();
    let map = Map {
      entries: vec![(Value::HeapReference(map_ref), Value::I32(1))],
    };
    builder.insert_reserved(map_ref, HeapValue::Map(map));
    let heap = builder.build().unwrap();

    let err = ValueSerializer::default()
      .finish(&heap, &Value::HeapReference(map_ref))
      .unwrap_err();
    assert!(matches!(err, SerializationError::IllegalCyclicMapKey));
  }

  #[test]
  fn circular_error_cause_requires_feature() {
    let mut builder = HeapBuilder::default();
    let error_ref = builder.reserve();
    let error = Error {
      name: ErrorName::Error,
      message: None,
      stack: None,
      cause: Some(Value::HeapReference(error_ref)),
    };
    builder.insert_reserved(error_ref, HeapValue::Error(error));
    let heap = builder.build().unwrap();

    let mut ser = ValueSerializer::default();
    ser.set_features(FeatureSet::empty());
    let err = ser
      .finish(&heap, &Value::HeapReference(error_ref))
      .unwrap_err();
    assert!(matches!(
      err,
      SerializationError::FeatureNotEnabled("circular Error.cause")
    ));

    let mut ser = ValueSerializer::default();
    ser.set_features(FeatureSet::CIRCULAR_ERROR_CAUSE);
    assert!(ser.finish(&heap, &Value::HeapReference(error_ref)).is_ok());
  }

  #[test]
  fn resizable_array_buffer_requires_feature() {
    let mut builder = HeapBuilder::default();
    let buffer = builder.insert(HeapValue::ArrayBuffer(ArrayBuffer {
      data: crate::de::alloc_aligned_u8_slice(0),
      max_byte_length: Some(16),
    }));
    let heap = builder.build().unwrap();

    let mut ser = ValueSerializer::default();
    ser.set_features(FeatureSet::empty());
    let err = ser
      .finish(&heap, &Value::HeapReference(buffer))
      .unwrap_err();
    assert!(matches!(
      err,
      SerializationError::FeatureNotEnabled("ResizableArrayBuffer")
    ));

    let mut ser = ValueSerializer::default();
    ser.set_features(FeatureSet::RESIZABLE_ARRAY_BUFFER);
    assert!(ser.finish(&heap, &Value::HeapReference(buffer)).is_ok());
  }

  #[test]
  fn float16_array_requires_feature() {
    let mut builder = HeapBuilder::default();
    let buffer = builder.insert(HeapValue::ArrayBuffer(ArrayBuffer {
      data: crate::de::alloc_aligned_u8_slice(2),
      max_byte_length: None,
    }));
    let view = builder.insert(HeapValue::ArrayBufferView(ArrayBufferView {
      kind: ArrayBufferViewKind::Float16Array,
      buffer,
      byte_offset: 0,
      length: 1,
      is_length_tracking: false,
      is_backed_by_rab: false,
    }));
    let heap = builder.build().unwrap();

    let mut ser = ValueSerializer::default();
    ser.set_features(FeatureSet::empty());
    let err = ser.finish(&heap, &Value::HeapReference(view)).unwrap_err();
    assert!(matches!(
      err,
      SerializationError::FeatureNotEnabled("Float16Array")
    ));

    let mut ser = ValueSerializer::default();
    ser.set_features(FeatureSet::FLOAT16_ARRAY);
    assert!(ser.finish(&heap, &Value::HeapReference(view)).is_ok());
  }

  #[test]
  fn decode_of_encoded_cyclic_object_preserves_identity() {
    let mut builder = HeapBuilder::default();
    let object_ref = builder.reserve();
    let object = Object {
      properties: vec![(
        PropertyKey::String(StringValue::new("self".to_owned())),
        Value::HeapReference(object_ref),
      )],
    };
    builder.insert_reserved(object_ref, HeapValue::Object(object));
    let heap = builder.build().unwrap();

    let bytes = finish(&Value::HeapReference(object_ref), &heap);
    let (value, decoded_heap) =
      ValueDeserializer::default().read(&bytes).unwrap();
    let Value::HeapReference(reference) = value else {
      panic!("expected a heap reference")
    };
    let HeapValue::Object(object) = reference.open(&decoded_heap) else {
      panic!("expected an object")
    };
    assert_eq!(object.properties.len(), 1);
    let Value::HeapReference(self_reference) = object.properties[0].1 else {
      panic!("expected \"self\" to be a heap reference")
    };
    assert_eq!(self_reference, reference);
  }

  #[test]
  fn dense_array_round_trips_through_heap_value_array() {
    let mut builder = HeapBuilder::default();
    let array = builder.insert(HeapValue::Array(JsArray::dense(
      vec![Some(Value::I32(1)), None, Some(Value::I32(3))],
      vec![],
    )));
    let heap = builder.build().unwrap();

    let bytes = finish(&Value::HeapReference(array), &heap);
    let (value, decoded_heap) = ValueDeserializer::default().read(&bytes).unwrap();
    let Value::HeapReference(reference) = value else {
      panic!("expected a heap reference")
    };
    let HeapValue::Array(decoded) = reference.open(&decoded_heap) else {
      panic!("expected an array")
    };
    assert!(!decoded.is_sparse());
    assert_eq!(decoded.dense_elements().unwrap().len(), 3);
  }

  #[test]
  fn array_promotes_to_sparse_after_enough_holes() {
    // Growing a small dense array to length 20 and leaving most of it empty
    // should cross MIN_SPARSE_ARRAY_SIZE / MIN_DENSE_ARRAY_USED_RATIO and
    // promote to sparse storage, which the encoder must notice and encode
    // with BeginSparseJsArray rather than BeginDenseJsArray.
    let mut array = JsArray::dense(vec![Some(Value::I32(1))], vec![]);
    array.resize(20);
    assert!(array.is_sparse());

    let mut builder = HeapBuilder::default();
    let reference = builder.insert(HeapValue::Array(array));
    let heap = builder.build().unwrap();

    let bytes = finish(&Value::HeapReference(reference), &heap);
    let (value, decoded_heap) = ValueDeserializer::default().read(&bytes).unwrap();
    let Value::HeapReference(reference) = value else {
      panic!("expected a heap reference")
    };
    let HeapValue::Array(decoded) = reference.open(&decoded_heap) else {
      panic!("expected an array")
    };
    assert!(decoded.is_sparse());
    assert_eq!(decoded.len(), 20);
  }
}

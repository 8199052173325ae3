//! JavaScript `SameValueZero` equality, used by `Map`/`Set` to decide
//! whether two keys are the same entry.
//!
//! Booleans are never equal to numbers, NaN is equal to itself, `+0` and
//! `-0` are equal, strings compare by value, everything else (heap values)
//! compares by identity.

use std::hash::{Hash, Hasher};

use num_bigint::BigInt;

use crate::value::{Heap, HeapReference, StringValue, Value};

/// A surrogate key: `k1 == k2` iff the underlying values are
/// same-value-zero equal. Use as a `HashMap`/`HashSet` key in place of
/// `Value` directly.
pub enum SameValueZeroKey {
  Bool(bool),
  Number(NumberKey),
  BigInt(BigInt),
  String(StringValue),
  Identity(HeapReference),
  Undefined,
  Null,
}

/// `f64` wrapper where all NaNs compare equal to each other, and `+0.0`
/// is equal to `-0.0` (ordinary float equality already gives us that).
#[derive(Clone, Copy, Debug)]
pub struct NumberKey(pub f64);

impl PartialEq for NumberKey {
  fn eq(&self, other: &Self) -> bool {
    if self.0.is_nan() && other.0.is_nan() {
      return true;
    }
    self.0 == other.0
  }
}
impl Eq for NumberKey {}

impl Hash for NumberKey {
  fn hash<H: Hasher>(&self, state: &mut H) {
    if self.0.is_nan() {
      // Canonical bit pattern so every NaN hashes the same.
      f64::NAN.to_bits().hash(state);
    } else if self.0 == 0.0 {
      // +0.0 and -0.0 must hash identically since they compare equal.
      0.0f64.to_bits().hash(state);
    } else {
      self.0.to_bits().hash(state);
    }
  }
}

impl PartialEq for SameValueZeroKey {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (SameValueZeroKey::Bool(a), SameValueZeroKey::Bool(b)) => a == b,
      (SameValueZeroKey::Number(a), SameValueZeroKey::Number(b)) => a == b,
      (SameValueZeroKey::BigInt(a), SameValueZeroKey::BigInt(b)) => a == b,
      (SameValueZeroKey::String(a), SameValueZeroKey::String(b)) => a == b,
      (SameValueZeroKey::Identity(a), SameValueZeroKey::Identity(b)) => {
        a.same_slot(b)
      }
      (SameValueZeroKey::Undefined, SameValueZeroKey::Undefined) => true,
      (SameValueZeroKey::Null, SameValueZeroKey::Null) => true,
      _ => false,
    }
  }
}
impl Eq for SameValueZeroKey {}

impl Hash for SameValueZeroKey {
  fn hash<H: Hasher>(&self, state: &mut H) {
    match self {
      SameValueZeroKey::Bool(b) => {
        0u8.hash(state);
        b.hash(state);
      }
      SameValueZeroKey::Number(n) => {
        1u8.hash(state);
        n.hash(state);
      }
      SameValueZeroKey::BigInt(b) => {
        2u8.hash(state);
        b.hash(state);
      }
      SameValueZeroKey::String(s) => {
        3u8.hash(state);
        s.to_string().hash(state);
      }
      SameValueZeroKey::Identity(r) => {
        4u8.hash(state);
        r.hash(state);
      }
      SameValueZeroKey::Undefined => 5u8.hash(state),
      SameValueZeroKey::Null => 6u8.hash(state),
    }
  }
}

/// Computes the same-value-zero surrogate key for `value`. `heap` is needed
/// because non-atom values are keyed by their heap slot (object identity).
pub fn same_value_zero(value: &Value, _heap: &Heap) -> SameValueZeroKey {
  match value {
    Value::Undefined => SameValueZeroKey::Undefined,
    Value::Null => SameValueZeroKey::Null,
    Value::Bool(b) => SameValueZeroKey::Bool(*b),
    Value::I32(i) => SameValueZeroKey::Number(NumberKey(*i as f64)),
    Value::U32(u) => SameValueZeroKey::Number(NumberKey(*u as f64)),
    Value::Double(d) => SameValueZeroKey::Number(NumberKey(*d)),
    Value::BigInt(b) => SameValueZeroKey::BigInt(b.clone()),
    Value::String(s) => SameValueZeroKey::String(s.clone()),
    Value::HeapReference(r) => SameValueZeroKey::Identity(*r),
  }
}

impl HeapReference {
  /// Whether two references point at the same heap slot. `SameValueZero` is
  /// only ever evaluated within a single heap, so comparing slot indexes
  /// alone (PartialEq on HeapReference already requires matching heap_id
  /// too) is sufficient.
  pub(crate) fn same_slot(&self, other: &Self) -> bool {
    self == other
  }
}

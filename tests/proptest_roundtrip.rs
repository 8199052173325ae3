//! Property-based round-trip tests for primitive values, covering
//! `spec.md`'s round-trip laws across the input space rather than a
//! handful of fixed examples.

use num_bigint::BigInt;
use proptest::prelude::*;
use v8_valueserializer::HeapBuilder;
use v8_valueserializer::OneByteString;
use v8_valueserializer::StringValue;
use v8_valueserializer::Value;
use v8_valueserializer::ValueDeserializer;
use v8_valueserializer::ValueSerializer;

fn roundtrip(value: &Value) -> Value {
  let heap = HeapBuilder::default().build().unwrap();
  let mut ser = ValueSerializer::default();
  let bytes = ser.finish(&heap, value).unwrap();
  let (decoded, _heap) = ValueDeserializer::default().read(&bytes).unwrap();
  decoded
}

#[test]
fn nan_double_round_trips_as_nan() {
  let value = Value::Double(f64::NAN);
  assert!(matches!(roundtrip(&value), Value::Double(decoded) if decoded.is_nan()));
}

proptest! {
  #[test]
  fn i32_round_trips(n: i32) {
    let value = Value::I32(n);
    prop_assert!(matches!(roundtrip(&value), Value::I32(decoded) if decoded == n));
  }

  #[test]
  fn u32_round_trips(n: u32) {
    let value = Value::U32(n);
    prop_assert!(matches!(roundtrip(&value), Value::U32(decoded) if decoded == n));
  }

  #[test]
  fn finite_double_round_trips(n in any::<f64>().prop_filter("finite", |n| n.is_finite())) {
    let value = Value::Double(n);
    prop_assert!(matches!(roundtrip(&value), Value::Double(decoded) if decoded == n));
  }

  #[test]
  fn bigint_round_trips(sign in any::<bool>(), magnitude in any::<u64>()) {
    let n = if sign {
      BigInt::from(magnitude)
    } else {
      -BigInt::from(magnitude)
    };
    let value = Value::BigInt(n.clone());
    prop_assert!(matches!(roundtrip(&value), Value::BigInt(decoded) if decoded == n));
  }

  #[test]
  fn ascii_string_round_trips(s in "[ -~]{0,64}") {
    let value = Value::String(StringValue::OneByte(OneByteString::new(s.clone().into_bytes())));
    let decoded = roundtrip(&value);
    let Value::String(decoded) = decoded else {
      panic!("expected a string, got {:?}", decoded)
    };
    prop_assert_eq!(decoded.to_string().as_ref(), s.as_str());
  }

  #[test]
  fn unicode_string_round_trips(s in "\\PC{0,32}") {
    let value = Value::String(StringValue::new(s.clone()));
    let decoded = roundtrip(&value);
    let Value::String(decoded) = decoded else {
      panic!("expected a string, got {:?}", decoded)
    };
    prop_assert_eq!(decoded.to_string().as_ref(), s.as_str());
  }
}

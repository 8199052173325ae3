//! Maps a V8 version to the set of wire-format features it may write.
//! Decoders always accept every feature; this gating only constrains the
//! encoder.

bitflags::bitflags! {
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  #[repr(transparent)]
  pub struct FeatureSet: u32 {
    /// `Float16Array` typed view tag, V8 >= 12.5.
    const FLOAT16_ARRAY = 1 << 0;
    /// `Error.cause` may cycle back to the error itself, V8 >= 12.1.109.
    const CIRCULAR_ERROR_CAUSE = 1 << 1;
    /// Resizable `ArrayBuffer` tag, V8 >= 11.4.
    const RESIZABLE_ARRAY_BUFFER = 1 << 2;
    /// `RegExp` UnicodeSets (`v`) flag bit, V8 >= 10.0.
    const REGEXP_UNICODE_SETS = 1 << 3;
  }
}

/// A dotted V8 version number, e.g. `12.4.254.8`. Only the leading
/// components needed to resolve feature gates are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
  pub major: u32,
  pub minor: u32,
  pub build: u32,
  pub patch: u32,
}

impl Version {
  pub const fn new(major: u32, minor: u32, build: u32, patch: u32) -> Self {
    Self {
      major,
      minor,
      build,
      patch,
    }
  }
}

impl FeatureSet {
  /// No optional features enabled; safe output for any V8 that accepts
  /// wire format version 13 at all.
  pub fn max_compatibility() -> Self {
    FeatureSet::empty()
  }

  /// The features a given V8 version is known to support.
  pub fn for_version(version: Version) -> Self {
    let mut features = FeatureSet::empty();
    if version >= Version::new(10, 0, 0, 0) {
      features |= FeatureSet::REGEXP_UNICODE_SETS;
    }
    if version >= Version::new(11, 4, 0, 0) {
      features |= FeatureSet::RESIZABLE_ARRAY_BUFFER;
    }
    if version >= Version::new(12, 1, 109, 0) {
      features |= FeatureSet::CIRCULAR_ERROR_CAUSE;
    }
    if version >= Version::new(12, 5, 0, 0) {
      features |= FeatureSet::FLOAT16_ARRAY;
    }
    features
  }

  /// The full feature set implied by the latest supported wire format
  /// version (15).
  pub fn latest() -> Self {
    FeatureSet::all()
  }
}

impl Default for FeatureSet {
  fn default() -> Self {
    FeatureSet::latest()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn older_version_has_fewer_features() {
    let v10 = FeatureSet::for_version(Version::new(10, 0, 0, 0));
    assert!(v10.contains(FeatureSet::REGEXP_UNICODE_SETS));
    assert!(!v10.contains(FeatureSet::FLOAT16_ARRAY));
  }

  #[test]
  fn max_compatibility_enables_nothing() {
    assert_eq!(FeatureSet::max_compatibility(), FeatureSet::empty());
  }

  #[test]
  fn latest_enables_everything() {
    let latest = FeatureSet::latest();
    assert!(latest.contains(FeatureSet::FLOAT16_ARRAY));
    assert!(latest.contains(FeatureSet::CIRCULAR_ERROR_CAUSE));
    assert!(latest.contains(FeatureSet::RESIZABLE_ARRAY_BUFFER));
    assert!(latest.contains(FeatureSet::REGEXP_UNICODE_SETS));
  }
}

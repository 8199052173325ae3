//! Dense and sparse backing storage for JS array elements, sharing one
//! interface. The owning array swaps representations at defined promotion
//! and demotion points; storage itself never decides to swap.

use std::collections::HashMap;

use crate::value::Value;

/// A JS array's length never reaches this; V8 arrays are bounded to u32.
pub const MAX_ARRAY_LENGTH: u32 = u32::MAX;

/// Below this length, an array is always dense regardless of occupancy.
pub const MIN_SPARSE_ARRAY_SIZE: u32 = 16;

/// A dense array with occupancy below this ratio becomes a candidate for
/// conversion to sparse storage.
pub const MIN_DENSE_ARRAY_USED_RATIO: f64 = 1.0 / 4.0;

/// A sparse array with occupancy above `1 - MAX_DENSE_ARRAY_HOLE_RATIO`
/// becomes a candidate for conversion to dense storage.
pub const MAX_DENSE_ARRAY_HOLE_RATIO: f64 = 1.0 / 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementOrder {
  Ascending,
  Descending,
  Unordered,
}

/// Shared interface implemented by both array storage representations.
pub trait ArrayStorage {
  /// Total logical length, including holes. Always `> ` every occupied index.
  fn len(&self) -> u32;

  /// Number of indexes in `0..len()` that hold a value (not a hole).
  fn elements_used(&self) -> u32;

  fn get(&self, index: u32) -> Option<&Value>;

  /// Sets the value at `index`, growing `len` if needed. `None` deletes
  /// (creates a hole) without shrinking the array.
  fn set(&mut self, index: u32, value: Option<Value>);

  /// Removes the element at `index`, shifting all later indexes down by one
  /// and shrinking `len` by one.
  fn delete(&mut self, index: u32);

  /// Inserts `value` at `index`, shifting all later indexes up by one and
  /// growing `len` by one.
  fn insert(&mut self, index: u32, value: Value);

  fn append(&mut self, value: Value) {
    let index = self.len();
    self.insert(index, value);
  }

  /// Grows (filling with holes) or shrinks (truncating) to `new_len`.
  fn resize(&mut self, new_len: u32);

  fn element_indexes(&self, order: ElementOrder) -> Vec<u32>;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[derive(Debug, Default)]
pub struct DenseArrayStorage {
  items: Vec<Option<Value>>,
  elements_used: u32,
}

impl DenseArrayStorage {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_elements(items: Vec<Option<Value>>) -> Self {
    let elements_used = items.iter().filter(|v| v.is_some()).count() as u32;
    Self {
      items,
      elements_used,
    }
  }

  pub fn into_elements(self) -> Vec<Option<Value>> {
    self.items
  }

  pub fn elements(&self) -> &[Option<Value>] {
    &self.items
  }
}

impl ArrayStorage for DenseArrayStorage {
  fn len(&self) -> u32 {
    self.items.len() as u32
  }

  fn elements_used(&self) -> u32 {
    self.elements_used
  }

  fn get(&self, index: u32) -> Option<&Value> {
    self.items.get(index as usize).and_then(|v| v.as_ref())
  }

  fn set(&mut self, index: u32, value: Option<Value>) {
    if index as usize >= self.items.len() {
      self.resize(index + 1);
    }
    let slot = &mut self.items[index as usize];
    match (slot.is_some(), value.is_some()) {
      (false, true) => self.elements_used += 1,
      (true, false) => self.elements_used -= 1,
      _ => {}
    }
    *slot = value;
  }

  fn delete(&mut self, index: u32) {
    if (index as usize) < self.items.len() {
      let removed = self.items.remove(index as usize);
      if removed.is_some() {
        self.elements_used -= 1;
      }
    }
  }

  fn insert(&mut self, index: u32, value: Value) {
    let index = (index as usize).min(self.items.len());
    self.items.insert(index, Some(value));
    self.elements_used += 1;
  }

  fn resize(&mut self, new_len: u32) {
    let new_len = new_len as usize;
    let old_len = self.items.len();
    if new_len >= old_len {
      self.items.resize_with(new_len, || None);
      return;
    }
    // Shrinking: recompute elements_used either by scanning the retained
    // prefix or by subtracting the removed suffix, whichever touches fewer
    // elements.
    let proportion_retained = new_len as f64 / old_len.max(1) as f64;
    if proportion_retained < 0.5 {
      let retained = self.items[..new_len]
        .iter()
        .filter(|v| v.is_some())
        .count() as u32;
      self.items.truncate(new_len);
      self.elements_used = retained;
    } else {
      let removed = self.items[new_len..]
        .iter()
        .filter(|v| v.is_some())
        .count() as u32;
      self.items.truncate(new_len);
      self.elements_used -= removed;
    }
  }

  fn element_indexes(&self, order: ElementOrder) -> Vec<u32> {
    let mut indexes: Vec<u32> = self
      .items
      .iter()
      .enumerate()
      .filter_map(|(i, v)| v.as_ref().map(|_| i as u32))
      .collect();
    if order == ElementOrder::Descending {
      indexes.reverse();
    }
    indexes
  }
}

#[derive(Debug, Default)]
pub struct SparseArrayStorage {
  items: HashMap<u32, Value>,
  sorted_keys: Option<Vec<u32>>,
  length: u32,
}

impl SparseArrayStorage {
  pub fn new(length: u32) -> Self {
    Self {
      items: HashMap::new(),
      sorted_keys: Some(Vec::new()),
      length,
    }
  }

  /// Builds sparse storage from explicit (index, value) entries plus an
  /// explicit length. All indexes must be `< length`.
  pub fn from_entries(entries: Vec<(u32, Value)>, length: u32) -> Self {
    for (index, _) in &entries {
      assert!(*index < length, "sparse array index out of range");
    }
    let items: HashMap<u32, Value> = entries.into_iter().collect();
    Self {
      items,
      sorted_keys: None,
      length,
    }
  }

  pub fn into_entries(self) -> Vec<(u32, Value)> {
    self.items.into_iter().collect()
  }

  pub fn entries(&self) -> impl Iterator<Item = (&u32, &Value)> {
    self.items.iter()
  }

  fn sorted_keys(&mut self) -> &[u32] {
    if self.sorted_keys.is_none() {
      let mut keys: Vec<u32> = self.items.keys().copied().collect();
      keys.sort_unstable();
      self.sorted_keys = Some(keys);
    }
    self.sorted_keys.as_deref().unwrap()
  }
}

impl ArrayStorage for SparseArrayStorage {
  fn len(&self) -> u32 {
    self.length
  }

  fn elements_used(&self) -> u32 {
    self.items.len() as u32
  }

  fn get(&self, index: u32) -> Option<&Value> {
    self.items.get(&index)
  }

  fn set(&mut self, index: u32, value: Option<Value>) {
    if index >= self.length {
      self.length = index + 1;
    }
    match value {
      Some(value) => {
        let is_new = !self.items.contains_key(&index);
        self.items.insert(index, value);
        if is_new {
          // O(1) maintenance only for append-at-end; otherwise invalidate.
          let appends_at_end =
            matches!(self.sorted_keys.as_ref().and_then(|k| k.last()), Some(&last) if last < index)
              || matches!(self.sorted_keys.as_ref(), Some(keys) if keys.is_empty());
          if appends_at_end {
            self.sorted_keys.as_mut().unwrap().push(index);
          } else {
            self.sorted_keys = None;
          }
        }
      }
      None => self.delete(index),
    }
  }

  fn delete(&mut self, index: u32) {
    if self.items.remove(&index).is_some() {
      match &mut self.sorted_keys {
        Some(keys) if keys.last() == Some(&index) => {
          keys.pop();
        }
        _ => self.sorted_keys = None,
      }
    }
  }

  fn insert(&mut self, index: u32, value: Value) {
    // Every key >= index shifts up by one.
    let keys = self.sorted_keys().to_vec();
    let split = keys.partition_point(|&k| k < index);
    let mut items = HashMap::with_capacity(self.items.len() + 1);
    for &key in &keys[..split] {
      items.insert(key, self.items.remove(&key).unwrap());
    }
    for &key in &keys[split..] {
      items.insert(key + 1, self.items.remove(&key).unwrap());
    }
    items.insert(index, value);
    self.items = items;
    self.sorted_keys = None;
    self.length += 1;
  }

  fn resize(&mut self, new_len: u32) {
    if new_len >= self.length {
      self.length = new_len;
      return;
    }
    let keys = self.sorted_keys().to_vec();
    let first_removed = keys.partition_point(|&k| k < new_len);
    let proportion_removed =
      (keys.len() - first_removed) as f64 / keys.len().max(1) as f64;
    if proportion_removed <= 0.5 {
      for &key in &keys[first_removed..] {
        self.items.remove(&key);
      }
      self.sorted_keys = Some(keys[..first_removed].to_vec());
    } else {
      let retained: HashMap<u32, Value> = keys[..first_removed]
        .iter()
        .map(|&key| (key, self.items.remove(&key).unwrap()))
        .collect();
      self.items = retained;
      self.sorted_keys = Some(keys[..first_removed].to_vec());
    }
    self.length = new_len;
  }

  fn element_indexes(&self, order: ElementOrder) -> Vec<u32> {
    match order {
      ElementOrder::Unordered => self.items.keys().copied().collect(),
      ElementOrder::Ascending => {
        let mut keys: Vec<u32> = self.items.keys().copied().collect();
        keys.sort_unstable();
        keys
      }
      ElementOrder::Descending => {
        let mut keys: Vec<u32> = self.items.keys().copied().collect();
        keys.sort_unstable_by(|a, b| b.cmp(a));
        keys
      }
    }
  }
}

/// Array storage that may be dense or sparse, swapping at the thresholds
/// from spec: dense -> sparse once length reaches `MIN_SPARSE_ARRAY_SIZE`
/// and occupancy drops below `MIN_DENSE_ARRAY_USED_RATIO`; sparse -> dense
/// once occupancy rises above `1 - MAX_DENSE_ARRAY_HOLE_RATIO`.
pub enum JsArrayStorage {
  Dense(DenseArrayStorage),
  Sparse(SparseArrayStorage),
}

impl JsArrayStorage {
  pub fn dense(storage: DenseArrayStorage) -> Self {
    JsArrayStorage::Dense(storage)
  }

  pub fn sparse(storage: SparseArrayStorage) -> Self {
    JsArrayStorage::Sparse(storage)
  }

  fn occupancy(&self) -> f64 {
    let len = self.len();
    if len == 0 {
      return 1.0;
    }
    self.elements_used() as f64 / len as f64
  }

  /// Converts dense storage to sparse storage if the thresholds are met.
  /// Called by the owning array after a mutation.
  pub fn promote_if_needed(&mut self) {
    if let JsArrayStorage::Dense(dense) = self {
      if dense.len() >= MIN_SPARSE_ARRAY_SIZE
        && self.occupancy() < MIN_DENSE_ARRAY_USED_RATIO
      {
        let JsArrayStorage::Dense(dense) =
          std::mem::replace(self, JsArrayStorage::Sparse(SparseArrayStorage::new(0)))
        else {
          unreachable!()
        };
        let length = dense.len();
        let entries: Vec<(u32, Value)> = dense
          .into_elements()
          .into_iter()
          .enumerate()
          .filter_map(|(i, v)| v.map(|v| (i as u32, v)))
          .collect();
        *self = JsArrayStorage::Sparse(SparseArrayStorage::from_entries(entries, length));
      }
    }
  }

  /// Converts sparse storage to dense storage if the thresholds are met.
  pub fn demote_if_needed(&mut self) {
    if let JsArrayStorage::Sparse(_) = self {
      if self.occupancy() > 1.0 - MAX_DENSE_ARRAY_HOLE_RATIO {
        let JsArrayStorage::Sparse(sparse) =
          std::mem::replace(self, JsArrayStorage::Dense(DenseArrayStorage::new()))
        else {
          unreachable!()
        };
        let length = sparse.len();
        let mut items: Vec<Option<Value>> = (0..length).map(|_| None).collect();
        for (index, value) in sparse.into_entries() {
          items[index as usize] = Some(value);
        }
        *self = JsArrayStorage::Dense(DenseArrayStorage::from_elements(items));
      }
    }
  }
}

impl ArrayStorage for JsArrayStorage {
  fn len(&self) -> u32 {
    match self {
      JsArrayStorage::Dense(d) => d.len(),
      JsArrayStorage::Sparse(s) => s.len(),
    }
  }

  fn elements_used(&self) -> u32 {
    match self {
      JsArrayStorage::Dense(d) => d.elements_used(),
      JsArrayStorage::Sparse(s) => s.elements_used(),
    }
  }

  fn get(&self, index: u32) -> Option<&Value> {
    match self {
      JsArrayStorage::Dense(d) => d.get(index),
      JsArrayStorage::Sparse(s) => s.get(index),
    }
  }

  fn set(&mut self, index: u32, value: Option<Value>) {
    match self {
      JsArrayStorage::Dense(d) => d.set(index, value),
      JsArrayStorage::Sparse(s) => s.set(index, value),
    }
  }

  fn delete(&mut self, index: u32) {
    match self {
      JsArrayStorage::Dense(d) => d.delete(index),
      JsArrayStorage::Sparse(s) => s.delete(index),
    }
  }

  fn insert(&mut self, index: u32, value: Value) {
    match self {
      JsArrayStorage::Dense(d) => d.insert(index, value),
      JsArrayStorage::Sparse(s) => s.insert(index, value),
    }
  }

  fn resize(&mut self, new_len: u32) {
    match self {
      JsArrayStorage::Dense(d) => d.resize(new_len),
      JsArrayStorage::Sparse(s) => s.resize(new_len),
    }
  }

  fn element_indexes(&self, order: ElementOrder) -> Vec<u32> {
    match self {
      JsArrayStorage::Dense(d) => d.element_indexes(order),
      JsArrayStorage::Sparse(s) => s.element_indexes(order),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::value::Value;

  #[test]
  fn dense_resize_grows_with_holes() {
    let mut d = DenseArrayStorage::new();
    d.set(0, Some(Value::I32(1)));
    d.resize(3);
    assert_eq!(d.len(), 3);
    assert_eq!(d.elements_used(), 1);
    assert!(d.get(1).is_none());
  }

  #[test]
  fn dense_resize_shrinks_and_tracks_elements_used() {
    let mut d = DenseArrayStorage::new();
    for i in 0..10u32 {
      d.set(i, Some(Value::I32(i as i32)));
    }
    d.resize(3);
    assert_eq!(d.len(), 3);
    assert_eq!(d.elements_used(), 3);
  }

  #[test]
  fn sparse_append_maintains_sorted_keys_in_place() {
    let mut s = SparseArrayStorage::new(0);
    s.set(0, Some(Value::I32(0)));
    s.set(1, Some(Value::I32(1)));
    s.set(2, Some(Value::I32(2)));
    assert_eq!(s.element_indexes(ElementOrder::Ascending), vec![0, 1, 2]);
  }

  #[test]
  fn sparse_insert_shifts_indexes() {
    let mut s = SparseArrayStorage::new(0);
    s.set(0, Some(Value::I32(10)));
    s.set(1, Some(Value::I32(20)));
    s.insert(1, Value::I32(99));
    assert_eq!(s.get(0).is_some(), true);
    assert_eq!(s.get(2).is_some(), true);
    assert_eq!(s.len(), 3);
  }

  #[test]
  fn promotes_sparse_when_occupancy_low() {
    let mut storage = JsArrayStorage::Dense(DenseArrayStorage::new());
    storage.resize(20);
    storage.set(0, Some(Value::I32(1)));
    storage.promote_if_needed();
    assert!(matches!(storage, JsArrayStorage::Sparse(_)));
  }

  #[test]
  fn demotes_dense_when_occupancy_high() {
    let mut storage = JsArrayStorage::Sparse(SparseArrayStorage::new(4));
    for i in 0..4u32 {
      storage.set(i, Some(Value::I32(i as i32)));
    }
    storage.demote_if_needed();
    assert!(matches!(storage, JsArrayStorage::Dense(_)));
  }
}

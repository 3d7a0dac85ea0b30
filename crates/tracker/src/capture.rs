//! Lazily instantiated capture buffers.

use indexmap::IndexMap;
use std::hash::Hash;

/// A buffer a phase can capture into.
pub trait CaptureBuffer: Default {
    fn is_empty(&self) -> bool;
    fn len(&self) -> usize;
}

impl<T> CaptureBuffer for Vec<T> {
    fn is_empty(&self) -> bool {
        Vec::is_empty(self)
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }
}

/// Insertion-ordered multimap: keys keep the position of their first value.
#[derive(Debug, Clone, PartialEq)]
pub struct ListMultimap<K: Hash + Eq, V> {
    entries: IndexMap<K, Vec<V>>,
}

impl<K: Hash + Eq, V> Default for ListMultimap<K, V> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }
}

impl<K: Hash + Eq, V> ListMultimap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: K, value: V) {
        self.entries.entry(key).or_default().push(value);
    }

    pub fn get(&self, key: &K) -> &[V] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Removes the key, keeping the order of the remaining keys.
    pub fn remove(&mut self, key: &K) -> Option<Vec<V>> {
        self.entries.shift_remove(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &[V])> {
        self.entries.iter().map(|(k, v)| (k, v.as_slice()))
    }
}

impl<K: Hash + Eq, V> IntoIterator for ListMultimap<K, V> {
    type Item = (K, Vec<V>);
    type IntoIter = indexmap::map::IntoIter<K, Vec<V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Hash + Eq, V> CaptureBuffer for ListMultimap<K, V> {
    fn is_empty(&self) -> bool {
        self.entries.values().all(Vec::is_empty)
    }

    fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

/// Wrapper around a capture buffer that is only allocated on first use.
///
/// Consumption is destructive: [`take_if_not_empty`](Self::take_if_not_empty)
/// hands the buffer out and leaves the supplier empty, so a second call is a
/// no-op.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSupplier<T> {
    buffer: Option<T>,
}

impl<T> Default for CaptureSupplier<T> {
    fn default() -> Self {
        Self { buffer: None }
    }
}

impl<T: CaptureBuffer> CaptureSupplier<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The buffer, created on demand.
    pub fn get(&mut self) -> &mut T {
        self.buffer.get_or_insert_with(T::default)
    }

    pub fn peek(&self) -> Option<&T> {
        self.buffer.as_ref()
    }

    pub fn is_instantiated(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.as_ref().is_none_or(CaptureBuffer::is_empty)
    }

    pub fn len(&self) -> usize {
        self.buffer.as_ref().map_or(0, CaptureBuffer::len)
    }

    pub fn if_present_and_not_empty(&self, f: impl FnOnce(&T)) {
        if let Some(buffer) = self.buffer.as_ref().filter(|b| !b.is_empty()) {
            f(buffer);
        }
    }

    pub fn take_if_not_empty(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        self.buffer.take()
    }

    /// Hand the contents to `f` and clear, unless there is nothing to hand over.
    pub fn accept_and_clear_if_not_empty(&mut self, f: impl FnOnce(T)) {
        if let Some(buffer) = self.take_if_not_empty() {
            f(buffer);
        }
    }

    pub fn clear(&mut self) {
        self.buffer = None;
    }
}

impl<K: Hash + Eq, V> CaptureSupplier<ListMultimap<K, V>> {
    /// Remove one key's values, leaving the rest captured.
    pub fn remove_key(&mut self, key: &K) -> Option<Vec<V>> {
        self.buffer.as_mut().and_then(|map| map.remove(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supplier_is_lazy() {
        let mut supplier: CaptureSupplier<Vec<u32>> = CaptureSupplier::new();
        assert!(!supplier.is_instantiated());
        assert!(supplier.is_empty());
        supplier.get();
        assert!(supplier.is_instantiated());
        assert!(supplier.is_empty());
    }

    #[test]
    fn take_clears_and_second_take_is_noop() {
        let mut supplier: CaptureSupplier<Vec<u32>> = CaptureSupplier::new();
        supplier.get().extend([1, 2, 3]);
        assert_eq!(supplier.take_if_not_empty(), Some(vec![1, 2, 3]));
        assert_eq!(supplier.take_if_not_empty(), None);

        let mut calls = 0;
        supplier.accept_and_clear_if_not_empty(|_| calls += 1);
        assert_eq!(calls, 0);
    }

    #[test]
    fn empty_buffer_is_not_taken() {
        let mut supplier: CaptureSupplier<Vec<u32>> = CaptureSupplier::new();
        supplier.get();
        assert_eq!(supplier.take_if_not_empty(), None);
        assert!(supplier.is_instantiated());
    }

    #[test]
    fn multimap_preserves_first_insertion_order() {
        let mut map = ListMultimap::new();
        map.put("b", 1);
        map.put("a", 2);
        map.put("b", 3);
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(map.get(&"b"), &[1, 3]);
        assert_eq!(CaptureBuffer::len(&map), 3);

        let mut supplier = CaptureSupplier { buffer: Some(map) };
        assert_eq!(supplier.remove_key(&"b"), Some(vec![1, 3]));
        assert_eq!(supplier.len(), 1);
    }
}

//! Bounded least-recently-used cache for decoded blocks.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

/// LRU cache keyed by `block_id`.
///
/// Entries are kept in recency order: index 0 is the least recently used and
/// is evicted first once `max_size` is exceeded.
pub struct BlockCache<V> {
    max_size: usize,
    entries: Mutex<IndexMap<String, Arc<V>>>,
}

impl<V> BlockCache<V> {
    /// `max_size` is clamped to at least one entry.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            entries: Mutex::new(IndexMap::new()),
        }
    }

    /// Fetch `block_id` and mark it most recently used.
    pub fn get(&self, block_id: &str) -> Option<Arc<V>> {
        let mut entries = self.entries.lock();
        let index = entries.get_index_of(block_id)?;
        let last = entries.len() - 1;
        entries.move_index(index, last);
        entries.get_index(last).map(|(_, value)| Arc::clone(value))
    }

    /// Insert or replace `block_id`, evicting the oldest entries over capacity.
    pub fn put(&self, block_id: impl Into<String>, value: V) -> Arc<V> {
        let value = Arc::new(value);
        let mut entries = self.entries.lock();
        let block_id = block_id.into();
        entries.shift_remove(&block_id);
        entries.insert(block_id, Arc::clone(&value));
        while entries.len() > self.max_size {
            entries.shift_remove_index(0);
        }
        value
    }

    pub fn contains(&self, block_id: &str) -> bool {
        self.entries.lock().contains_key(block_id)
    }

    /// Ids from `block_ids` that are not cached yet, in the given order.
    pub fn missing<'a>(&self, block_ids: &'a [String]) -> Vec<&'a str> {
        let entries = self.entries.lock();
        block_ids
            .iter()
            .filter(|id| !entries.contains_key(id.as_str()))
            .map(String::as_str)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

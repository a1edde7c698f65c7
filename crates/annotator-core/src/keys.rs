//! Storage-key resolution for block identifiers.
//!
//! Every store derives its persistence key through [`StorageKey::resolve`],
//! so the registry-backed and string-split paths cannot drift apart.

use crate::models::{join_block_id, NestedRecords};

/// Capability that maps a `block_id` to the absolute path of its container.
///
/// Implemented by [`crate::registry::BlockRegistry`]. Returning `None` makes
/// the caller fall back to splitting the id on its last `/`.
pub trait ContainerResolver: Send + Sync {
    fn resolve_absolute_container(&self, block_id: &str) -> Option<String>;
}

/// Normalized `(container_path, item_name)` persistence key for a block.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey {
    pub container_path: String,
    pub item_name: String,
}

impl StorageKey {
    pub fn new(container_path: impl Into<String>, item_name: impl Into<String>) -> Self {
        Self {
            container_path: container_path.into(),
            item_name: item_name.into(),
        }
    }

    /// Resolve `block_id` into its storage key.
    pub fn resolve(block_id: &str, resolver: Option<&dyn ContainerResolver>) -> Self {
        if let Some(container) = resolver.and_then(|r| r.resolve_absolute_container(block_id)) {
            let item = block_id.rsplit('/').next().unwrap_or(block_id);
            return Self::new(container, item);
        }
        Self::split(block_id)
    }

    /// Derive a key purely from the shape of `block_id`.
    pub fn split(block_id: &str) -> Self {
        match block_id.rsplit_once('/') {
            Some((container, item)) => Self::new(container, item),
            None => Self::new("", block_id),
        }
    }

    /// Find this key's record in a nested `container -> item` map.
    pub fn lookup<'a, R>(&self, nested: &'a NestedRecords<R>) -> Option<&'a R> {
        nested.get(&self.container_path)?.get(&self.item_name)
    }

    /// Rebuild a lookup-compatible `block_id` from this key.
    pub fn block_id(&self) -> String {
        join_block_id(&self.container_path, &self.item_name)
    }
}

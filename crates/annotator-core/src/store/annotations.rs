//! Per-user annotation store.
//!
//! Each user owns exactly one document, so no two processes ever race on the
//! same file. Every mutation rewrites the whole document before returning.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::errors::AnnotatorResult;
use crate::keys::{ContainerResolver, StorageKey};
use crate::models::{
    flatten_records, now_iso, remove_record, AnnotationRecord, Label, UserDocument,
};
use crate::store::atomic::{read_document, write_document};

/// A loaded per-user annotation document.
///
/// Only [`AnnotationStore::load_or_create`] produces a store, so every
/// method operates on a loaded document.
pub struct AnnotationStore {
    path: PathBuf,
    document: UserDocument,
    resolver: Option<Arc<dyn ContainerResolver>>,
}

impl AnnotationStore {
    /// Load the document at `path`, or create and persist an empty one.
    pub fn load_or_create(
        path: impl Into<PathBuf>,
        username: &str,
        resolver: Option<Arc<dyn ContainerResolver>>,
    ) -> AnnotatorResult<Self> {
        let path = path.into();
        let document = match read_document::<UserDocument>(&path)? {
            Some(existing) => {
                if existing.username != username {
                    warn!(
                        "Annotation file {} belongs to {:?}, opened as {:?}",
                        path.display(),
                        existing.username,
                        username
                    );
                }
                debug!("Loaded annotations for {username} from {}", path.display());
                existing
            }
            None => {
                let fresh = UserDocument::empty(username);
                write_document(&path, &fresh)?;
                info!("Created annotation file {} for {username}", path.display());
                fresh
            }
        };
        Ok(Self {
            path,
            document,
            resolver,
        })
    }

    fn key(&self, block_id: &str) -> StorageKey {
        StorageKey::resolve(block_id, self.resolver.as_deref())
    }

    /// Apply `mutate` to a copy of the document and persist it. The in-memory
    /// state only changes once the write has landed.
    fn update<R>(
        &mut self,
        mutate: impl FnOnce(&mut UserDocument) -> Option<R>,
    ) -> AnnotatorResult<Option<R>> {
        let mut next = self.document.clone();
        let Some(outcome) = mutate(&mut next) else {
            return Ok(None);
        };
        next.updated_at = now_iso();
        write_document(&self.path, &next)?;
        self.document = next;
        Ok(Some(outcome))
    }

    /// The label this user gave `block_id`, if any.
    pub fn get_label(&self, block_id: &str) -> Option<Label> {
        self.key(block_id)
            .lookup(&self.document.annotations)
            .map(|record| record.label)
    }

    /// Record `label` for `block_id` and persist before returning.
    pub fn set_label(&mut self, block_id: &str, label: Label) -> AnnotatorResult<()> {
        let key = self.key(block_id);
        self.update(|doc| {
            let record = AnnotationRecord {
                label,
                annotated_at: now_iso(),
            };
            doc.annotations
                .entry(key.container_path)
                .or_default()
                .insert(key.item_name, record);
            Some(())
        })?;
        debug!("{} labelled {block_id} as {label}", self.document.username);
        Ok(())
    }

    /// Remove the label for `block_id`. Returns `false` (and writes nothing)
    /// when there was no label.
    pub fn clear_label(&mut self, block_id: &str) -> AnnotatorResult<bool> {
        let key = self.key(block_id);
        let removed = self.update(|doc| {
            remove_record(&mut doc.annotations, &key.container_path, &key.item_name)
        })?;
        Ok(removed.is_some())
    }

    /// Every annotation keyed by reconstructed `block_id`.
    pub fn all_annotations(&self) -> IndexMap<String, AnnotationRecord> {
        flatten_records(&self.document.annotations)
    }

    /// The set of annotated `block_id`s.
    pub fn annotated_block_ids(&self) -> HashSet<String> {
        self.all_annotations().into_keys().collect()
    }

    /// The ids from `block_ids` this user has labelled, as given.
    ///
    /// Use this with display ids: with a resolver, [`Self::annotated_block_ids`]
    /// returns absolute storage ids instead.
    pub fn annotated_among(&self, block_ids: &[String]) -> HashSet<String> {
        block_ids
            .iter()
            .filter(|id| self.key(id).lookup(&self.document.annotations).is_some())
            .cloned()
            .collect()
    }

    pub fn annotated_count(&self) -> usize {
        self.document.annotations.values().map(|items| items.len()).sum()
    }

    pub fn username(&self) -> &str {
        &self.document.username
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn created_at(&self) -> &str {
        &self.document.created_at
    }

    pub fn updated_at(&self) -> &str {
        &self.document.updated_at
    }

    pub fn document(&self) -> &UserDocument {
        &self.document
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct FixedRoot(String);

    impl ContainerResolver for FixedRoot {
        fn resolve_absolute_container(&self, _block_id: &str) -> Option<String> {
            Some(self.0.clone())
        }
    }

    fn open(path: &Path) -> AnnotationStore {
        AnnotationStore::load_or_create(path, "alice", None).unwrap()
    }

    #[test]
    fn load_or_create_writes_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let fp = dir.path().join("users").join("alice.json");
        let store = open(&fp);
        assert!(fp.exists());
        assert!(store.annotated_block_ids().is_empty());
        assert_eq!(store.username(), "alice");
        assert_eq!(store.created_at(), store.updated_at());
    }

    #[test]
    fn set_and_get_label() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir.path().join("alice.json"));
        store.set_label("block_0001", 2).unwrap();
        assert_eq!(store.get_label("block_0001"), Some(2));
        assert_eq!(store.get_label("block_9999"), None);
    }

    #[test]
    fn label_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let fp = dir.path().join("alice.json");
        let mut first = open(&fp);
        first.set_label("block_0001", 2).unwrap();

        let second = open(&fp);
        assert_eq!(second.get_label("block_0001"), Some(2));
        assert_eq!(second.created_at(), first.created_at());
    }

    #[test]
    fn relabel_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir.path().join("alice.json"));
        store.set_label("block_0001", 1).unwrap();
        store.set_label("block_0001", 2).unwrap();
        assert_eq!(store.get_label("block_0001"), Some(2));
        assert_eq!(store.annotated_count(), 1);
    }

    #[test]
    fn clear_removes_and_prunes_container() {
        let dir = tempfile::tempdir().unwrap();
        let fp = dir.path().join("alice.json");
        let mut store = open(&fp);
        store.set_label("run1/block_0001", 3).unwrap();
        assert!(store.clear_label("run1/block_0001").unwrap());

        assert_eq!(store.get_label("run1/block_0001"), None);
        assert!(!store.annotated_block_ids().contains("run1/block_0001"));
        assert!(store.document().annotations.get("run1").is_none());

        let on_disk: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&fp).unwrap()).unwrap();
        assert_eq!(on_disk["annotations"], serde_json::json!({}));
    }

    #[test]
    fn clear_missing_label_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir.path().join("alice.json"));
        let before = store.updated_at().to_string();
        assert!(!store.clear_label("block_0042").unwrap());
        assert_eq!(store.updated_at(), before);
    }

    #[test]
    fn all_annotations_flattens_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir.path().join("alice.json"));
        store.set_label("block_0001", 1).unwrap();
        store.set_label("run2/block_0002", 3).unwrap();
        let all = store.all_annotations();
        assert_eq!(all["block_0001"].label, 1);
        assert_eq!(all["run2/block_0002"].label, 3);
        assert_eq!(
            store.annotated_block_ids(),
            HashSet::from(["block_0001".to_string(), "run2/block_0002".to_string()])
        );
    }

    #[test]
    fn resolver_keys_match_across_relative_ids() {
        let dir = tempfile::tempdir().unwrap();
        let fp = dir.path().join("alice.json");
        let resolver: Arc<dyn ContainerResolver> = Arc::new(FixedRoot("/mnt/blocks".into()));

        let mut store =
            AnnotationStore::load_or_create(&fp, "alice", Some(resolver.clone())).unwrap();
        store.set_label("./data/blocks/block_0001", 2).unwrap();
        assert_eq!(store.get_label("../other/mount/block_0001"), Some(2));
        assert!(store
            .annotated_block_ids()
            .contains("/mnt/blocks/block_0001"));
    }

    #[test]
    fn annotated_among_reports_display_ids() {
        let dir = tempfile::tempdir().unwrap();
        let resolver: Arc<dyn ContainerResolver> = Arc::new(FixedRoot("/mnt/blocks".into()));
        let mut store =
            AnnotationStore::load_or_create(dir.path().join("alice.json"), "alice", Some(resolver))
                .unwrap();
        store.set_label("block_0002", 1).unwrap();

        let shown: Vec<String> = ["block_0001", "block_0002", "block_0003"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            store.annotated_among(&shown),
            HashSet::from(["block_0002".to_string()])
        );
        assert!(!store.annotated_block_ids().contains("block_0002"));
    }

    #[test]
    fn failed_write_leaves_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let fp = dir.path().join("alice.json");
        let mut store = open(&fp);
        // Replace the file with a directory so the rename fails.
        fs::remove_file(&fp).unwrap();
        fs::create_dir(&fp).unwrap();
        assert!(store.set_label("block_0001", 1).is_err());
        assert_eq!(store.get_label("block_0001"), None);
    }

    #[test]
    fn corrupt_file_is_fatal_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let fp = dir.path().join("alice.json");
        fs::write(&fp, "not json").unwrap();
        assert!(AnnotationStore::load_or_create(&fp, "alice", None).is_err());
    }
}

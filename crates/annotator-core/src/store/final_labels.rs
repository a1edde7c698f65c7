//! Admin final-label store.
//!
//! A single document shared by every admin. Concurrent admins race at whole
//! document granularity and the last writer wins; there is no merge.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::errors::AnnotatorResult;
use crate::keys::{ContainerResolver, StorageKey};
use crate::models::{
    flatten_records, now_iso, remove_record, FinalLabelRecord, FinalLabelsDocument, Label,
};
use crate::store::atomic::{read_document, write_document};

/// Adjudicated labels written by admins. Authorization happens upstream;
/// this store only records who the caller says set each label.
pub struct FinalLabelStore {
    path: PathBuf,
    document: FinalLabelsDocument,
    resolver: Option<Arc<dyn ContainerResolver>>,
}

impl FinalLabelStore {
    /// Load the shared document, starting empty when it does not exist yet.
    pub fn load(
        path: impl Into<PathBuf>,
        resolver: Option<Arc<dyn ContainerResolver>>,
    ) -> AnnotatorResult<Self> {
        let path = path.into();
        let document = read_document::<FinalLabelsDocument>(&path)?.unwrap_or_default();
        debug!(
            "Loaded {} final-label containers from {}",
            document.labels.len(),
            path.display()
        );
        Ok(Self {
            path,
            document,
            resolver,
        })
    }

    /// Re-read the document from disk, picking up other admins' writes.
    pub fn reload(&mut self) -> AnnotatorResult<()> {
        if let Some(document) = read_document::<FinalLabelsDocument>(&self.path)? {
            self.document = document;
        }
        Ok(())
    }

    fn key(&self, block_id: &str) -> StorageKey {
        StorageKey::resolve(block_id, self.resolver.as_deref())
    }

    fn update<R>(
        &mut self,
        mutate: impl FnOnce(&mut FinalLabelsDocument) -> Option<R>,
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

    /// Override the final label for `block_id` and persist.
    pub fn set_final_label(
        &mut self,
        block_id: &str,
        label: Label,
        admin_username: &str,
    ) -> AnnotatorResult<()> {
        let key = self.key(block_id);
        self.update(|doc| {
            let record = FinalLabelRecord {
                final_label: label,
                set_by: admin_username.to_string(),
                set_at: now_iso(),
            };
            doc.labels
                .entry(key.container_path)
                .or_default()
                .insert(key.item_name, record);
            Some(())
        })?;
        info!("{admin_username} set final label {label} for {block_id}");
        Ok(())
    }

    /// Drop the final label for `block_id`. Returns whether one existed.
    pub fn clear_final_label(&mut self, block_id: &str) -> AnnotatorResult<bool> {
        let key = self.key(block_id);
        let removed = self.update(|doc| {
            remove_record(&mut doc.labels, &key.container_path, &key.item_name)
        })?;
        Ok(removed.is_some())
    }

    pub fn get_final_label(&self, block_id: &str) -> Option<Label> {
        self.key(block_id)
            .lookup(&self.document.labels)
            .map(|record| record.final_label)
    }

    /// Every final label keyed by reconstructed `block_id`.
    pub fn all_labels(&self) -> IndexMap<String, FinalLabelRecord> {
        flatten_records(&self.document.labels)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn resolver(&self) -> Option<&dyn ContainerResolver> {
        self.resolver.as_deref()
    }

    pub fn document(&self) -> &FinalLabelsDocument {
        &self.document
    }
}

//! Admin review: read every annotator's document and reconcile them.
//!
//! Nothing here is cached between refreshes. The admin view rebuilds a
//! [`ReviewSnapshot`] from disk whenever it wants fresh data.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use rayon::prelude::*;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::consensus::{build_consensus_table, ConsensusStats, UserAnnotations};
use crate::errors::AnnotatorResult;
use crate::export;
use crate::keys::{ContainerResolver, StorageKey};
use crate::models::{
    decode_records_lenient, AnnotationRecord, ConsensusRow, FinalLabelRecord,
    FinalLabelsDocument, UserDocument,
};
use crate::store::atomic::read_document;

/// Load every per-user document directly under `users_dir`, keyed by username.
///
/// JSON files without an `annotations` key (display preferences and the like)
/// are skipped. Individual malformed records are dropped and the rest of the
/// document kept. A file that cannot be read at all is fatal.
pub fn load_user_documents(users_dir: &Path) -> AnnotatorResult<BTreeMap<String, UserDocument>> {
    if !users_dir.is_dir() {
        return Ok(BTreeMap::new());
    }

    let paths: Vec<PathBuf> = WalkDir::new(users_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();

    let loaded: Vec<AnnotatorResult<Option<UserDocument>>> =
        paths.par_iter().map(|p| load_user_file(p)).collect();

    let mut documents = BTreeMap::new();
    for result in loaded {
        if let Some(document) = result? {
            documents.insert(document.username.clone(), document);
        }
    }
    debug!(
        "Loaded {} user documents from {}",
        documents.len(),
        users_dir.display()
    );
    Ok(documents)
}

fn load_user_file(path: &Path) -> AnnotatorResult<Option<UserDocument>> {
    let Some(mut value) = read_document::<serde_json::Value>(path)? else {
        return Ok(None);
    };
    let Some(raw) = value
        .as_object_mut()
        .and_then(|doc| doc.remove("annotations"))
    else {
        return Ok(None);
    };
    let mut document: UserDocument = match serde_json::from_value(value) {
        Ok(document) => document,
        Err(err) => {
            warn!("Skipping malformed user document {}: {err}", path.display());
            return Ok(None);
        }
    };
    let (annotations, dropped) = decode_records_lenient::<AnnotationRecord>(raw);
    if dropped > 0 {
        warn!(
            "Ignoring {dropped} malformed annotation entries in {}",
            path.display()
        );
    }
    document.annotations = annotations;
    Ok(Some(document))
}

/// Consensus table plus the data needed to display and export it.
#[derive(Clone, Debug)]
pub struct ReviewSnapshot {
    rows: Vec<ConsensusRow>,
    usernames: Vec<String>,
    final_labels: IndexMap<String, FinalLabelRecord>,
}

impl ReviewSnapshot {
    /// Read all user documents under `users_dir` and build the table for
    /// `block_ids`, in that order.
    pub fn load(
        users_dir: &Path,
        final_labels: &FinalLabelsDocument,
        block_ids: &[String],
        resolver: Option<&dyn ContainerResolver>,
    ) -> AnnotatorResult<Self> {
        let documents = load_user_documents(users_dir)?;
        Ok(Self::from_documents(
            &documents,
            final_labels,
            block_ids,
            resolver,
        ))
    }

    /// Build the table from already loaded documents.
    ///
    /// Records are matched through each display id's storage key, so labels
    /// stored under an absolute container still line up with the registry's
    /// bare block names.
    pub fn from_documents(
        documents: &BTreeMap<String, UserDocument>,
        final_labels: &FinalLabelsDocument,
        block_ids: &[String],
        resolver: Option<&dyn ContainerResolver>,
    ) -> Self {
        let keys: Vec<(&String, StorageKey)> = block_ids
            .iter()
            .map(|id| (id, StorageKey::resolve(id, resolver)))
            .collect();

        let all: UserAnnotations = documents
            .iter()
            .map(|(username, document)| {
                let by_display: IndexMap<String, AnnotationRecord> = keys
                    .iter()
                    .filter_map(|(id, key)| {
                        key.lookup(&document.annotations)
                            .map(|record| ((*id).clone(), record.clone()))
                    })
                    .collect();
                (username.clone(), by_display)
            })
            .collect();

        let finals: IndexMap<String, FinalLabelRecord> = keys
            .iter()
            .filter_map(|(id, key)| {
                key.lookup(&final_labels.labels)
                    .map(|record| ((*id).clone(), record.clone()))
            })
            .collect();

        Self {
            rows: build_consensus_table(&all, block_ids),
            usernames: documents.keys().cloned().collect(),
            final_labels: finals,
        }
    }

    pub fn rows(&self) -> &[ConsensusRow] {
        &self.rows
    }

    /// Annotators with a document on disk, sorted.
    pub fn usernames(&self) -> &[String] {
        &self.usernames
    }

    /// Final labels keyed by display `block_id`.
    pub fn final_labels(&self) -> &IndexMap<String, FinalLabelRecord> {
        &self.final_labels
    }

    pub fn stats(&self) -> ConsensusStats {
        ConsensusStats::from_rows(&self.rows, self.usernames.len())
    }

    pub fn export_csv(&self, destination: &Path) -> AnnotatorResult<()> {
        export::export_csv(&self.rows, &self.final_labels, destination, &self.usernames)
    }
}

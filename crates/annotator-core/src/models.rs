//! Shared typed models used across the store, consensus and export layers.
//!
//! The document structs mirror the on-disk JSON layout exactly so files
//! written by earlier versions of the tool load without migration.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A class label chosen by an annotator (1-based index into the class list).
pub type Label = u32;

/// Nested `container_path -> item_name -> record` mapping used by both
/// persisted documents.
pub type NestedRecords<R> = IndexMap<String, IndexMap<String, R>>;

/// Current UTC time as an ISO-8601 string with microseconds and `+00:00`.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

// ---------------------------------------------------------------------------
// Per-user document
// ---------------------------------------------------------------------------

/// One user's label for one block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub label: Label,
    pub annotated_at: String,
}

/// The per-user annotation file (`annotations/users/<username>.json`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserDocument {
    pub username: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub annotations: NestedRecords<AnnotationRecord>,
    /// Top-level fields this version does not know about, kept on rewrite.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserDocument {
    /// A fresh document with no annotations.
    pub fn empty(username: &str) -> Self {
        let now = now_iso();
        Self {
            username: username.to_string(),
            created_at: now.clone(),
            updated_at: now,
            annotations: IndexMap::new(),
            extra: serde_json::Map::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Final-labels document
// ---------------------------------------------------------------------------

/// An admin-adjudicated label for one block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalLabelRecord {
    pub final_label: Label,
    pub set_by: String,
    pub set_at: String,
}

/// The shared final-labels file (`annotations/admin/final_labels.json`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinalLabelsDocument {
    pub updated_at: String,
    #[serde(default)]
    pub labels: NestedRecords<FinalLabelRecord>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for FinalLabelsDocument {
    fn default() -> Self {
        Self {
            updated_at: now_iso(),
            labels: IndexMap::new(),
            extra: serde_json::Map::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Consensus row
// ---------------------------------------------------------------------------

/// One row of the admin review table. Derived on demand, never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusRow {
    pub block_id: String,
    /// Labels of the users that annotated this block, ordered by username.
    pub user_labels: BTreeMap<String, Label>,
    pub consensus: Option<Label>,
    pub disagreement: bool,
}

// ---------------------------------------------------------------------------
// Nested-map helpers shared by both stores
// ---------------------------------------------------------------------------

/// Flatten a nested record map back into `block_id -> record`.
pub(crate) fn flatten_records<R: Clone>(nested: &NestedRecords<R>) -> IndexMap<String, R> {
    let mut flat = IndexMap::new();
    for (container, items) in nested {
        for (item, record) in items {
            flat.insert(join_block_id(container, item), record.clone());
        }
    }
    flat
}

/// Remove `item` from `container`, dropping the container map when it empties.
pub(crate) fn remove_record<R>(
    nested: &mut NestedRecords<R>,
    container: &str,
    item: &str,
) -> Option<R> {
    let items = nested.get_mut(container)?;
    let removed = items.shift_remove(item)?;
    if items.is_empty() {
        nested.shift_remove(container);
    }
    Some(removed)
}

/// Decode a raw `container -> item -> record` value one record at a time.
///
/// Records (or whole containers) that do not match `R` are dropped. Returns
/// the records kept and how many entries were dropped.
pub(crate) fn decode_records_lenient<R: DeserializeOwned>(
    raw: serde_json::Value,
) -> (NestedRecords<R>, usize) {
    let mut nested = NestedRecords::new();
    let mut dropped = 0;
    let was_null = raw.is_null();
    let serde_json::Value::Object(containers) = raw else {
        return (nested, usize::from(!was_null));
    };
    for (container, items) in containers {
        let serde_json::Value::Object(items) = items else {
            dropped += 1;
            continue;
        };
        let mut kept = IndexMap::new();
        for (item, record) in items {
            match serde_json::from_value::<R>(record) {
                Ok(record) => {
                    kept.insert(item, record);
                }
                Err(_) => dropped += 1,
            }
        }
        if !kept.is_empty() {
            nested.insert(container, kept);
        }
    }
    (nested, dropped)
}

pub(crate) fn join_block_id(container: &str, item: &str) -> String {
    if container.is_empty() {
        item.to_string()
    } else {
        format!("{container}/{item}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_iso_uses_utc_offset_and_micros() {
        let ts = now_iso();
        assert!(ts.ends_with("+00:00"), "unexpected timestamp {ts}");
        let fraction = ts.split('.').nth(1).unwrap();
        assert_eq!(fraction.len(), "123456+00:00".len());
    }

    #[test]
    fn user_document_matches_file_layout() {
        let raw = r#"{
            "username": "alice",
            "created_at": "2025-01-01T00:00:00+00:00",
            "updated_at": "2025-01-02T00:00:00+00:00",
            "annotations": {
                "/data/blocks": {
                    "block_0001": {"label": 2, "annotated_at": "2025-01-02T00:00:00+00:00"}
                }
            }
        }"#;
        let doc: UserDocument = serde_json::from_str(raw).unwrap();
        assert_eq!(doc.username, "alice");
        assert_eq!(doc.annotations["/data/blocks"]["block_0001"].label, 2);
        assert!(doc.extra.is_empty());
    }

    #[test]
    fn unknown_fields_survive_round_trip() {
        let raw = r#"{"updated_at": "t", "labels": {}, "note": "keep me"}"#;
        let doc: FinalLabelsDocument = serde_json::from_str(raw).unwrap();
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["note"], "keep me");
    }

    #[test]
    fn remove_record_prunes_empty_container() {
        let mut nested: NestedRecords<u32> = IndexMap::new();
        nested
            .entry("c".to_string())
            .or_default()
            .insert("a".to_string(), 1);
        assert_eq!(remove_record(&mut nested, "c", "a"), Some(1));
        assert!(nested.is_empty());
        assert_eq!(remove_record(&mut nested, "c", "a"), None);
    }

    #[test]
    fn lenient_decode_drops_only_bad_records() {
        let raw = serde_json::json!({
            "": {
                "block_0001": {"label": 2, "annotated_at": "t"},
                "block_0002": {"label": null, "annotated_at": "t"},
            },
            "/abs/root": {"block_0003": {"label": 1}},
            "broken": 7,
        });
        let (nested, dropped) = decode_records_lenient::<AnnotationRecord>(raw);
        assert_eq!(dropped, 3);
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[""]["block_0001"].label, 2);
        assert!(nested[""].get("block_0002").is_none());
    }

    #[test]
    fn flatten_joins_container_and_item() {
        let mut nested: NestedRecords<u32> = IndexMap::new();
        nested
            .entry(String::new())
            .or_default()
            .insert("block_0001".to_string(), 1);
        nested
            .entry("/abs/root".to_string())
            .or_default()
            .insert("block_0002".to_string(), 2);
        let flat = flatten_records(&nested);
        assert_eq!(flat["block_0001"], 1);
        assert_eq!(flat["/abs/root/block_0002"], 2);
    }
}

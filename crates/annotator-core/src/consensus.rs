//! Majority-vote consensus over independent annotators.
//!
//! Everything here is pure: the admin view recomputes the table from freshly
//! read documents each time it refreshes.

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::models::{AnnotationRecord, ConsensusRow, Label};

/// `username -> block_id -> record` for every annotator.
pub type UserAnnotations = HashMap<String, IndexMap<String, AnnotationRecord>>;

/// Majority label and disagreement flag for one block.
///
/// `None` entries are ignored. Ties go to the numerically smallest label.
/// Disagreement means the remaining labels are not unanimous, whatever the
/// tie-break picked.
pub fn compute_consensus(labels: &[Option<Label>]) -> (Option<Label>, bool) {
    let mut counts: BTreeMap<Label, usize> = BTreeMap::new();
    for label in labels.iter().flatten() {
        *counts.entry(*label).or_insert(0) += 1;
    }

    let Some(max_count) = counts.values().copied().max() else {
        return (None, false);
    };
    // BTreeMap iterates in ascending label order, so the first leader is the
    // smallest.
    let consensus = counts
        .iter()
        .find(|(_, count)| **count == max_count)
        .map(|(label, _)| *label);
    (consensus, counts.len() > 1)
}

/// Build [`UserAnnotations`] from loosely shaped JSON
/// (`{username: {block_id: {"label", "annotated_at"}}}`).
///
/// Entries without a non-negative integer `label` that fits a [`Label`] are
/// treated as absent. A missing `annotated_at` becomes an empty string.
pub fn user_annotations_from_json(value: &Value) -> UserAnnotations {
    let Some(users) = value.as_object() else {
        return UserAnnotations::new();
    };
    users
        .iter()
        .map(|(username, blocks)| {
            let annotations: IndexMap<String, AnnotationRecord> = blocks
                .as_object()
                .into_iter()
                .flatten()
                .filter_map(|(block_id, entry)| {
                    let label = Label::try_from(entry.get("label")?.as_u64()?).ok()?;
                    let annotated_at = entry
                        .get("annotated_at")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    Some((block_id.clone(), AnnotationRecord { label, annotated_at }))
                })
                .collect();
            (username.clone(), annotations)
        })
        .collect()
}

/// One row per `block_id`, in the order given.
pub fn build_consensus_table(
    all_user_annotations: &UserAnnotations,
    block_ids: &[String],
) -> Vec<ConsensusRow> {
    block_ids
        .iter()
        .map(|block_id| {
            let user_labels: BTreeMap<String, Label> = all_user_annotations
                .iter()
                .filter_map(|(username, annotations)| {
                    annotations
                        .get(block_id)
                        .map(|record| (username.clone(), record.label))
                })
                .collect();
            let votes: Vec<Option<Label>> = user_labels.values().copied().map(Some).collect();
            let (consensus, disagreement) = compute_consensus(&votes);
            ConsensusRow {
                block_id: block_id.clone(),
                user_labels,
                consensus,
                disagreement,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Review summaries
// ---------------------------------------------------------------------------

/// Review status of a row, used to color the admin table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    NotAnnotated,
    Agree,
    Disagree,
}

impl RowStatus {
    pub fn of(row: &ConsensusRow) -> Self {
        if row.user_labels.is_empty() {
            RowStatus::NotAnnotated
        } else if row.disagreement {
            RowStatus::Disagree
        } else {
            RowStatus::Agree
        }
    }
}

/// Aggregate counts over a consensus table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConsensusStats {
    pub total_blocks: usize,
    pub annotated_blocks: usize,
    pub disagreements: usize,
    pub agreed_blocks: usize,
    /// `agreed / annotated`, or `None` when nothing is annotated.
    pub consensus_rate: Option<f64>,
    pub annotators: usize,
}

impl ConsensusStats {
    pub fn from_rows(rows: &[ConsensusRow], annotators: usize) -> Self {
        let annotated_blocks = rows.iter().filter(|r| !r.user_labels.is_empty()).count();
        let disagreements = rows.iter().filter(|r| r.disagreement).count();
        let agreed_blocks = rows
            .iter()
            .filter(|r| RowStatus::of(r) == RowStatus::Agree)
            .count();
        let consensus_rate =
            (annotated_blocks > 0).then(|| agreed_blocks as f64 / annotated_blocks as f64);
        Self {
            total_blocks: rows.len(),
            annotated_blocks,
            disagreements,
            agreed_blocks,
            consensus_rate,
            annotators,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(label: Label) -> AnnotationRecord {
        AnnotationRecord {
            label,
            annotated_at: "2025-01-01T00:00:00+00:00".to_string(),
        }
    }

    fn users(entries: &[(&str, &[(&str, Label)])]) -> UserAnnotations {
        entries
            .iter()
            .map(|(user, labels)| {
                let annotations: IndexMap<String, AnnotationRecord> = labels
                    .iter()
                    .map(|(block, label)| (block.to_string(), record(*label)))
                    .collect();
                (user.to_string(), annotations)
            })
            .collect()
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unanimous() {
        assert_eq!(compute_consensus(&[Some(1), Some(1), Some(1)]), (Some(1), false));
    }

    #[test]
    fn majority_flags_disagreement() {
        assert_eq!(compute_consensus(&[Some(1), Some(1), Some(2)]), (Some(1), true));
    }

    #[test]
    fn tie_picks_smallest() {
        assert_eq!(compute_consensus(&[Some(2), Some(1)]), (Some(1), true));
        assert_eq!(compute_consensus(&[Some(3), Some(2), Some(1)]), (Some(1), true));
    }

    #[test]
    fn majority_beats_smaller_minority() {
        assert_eq!(compute_consensus(&[Some(1), Some(3), Some(3)]), (Some(3), true));
    }

    #[test]
    fn empty_and_all_none() {
        assert_eq!(compute_consensus(&[]), (None, false));
        assert_eq!(compute_consensus(&[None, None]), (None, false));
    }

    #[test]
    fn ignores_none() {
        assert_eq!(compute_consensus(&[None, Some(2), Some(2)]), (Some(2), false));
    }

    #[test]
    fn single_vote() {
        assert_eq!(compute_consensus(&[Some(3)]), (Some(3), false));
    }

    #[test]
    fn table_basic_agreement() {
        let all = users(&[("alice", &[("block_0001", 1)]), ("bob", &[("block_0001", 1)])]);
        let rows = build_consensus_table(&all, &ids(&["block_0001"]));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].block_id, "block_0001");
        assert_eq!(rows[0].consensus, Some(1));
        assert!(!rows[0].disagreement);
        assert_eq!(
            rows[0].user_labels,
            BTreeMap::from([("alice".to_string(), 1), ("bob".to_string(), 1)])
        );
    }

    #[test]
    fn table_disagreement() {
        let all = users(&[("alice", &[("block_0001", 1)]), ("bob", &[("block_0001", 2)])]);
        let rows = build_consensus_table(&all, &ids(&["block_0001"]));
        assert!(rows[0].disagreement);
        assert_eq!(RowStatus::of(&rows[0]), RowStatus::Disagree);
    }

    #[test]
    fn table_unannotated_block() {
        let all = users(&[("alice", &[])]);
        let rows = build_consensus_table(&all, &ids(&["block_0001"]));
        assert_eq!(rows[0].consensus, None);
        assert!(rows[0].user_labels.is_empty());
        assert_eq!(RowStatus::of(&rows[0]), RowStatus::NotAnnotated);
    }

    #[test]
    fn table_preserves_input_order() {
        let all = users(&[
            ("zed", &[("b2", 2), ("b1", 1)]),
            ("amy", &[("b1", 1)]),
            ("kim", &[("b2", 3)]),
        ]);
        let order = ids(&["b2", "b1", "b3"]);
        let rows = build_consensus_table(&all, &order);
        let got: Vec<&str> = rows.iter().map(|r| r.block_id.as_str()).collect();
        assert_eq!(got, vec!["b2", "b1", "b3"]);
        assert_eq!(rows[0].consensus, Some(2));
        assert!(rows[0].disagreement);
    }

    #[test]
    fn stats_summarize_rows() {
        let all = users(&[
            ("alice", &[("b1", 1), ("b2", 1)]),
            ("bob", &[("b1", 1), ("b2", 2)]),
        ]);
        let rows = build_consensus_table(&all, &ids(&["b1", "b2", "b3", "b4"]));
        let stats = ConsensusStats::from_rows(&rows, all.len());
        assert_eq!(stats.total_blocks, 4);
        assert_eq!(stats.annotated_blocks, 2);
        assert_eq!(stats.disagreements, 1);
        assert_eq!(stats.agreed_blocks, 1);
        assert_eq!(stats.consensus_rate, Some(0.5));
        assert_eq!(stats.annotators, 2);
    }

    #[test]
    fn loose_json_entries_count_only_with_a_label() {
        let raw = serde_json::json!({
            "alice": {
                "block_0001": {"label": 2},
                "block_0002": {"label": null, "annotated_at": "t"},
                "block_0003": {"label": "3"},
                "block_0004": {"label": -1},
            },
            "bob": {"block_0001": {"label": 2, "annotated_at": "t"}},
            "carol": "not a mapping",
        });
        let all = user_annotations_from_json(&raw);
        assert_eq!(all.len(), 3);
        assert_eq!(all["alice"].len(), 1);
        assert_eq!(all["alice"]["block_0001"].annotated_at, "");
        assert!(all["carol"].is_empty());

        let rows = build_consensus_table(&all, &ids(&["block_0001", "block_0002"]));
        assert_eq!(rows[0].consensus, Some(2));
        assert!(!rows[0].disagreement);
        assert_eq!(rows[1].consensus, None);
        assert!(rows[1].user_labels.is_empty());
    }

    #[test]
    fn non_mapping_json_has_no_annotators() {
        assert!(user_annotations_from_json(&serde_json::json!([1, 2])).is_empty());
    }

    #[test]
    fn stats_tolerate_hand_built_rows() {
        // Flagged but carrying no labels: counts as a disagreement, never as agreed.
        let rows = vec![ConsensusRow {
            block_id: "b1".to_string(),
            user_labels: BTreeMap::new(),
            consensus: None,
            disagreement: true,
        }];
        let stats = ConsensusStats::from_rows(&rows, 0);
        assert_eq!(stats.annotated_blocks, 0);
        assert_eq!(stats.disagreements, 1);
        assert_eq!(stats.agreed_blocks, 0);
        assert_eq!(stats.consensus_rate, None);
    }

    #[test]
    fn stats_without_annotations_have_no_rate() {
        let rows = build_consensus_table(&UserAnnotations::new(), &ids(&["b1"]));
        assert_eq!(ConsensusStats::from_rows(&rows, 0).consensus_rate, None);
    }
}

//! CSV export of the reviewed dataset.
//!
//! Column order and names are consumed by downstream dataset tooling and must
//! not change:
//!
//! `block_id, consensus_label, final_label, has_disagreement,
//! user_<name>_label..., exported_at`

use std::collections::BTreeSet;
use std::path::Path;

use indexmap::IndexMap;
use tracing::info;

use crate::errors::AnnotatorResult;
use crate::models::{now_iso, ConsensusRow, FinalLabelRecord, Label};
use crate::store::atomic::write_bytes_atomic;

const LINE_END: &str = "\r\n";

/// Write `rows` to `destination` as CSV.
///
/// `final_labels` is keyed by the same `block_id`s as `rows`. One column is
/// emitted per distinct username, sorted.
pub fn export_csv(
    rows: &[ConsensusRow],
    final_labels: &IndexMap<String, FinalLabelRecord>,
    destination: &Path,
    usernames: &[String],
) -> AnnotatorResult<()> {
    let body = build_csv(rows, final_labels, usernames, &now_iso());
    write_bytes_atomic(destination, body.as_bytes())?;
    info!("Exported {} rows to {}", rows.len(), destination.display());
    Ok(())
}

/// Render the CSV text with a fixed `exported_at` value.
pub fn build_csv(
    rows: &[ConsensusRow],
    final_labels: &IndexMap<String, FinalLabelRecord>,
    usernames: &[String],
    exported_at: &str,
) -> String {
    let users: BTreeSet<&str> = usernames.iter().map(String::as_str).collect();
    let mut out = String::new();

    let mut header: Vec<String> = ["block_id", "consensus_label", "final_label", "has_disagreement"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    header.extend(users.iter().map(|u| csv_escape(&format!("user_{u}_label"))));
    header.push("exported_at".to_string());
    push_line(&mut out, &header);

    for row in rows {
        let final_label = final_labels.get(&row.block_id).map(|r| r.final_label);
        let mut fields = vec![
            csv_escape(&row.block_id),
            label_cell(row.consensus),
            label_cell(final_label),
            if row.disagreement { "True" } else { "False" }.to_string(),
        ];
        fields.extend(users.iter().map(|u| label_cell(row.user_labels.get(*u).copied())));
        fields.push(csv_escape(exported_at));
        push_line(&mut out, &fields);
    }
    out
}

fn push_line(out: &mut String, fields: &[String]) {
    out.push_str(&fields.join(","));
    out.push_str(LINE_END);
}

fn label_cell(label: Option<Label>) -> String {
    label.map(|l| l.to_string()).unwrap_or_default()
}

/// Quote a field if it contains a delimiter, quote or line break.
fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

//! Rendering of poll status snapshots for operators.

use std::fmt::Write as _;

use lcap_poller::{PollStatusRow, StatusSnapshot};
use lcap_utils::format_duration;

use crate::NodeError;

pub fn to_json(snapshot: &StatusSnapshot) -> Result<String, NodeError> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

/// Plain-text table of active and recent polls.
pub fn render_text(snapshot: &StatusSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "node {} at {}: {} active, {} recent, {} secrets",
        snapshot.local,
        snapshot.taken_at,
        snapshot.active.len(),
        snapshot.recent.len(),
        snapshot.secrets
    );
    if !snapshot.active.is_empty() {
        let _ = writeln!(out, "active:");
        for row in &snapshot.active {
            let left = format_duration(row.deadline.remaining_from(snapshot.taken_at));
            let _ = writeln!(out, "  {}  ({left} left)", line(row));
        }
    }
    if !snapshot.recent.is_empty() {
        let _ = writeln!(out, "recent:");
        for row in &snapshot.recent {
            let _ = writeln!(out, "  {}", line(row));
        }
    }
    let stats: Vec<String> = snapshot
        .stats
        .iter()
        .filter(|(_, v)| **v > 0)
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    if !stats.is_empty() {
        let _ = writeln!(out, "stats: {}", stats.join(" "));
    }
    out
}

fn line(row: &PollStatusRow) -> String {
    let mine = if row.is_my_poll { "*" } else { " " };
    let range = row.range.as_deref().unwrap_or("");
    format!(
        "{mine}{:<8} {} {}{range} [{}] {} agree={} disagree={}",
        row.kind.as_str(),
        row.au_id,
        row.url,
        row.status,
        row.result.as_str(),
        row.agree,
        row.disagree
    )
}

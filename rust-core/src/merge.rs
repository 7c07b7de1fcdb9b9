// Merger: combines per-node row sequences into one canonically ordered trace.
// Orders and assembles only; protocol invariants are the checker's job.

use crate::commit::canonical_row;
use crate::config::RunConfig;
use crate::error::TraceError;
use crate::trace::{MergedTrace, TraceHeader, TraceRow};
use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// One simulated node's trace, tagged with where it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeTrace {
    pub source: String,
    pub rows: Vec<TraceRow>,
}

impl NodeTrace {
    pub fn new(source: impl Into<String>, rows: Vec<TraceRow>) -> Self {
        NodeTrace {
            source: source.into(),
            rows,
        }
    }

    /// Reads a per-node dump (a bare JSON array of rows). The file name
    /// becomes the source identifier.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TraceError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| TraceError::io(path, e))?;
        let rows: Vec<TraceRow> = serde_json::from_slice(&data)?;
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(NodeTrace { source, rows })
    }
}

/// Total order over rows: the `(timestamp, node_id, row_index)` key, then the
/// canonical encoding so colliding keys still sort identically for any input order.
fn compare_rows(a: &TraceRow, b: &TraceRow) -> Ordering {
    a.order_key()
        .cmp(&b.order_key())
        .then_with(|| canonical_row(a).cmp(&canonical_row(b)))
}

/// Merge per-node traces into one `MergedTrace`.
///
/// Header fields other than `final_merkle_root` and `sources` come verbatim
/// from `run`. `sources` is sorted so the header does not depend on input order.
pub fn merge(inputs: Vec<NodeTrace>, run: &RunConfig) -> Result<MergedTrace, TraceError> {
    let total: usize = inputs.iter().map(|n| n.rows.len()).sum();
    if total == 0 {
        return Err(TraceError::EmptyInput);
    }

    let mut sources = Vec::with_capacity(inputs.len());
    let mut rows = Vec::with_capacity(total);
    for input in inputs {
        if input.rows.windows(2).any(|w| w[0].row_index > w[1].row_index) {
            warn!(source = %input.source, "per-node rows not ordered by row_index");
        }
        debug!(source = %input.source, rows = input.rows.len(), "merging node trace");
        sources.push(input.source);
        rows.extend(input.rows);
    }
    sources.sort();

    rows.sort_by(compare_rows);

    let collisions = rows
        .windows(2)
        .filter(|w| w[0].order_key() == w[1].order_key())
        .count();
    if collisions > 0 {
        warn!(collisions, "rows share a (timestamp, node_id, row_index) key");
    }

    let final_merkle_root = rows.iter().rev().find_map(|r| r.merkle_root);
    let header = TraceHeader::new(run, final_merkle_root, sources);
    debug!(rows = rows.len(), final_root = ?final_merkle_root, "merge complete");

    Ok(MergedTrace::assemble(header, rows))
}

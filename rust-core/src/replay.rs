// Per-node ledger replay. Rebuilds each node's linkage ledger from its own rows
// and compares what the node recorded (parent flags, snapshot roots) with what
// the ledger derives. Independent of, and stricter than, the invariant checker.

use crate::error::TraceError;
use crate::event::Event;
use crate::ledger::{Ledger, LinkError};
use crate::trace::{Digest, MergedTrace, TraceRow};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReplayKind {
    Undecodable,
    ParentFlagMismatch,
    DuplicateEvent,
    UnknownParent,
    SnapshotMismatch,
}

impl fmt::Display for ReplayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReplayKind::Undecodable => "Undecodable",
            ReplayKind::ParentFlagMismatch => "ParentFlagMismatch",
            ReplayKind::DuplicateEvent => "DuplicateEvent",
            ReplayKind::UnknownParent => "UnknownParent",
            ReplayKind::SnapshotMismatch => "SnapshotMismatch",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayFinding {
    pub node_id: u32,
    pub row_index: u64,
    pub kind: ReplayKind,
    pub detail: String,
}

impl fmt::Display for ReplayFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[node {} row {}] {}: {}",
            self.node_id, self.row_index, self.kind, self.detail
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayReport {
    pub nodes: usize,
    pub rows: usize,
    pub findings: Vec<ReplayFinding>,
}

impl ReplayReport {
    pub fn is_ok(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn count(&self, kind: ReplayKind) -> usize {
        self.findings.iter().filter(|f| f.kind == kind).count()
    }
}

fn replay_node(version: u32, node_id: u32, rows: &[&TraceRow], out: &mut Vec<ReplayFinding>) {
    let mut ledger = Ledger::new();
    let mut finding = |r: &TraceRow, kind: ReplayKind, detail: String| {
        out.push(ReplayFinding {
            node_id,
            row_index: r.row_index,
            kind,
            detail,
        })
    };

    for &r in rows {
        let event = match Event::from_row(version, r) {
            Ok(ev) => ev,
            Err(field) => {
                finding(r, ReplayKind::Undecodable, format!("{} does not fit the event layout", field.name()));
                continue;
            }
        };

        // Genesis rows are exempt: the simulator reports the sentinel as present.
        if r.has_parent() {
            let known = ledger.contains(&event.prev_hash);
            if known != r.parent_present {
                finding(
                    r,
                    ReplayKind::ParentFlagMismatch,
                    format!("parent_present={} but parent known={}", r.parent_present, known),
                );
            }
        }

        match ledger.try_link(&event) {
            Ok(_) => {}
            Err(LinkError::Duplicate) => {
                finding(r, ReplayKind::DuplicateEvent, "event already seen by this node".into());
                continue;
            }
            Err(LinkError::MissingParent) => {
                finding(
                    r,
                    ReplayKind::UnknownParent,
                    format!("prev_hash {} not linked on this node", r.prev_hash),
                );
                continue;
            }
        }

        if let Some(recorded) = r.merkle_root {
            let derived = ledger.merkle_root().map(Digest::from_bytes);
            if derived != Some(recorded) {
                let derived = derived.map(|d| d.to_hex()).unwrap_or_else(|| "none".into());
                finding(
                    r,
                    ReplayKind::SnapshotMismatch,
                    format!("recorded {} derived {}", recorded, derived),
                );
            }
        }
    }
}

/// Replays every node's rows (grouped by `node_id`, in `row_index` order)
/// into its own ledger. Collects all findings.
pub fn replay_trace(trace: &MergedTrace) -> Result<ReplayReport, TraceError> {
    if trace.is_empty() {
        return Err(TraceError::EmptyTrace);
    }

    let mut by_node: BTreeMap<u32, Vec<&TraceRow>> = BTreeMap::new();
    for r in trace.rows() {
        by_node.entry(r.node_id).or_default().push(r);
    }

    let version = trace.header().protocol_version;
    let mut findings = Vec::new();
    for (node_id, rows) in by_node.iter_mut() {
        rows.sort_by_key(|r| r.row_index);
        debug!(node_id, rows = rows.len(), "replaying node ledger");
        replay_node(version, *node_id, rows, &mut findings);
    }

    info!(nodes = by_node.len(), findings = findings.len(), "replay done");
    Ok(ReplayReport {
        nodes: by_node.len(),
        rows: trace.len(),
        findings,
    })
}

// Invariant checker: re-verifies the quarantine and chaining rules a merged
// trace must satisfy. Collects every violation; never stops at the first one.

use crate::config::SybilParams;
use crate::error::TraceError;
use crate::trace::{Digest, MergedTrace, TraceRow};
use std::fmt;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    MissingParentFlag,
    QuarantineTooShort,
    WeightOutOfBounds,
    NonzeroWeightWhileQuarantined,
    FinalRootMismatch,
}

impl ViolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::MissingParentFlag => "MissingParentFlag",
            ViolationKind::QuarantineTooShort => "QuarantineTooShort",
            ViolationKind::WeightOutOfBounds => "WeightOutOfBounds",
            ViolationKind::NonzeroWeightWhileQuarantined => "NonzeroWeightWhileQuarantined",
            ViolationKind::FinalRootMismatch => "FinalRootMismatch",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// Position in merge order; `None` for trace-wide checks.
    pub row: Option<usize>,
    pub kind: ViolationKind,
    pub detail: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.row {
            Some(idx) => write!(f, "[row {}] {}: {}", idx, self.kind, self.detail),
            None => write!(f, "[root] {}: {}", self.kind, self.detail),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckReport {
    pub rows: usize,
    /// Last snapshot digest seen in merge order.
    pub final_root: Option<Digest>,
    pub violations: Vec<Violation>,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violation_count(&self) -> usize {
        self.violations.len()
    }

    pub fn count(&self, kind: ViolationKind) -> usize {
        self.violations.iter().filter(|v| v.kind == kind).count()
    }

    /// `OK: <rows> rows, final_root=<root or none>`, or the failure tally.
    pub fn summary(&self) -> String {
        if self.is_ok() {
            let root = self
                .final_root
                .map(|r| r.to_hex())
                .unwrap_or_else(|| "none".to_string());
            format!("OK: {} rows, final_root={}", self.rows, root)
        } else {
            format!("Found {} invariant violations", self.violations.len())
        }
    }
}

fn check_row(params: &SybilParams, idx: usize, r: &TraceRow, out: &mut Vec<Violation>) {
    if r.has_parent() && !r.parent_present {
        out.push(Violation {
            row: Some(idx),
            kind: ViolationKind::MissingParentFlag,
            detail: format!("prev_hash {} is non-zero but parent_present=false", r.prev_hash),
        });
    }

    // Compared as a span so `before + q_ticks` never has to fit in a u64.
    if !r.ancestor_check {
        let too_short = r
            .quarantined_until_after
            .checked_sub(r.quarantined_until_before)
            .is_none_or(|span| span < params.quarantine_ticks);
        if too_short {
            out.push(Violation {
                row: Some(idx),
                kind: ViolationKind::QuarantineTooShort,
                detail: format!(
                    "before={} after={} q_ticks={} (need after >= before + q_ticks)",
                    r.quarantined_until_before, r.quarantined_until_after, params.quarantine_ticks
                ),
            });
        }
    }

    let in_bounds = u64::try_from(r.author_weight_fp)
        .map(|w| w <= params.fixed_point_scale)
        .unwrap_or(false);
    if !in_bounds {
        out.push(Violation {
            row: Some(idx),
            kind: ViolationKind::WeightOutOfBounds,
            detail: format!(
                "author_weight_fp={} outside [0, {}]",
                r.author_weight_fp, params.fixed_point_scale
            ),
        });
    }

    // Only the upper edge of the window is enforced.
    if r.in_quarantine() && r.author_weight_fp != 0 {
        out.push(Violation {
            row: Some(idx),
            kind: ViolationKind::NonzeroWeightWhileQuarantined,
            detail: format!(
                "ts={} q_after={} author_weight_fp={}",
                r.timestamp, r.quarantined_until_after, r.author_weight_fp
            ),
        });
    }
}

/// Checks every row of `trace` against the header's sybil parameters, then
/// the header's final root against the last recorded snapshot.
pub fn check_trace(trace: &MergedTrace) -> Result<CheckReport, TraceError> {
    if trace.is_empty() {
        return Err(TraceError::EmptyTrace);
    }

    let params = &trace.header().sybil_config;
    let mut violations = Vec::new();
    let mut last_root: Option<Digest> = None;

    for (idx, r) in trace.rows().iter().enumerate() {
        check_row(params, idx, r, &mut violations);
        if let Some(root) = r.merkle_root {
            last_root = Some(root);
        }
    }

    if let Some(m) = trace.root_mismatch() {
        violations.push(Violation {
            row: None,
            kind: ViolationKind::FinalRootMismatch,
            detail: format!(
                "header final_merkle_root {} != last row root {}",
                m.header, m.last_row
            ),
        });
    }

    debug!(rows = trace.len(), violations = violations.len(), "check pass done");
    if violations.is_empty() {
        info!(rows = trace.len(), "trace invariants hold");
    }

    Ok(CheckReport {
        rows: trace.len(),
        final_root: last_root,
        violations,
    })
}

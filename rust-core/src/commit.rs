// Committer: deterministic SHA-256 over the canonical header and rows.
// Placeholder preimage digest for external proof systems, not a succinct proof.

use crate::error::TraceError;
use crate::trace::{MergedTrace, TraceHeader, TraceRow};
use serde_json::Value;
use sha2::{Digest as _, Sha256};
use std::fmt;
use tracing::debug;

/// Separates row fields in the canonical encoding. Occurrences inside opaque
/// string fields are backslash-escaped.
pub const FIELD_DELIMITER: char = '|';

/// Ends every row block fed to the hasher, so adjacent rows cannot run
/// together. Escaped inside string fields like the delimiter.
pub const ROW_TERMINATOR: char = '\n';

const ESCAPE: char = '\\';

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Commitment([u8; 32]);

impl Commitment {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// `trace_commitment_sha256=<64 hex chars>`
    pub fn line(&self) -> String {
        format!("trace_commitment_sha256={}", self.to_hex())
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commitment({})", self.to_hex())
    }
}

/// Header as compact JSON with object keys sorted at every level. Key order
/// is produced here rather than relying on the map type's iteration order.
pub fn canonical_header(header: &TraceHeader) -> Result<String, TraceError> {
    let value = serde_json::to_value(header)?;
    let mut out = String::new();
    write_sorted_json(&value, &mut out)?;
    Ok(out)
}

fn write_sorted_json(value: &Value, out: &mut String) -> Result<(), TraceError> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_sorted_json(&map[key.as_str()], out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_sorted_json(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

fn push_escaped(out: &mut String, field: &str) {
    for c in field.chars() {
        if c == FIELD_DELIMITER || c == ROW_TERMINATOR || c == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}

fn flag(b: bool) -> &'static str {
    if b { "1" } else { "0" }
}

/// Fixed field list, delimiter-joined:
/// node_id, row_index, prev_hash, author, timestamp, payload_hash, signature,
/// parent_present, ancestor_check, quarantined_until_before,
/// quarantined_until_after, merkle_root, merkle_root_has, preferred_tip,
/// preferred_tip_has, author_weight_fp.
pub fn canonical_row(r: &TraceRow) -> String {
    let merkle_root = r.merkle_root.map(|d| d.to_hex()).unwrap_or_default();
    let preferred_tip = r.preferred_tip.as_deref().unwrap_or("");

    let mut out = String::with_capacity(64 * 4 + 128 + 96);
    let sep = |out: &mut String| out.push(FIELD_DELIMITER);

    out.push_str(&r.node_id.to_string());
    sep(&mut out);
    out.push_str(&r.row_index.to_string());
    sep(&mut out);
    out.push_str(&r.prev_hash.to_hex());
    sep(&mut out);
    push_escaped(&mut out, &r.author);
    sep(&mut out);
    out.push_str(&r.timestamp.to_string());
    sep(&mut out);
    push_escaped(&mut out, &r.payload_hash);
    sep(&mut out);
    push_escaped(&mut out, &r.signature);
    sep(&mut out);
    out.push_str(flag(r.parent_present));
    sep(&mut out);
    out.push_str(flag(r.ancestor_check));
    sep(&mut out);
    out.push_str(&r.quarantined_until_before.to_string());
    sep(&mut out);
    out.push_str(&r.quarantined_until_after.to_string());
    sep(&mut out);
    out.push_str(&merkle_root);
    sep(&mut out);
    out.push_str(flag(r.merkle_root.is_some()));
    sep(&mut out);
    push_escaped(&mut out, preferred_tip);
    sep(&mut out);
    out.push_str(flag(r.preferred_tip.is_some()));
    sep(&mut out);
    out.push_str(&r.author_weight_fp.to_string());
    out
}

/// Streaming hash state: header block first, then one terminated block per
/// row in order.
pub struct Committer {
    hasher: Sha256,
    rows: usize,
}

impl Committer {
    pub fn new(header: &TraceHeader) -> Result<Self, TraceError> {
        let mut hasher = Sha256::new();
        hasher.update(canonical_header(header)?.as_bytes());
        Ok(Committer { hasher, rows: 0 })
    }

    pub fn absorb(&mut self, row: &TraceRow) {
        let mut block = canonical_row(row);
        block.push(ROW_TERMINATOR);
        self.hasher.update(block.as_bytes());
        self.rows += 1;
    }

    pub fn finish(self) -> Commitment {
        debug!(rows = self.rows, "commitment finalized");
        Commitment(self.hasher.finalize().into())
    }
}

/// Commit to a merged trace. Refuses to digest a trace whose header root
/// contradicts its last snapshot.
pub fn commit_trace(trace: &MergedTrace) -> Result<Commitment, TraceError> {
    if trace.is_empty() {
        return Err(TraceError::EmptyTrace);
    }
    if let Some(mismatch) = trace.root_mismatch() {
        return Err(mismatch.into());
    }

    let mut committer = Committer::new(trace.header())?;
    for row in trace.rows() {
        committer.absorb(row);
    }
    Ok(committer.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::trace::Digest;

    fn row() -> TraceRow {
        TraceRow {
            node_id: 3,
            row_index: 1,
            timestamp: 42,
            prev_hash: Digest::ZERO,
            parent_present: false,
            author: "aa".repeat(32),
            payload_hash: "bb".repeat(32),
            signature: "cc".repeat(64),
            ancestor_check: true,
            quarantined_until_before: 0,
            quarantined_until_after: 5,
            author_weight_fp: 0,
            merkle_root: None,
            preferred_tip: Some("tip".to_string()),
        }
    }

    fn trace_of(root: Option<Digest>, rows: Vec<TraceRow>) -> MergedTrace {
        let header = TraceHeader::new(&RunConfig::default(), root, vec!["n0.json".into()]);
        MergedTrace::from_parts(header, rows).unwrap()
    }

    #[test]
    fn header_keys_are_sorted_and_nulls_kept() {
        let header = TraceHeader::new(&RunConfig::default(), None, vec!["a".into()]);
        assert_eq!(
            canonical_header(&header).unwrap(),
            concat!(
                r#"{"final_merkle_root":null,"max_backward_skew":1000000,"#,
                r#""max_drain_steps":16384,"max_pending_total":16384,"protocol_version":1,"#,
                r#""sources":["a"],"sybil_config":{"fixed_point_scale":1000,"#,
                r#""max_link_walk":4096,"quarantine_ticks":12,"warmup_ticks":4}}"#
            )
        );
    }

    #[test]
    fn row_encoding_field_order() {
        let line = canonical_row(&row());
        let expected = format!(
            "3|1|{}|{}|42|{}|{}|0|1|0|5||0|tip|1|0",
            "00".repeat(32),
            "aa".repeat(32),
            "bb".repeat(32),
            "cc".repeat(64)
        );
        assert_eq!(line, expected);
    }

    #[test]
    fn delimiter_inside_opaque_field_is_escaped() {
        let mut a = row();
        a.author = "x|y".into();
        a.payload_hash = "z".into();
        let mut b = row();
        b.author = "x".into();
        b.payload_hash = "y|z".into();
        assert!(canonical_row(&a).contains(r"x\|y"));
        assert_ne!(canonical_row(&a), canonical_row(&b));
    }

    #[test]
    fn weight_and_next_node_id_do_not_run_together() {
        let pair = |w0: i64, next_node: u32| {
            let mut a = row();
            a.node_id = 0;
            a.row_index = 0;
            a.author_weight_fp = w0;
            let mut b = row();
            b.node_id = next_node;
            b.row_index = 0;
            trace_of(None, vec![a, b])
        };
        // Without a row terminator both encode to "...|153|0|...".
        let first = commit_trace(&pair(1, 53)).unwrap();
        let second = commit_trace(&pair(15, 3)).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn newline_inside_opaque_field_is_escaped() {
        let mut r = row();
        r.signature = "a\nb".into();
        assert!(canonical_row(&r).contains("a\\\nb"));
    }

    #[test]
    fn commitment_line_shape() {
        let c = commit_trace(&trace_of(None, vec![row()])).unwrap();
        let line = c.line();
        let hex = line.strip_prefix("trace_commitment_sha256=").unwrap();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|ch| ch.is_ascii_hexdigit() && !ch.is_ascii_uppercase()));
    }

    #[test]
    fn root_mismatch_blocks_commitment() {
        let mut r = row();
        r.merkle_root = Some(Digest::from_bytes([0xaa; 32]));
        let err = commit_trace(&trace_of(Some(Digest::from_bytes([0xbb; 32])), vec![r])).unwrap_err();
        assert!(matches!(err, TraceError::RootInconsistent { .. }));
    }

    #[test]
    fn empty_trace_is_not_committed() {
        let err = commit_trace(&trace_of(None, vec![])).unwrap_err();
        assert!(matches!(err, TraceError::EmptyTrace));
    }

    #[test]
    fn header_change_moves_digest() {
        let a = commit_trace(&trace_of(None, vec![row()])).unwrap();
        let (mut header, rows) = trace_of(None, vec![row()]).into_parts();
        header.sources.push("n1.json".into());
        let b = commit_trace(&MergedTrace::from_parts(header, rows).unwrap()).unwrap();
        assert_ne!(a, b);
    }
}

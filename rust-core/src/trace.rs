// Trace data model shared by the merger, checker, committer and replay.
// Wire layout follows the merged_trace.json contract; in memory, snapshot and
// tip fields are plain Options so a flag can never disagree with its value.

use crate::config::{RunConfig, SybilParams};
use crate::error::TraceError;
use crate::event::{Hash, ZERO_HASH};
use hex::FromHex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// 32-byte digest, hex on the wire (either case accepted, lowercase emitted).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(Hash);

impl Digest {
    /// "No parent" sentinel for `prev_hash`.
    pub const ZERO: Digest = Digest(ZERO_HASH);

    pub const fn from_bytes(bytes: Hash) -> Self {
        Digest(bytes)
    }

    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == ZERO_HASH
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Digest {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <[u8; 32]>::from_hex(s)
            .map(Digest)
            .map_err(|source| TraceError::InvalidDigest {
                value: s.to_string(),
                source,
            })
    }
}

impl TryFrom<String> for Digest {
    type Error = TraceError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.to_hex()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// One gossip event as observed (and recorded) by a simulated node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RowWire", into = "RowWire")]
pub struct TraceRow {
    pub node_id: u32,
    /// Local sequence number within `node_id`'s own trace.
    pub row_index: u64,
    pub timestamp: u64,
    pub prev_hash: Digest,
    pub parent_present: bool,
    pub author: String,
    pub payload_hash: String,
    pub signature: String,
    /// False when the producer's bounded ancestor walk found the author's
    /// chain inconsistent (equivocation / forged ancestry).
    pub ancestor_check: bool,
    pub quarantined_until_before: u64,
    pub quarantined_until_after: u64,
    /// Trust weight scaled by `fixed_point_scale`. Signed so that a negative
    /// weight survives parsing and is reported as a violation.
    pub author_weight_fp: i64,
    pub merkle_root: Option<Digest>,
    pub preferred_tip: Option<String>,
}

impl TraceRow {
    /// Canonical cross-node ordering key.
    pub fn order_key(&self) -> (u64, u32, u64) {
        (self.timestamp, self.node_id, self.row_index)
    }

    pub fn has_parent(&self) -> bool {
        !self.prev_hash.is_zero()
    }

    /// Whether the author is still inside its quarantine window at this event.
    pub fn in_quarantine(&self) -> bool {
        self.timestamp < self.quarantined_until_after
    }
}

#[derive(Serialize, Deserialize)]
struct RowWire {
    node_id: u32,
    row_index: u64,
    timestamp: u64,
    prev_hash: Digest,
    parent_present: bool,
    author: String,
    payload_hash: String,
    signature: String,
    ancestor_check: bool,
    quarantined_until_before: u64,
    quarantined_until_after: u64,
    author_weight_fp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    merkle_root: Option<String>,
    #[serde(default)]
    merkle_root_has: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    preferred_tip: Option<String>,
    #[serde(default)]
    preferred_tip_has: Option<bool>,
}

// Simulator dumps write `null` and no flag; merged documents carry the flag.
// Either is accepted as long as the two agree.
fn resolve_optional(
    value: Option<String>,
    has: Option<bool>,
    node_id: u32,
    row_index: u64,
    field: &'static str,
) -> Result<Option<String>, TraceError> {
    match (value.filter(|v| !v.is_empty()), has) {
        (Some(v), None | Some(true)) => Ok(Some(v)),
        (None, None | Some(false)) => Ok(None),
        _ => Err(TraceError::InconsistentOptional {
            node_id,
            row_index,
            field,
        }),
    }
}

impl TryFrom<RowWire> for TraceRow {
    type Error = TraceError;

    fn try_from(w: RowWire) -> Result<Self, Self::Error> {
        let merkle_root = resolve_optional(
            w.merkle_root,
            w.merkle_root_has,
            w.node_id,
            w.row_index,
            "merkle_root",
        )?
        .map(|s| s.parse::<Digest>())
        .transpose()?;
        let preferred_tip = resolve_optional(
            w.preferred_tip,
            w.preferred_tip_has,
            w.node_id,
            w.row_index,
            "preferred_tip",
        )?;

        Ok(TraceRow {
            node_id: w.node_id,
            row_index: w.row_index,
            timestamp: w.timestamp,
            prev_hash: w.prev_hash,
            parent_present: w.parent_present,
            author: w.author,
            payload_hash: w.payload_hash,
            signature: w.signature,
            ancestor_check: w.ancestor_check,
            quarantined_until_before: w.quarantined_until_before,
            quarantined_until_after: w.quarantined_until_after,
            author_weight_fp: w.author_weight_fp,
            merkle_root,
            preferred_tip,
        })
    }
}

impl From<TraceRow> for RowWire {
    fn from(r: TraceRow) -> Self {
        RowWire {
            node_id: r.node_id,
            row_index: r.row_index,
            timestamp: r.timestamp,
            prev_hash: r.prev_hash,
            parent_present: r.parent_present,
            author: r.author,
            payload_hash: r.payload_hash,
            signature: r.signature,
            ancestor_check: r.ancestor_check,
            quarantined_until_before: r.quarantined_until_before,
            quarantined_until_after: r.quarantined_until_after,
            author_weight_fp: r.author_weight_fp,
            merkle_root_has: Some(r.merkle_root.is_some()),
            merkle_root: r.merkle_root.map(String::from),
            preferred_tip_has: Some(r.preferred_tip.is_some()),
            preferred_tip: r.preferred_tip,
        }
    }
}

/// Run-level provenance written once at merge time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceHeader {
    pub protocol_version: u32,
    pub max_backward_skew: u64,
    pub max_pending_total: u64,
    pub max_drain_steps: u64,
    pub sybil_config: SybilParams,
    #[serde(default, deserialize_with = "empty_digest_as_none")]
    pub final_merkle_root: Option<Digest>,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl TraceHeader {
    pub fn new(run: &RunConfig, final_merkle_root: Option<Digest>, sources: Vec<String>) -> Self {
        TraceHeader {
            protocol_version: run.protocol_version,
            max_backward_skew: run.max_backward_skew,
            max_pending_total: run.max_pending_total,
            max_drain_steps: run.max_drain_steps,
            sybil_config: run.sybil_config.clone(),
            final_merkle_root,
            sources,
        }
    }
}

// Same rule as row snapshots: `null`, missing and "" all mean absent.
fn empty_digest_as_none<'de, D>(deserializer: D) -> Result<Option<Digest>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Digest>().map_err(serde::de::Error::custom))
        .transpose()
}

/// The header claims one final root while the rows' last snapshot says another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RootMismatch {
    pub header: Digest,
    pub last_row: Digest,
}

impl From<RootMismatch> for TraceError {
    fn from(m: RootMismatch) -> Self {
        TraceError::RootInconsistent {
            header: m.header.to_hex(),
            last_row: m.last_row.to_hex(),
        }
    }
}

/// Header plus rows in canonical order. Immutable after construction; the
/// checker, committer and replay only ever borrow it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TraceDoc")]
pub struct MergedTrace {
    header: TraceHeader,
    rows: Vec<TraceRow>,
}

#[derive(Deserialize)]
struct TraceDoc {
    header: TraceHeader,
    rows: Vec<TraceRow>,
}

impl TryFrom<TraceDoc> for MergedTrace {
    type Error = TraceError;

    fn try_from(doc: TraceDoc) -> Result<Self, Self::Error> {
        MergedTrace::from_parts(doc.header, doc.rows)
    }
}

impl MergedTrace {
    /// Rows must already be in canonical order (the merger guarantees it).
    pub(crate) fn assemble(header: TraceHeader, rows: Vec<TraceRow>) -> Self {
        debug_assert!(ensure_sorted(&rows).is_ok());
        MergedTrace { header, rows }
    }

    /// Builds a trace from parts produced elsewhere, rejecting rows that are
    /// not in `(timestamp, node_id, row_index)` order.
    pub fn from_parts(header: TraceHeader, rows: Vec<TraceRow>) -> Result<Self, TraceError> {
        ensure_sorted(&rows)?;
        Ok(MergedTrace { header, rows })
    }

    pub fn into_parts(self) -> (TraceHeader, Vec<TraceRow>) {
        (self.header, self.rows)
    }

    pub fn header(&self) -> &TraceHeader {
        &self.header
    }

    pub fn rows(&self) -> &[TraceRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Most recent snapshot digest in merge order, if any row carried one.
    pub fn last_snapshot(&self) -> Option<Digest> {
        self.rows.iter().rev().find_map(|r| r.merkle_root)
    }

    /// Only meaningful when both sides are present; an absent header root or
    /// a trace without snapshots is never a mismatch.
    pub fn root_mismatch(&self) -> Option<RootMismatch> {
        match (self.header.final_merkle_root, self.last_snapshot()) {
            (Some(header), Some(last_row)) if header != last_row => {
                Some(RootMismatch { header, last_row })
            }
            _ => None,
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, TraceError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Compact JSON in the fixed field order of the wire contract.
    pub fn to_json(&self) -> Result<Vec<u8>, TraceError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TraceError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| TraceError::io(path, e))?;
        Self::from_json(&data)
    }

    /// Write-then-rename so a reader never observes a partial document.
    pub fn store<P: AsRef<Path>>(&self, path: P) -> Result<(), TraceError> {
        let path = path.as_ref();
        let data = self.to_json()?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, data).map_err(|e| TraceError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, path).map_err(|e| TraceError::io(path, e))?;
        Ok(())
    }
}

fn ensure_sorted(rows: &[TraceRow]) -> Result<(), TraceError> {
    match rows
        .windows(2)
        .position(|w| w[0].order_key() > w[1].order_key())
    {
        Some(i) => Err(TraceError::UnsortedRows { index: i + 1 }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire_row() -> serde_json::Value {
        json!({
            "node_id": 2, "row_index": 0, "timestamp": 7,
            "prev_hash": "00".repeat(32), "parent_present": false,
            "author": "ab".repeat(32), "payload_hash": "cd".repeat(32),
            "signature": "ef".repeat(64), "ancestor_check": true,
            "quarantined_until_before": 0, "quarantined_until_after": 0,
            "author_weight_fp": 250
        })
    }

    #[test]
    fn simulator_nulls_without_flags_are_absent() {
        let mut v = wire_row();
        v["merkle_root"] = serde_json::Value::Null;
        v["preferred_tip"] = serde_json::Value::Null;
        let row: TraceRow = serde_json::from_value(v).unwrap();
        assert_eq!(row.merkle_root, None);
        assert_eq!(row.preferred_tip, None);
    }

    #[test]
    fn value_without_flag_is_present() {
        let mut v = wire_row();
        v["merkle_root"] = json!("AA".repeat(32));
        let row: TraceRow = serde_json::from_value(v).unwrap();
        assert_eq!(row.merkle_root, Some(Digest::from_bytes([0xaa; 32])));
    }

    #[test]
    fn contradicting_flag_is_rejected() {
        let mut v = wire_row();
        v["merkle_root_has"] = json!(true);
        let err = serde_json::from_value::<TraceRow>(v).unwrap_err();
        assert!(err.to_string().contains("merkle_root_has"), "{err}");

        let mut v = wire_row();
        v["preferred_tip"] = json!("tip");
        v["preferred_tip_has"] = json!(false);
        assert!(serde_json::from_value::<TraceRow>(v).is_err());
    }

    #[test]
    fn written_rows_carry_flags_and_omit_absent_values() {
        let mut v = wire_row();
        v["preferred_tip"] = json!("tip-1");
        let row: TraceRow = serde_json::from_value(v).unwrap();
        let out = serde_json::to_value(&row).unwrap();
        assert_eq!(out["merkle_root_has"], json!(false));
        assert!(out.get("merkle_root").is_none());
        assert_eq!(out["preferred_tip_has"], json!(true));
        assert_eq!(out["preferred_tip"], json!("tip-1"));
    }

    #[test]
    fn short_prev_hash_is_structural() {
        let mut v = wire_row();
        v["prev_hash"] = json!("00");
        assert!(serde_json::from_value::<TraceRow>(v).is_err());
    }

    #[test]
    fn unsorted_document_is_rejected() {
        let early: TraceRow = serde_json::from_value(wire_row()).unwrap();
        let mut late = early.clone();
        late.timestamp = 9;
        let header = TraceHeader::new(&RunConfig::default(), None, vec![]);
        let err = MergedTrace::from_parts(header, vec![late, early]).unwrap_err();
        assert!(matches!(err, TraceError::UnsortedRows { index: 1 }));
    }

    #[test]
    fn header_accepts_wide_version_and_blank_root() {
        let mut v = serde_json::to_value(TraceHeader::new(&RunConfig::default(), None, vec![])).unwrap();
        v["protocol_version"] = json!(300);
        v["final_merkle_root"] = json!("");
        let header: TraceHeader = serde_json::from_value(v.clone()).unwrap();
        assert_eq!(header.protocol_version, 300);
        assert_eq!(header.final_merkle_root, None);

        v["final_merkle_root"] = json!("zz");
        assert!(serde_json::from_value::<TraceHeader>(v).is_err());
    }

    #[test]
    fn root_mismatch_needs_both_sides() {
        let mut row: TraceRow = serde_json::from_value(wire_row()).unwrap();
        let header = TraceHeader::new(
            &RunConfig::default(),
            Some(Digest::from_bytes([1; 32])),
            vec![],
        );
        let t = MergedTrace::from_parts(header.clone(), vec![row.clone()]).unwrap();
        assert_eq!(t.root_mismatch(), None);

        row.merkle_root = Some(Digest::from_bytes([2; 32]));
        let t = MergedTrace::from_parts(header, vec![row]).unwrap();
        assert_eq!(
            t.root_mismatch(),
            Some(RootMismatch {
                header: Digest::from_bytes([1; 32]),
                last_row: Digest::from_bytes([2; 32]),
            })
        );
    }
}

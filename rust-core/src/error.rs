// Structural and precondition failures. Invariant violations are not errors;
// they travel as values inside a CheckReport.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("nothing to merge: no per-node rows supplied")]
    EmptyInput,

    #[error("trace has no rows")]
    EmptyTrace,

    #[error("final root inconsistent: header={header} last_row={last_row}")]
    RootInconsistent { header: String, last_row: String },

    #[error("rows not in (timestamp, node_id, row_index) order at index {index}")]
    UnsortedRows { index: usize },

    #[error("node {node_id} row {row_index}: {field}_has disagrees with {field}")]
    InconsistentOptional {
        node_id: u32,
        row_index: u64,
        field: &'static str,
    },

    #[error("invalid digest {value:?}: {source}")]
    InvalidDigest {
        value: String,
        #[source]
        source: hex::FromHexError,
    },

    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed trace json: {0}")]
    Json(#[from] serde_json::Error),
}

impl TraceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TraceError::Io {
            path: path.into(),
            source,
        }
    }
}

// Offline verification of DVEL gossip simulator traces: merge per-node traces,
// re-check quarantine/chaining invariants, and commit to the result.
// Deterministic and in-memory; time only ever comes from the trace itself.

pub mod check;
pub mod commit;
pub mod config;
pub mod error;
pub mod event;
pub mod ledger;
pub mod merge;
pub mod pipeline;
pub mod replay;
pub mod trace;

pub use check::{CheckReport, Violation, ViolationKind, check_trace};
pub use commit::{Commitment, commit_trace};
pub use config::{RunConfig, SybilParams};
pub use error::TraceError;
pub use merge::{NodeTrace, merge};
pub use replay::{ReplayKind, ReplayReport, replay_trace};
pub use trace::{Digest, MergedTrace, TraceHeader, TraceRow};

/// Protocol semantics tag stamped into merged headers by default.
pub const PROTOCOL_VERSION: u32 = 1;

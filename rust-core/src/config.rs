use crate::error::TraceError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Sybil overlay parameters the simulator ran with. Serialized as the
/// header's `sybil_config`; the checker reads quarantine and scale from here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SybilParams {
    #[serde(default = "default_warmup_ticks")]
    pub warmup_ticks: u64,
    #[serde(default = "default_quarantine_ticks")]
    pub quarantine_ticks: u64,
    #[serde(default = "default_fixed_point_scale")]
    pub fixed_point_scale: u64,
    #[serde(default = "default_max_link_walk")]
    pub max_link_walk: u64,
}

fn default_warmup_ticks() -> u64 {
    4
}

fn default_quarantine_ticks() -> u64 {
    12
}

fn default_fixed_point_scale() -> u64 {
    1000
}

fn default_max_link_walk() -> u64 {
    4096
}

impl Default for SybilParams {
    fn default() -> Self {
        Self {
            warmup_ticks: default_warmup_ticks(),
            quarantine_ticks: default_quarantine_ticks(),
            fixed_point_scale: default_fixed_point_scale(),
            max_link_walk: default_max_link_walk(),
        }
    }
}

/// Run-level configuration stamped into the merged header. Immutable once
/// handed to the merger; nothing here is derived from rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
    #[serde(default = "default_max_backward_skew")]
    pub max_backward_skew: u64,
    #[serde(default = "default_pending_cap")]
    pub max_pending_total: u64,
    #[serde(default = "default_pending_cap")]
    pub max_drain_steps: u64,
    #[serde(default)]
    pub sybil_config: SybilParams,
}

fn default_protocol_version() -> u32 {
    crate::PROTOCOL_VERSION
}

fn default_max_backward_skew() -> u64 {
    1_000_000
}

fn default_pending_cap() -> u64 {
    16_384
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            max_backward_skew: default_max_backward_skew(),
            max_pending_total: default_pending_cap(),
            max_drain_steps: default_pending_cap(),
            sybil_config: SybilParams::default(),
        }
    }
}

impl RunConfig {
    /// Reads a JSON run file; absent fields keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TraceError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| TraceError::io(path, e))?;
        Ok(serde_json::from_slice(&data)?)
    }
}

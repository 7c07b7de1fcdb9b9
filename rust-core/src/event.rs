// Event identity: fixed layout, deterministic canonical form; identity = SHA256(canonical || sig).
// Rebuilt from trace rows during replay so recorded snapshots can be recomputed.

use crate::trace::TraceRow;
use hex::FromHex;
use sha2::{Digest as _, Sha256};

pub type Hash = [u8; 32];
pub type PublicKey = [u8; 32];
pub type Signature = [u8; 64];

/// Genesis marker (no parent).
pub const ZERO_HASH: Hash = [0u8; 32];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub version: u8,
    pub prev_hash: Hash,
    pub author: PublicKey,
    pub timestamp: u64,
    pub payload_hash: Hash,
    pub signature: Signature,
}

/// Which opaque row field failed to decode into its fixed-width form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndecodableField {
    Author,
    PayloadHash,
    Signature,
    /// Protocol version wider than the one-byte layout slot.
    Version,
}

impl UndecodableField {
    pub fn name(self) -> &'static str {
        match self {
            UndecodableField::Author => "author",
            UndecodableField::PayloadHash => "payload_hash",
            UndecodableField::Signature => "signature",
            UndecodableField::Version => "protocol_version",
        }
    }
}

impl Event {
    /// Decode the fixed-width event carried by a row. The row's opaque
    /// strings must be lowercase or uppercase hex of the exact widths, and
    /// the header's protocol version must fit in one byte.
    pub fn from_row(version: u32, row: &TraceRow) -> Result<Self, UndecodableField> {
        Ok(Event {
            version: u8::try_from(version).map_err(|_| UndecodableField::Version)?,
            prev_hash: *row.prev_hash.as_bytes(),
            author: <[u8; 32]>::from_hex(&row.author).map_err(|_| UndecodableField::Author)?,
            timestamp: row.timestamp,
            payload_hash: <[u8; 32]>::from_hex(&row.payload_hash)
                .map_err(|_| UndecodableField::PayloadHash)?,
            signature: <[u8; 64]>::from_hex(&row.signature)
                .map_err(|_| UndecodableField::Signature)?,
        })
    }

    /// Layout: [version (1)] [prev_hash (32)] [author (32)] [timestamp (8 LE)] [payload_hash (32)].
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 32 + 32 + 8 + 32);
        out.push(self.version);
        out.extend_from_slice(&self.prev_hash);
        out.extend_from_slice(&self.author);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.payload_hash);
        out
    }

    pub fn id(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_bytes());
        hasher.update(self.signature);
        hasher.finalize().into()
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash == ZERO_HASH
    }
}

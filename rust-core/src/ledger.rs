// Linkage-aware ledger (single-parent, fork-legal), rebuilt per node during replay.
// Only enforces parent existence + duplicate rules and derives the snapshot root.

use crate::event::{Event, Hash};
use sha2::{Digest as _, Sha256};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("event already linked")]
    Duplicate,
    #[error("parent not linked")]
    MissingParent,
}

#[derive(Debug, Default)]
pub struct Ledger {
    // Sorted so the Merkle leaves come out in lexicographic order for free.
    ids: BTreeSet<Hash>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &Hash) -> bool {
        self.ids.contains(id)
    }

    /// Linkage-aware add:
    /// - Reject duplicate identity
    /// - Reject missing parent unless genesis (prev_hash == ZERO_HASH)
    pub fn try_link(&mut self, event: &Event) -> Result<Hash, LinkError> {
        let id = event.id();
        if self.ids.contains(&id) {
            return Err(LinkError::Duplicate);
        }
        if !event.is_genesis() && !self.ids.contains(&event.prev_hash) {
            return Err(LinkError::MissingParent);
        }
        self.ids.insert(id);
        Ok(id)
    }

    /// Deterministic Merkle root over all event identities (sorted leaves,
    /// last node duplicated on odd levels). None iff the ledger is empty.
    pub fn merkle_root(&self) -> Option<Hash> {
        let mut level: Vec<Hash> = self.ids.iter().copied().collect();
        if level.is_empty() {
            return None;
        }

        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|pair| {
                    let a = pair[0];
                    let b = pair.get(1).copied().unwrap_or(a);
                    let mut hasher = Sha256::new();
                    hasher.update(a);
                    hasher.update(b);
                    let h: Hash = hasher.finalize().into();
                    h
                })
                .collect();
        }

        level.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ZERO_HASH;

    fn event(prev: Hash, ts: u64) -> Event {
        Event {
            version: 1,
            prev_hash: prev,
            author: [0x42; 32],
            timestamp: ts,
            payload_hash: [ts as u8; 32],
            signature: [0u8; 64],
        }
    }

    fn pair_hash(a: Hash, b: Hash) -> Hash {
        let mut h = Sha256::new();
        h.update(a);
        h.update(b);
        h.finalize().into()
    }

    #[test]
    fn empty_ledger_has_no_root() {
        assert_eq!(Ledger::new().merkle_root(), None);
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let mut l = Ledger::new();
        let id = l.try_link(&event(ZERO_HASH, 1)).unwrap();
        assert_eq!(l.merkle_root(), Some(id));
    }

    #[test]
    fn odd_level_duplicates_last_leaf() {
        let mut l = Ledger::new();
        let a = l.try_link(&event(ZERO_HASH, 1)).unwrap();
        let b = l.try_link(&event(a, 2)).unwrap();
        let c = l.try_link(&event(b, 3)).unwrap();

        let mut leaves = [a, b, c];
        leaves.sort();
        let left = pair_hash(leaves[0], leaves[1]);
        let right = pair_hash(leaves[2], leaves[2]);
        assert_eq!(l.merkle_root(), Some(pair_hash(left, right)));
    }

    #[test]
    fn linkage_rules() {
        let mut l = Ledger::new();
        let g = event(ZERO_HASH, 1);
        l.try_link(&g).unwrap();
        assert_eq!(l.try_link(&g), Err(LinkError::Duplicate));
        assert_eq!(l.try_link(&event([9; 32], 2)), Err(LinkError::MissingParent));
        assert_eq!(l.len(), 1);
    }
}

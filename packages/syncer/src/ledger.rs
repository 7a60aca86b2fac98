//! Dedup Ledger
//!
//! In-memory set of transaction hashes already processed in this run.
//! State is not persisted: after a restart, reprocessing is absorbed by the
//! ciphertext-level existence check in the post store.

use std::collections::HashSet;

/// Set of transaction hashes seen during the current process lifetime
#[derive(Debug, Default, Clone)]
pub struct DedupLedger {
    known: HashSet<String>,
}

impl DedupLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a transaction hash has already been processed
    pub fn seen(&self, tx_hash: &str) -> bool {
        self.known.contains(&normalize(tx_hash))
    }

    /// Record a transaction hash
    ///
    /// Returns `true` if the hash was not known before. Remembering a known
    /// hash is a no-op.
    pub fn remember(&mut self, tx_hash: &str) -> bool {
        self.known.insert(normalize(tx_hash))
    }

    /// Number of distinct hashes recorded
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

// Hashes are hex; compare case-insensitively.
fn normalize(tx_hash: &str) -> String {
    tx_hash.trim().to_ascii_lowercase()
}

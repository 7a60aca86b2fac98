//! Hugin Syncer Library
//!
//! This crate provides components for polling a node's transaction pool,
//! recognizing encrypted post envelopes in transaction extra fields, and
//! handing new posts to a store and to real-time subscribers.

pub mod config;
pub mod envelope;
pub mod extra;
pub mod handoff;
pub mod ledger;
pub mod node;
pub mod publisher;
pub mod store;
pub mod syncer;

// Re-export commonly used types
pub use config::{ConfigError, SyncerConfig};
pub use envelope::{classify, classify_extra, Envelope, EnvelopeKind, MalformedEnvelopeError};
pub use handoff::{Decryption, EnvelopeOpener, Handoff, HandoffOutcome, KeyMaterial, OpenOutcome};
pub use ledger::DedupLedger;
pub use node::{NodeClient, NodeError, PoolChangesLite, PoolTransaction};
pub use publisher::{Notifier, NoopNotifier, PostEvent, RedisNotifier};
pub use store::{MemoryPostStore, PostRecord, PostStore, RedisPostStore, StoreError};
pub use syncer::{SyncError, Syncer, TickReport};

//! Post Store
//!
//! Persistence collaborator for ingested posts. The pipeline only needs two
//! operations: a ciphertext existence check and a save.
//! [`MemoryPostStore`] keeps everything in process; [`RedisPostStore`] keeps a
//! ciphertext set and a JSON record list per record kind.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::envelope::EnvelopeKind;

/// Default key namespace for [`RedisPostStore`]
pub const DEFAULT_NAMESPACE: &str = "hugin";

/// Errors returned by a post store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Direct envelope as stored, still encrypted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPost {
    pub tx_hash: String,
    pub tx_box: String,
    pub tx_timestamp: u64,
}

/// Group envelope as stored, still encrypted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedGroupPost {
    pub tx_hash: String,
    pub tx_sb: String,
    pub tx_timestamp: u64,
}

/// A post recovered from a direct envelope
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaintextPost {
    pub tx_hash: String,
    pub message: String,
    pub key: Option<String>,
    pub signature: Option<String>,
    pub board: Option<String>,
    pub nickname: Option<String>,
    /// Hash of the post this one replies to
    pub reply: Option<String>,
    /// Unix timestamp of the originating envelope
    pub time: u64,
}

/// A record handed to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PostRecord {
    EncryptedPost(EncryptedPost),
    EncryptedGroupPost(EncryptedGroupPost),
    Post(PlaintextPost),
}

impl PostRecord {
    /// Stable name of the record kind, used for storage keys and events
    pub fn kind_name(&self) -> &'static str {
        match self {
            PostRecord::EncryptedPost(_) => "post_encrypted",
            PostRecord::EncryptedGroupPost(_) => "post_encrypted_group",
            PostRecord::Post(_) => "post",
        }
    }

    pub fn tx_hash(&self) -> &str {
        match self {
            PostRecord::EncryptedPost(p) => &p.tx_hash,
            PostRecord::EncryptedGroupPost(p) => &p.tx_hash,
            PostRecord::Post(p) => &p.tx_hash,
        }
    }

    /// Ciphertext and its envelope kind, for encrypted records
    pub fn ciphertext(&self) -> Option<(EnvelopeKind, &str)> {
        match self {
            PostRecord::EncryptedPost(p) => Some((EnvelopeKind::DirectBox, &p.tx_box)),
            PostRecord::EncryptedGroupPost(p) => Some((EnvelopeKind::GroupSealedBox, &p.tx_sb)),
            PostRecord::Post(_) => None,
        }
    }

    /// Timestamp carried by the record
    pub fn timestamp(&self) -> u64 {
        match self {
            PostRecord::EncryptedPost(p) => p.tx_timestamp,
            PostRecord::EncryptedGroupPost(p) => p.tx_timestamp,
            PostRecord::Post(p) => p.time,
        }
    }
}

/// Persistence collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Whether a record with this ciphertext was already saved
    async fn exists_by_ciphertext(
        &self,
        kind: EnvelopeKind,
        ciphertext: &str,
    ) -> Result<bool, StoreError>;

    /// Persist a record
    async fn save(&self, record: &PostRecord) -> Result<(), StoreError>;
}

/// In-process store, used when no Redis URL is configured and in tests
#[derive(Debug, Default)]
pub struct MemoryPostStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    records: Vec<PostRecord>,
    ciphertexts: HashSet<(EnvelopeKind, String)>,
}

impl MemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every saved record, in save order
    pub fn records(&self) -> Vec<PostRecord> {
        self.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        // A poisoned lock only means another holder panicked mid-push.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl PostStore for MemoryPostStore {
    async fn exists_by_ciphertext(
        &self,
        kind: EnvelopeKind,
        ciphertext: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .lock()
            .ciphertexts
            .contains(&(kind, ciphertext.to_string())))
    }

    async fn save(&self, record: &PostRecord) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some((kind, ciphertext)) = record.ciphertext() {
            inner.ciphertexts.insert((kind, ciphertext.to_string()));
        }
        inner.records.push(record.clone());
        Ok(())
    }
}

/// Redis-backed store
///
/// Keys:
/// * `{ns}:ciphertexts:{direct|group}` - set of saved ciphertexts
/// * `{ns}:posts:{kind_name}` - list of JSON records
pub struct RedisPostStore {
    connection: MultiplexedConnection,
    namespace: String,
}

impl RedisPostStore {
    pub fn new(connection: MultiplexedConnection, namespace: impl Into<String>) -> Self {
        Self {
            connection,
            namespace: namespace.into(),
        }
    }

    /// Create a store under [`DEFAULT_NAMESPACE`]
    pub fn with_default_namespace(connection: MultiplexedConnection) -> Self {
        Self::new(connection, DEFAULT_NAMESPACE)
    }

    /// Open a connection to `redis_url` and wrap it
    pub async fn connect(redis_url: &str, namespace: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self::new(connection, namespace))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Handle to the underlying connection, for sharing with a notifier
    pub fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    pub fn ciphertext_key(&self, kind: EnvelopeKind) -> String {
        format!("{}:ciphertexts:{}", self.namespace, kind.name())
    }

    pub fn records_key(&self, record: &PostRecord) -> String {
        format!("{}:posts:{}", self.namespace, record.kind_name())
    }
}

#[async_trait]
impl PostStore for RedisPostStore {
    async fn exists_by_ciphertext(
        &self,
        kind: EnvelopeKind,
        ciphertext: &str,
    ) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();
        let exists: bool = connection
            .sismember(self.ciphertext_key(kind), ciphertext)
            .await?;
        Ok(exists)
    }

    async fn save(&self, record: &PostRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        let mut pipe = redis::pipe();
        pipe.atomic().rpush(self.records_key(record), json).ignore();
        if let Some((kind, ciphertext)) = record.ciphertext() {
            pipe.sadd(self.ciphertext_key(kind), ciphertext).ignore();
        }

        let mut connection = self.connection.clone();
        let _: () = pipe.query_async(&mut connection).await?;
        Ok(())
    }
}

//! Decryption Hand-off
//!
//! Turns a classified envelope into persisted records. Group envelopes are
//! stored as-is; direct envelopes are stored and, when a decryption capability
//! is configured, opened against the holder's keys. A recovered plaintext is
//! stored as a board post and announced to subscribers.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::config::ConfigError;
use crate::envelope::{DirectBox, Envelope, GroupSealedBox};
use crate::publisher::{Notifier, PostEvent};
use crate::store::{EncryptedGroupPost, EncryptedPost, PlaintextPost, PostRecord, PostStore};

/// Length of a private key in bytes
pub const KEY_LEN: usize = 32;

/// Private key pair used to try opening direct envelopes
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    private_spend_key: [u8; KEY_LEN],
    private_view_key: [u8; KEY_LEN],
}

impl KeyMaterial {
    pub fn new(private_spend_key: [u8; KEY_LEN], private_view_key: [u8; KEY_LEN]) -> Self {
        Self {
            private_spend_key,
            private_view_key,
        }
    }

    /// Parse a key pair from two 64-character hex strings
    pub fn from_hex(private_spend_key: &str, private_view_key: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(
            parse_key("spend", private_spend_key)?,
            parse_key("view", private_view_key)?,
        ))
    }

    pub fn private_spend_key(&self) -> &[u8; KEY_LEN] {
        &self.private_spend_key
    }

    pub fn private_view_key(&self) -> &[u8; KEY_LEN] {
        &self.private_view_key
    }
}

// Never print private keys.
impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial").finish_non_exhaustive()
    }
}

fn parse_key(name: &str, key: &str) -> Result<[u8; KEY_LEN], ConfigError> {
    let bytes = hex::decode(key.trim())
        .map_err(|e| ConfigError::InvalidKey(format!("{} key: {}", name, e)))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        ConfigError::InvalidKey(format!(
            "{} key: expected {} bytes, got {}",
            name,
            KEY_LEN,
            bytes.len()
        ))
    })
}

/// Result of trying to open a direct envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Recovered plaintext
    Opened(String),
    /// The envelope is for someone else
    NotAddressed,
}

/// Box-open capability supplied by the embedding application
#[cfg_attr(test, mockall::automock)]
pub trait EnvelopeOpener: Send + Sync {
    fn open_box(&self, ciphertext: &str, keys: &KeyMaterial, known_keys: &[String]) -> OpenOutcome;
}

/// Everything needed to attempt plaintext recovery
#[derive(Clone)]
pub struct Decryption {
    pub opener: Arc<dyn EnvelopeOpener>,
    pub keys: KeyMaterial,
    /// Public keys of known senders to try
    pub known_keys: Vec<String>,
}

/// Board message layout carried inside a recovered plaintext
#[derive(Debug, Deserialize)]
struct BoardMessage {
    m: String,
    k: Option<String>,
    s: Option<String>,
    brd: Option<String>,
    t: Option<u64>,
    n: Option<String>,
    r: Option<String>,
}

/// Build a plaintext post from recovered text
///
/// Text that parses as a board message fills the individual fields; anything
/// else is kept verbatim with the envelope timestamp.
pub fn plaintext_post(tx_hash: &str, plaintext: &str, envelope_timestamp: u64) -> PlaintextPost {
    match serde_json::from_str::<BoardMessage>(plaintext) {
        Ok(msg) => PlaintextPost {
            tx_hash: tx_hash.to_string(),
            message: msg.m,
            key: msg.k,
            signature: msg.s,
            board: msg.brd,
            nickname: msg.n,
            reply: msg.r.filter(|r| !r.is_empty()),
            time: msg.t.unwrap_or(envelope_timestamp),
        },
        Err(_) => PlaintextPost {
            tx_hash: tx_hash.to_string(),
            message: plaintext.to_string(),
            time: envelope_timestamp,
            ..Default::default()
        },
    }
}

/// What happened to an envelope in the hand-off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffOutcome {
    /// Nothing to hand off
    Skipped,
    /// The ciphertext was already stored
    Duplicate,
    /// The primary record was stored; `decrypted` if a plaintext post was too
    Saved { decrypted: bool },
    /// The store rejected the record or the existence check
    SaveFailed,
}

/// Hands classified envelopes to the store and notifier
#[derive(Clone)]
pub struct Handoff {
    store: Arc<dyn PostStore>,
    notifier: Arc<dyn Notifier>,
    decryption: Option<Decryption>,
}

impl Handoff {
    pub fn new(store: Arc<dyn PostStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            decryption: None,
        }
    }

    /// Enable plaintext recovery for direct envelopes
    pub fn with_decryption(mut self, decryption: Decryption) -> Self {
        self.decryption = Some(decryption);
        self
    }

    pub fn can_decrypt(&self) -> bool {
        self.decryption.is_some()
    }

    /// Hand off one envelope from transaction `tx_hash`
    pub async fn deliver(&self, tx_hash: &str, envelope: Envelope) -> HandoffOutcome {
        let (kind, ciphertext) = match envelope.kind().zip(envelope.ciphertext()) {
            Some((kind, ciphertext)) => (kind, ciphertext.to_string()),
            None => return HandoffOutcome::Skipped,
        };

        match self.store.exists_by_ciphertext(kind, &ciphertext).await {
            Ok(true) => {
                debug!(tx_hash, kind = kind.name(), "Ciphertext already stored");
                return HandoffOutcome::Duplicate;
            }
            Ok(false) => {}
            Err(e) => {
                error!(tx_hash, error = %e, "Ciphertext existence check failed");
                return HandoffOutcome::SaveFailed;
            }
        }

        match envelope {
            Envelope::GroupSealedBox(sb) => self.deliver_group(tx_hash, sb).await,
            Envelope::DirectBox(b) => self.deliver_direct(tx_hash, b).await,
            Envelope::Unrecognized => HandoffOutcome::Skipped,
        }
    }

    async fn deliver_group(&self, tx_hash: &str, sb: GroupSealedBox) -> HandoffOutcome {
        let record = PostRecord::EncryptedGroupPost(EncryptedGroupPost {
            tx_hash: tx_hash.to_string(),
            tx_sb: sb.ciphertext,
            tx_timestamp: sb.timestamp,
        });

        if !self.save(&record).await {
            return HandoffOutcome::SaveFailed;
        }
        self.notify(&record).await;
        HandoffOutcome::Saved { decrypted: false }
    }

    async fn deliver_direct(&self, tx_hash: &str, b: DirectBox) -> HandoffOutcome {
        let record = PostRecord::EncryptedPost(EncryptedPost {
            tx_hash: tx_hash.to_string(),
            tx_box: b.ciphertext.clone(),
            tx_timestamp: b.timestamp,
        });

        if !self.save(&record).await {
            return HandoffOutcome::SaveFailed;
        }

        let plaintext = match self.open(&b.ciphertext) {
            Some(plaintext) => plaintext,
            None => return HandoffOutcome::Saved { decrypted: false },
        };

        let post = PostRecord::Post(plaintext_post(tx_hash, &plaintext, b.timestamp));
        if !self.save(&post).await {
            return HandoffOutcome::Saved { decrypted: false };
        }
        self.notify(&post).await;
        HandoffOutcome::Saved { decrypted: true }
    }

    fn open(&self, ciphertext: &str) -> Option<String> {
        let decryption = self.decryption.as_ref()?;
        match decryption
            .opener
            .open_box(ciphertext, &decryption.keys, &decryption.known_keys)
        {
            OpenOutcome::Opened(plaintext) => Some(plaintext),
            OpenOutcome::NotAddressed => {
                debug!("Direct envelope not addressed to us");
                None
            }
        }
    }

    async fn save(&self, record: &PostRecord) -> bool {
        match self.store.save(record).await {
            Ok(()) => {
                info!(tx_hash = record.tx_hash(), kind = record.kind_name(), "Post saved");
                true
            }
            Err(e) => {
                error!(
                    tx_hash = record.tx_hash(),
                    kind = record.kind_name(),
                    error = %e,
                    "Unable to save post"
                );
                false
            }
        }
    }

    async fn notify(&self, record: &PostRecord) {
        if let Err(e) = self.notifier.notify(&PostEvent::from_record(record)).await {
            warn!(tx_hash = record.tx_hash(), error = %e, "Post notification failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::{MockNotifier, NoopNotifier, NotifyError};
    use crate::store::{MemoryPostStore, MockPostStore, StoreError};
    use crate::envelope::EnvelopeKind;
    use mockall::predicate::*;

    const KEY_HEX: &str = "0000000000000000000000000000000000000000000000000000000000000000";

    fn direct(ciphertext: &str, timestamp: u64) -> Envelope {
        Envelope::DirectBox(DirectBox {
            ciphertext: ciphertext.to_string(),
            timestamp,
        })
    }

    fn group(ciphertext: &str, timestamp: u64) -> Envelope {
        Envelope::GroupSealedBox(GroupSealedBox {
            ciphertext: ciphertext.to_string(),
            timestamp,
        })
    }

    fn decryption(opener: MockEnvelopeOpener) -> Decryption {
        Decryption {
            opener: Arc::new(opener),
            keys: KeyMaterial::from_hex(KEY_HEX, KEY_HEX).unwrap(),
            known_keys: vec!["SEKReYU57DLLvUjNzmjVhaK7jqc8SdZZ3cyKJS5f4gWXK4NQQYChzKUUwzCGhgqUPkWQypeR94rqpgMPjXWG9ijnZKNw2LWXnZU1".to_string()],
        }
    }

    // ==================== KeyMaterial tests ====================

    #[test]
    fn test_key_material_from_hex() {
        let keys = KeyMaterial::from_hex(KEY_HEX, &"ab".repeat(32)).unwrap();
        assert_eq!(keys.private_spend_key(), &[0u8; 32]);
        assert_eq!(keys.private_view_key(), &[0xab; 32]);
    }

    #[test]
    fn test_key_material_rejects_bad_hex() {
        let result = KeyMaterial::from_hex("zz", KEY_HEX);
        assert!(matches!(result, Err(ConfigError::InvalidKey(_))));
    }

    #[test]
    fn test_key_material_rejects_wrong_length() {
        let result = KeyMaterial::from_hex(KEY_HEX, "abcd");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("expected 32 bytes, got 2"));
    }

    #[test]
    fn test_key_material_debug_hides_keys() {
        let keys = KeyMaterial::from_hex(&"ab".repeat(32), KEY_HEX).unwrap();
        assert!(!format!("{:?}", keys).contains("ab"));
    }

    // ==================== plaintext_post tests ====================

    #[test]
    fn test_plaintext_post_from_board_message() {
        let text = r#"{"m":"hello","k":"SEKa","s":"sig","brd":"Home","t":1700000005,"n":"anon","r":""}"#;
        let post = plaintext_post("aa", text, 1700000000);
        assert_eq!(post.message, "hello");
        assert_eq!(post.board.as_deref(), Some("Home"));
        assert_eq!(post.nickname.as_deref(), Some("anon"));
        assert_eq!(post.reply, None);
        assert_eq!(post.time, 1700000005);
    }

    #[test]
    fn test_plaintext_post_verbatim_fallback() {
        let post = plaintext_post("aa", "just text", 1700000000);
        assert_eq!(post.message, "just text");
        assert_eq!(post.time, 1700000000);
        assert_eq!(post.board, None);
    }

    // ==================== deliver tests ====================

    #[tokio::test]
    async fn test_deliver_unrecognized_is_skipped() {
        let mut store = MockPostStore::new();
        store.expect_exists_by_ciphertext().never();
        store.expect_save().never();

        let handoff = Handoff::new(Arc::new(store), Arc::new(NoopNotifier));
        assert_eq!(handoff.deliver("aa", Envelope::Unrecognized).await, HandoffOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_deliver_direct_saves_encrypted_record() {
        let store = Arc::new(MemoryPostStore::new());
        let handoff = Handoff::new(store.clone(), Arc::new(NoopNotifier));

        let outcome = handoff.deliver("aa", direct("abc123", 1700000000)).await;

        assert_eq!(outcome, HandoffOutcome::Saved { decrypted: false });
        assert_eq!(
            store.records(),
            vec![PostRecord::EncryptedPost(EncryptedPost {
                tx_hash: "aa".into(),
                tx_box: "abc123".into(),
                tx_timestamp: 1700000000,
            })]
        );
    }

    #[tokio::test]
    async fn test_deliver_group_saves_and_notifies() {
        let store = Arc::new(MemoryPostStore::new());
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|event| event.kind == "post_encrypted_group" && event.tx_hash == "bb")
            .times(1)
            .returning(|_| Ok(()));

        let handoff = Handoff::new(store.clone(), Arc::new(notifier));
        let outcome = handoff.deliver("bb", group("cafe", 42)).await;

        assert_eq!(outcome, HandoffOutcome::Saved { decrypted: false });
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_deliver_duplicate_ciphertext() {
        let mut store = MockPostStore::new();
        store
            .expect_exists_by_ciphertext()
            .with(eq(EnvelopeKind::DirectBox), eq("abc123"))
            .times(1)
            .returning(|_, _| Ok(true));
        store.expect_save().never();

        let handoff = Handoff::new(Arc::new(store), Arc::new(NoopNotifier));
        let outcome = handoff.deliver("aa", direct("abc123", 1)).await;
        assert_eq!(outcome, HandoffOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_deliver_save_failure_is_reported() {
        let mut store = MockPostStore::new();
        store.expect_exists_by_ciphertext().returning(|_, _| Ok(false));
        store
            .expect_save()
            .times(1)
            .returning(|_| Err(StoreError::Backend("connection reset".into())));
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().never();

        let handoff = Handoff::new(Arc::new(store), Arc::new(notifier));
        let outcome = handoff.deliver("bb", group("cafe", 42)).await;
        assert_eq!(outcome, HandoffOutcome::SaveFailed);
    }

    #[tokio::test]
    async fn test_deliver_existence_check_failure() {
        let mut store = MockPostStore::new();
        store
            .expect_exists_by_ciphertext()
            .returning(|_, _| Err(StoreError::Backend("timeout".into())));
        store.expect_save().never();

        let handoff = Handoff::new(Arc::new(store), Arc::new(NoopNotifier));
        assert_eq!(handoff.deliver("aa", direct("x", 1)).await, HandoffOutcome::SaveFailed);
    }

    #[tokio::test]
    async fn test_deliver_notification_failure_is_not_fatal() {
        let store = Arc::new(MemoryPostStore::new());
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .returning(|_| Err(NotifyError::Serialization(serde_json::from_str::<u8>("x").unwrap_err())));

        let handoff = Handoff::new(store.clone(), Arc::new(notifier));
        let outcome = handoff.deliver("bb", group("cafe", 42)).await;
        assert_eq!(outcome, HandoffOutcome::Saved { decrypted: false });
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_deliver_direct_decrypts_when_addressed() {
        let store = Arc::new(MemoryPostStore::new());
        let mut opener = MockEnvelopeOpener::new();
        opener
            .expect_open_box()
            .withf(|ciphertext, _, known| ciphertext == "abc123" && known.len() == 1)
            .times(1)
            .returning(|_, _, _| OpenOutcome::Opened(r#"{"m":"gm","brd":"Home","t":1700000001}"#.into()));
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|event| event.kind == "post")
            .times(1)
            .returning(|_| Ok(()));

        let handoff = Handoff::new(store.clone(), Arc::new(notifier)).with_decryption(decryption(opener));
        assert!(handoff.can_decrypt());

        let outcome = handoff.deliver("aa", direct("abc123", 1700000000)).await;

        assert_eq!(outcome, HandoffOutcome::Saved { decrypted: true });
        let records = store.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind_name(), "post_encrypted");
        match &records[1] {
            PostRecord::Post(post) => {
                assert_eq!(post.message, "gm");
                assert_eq!(post.tx_hash, "aa");
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deliver_direct_not_addressed_is_not_an_error() {
        let store = Arc::new(MemoryPostStore::new());
        let mut opener = MockEnvelopeOpener::new();
        opener
            .expect_open_box()
            .times(1)
            .returning(|_, _, _| OpenOutcome::NotAddressed);

        let handoff = Handoff::new(store.clone(), Arc::new(NoopNotifier)).with_decryption(decryption(opener));
        let outcome = handoff.deliver("aa", direct("abc123", 1)).await;

        assert_eq!(outcome, HandoffOutcome::Saved { decrypted: false });
        assert_eq!(store.len(), 1);
    }
}

//! Redis Integration Tests
//!
//! These tests require Redis at localhost:6379.
//! They are marked with #[ignore] by default for CI environments.
//!
//! To run these tests:
//! 1. Start Redis: `docker run -d -p 6379:6379 redis:alpine`
//! 2. Run tests: `cargo test --test redis_integration -- --ignored`

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::StreamExt;
use redis::AsyncCommands;

use hugin_syncer::envelope::EnvelopeKind;
use hugin_syncer::publisher::{PostEvent, DEFAULT_CHANNEL};
use hugin_syncer::store::{EncryptedGroupPost, EncryptedPost, PostRecord};
use hugin_syncer::{Notifier, PostStore, RedisNotifier, RedisPostStore};

const REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Create a Redis connection
async fn get_redis_connection() -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
    let client = redis::Client::open(REDIS_URL)?;
    client.get_multiplexed_async_connection().await
}

/// Namespace unique to one test run so runs do not see each other's keys
fn test_namespace(name: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("hugin-test-{}-{}", name, nanos)
}

async fn cleanup(store: &RedisPostStore) {
    let mut conn = get_redis_connection().await.unwrap();
    let pattern = format!("{}:*", store.namespace());
    let keys: Vec<String> = conn.keys(pattern).await.unwrap();
    if !keys.is_empty() {
        let _: () = conn.del(keys).await.unwrap();
    }
}

// ==================== RedisPostStore Tests ====================

#[tokio::test]
#[ignore = "Requires running Redis at localhost:6379"]
async fn test_store_save_then_exists() {
    let store = RedisPostStore::connect(REDIS_URL, test_namespace("exists"))
        .await
        .expect("Failed to connect to Redis");

    let record = PostRecord::EncryptedPost(EncryptedPost {
        tx_hash: "aa01".to_string(),
        tx_box: "abc123".to_string(),
        tx_timestamp: 1700000000,
    });

    assert!(!store.exists_by_ciphertext(EnvelopeKind::DirectBox, "abc123").await.unwrap());
    store.save(&record).await.unwrap();
    assert!(store.exists_by_ciphertext(EnvelopeKind::DirectBox, "abc123").await.unwrap());
    assert!(!store.exists_by_ciphertext(EnvelopeKind::GroupSealedBox, "abc123").await.unwrap());

    cleanup(&store).await;
}

#[tokio::test]
#[ignore = "Requires running Redis at localhost:6379"]
async fn test_store_appends_json_records() {
    let store = RedisPostStore::connect(REDIS_URL, test_namespace("records"))
        .await
        .expect("Failed to connect to Redis");

    let record = PostRecord::EncryptedGroupPost(EncryptedGroupPost {
        tx_hash: "bb02".to_string(),
        tx_sb: "deadbeef".to_string(),
        tx_timestamp: 1700000000,
    });
    store.save(&record).await.unwrap();

    let mut conn = get_redis_connection().await.unwrap();
    let stored: Vec<String> = conn.lrange(store.records_key(&record), 0, -1).await.unwrap();
    assert_eq!(stored.len(), 1);
    let parsed: PostRecord = serde_json::from_str(&stored[0]).unwrap();
    assert_eq!(parsed, record);

    cleanup(&store).await;
}

#[tokio::test]
#[ignore = "Requires running Redis at localhost:6379"]
async fn test_store_default_namespace_keys() {
    let conn = get_redis_connection().await.expect("Failed to connect to Redis");
    let store = RedisPostStore::with_default_namespace(conn);
    assert_eq!(store.ciphertext_key(EnvelopeKind::GroupSealedBox), "hugin:ciphertexts:group");
}

// ==================== RedisNotifier Tests ====================

#[tokio::test]
#[ignore = "Requires running Redis at localhost:6379"]
async fn test_notifier_publishes_to_channel() {
    let conn = get_redis_connection().await.expect("Failed to connect to Redis");
    let notifier = RedisNotifier::with_default_channel(conn);
    assert_eq!(notifier.channel(), DEFAULT_CHANNEL);

    let client = redis::Client::open(REDIS_URL).unwrap();
    let mut pubsub = client.get_async_pubsub().await.expect("Failed to open pubsub");
    pubsub.subscribe(DEFAULT_CHANNEL).await.unwrap();

    let record = PostRecord::EncryptedGroupPost(EncryptedGroupPost {
        tx_hash: "cc03".to_string(),
        tx_sb: "cafe".to_string(),
        tx_timestamp: 1700000000,
    });
    let event = PostEvent::from_record(&record);
    notifier.notify(&event).await.unwrap();

    let mut stream = Box::pin(pubsub.on_message());
    let msg = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("Timed out waiting for event")
        .expect("Stream ended");
    let payload: String = msg.get_payload().unwrap();
    let received = PostEvent::from_json(&payload).unwrap();
    assert_eq!(received.tx_hash, "cc03");
    assert_eq!(received.record, record);
}

#[tokio::test]
#[ignore = "Requires running Redis at localhost:6379"]
async fn test_notifier_shares_store_connection() {
    let store = RedisPostStore::connect(REDIS_URL, test_namespace("shared"))
        .await
        .expect("Failed to connect to Redis");
    let channel = test_namespace("shared_channel");
    let notifier = RedisNotifier::new(store.connection(), channel.clone());

    let client = redis::Client::open(REDIS_URL).unwrap();
    let mut pubsub = client.get_async_pubsub().await.expect("Failed to open pubsub");
    pubsub.subscribe(&channel).await.unwrap();

    let record = PostRecord::EncryptedGroupPost(EncryptedGroupPost {
        tx_hash: "dd04".to_string(),
        tx_sb: "beef".to_string(),
        tx_timestamp: 1700000000,
    });
    store.save(&record).await.unwrap();
    notifier.notify(&PostEvent::from_record(&record)).await.unwrap();

    let mut stream = Box::pin(pubsub.on_message());
    let msg = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("Timed out waiting for event")
        .expect("Stream ended");
    let received = PostEvent::from_json(&msg.get_payload::<String>().unwrap()).unwrap();
    assert_eq!(received.tx_hash, "dd04");
    assert!(store
        .exists_by_ciphertext(EnvelopeKind::GroupSealedBox, "beef")
        .await
        .unwrap());

    cleanup(&store).await;
}

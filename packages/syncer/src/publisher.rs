//! Post Event Publisher
//!
//! Fans saved posts out to subscribers over a Redis pub/sub channel.
//! Notification is fire-and-forget: the pipeline logs failures and moves on.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::PostRecord;

/// Default Redis channel for post events
pub const DEFAULT_CHANNEL: &str = "hugin_posts";

/// Errors that can occur during publishing
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Event published after a record is saved
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostEvent {
    /// Record kind, see [`PostRecord::kind_name`]
    pub kind: String,
    /// Originating transaction hash
    pub tx_hash: String,
    /// Unix timestamp in milliseconds when the event was emitted
    pub emitted_at: u64,
    pub record: PostRecord,
}

impl PostEvent {
    pub fn from_record(record: &PostRecord) -> Self {
        Self {
            kind: record.kind_name().to_string(),
            tx_hash: record.tx_hash().to_string(),
            emitted_at: current_timestamp_millis(),
            record: record.clone(),
        }
    }

    /// Serialize the event to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize an event from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Get current timestamp in milliseconds
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Notification collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &PostEvent) -> Result<(), NotifyError>;
}

/// Notifier that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _event: &PostEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Redis publisher for post events
pub struct RedisNotifier {
    connection: MultiplexedConnection,
    channel: String,
}

impl RedisNotifier {
    /// Create a new notifier with a Redis connection
    ///
    /// # Arguments
    /// * `connection` - An established Redis multiplexed connection
    /// * `channel` - The pub/sub channel name to publish to
    pub fn new(connection: MultiplexedConnection, channel: impl Into<String>) -> Self {
        Self {
            connection,
            channel: channel.into(),
        }
    }

    /// Create a new notifier with the default channel
    pub fn with_default_channel(connection: MultiplexedConnection) -> Self {
        Self::new(connection, DEFAULT_CHANNEL)
    }

    /// Get the channel name
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Publish an event, returning the number of subscribers that received it
    pub async fn publish_event(&self, event: &PostEvent) -> Result<i64, NotifyError> {
        let json = event.to_json()?;
        let mut connection = self.connection.clone();
        let subscribers: i64 = connection.publish(&self.channel, &json).await?;
        Ok(subscribers)
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn notify(&self, event: &PostEvent) -> Result<(), NotifyError> {
        self.publish_event(event).await.map(|_| ())
    }
}

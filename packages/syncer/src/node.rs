//! Node RPC Client
//!
//! Fetches the transaction pool change set from a node over HTTP and parses
//! the response. Each added transaction is parsed on its own so that one
//! malformed entry cannot spoil the rest of the response.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// RPC path of the pool change set endpoint
pub const POOL_CHANGES_PATH: &str = "get_pool_changes_lite";

/// Default request timeout in milliseconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Errors that can occur while talking to the node
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Invalid node host: {0}")]
    InvalidHost(String),

    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Failed to decode node response: {0}")]
    Decode(String),
}

impl NodeError {
    /// Whether the failure happened on the wire rather than in parsing
    pub fn is_network(&self) -> bool {
        matches!(self, NodeError::Network(_) | NodeError::Timeout(_))
    }
}

/// Response of `get_pool_changes_lite`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolChangesLite {
    /// Added transactions, parsed lazily via [`PoolChangesLite::into_transactions`]
    pub added_txs: Vec<Value>,
    #[serde(default)]
    pub deleted_txs_ids: Vec<String>,
    #[serde(default)]
    pub is_tail_block_actual: bool,
    #[serde(default)]
    pub status: Option<String>,
}

impl PoolChangesLite {
    /// Parse a response body
    pub fn from_json(body: &str) -> Result<Self, NodeError> {
        serde_json::from_str(body).map_err(|e| NodeError::Decode(e.to_string()))
    }

    /// Parse each added transaction, preserving the order the node sent them in
    pub fn into_transactions(self) -> impl Iterator<Item = Result<PoolTransaction, NodeError>> {
        self.added_txs.into_iter().map(|value| {
            serde_json::from_value(value).map_err(|e| NodeError::Decode(e.to_string()))
        })
    }
}

/// A pending transaction as reported by the node
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolTransaction {
    pub transaction_hash: String,
    pub transaction_prefix: TransactionPrefix,
}

impl PoolTransaction {
    /// Raw extra field of the prefix, if present
    pub fn extra(&self) -> Option<&str> {
        self.transaction_prefix.extra.as_deref()
    }
}

/// Transaction prefix; only `extra` is consumed by the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPrefix {
    #[serde(default)]
    pub extra: Option<String>,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub unlock_time: Option<u64>,
}

/// Build the pool changes endpoint for `host`
///
/// `host` is a bare hostname with an optional port, e.g. `node.example.org:11898`.
pub fn pool_changes_url(host: &str) -> Result<Url, NodeError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(NodeError::InvalidHost("Host cannot be empty".to_string()));
    }
    if host.contains("://") || host.contains('/') {
        return Err(NodeError::InvalidHost(format!(
            "Expected a bare host[:port], got '{}'",
            host
        )));
    }

    let base = Url::parse(&format!("http://{}/", host))
        .map_err(|e| NodeError::InvalidHost(format!("{}: {}", host, e)))?;
    base.join(POOL_CHANGES_PATH)
        .map_err(|e| NodeError::InvalidHost(e.to_string()))
}

/// HTTP client bound to a single node
#[derive(Debug, Clone)]
pub struct NodeClient {
    client: Client,
    endpoint: Url,
    timeout: Duration,
}

impl NodeClient {
    /// Create a client for `host`; the endpoint is resolved once here
    pub fn new(host: &str, timeout: Duration) -> Result<Self, NodeError> {
        let endpoint = pool_changes_url(host)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NodeError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    /// Create a client with [`DEFAULT_REQUEST_TIMEOUT_MS`]
    pub fn with_default_timeout(host: &str) -> Result<Self, NodeError> {
        Self::new(host, Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS))
    }

    /// Full URL polled on every tick
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch the current pool change set
    pub async fn get_pool_changes_lite(&self) -> Result<PoolChangesLite, NodeError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NodeError::Network(format!("Node returned HTTP {}", status)));
        }

        let body = response.text().await.map_err(|e| self.map_request_error(e))?;
        let changes = PoolChangesLite::from_json(&body)?;
        debug!(
            bytes = body.len(),
            added = changes.added_txs.len(),
            deleted = changes.deleted_txs_ids.len(),
            tail_block_actual = changes.is_tail_block_actual,
            status = changes.status.as_deref().unwrap_or("-"),
            "Received pool changes"
        );

        Ok(changes)
    }

    fn map_request_error(&self, e: reqwest::Error) -> NodeError {
        if e.is_timeout() {
            NodeError::Timeout(self.timeout.as_millis() as u64)
        } else {
            NodeError::Network(e.to_string())
        }
    }
}

//! Syncer configuration

use std::time::Duration;

use thiserror::Error;

use crate::extra::MIN_EXTRA_LEN;
use crate::node::{pool_changes_url, DEFAULT_REQUEST_TIMEOUT_MS};

/// Default polling interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default node host (local daemon RPC port)
pub const DEFAULT_NODE_HOST: &str = "127.0.0.1:11898";

/// Errors raised while validating configuration
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid node host: {0}")]
    InvalidHost(String),

    #[error("Poll interval must be greater than zero")]
    ZeroPollInterval,

    #[error("Request timeout must be greater than zero")]
    ZeroRequestTimeout,

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Configuration for the mempool syncer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncerConfig {
    /// Node host with optional port, without scheme
    pub node_host: String,
    /// Interval between poll ticks in milliseconds
    pub poll_interval_ms: u64,
    /// Timeout for a single node request in milliseconds
    pub request_timeout_ms: u64,
    /// Minimum raw extra length worth parsing
    pub min_extra_len: usize,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            node_host: DEFAULT_NODE_HOST.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            min_extra_len: MIN_EXTRA_LEN,
        }
    }
}

impl SyncerConfig {
    /// Create a new config for the given node host
    pub fn with_host(node_host: impl Into<String>) -> Self {
        Self {
            node_host: node_host.into(),
            ..Default::default()
        }
    }

    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn with_request_timeout_ms(mut self, request_timeout_ms: u64) -> Self {
        self.request_timeout_ms = request_timeout_ms;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Whether a slow request can outlast a whole tick
    ///
    /// Allowed, since overrun ticks are skipped rather than queued.
    pub fn timeout_exceeds_interval(&self) -> bool {
        self.request_timeout_ms > self.poll_interval_ms
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        pool_changes_url(&self.node_host).map_err(|e| ConfigError::InvalidHost(e.to_string()))?;

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::ZeroRequestTimeout);
        }

        Ok(())
    }
}

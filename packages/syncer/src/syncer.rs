//! Mempool Syncer
//!
//! Polls the node's pool change set on a fixed cadence and feeds every added
//! transaction through codec, classifier, dedup ledger and hand-off.
//!
//! Ticks never overlap: the tick body is awaited inside the timer loop, and
//! ticks missed while a slow poll was in flight are skipped rather than queued.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, SyncerConfig};
use crate::envelope::{classify_extra, Envelope};
use crate::handoff::{Handoff, HandoffOutcome};
use crate::ledger::DedupLedger;
use crate::node::{NodeClient, NodeError, PoolTransaction};

/// Errors that abort a whole tick or prevent startup
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Node(#[from] NodeError),
}

/// Counters for one poll tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Entries in the node's added transaction list
    pub fetched: usize,
    /// Entries that failed to parse as a transaction
    pub invalid: usize,
    /// Transactions skipped by the dedup ledger
    pub already_known: usize,
    pub unrecognized: usize,
    pub malformed: usize,
    /// Envelopes whose ciphertext was already stored
    pub duplicates: usize,
    pub saved: usize,
    pub decrypted: usize,
    pub save_failures: usize,
}

impl TickReport {
    fn record(&mut self, outcome: HandoffOutcome) {
        match outcome {
            HandoffOutcome::Skipped => self.unrecognized += 1,
            HandoffOutcome::Duplicate => self.duplicates += 1,
            HandoffOutcome::Saved { decrypted } => {
                self.saved += 1;
                if decrypted {
                    self.decrypted += 1;
                }
            }
            HandoffOutcome::SaveFailed => self.save_failures += 1,
        }
    }
}

/// Owns the node client, dedup ledger and hand-off for one node
pub struct Syncer {
    node: NodeClient,
    ledger: DedupLedger,
    handoff: Handoff,
    poll_interval: Duration,
    min_extra_len: usize,
    ticks: u64,
}

impl Syncer {
    /// Create a syncer from validated configuration and an injected ledger
    pub fn new(config: &SyncerConfig, ledger: DedupLedger, handoff: Handoff) -> Result<Self, SyncError> {
        config.validate()?;
        if config.timeout_exceeds_interval() {
            warn!(
                timeout_ms = config.request_timeout_ms,
                interval_ms = config.poll_interval_ms,
                "Request timeout exceeds poll interval; slow polls will skip ticks"
            );
        }

        let node = NodeClient::new(&config.node_host, config.request_timeout())?;
        info!(endpoint = %node.endpoint(), "Syncer configured");

        Ok(Self {
            node,
            ledger,
            handoff,
            poll_interval: config.poll_interval(),
            min_extra_len: config.min_extra_len,
            ticks: 0,
        })
    }

    pub fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    /// Number of ticks started so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Fetch the pool change set once and process every added transaction
    pub async fn poll_once(&mut self) -> Result<TickReport, SyncError> {
        let changes = self.node.get_pool_changes_lite().await?;
        let mut report = TickReport {
            fetched: changes.added_txs.len(),
            ..Default::default()
        };

        if report.fetched == 0 {
            debug!("Got empty transaction array");
            return Ok(report);
        }

        for parsed in changes.into_transactions() {
            match parsed {
                Ok(tx) => self.process_transaction(tx, &mut report).await,
                Err(e) => {
                    warn!(error = %e, "Skipping unparseable pool transaction");
                    report.invalid += 1;
                }
            }
        }

        Ok(report)
    }

    /// Run one transaction through the pipeline
    ///
    /// The hash is remembered before any hand-off, so a transaction whose
    /// save fails is not retried in this run.
    pub async fn process_transaction(&mut self, tx: PoolTransaction, report: &mut TickReport) {
        let tx_hash = tx.transaction_hash.as_str();

        if self.ledger.seen(tx_hash) {
            debug!(tx_hash, "Transaction is already known");
            report.already_known += 1;
            return;
        }
        self.ledger.remember(tx_hash);

        let envelope = match classify_extra(tx.extra(), self.min_extra_len) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(tx_hash, error = %e, "Skipping malformed envelope");
                report.malformed += 1;
                return;
            }
        };

        if envelope == Envelope::Unrecognized {
            report.unrecognized += 1;
            return;
        }

        let outcome = self.handoff.deliver(tx_hash, envelope).await;
        report.record(outcome);
    }

    /// Run one tick, logging instead of returning errors
    pub async fn tick(&mut self) -> Option<TickReport> {
        self.ticks += 1;
        match self.poll_once().await {
            Ok(report) => {
                if report.saved > 0 {
                    info!(tick = self.ticks, ?report, "Tick complete");
                } else {
                    debug!(tick = self.ticks, ?report, "Tick complete");
                }
                Some(report)
            }
            Err(SyncError::Node(e)) if e.is_network() => {
                warn!(tick = self.ticks, error = %e, "NetworkError: pool changes request failed");
                None
            }
            Err(e) => {
                warn!(tick = self.ticks, error = %e, "DecodeError: tick aborted");
                None
            }
        }
    }

    /// Poll on a fixed interval until `shutdown` resolves
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(interval_ms = self.poll_interval.as_millis() as u64, "Background syncing started");

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = async {
                    ticker.tick().await;
                    self.tick().await;
                } => {}
            }
        }

        info!(ticks = self.ticks, known = self.ledger.len(), "Background syncing stopped");
    }
}

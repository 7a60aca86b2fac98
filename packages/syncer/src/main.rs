//! Hugin Syncer daemon
//!
//! Polls a node's transaction pool and stores encrypted posts found in
//! transaction extra fields. Every option is read from the environment.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hugin_syncer::config::{SyncerConfig, DEFAULT_POLL_INTERVAL_MS};
use hugin_syncer::extra::MIN_EXTRA_LEN;
use hugin_syncer::node::DEFAULT_REQUEST_TIMEOUT_MS;
use hugin_syncer::publisher::DEFAULT_CHANNEL;
use hugin_syncer::store::DEFAULT_NAMESPACE;
use hugin_syncer::{
    DedupLedger, Handoff, MemoryPostStore, NoopNotifier, Notifier, PostStore, RedisNotifier,
    RedisPostStore, Syncer,
};

#[derive(Parser, Debug)]
#[command(name = "hugin-syncer")]
#[command(version, about, long_about = None)]
struct Args {
    /// Node host with optional port, e.g. `node.example.org:11898`
    #[arg(long, env = "SYS_NODE_HOSTNAME")]
    node_hostname: String,

    #[arg(long, env = "SYS_POLL_INTERVAL_MS", default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    poll_interval_ms: u64,

    #[arg(long, env = "SYS_REQUEST_TIMEOUT_MS", default_value_t = DEFAULT_REQUEST_TIMEOUT_MS)]
    request_timeout_ms: u64,

    #[arg(long, env = "SYS_MIN_EXTRA_LEN", default_value_t = MIN_EXTRA_LEN)]
    min_extra_len: usize,

    /// Redis URL for the post store and notifications; in-memory store if unset
    #[arg(long, env = "SYS_REDIS_URL")]
    redis_url: Option<String>,

    #[arg(long, env = "SYS_REDIS_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    redis_namespace: String,

    #[arg(long, env = "SYS_REDIS_CHANNEL", default_value = DEFAULT_CHANNEL)]
    redis_channel: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = SyncerConfig {
        node_host: args.node_hostname.clone(),
        poll_interval_ms: args.poll_interval_ms,
        request_timeout_ms: args.request_timeout_ms,
        min_extra_len: args.min_extra_len,
    };

    let (store, notifier) = collaborators(&args).await?;
    let handoff = Handoff::new(store, notifier);

    let mut syncer = Syncer::new(&config, DedupLedger::new(), handoff)
        .context("failed to configure syncer")?;

    syncer.run(shutdown_signal()).await;
    info!("Syncer shutdown gracefully");
    Ok(())
}

async fn collaborators(args: &Args) -> Result<(Arc<dyn PostStore>, Arc<dyn Notifier>)> {
    let Some(redis_url) = args.redis_url.as_deref() else {
        warn!("SYS_REDIS_URL not set; posts are kept in memory and not published");
        return Ok((Arc::new(MemoryPostStore::new()), Arc::new(NoopNotifier)));
    };

    let store = RedisPostStore::connect(redis_url, args.redis_namespace.clone())
        .await
        .context("failed to connect to Redis")?;
    let notifier = RedisNotifier::new(store.connection(), args.redis_channel.clone());
    info!(namespace = %args.redis_namespace, channel = %args.redis_channel, "Connected to Redis");

    Ok((Arc::new(store), Arc::new(notifier)))
}

/// Wait for SIGTERM or SIGINT (Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Error waiting for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Error setting up SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, initiating graceful shutdown...");
}

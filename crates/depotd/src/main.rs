//! Depot worker daemon.
//!
//! Hosts the delayed-retry scheduler: drains the broker subscriptions for
//! cache invalidations and queued uploads, executing both through the
//! shared engine. The RPC services sit in front of the same crates; this
//! binary is the background half of the system.

use anyhow::{Context, Result};
use clap::Parser;
use depot_cache::{LockManager, ReadThroughCache, RedisCacheBackend, RedisLockBackend};
use depot_core::config::AppConfig;
use depot_engine::{AsyncIngestAdapter, BackendSet, DedupResolver, IngestPipeline};
use depot_metadata::{MetaStore, SqliteStore};
use depot_scheduler::{
    run_intake, HandlerRegistry, InvalidateCacheHandler, NatsQueue, PersistFileHandler,
    Scheduler, TaskKind,
};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Depot - content-addressable file vault worker
#[derive(Parser, Debug)]
#[command(name = "depotd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "DEPOT_CONFIG", default_value = "config/depot.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config: AppConfig = Figment::new()
        .merge(Toml::file(&args.config))
        .merge(Env::prefixed("DEPOT_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    run(config).await
}

async fn run(config: AppConfig) -> Result<()> {
    // Metadata store (runs migrations on open).
    let meta: Arc<dyn MetaStore> = Arc::new(
        SqliteStore::new(&config.metadata.path)
            .await
            .context("failed to open metadata store")?,
    );
    meta.health_check()
        .await
        .context("metadata store unhealthy")?;

    // Storage backends.
    let (local, cloud) = depot_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    let backends = Arc::new(BackendSet::new(local, cloud));

    // Ingestion engine shared by both task kinds.
    let resolver = Arc::new(DedupResolver::new(meta.clone()));
    let pipeline = Arc::new(IngestPipeline::new(resolver, backends));
    let adapter = Arc::new(AsyncIngestAdapter::new(
        pipeline,
        config.storage.default_backend,
    ));

    // Cache and locks.
    let redis_client =
        redis::Client::open(config.cache.url.as_str()).context("invalid redis url")?;
    let redis_conn = redis_client
        .get_multiplexed_async_connection()
        .await
        .context("failed to connect to redis")?;
    let locks = LockManager::new(
        Arc::new(RedisLockBackend::new(redis_conn.clone())),
        config.cache.lock.clone(),
    );
    let cache = Arc::new(ReadThroughCache::new(
        Arc::new(RedisCacheBackend::new(redis_conn)),
        locks,
        "user:",
        Duration::from_secs(config.cache.user_ttl_secs),
    ));

    // Broker subscriptions, one per task kind.
    let queue = NatsQueue::connect(&config.queue.url)
        .await
        .context("failed to connect to NATS")?;
    let invalidate_sub = queue
        .subscribe(TaskKind::InvalidateCache, &config.queue.consumer_prefix)
        .await
        .context("failed to open invalidate subscription")?;
    let persist_sub = queue
        .subscribe(TaskKind::PersistFile, &config.queue.consumer_prefix)
        .await
        .context("failed to open persist subscription")?;

    // Scheduler executor plus intake feeders.
    let registry = HandlerRegistry::new(
        Arc::new(InvalidateCacheHandler::new(cache)),
        Arc::new(PersistFileHandler::new(adapter)),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (scheduler, handle) = Scheduler::new(
        registry,
        Duration::from_secs(config.scheduler.tick_secs),
        Duration::from_millis(config.scheduler.retry_backoff_millis),
        shutdown_rx,
    );

    let executor = tokio::spawn(scheduler.run());
    let invalidate_feeder = tokio::spawn(run_intake(invalidate_sub, handle.clone()));
    let persist_feeder = tokio::spawn(run_intake(persist_sub, handle));

    tracing::info!("depotd running");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    // In-flight work finishes inside run(); un-acked messages will be
    // redelivered to the next instance.
    executor.await.context("executor task panicked")?;
    invalidate_feeder.abort();
    persist_feeder.abort();

    Ok(())
}

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

use crate::{
    api::handler::AppState,
    batcher::CallBatcher,
    chain::{JsonRpcClient, LedgerClient},
    clock::{Clock, SystemClock},
    config::Config,
    error::AppResult,
    registry::{ContractRegistry, ContractStore, InMemoryStore, MetadataCache, PgContractStore},
    settlement::{ChainStateReader, ContractFeed, ExpiryScheduler, LifecycleHandler},
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing keeper components ...");

    let store: Arc<dyn ContractStore> = match config.database_url() {
        Some(url) => Arc::new(PgContractStore::new(initialize_database(url).await?)),
        None => {
            warn!("⚠️  DATABASE_URL not set - contracts are kept in memory only");
            Arc::new(InMemoryStore::new())
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let client: Arc<dyn LedgerClient> = Arc::new(JsonRpcClient::new(config.rpc()?)?);
    info!("✅ Ledger client initialized for {}", config.rpc_url);

    let batcher_config = config.batcher()?;
    match batcher_config.multicall_address {
        Some(address) => info!("✅ Read aggregator configured at {}", address),
        None => warn!("⚠️  Read aggregator disabled - falling back to individual calls"),
    }
    let batcher = Arc::new(CallBatcher::new(client, batcher_config));
    let reader = Arc::new(ChainStateReader::new(batcher));

    let cache = Arc::new(MetadataCache::new(config.list_cache_ttl(), clock.clone()));
    let registry = Arc::new(ContractRegistry::new(store, cache.clone(), clock));
    info!("✅ Contract registry initialized ({} store)", registry.backend());

    let feed = Arc::new(ContractFeed::new(registry.clone(), reader.clone()));
    let scheduler = Arc::new(ExpiryScheduler::new(
        registry.clone(),
        reader,
        config.scheduler(),
    ));
    let lifecycle = Arc::new(LifecycleHandler::new(registry.clone(), scheduler.clone()));

    info!("🔄 Recovering expiry timers...");
    let report = scheduler.recover().await?;
    info!(
        "✅ Recovery sweep done: {} due, {} submitted",
        report.due, report.submitted
    );

    scheduler.clone().start()?;
    info!(
        "✅ Expiry scheduler started (sweep every {}s)",
        config.sweep_interval_secs
    );

    // Periodic cache eviction
    let ttl = config.list_cache_ttl().max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ttl * 4);
        loop {
            interval.tick().await;
            cache.cleanup_expired();
        }
    });

    Ok(AppState {
        registry,
        feed,
        scheduler,
        lifecycle,
        started_at: Utc::now(),
    })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}

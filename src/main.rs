use std::sync::Arc;
use std::time::Duration;

use axum::middleware::from_fn;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

use folio_api::{
    api::{create_router, AppState},
    config::Config,
    db::{
        create_pool, create_redis_client, spawn_cache_janitor, CacheWriterHandle,
        MemoryRecommendationCache, PgStore, RecommendationCache, RedisRecommendationCache,
    },
    middleware::{make_span_with_request_id, request_id_middleware},
    store::{ExperimentStore, MemoryStore, SignalStore},
    tasks::WorkerPool,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("folio_api=info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = Config::from_env()?;
    let settings = config.engine_settings();

    // Storage
    let (signals, experiments): (Arc<dyn SignalStore>, Arc<dyn ExperimentStore>) =
        match &config.database_url {
            Some(url) => {
                let store = PgStore::new(create_pool(url).await?);
                store.migrate().await?;
                tracing::info!("Using PostgreSQL store");
                let store = Arc::new(store);
                let signals: Arc<dyn SignalStore> = store.clone();
                (signals, store)
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory store");
                let store = Arc::new(MemoryStore::new());
                let signals: Arc<dyn SignalStore> = store.clone();
                (signals, store)
            }
        };

    // Cache
    let mut cache_writer: Option<CacheWriterHandle> = None;
    let cache: Arc<dyn RecommendationCache> = match &config.redis_url {
        Some(url) => {
            let (cache, handle) = RedisRecommendationCache::new(create_redis_client(url)?).await;
            cache_writer = Some(handle);
            tracing::info!("Using Redis recommendation cache");
            Arc::new(cache)
        }
        None => {
            tracing::info!("REDIS_URL not set, using in-memory recommendation cache");
            Arc::new(MemoryRecommendationCache::new())
        }
    };

    let shutdown = CancellationToken::new();
    let janitor = spawn_cache_janitor(
        cache.clone(),
        Duration::from_secs(config.cache_cleanup_interval_secs),
        shutdown.clone(),
    );

    let (pool, pool_handle) = WorkerPool::new(config.task_workers, config.task_queue_capacity);

    let state = AppState::new(signals, experiments, cache, Arc::new(pool), settings)
        .with_shutdown(shutdown.clone());

    let app = create_router(state)
        .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
        .layer(from_fn(request_id_middleware))
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Drain background work before exiting
    pool_handle.shutdown().await;
    if let Some(handle) = cache_writer {
        handle.shutdown().await;
    }
    if let Err(e) = janitor.await {
        tracing::warn!(error = %e, "Cache janitor did not stop cleanly");
    }

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    tracing::info!("Shutdown signal received, draining");
    shutdown.cancel();
}

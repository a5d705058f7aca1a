use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use promo_api::{app, state::AppState, worker};
use promo_core::{Clock, OfferStore, SystemClock, TransitionQueue};
use promo_store::app_config::{Config, StoreBackend};
use promo_store::{
    DbClient, InMemoryOfferStore, InMemoryTransitionQueue, PostgresOfferStore, RedisClient, RedisTransitionQueue,
};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "promo_api=debug,promo_offer=debug,promo_store=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Promo API on port {}", config.server.port);

    let (store, queue): (Arc<dyn OfferStore>, Arc<dyn TransitionQueue>) = match config.store.backend {
        StoreBackend::Postgres => {
            let db = DbClient::connect(&config.database)
                .await
                .context("Failed to connect to PostgreSQL")?;
            db.migrate().await.context("Failed to run migrations")?;
            db.ping().await.context("PostgreSQL health check failed")?;

            let redis = RedisClient::new(&config.redis.url)
                .await
                .context("Failed to connect to Redis")?;
            if let Err(e) = redis.ping().await {
                tracing::warn!("Redis not reachable yet, offers will save in degraded mode: {}", e);
            }

            let store: Arc<dyn OfferStore> = Arc::new(PostgresOfferStore::new(db.pool.clone()));
            let queue: Arc<dyn TransitionQueue> = Arc::new(RedisTransitionQueue::new(redis));
            (store, queue)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory offer store; data is lost on restart");
            let store: Arc<dyn OfferStore> = Arc::new(InMemoryOfferStore::new());
            let queue: Arc<dyn TransitionQueue> = Arc::new(InMemoryTransitionQueue::new());
            (store, queue)
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_handle = if config.worker.enabled {
        Some(worker::start_transition_worker(
            store.clone(),
            queue.clone(),
            clock,
            &config.worker,
            shutdown_rx,
        ))
    } else {
        tracing::info!("Transition worker disabled by config");
        None
    };

    let app = app(AppState::new(store, queue));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = worker_handle {
        handle.await?;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

use std::sync::Arc;

use promo_core::{Clock, OfferStore, TransitionQueue};
use promo_offer::{TransitionExecutor, TransitionWorker, WorkerSettings};
use promo_store::app_config::WorkerConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub fn worker_settings(config: &WorkerConfig) -> WorkerSettings {
    WorkerSettings {
        poll_interval: config.poll_interval(),
        batch_size: config.batch_size.max(1),
        lease: config.lease(),
        retry_backoff: config.retry_backoff(),
        max_attempts: config.max_attempts.max(1),
    }
}

/// Spawn the background loop that fires due offer transitions
pub fn start_transition_worker(
    store: Arc<dyn OfferStore>,
    queue: Arc<dyn TransitionQueue>,
    clock: Arc<dyn Clock>,
    config: &WorkerConfig,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let executor = Arc::new(TransitionExecutor::new(store, clock.clone()));
    let worker = TransitionWorker::new(queue, executor, clock, worker_settings(config));
    tokio::spawn(worker.run(shutdown))
}

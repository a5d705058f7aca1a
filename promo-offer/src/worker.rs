use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use promo_core::{Clock, CoreResult, TransitionQueue};
use promo_shared::TransitionJob;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::executor::{TransitionExecutor, TransitionOutcome};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub lease: Duration,
    pub retry_backoff: Duration,
    pub max_attempts: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 50,
            lease: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(15),
            max_attempts: 10,
        }
    }
}

/// Counts for a single polling pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub claimed: usize,
    pub applied: usize,
    pub skipped: usize,
    pub deferred: usize,
    pub retried: usize,
    pub dropped: usize,
}

/// Drains due jobs from the transition queue into the executor
pub struct TransitionWorker {
    queue: Arc<dyn TransitionQueue>,
    executor: Arc<TransitionExecutor>,
    clock: Arc<dyn Clock>,
    settings: WorkerSettings,
}

impl TransitionWorker {
    pub fn new(
        queue: Arc<dyn TransitionQueue>,
        executor: Arc<TransitionExecutor>,
        clock: Arc<dyn Clock>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            executor,
            clock,
            settings,
        }
    }

    pub async fn run_once(&self) -> CoreResult<WorkerReport> {
        let now = self.clock.now();
        let jobs = self
            .queue
            .claim_due(now, self.settings.batch_size, self.settings.lease)
            .await?;

        let mut report = WorkerReport {
            claimed: jobs.len(),
            ..Default::default()
        };

        for job in jobs {
            match self.executor.execute(&job).await {
                Ok(TransitionOutcome::Deferred { until, version }) => {
                    // Left unacknowledged when re-queueing fails, so the lease brings it back
                    if self.defer(&job, until, version).await {
                        report.deferred += 1;
                        self.acknowledge(&job).await;
                    }
                }
                Ok(outcome) => {
                    if outcome.is_applied() {
                        report.applied += 1;
                    } else {
                        report.skipped += 1;
                    }
                    self.acknowledge(&job).await;
                }
                Err(e) if job.attempts >= self.settings.max_attempts => {
                    error!(
                        "Dropping {} for offer {} after {} attempts: {}",
                        job.kind, job.offer_id, job.attempts, e
                    );
                    report.dropped += 1;
                    self.acknowledge(&job).await;
                }
                Err(e) => {
                    let backoff = chrono::Duration::from_std(self.settings.retry_backoff)
                        .unwrap_or_else(|_| chrono::Duration::seconds(15));
                    warn!(
                        "{} for offer {} failed (attempt {}), retrying: {}",
                        job.kind, job.offer_id, job.attempts, e
                    );
                    report.retried += 1;
                    if let Err(e) = self.queue.retry(&job, now + backoff).await {
                        warn!("Could not re-queue job {}: {}", job.id, e);
                    }
                }
            }
        }

        Ok(report)
    }

    /// Re-queue a job that fired before the offer's current trigger
    async fn defer(&self, job: &TransitionJob, until: DateTime<Utc>, version: i64) -> bool {
        let next = TransitionJob::new(job.offer_id, job.kind, until).with_version(version);
        match self.queue.schedule(&next).await {
            Ok(stored) => {
                if stored {
                    debug!("Moved {} for offer {} to {}", job.kind, job.offer_id, until);
                }
                true
            }
            Err(e) => {
                warn!("Could not re-queue {} for offer {}: {}", job.kind, job.offer_id, e);
                false
            }
        }
    }

    // An unacknowledged job is re-delivered after its lease
    async fn acknowledge(&self, job: &TransitionJob) {
        if let Err(e) = self.queue.complete(job).await {
            warn!("Could not acknowledge job {}: {}", job.id, e);
        }
    }

    /// Poll until `shutdown` flips to `true` or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Transition worker started (poll every {:?}, batch {})",
            self.settings.poll_interval, self.settings.batch_size
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let full_batch = match self.run_once().await {
                Ok(report) => report.claimed >= self.settings.batch_size,
                Err(e) => {
                    error!("Transition worker poll failed: {}", e);
                    false
                }
            };
            if full_batch {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Transition worker stopped");
    }
}

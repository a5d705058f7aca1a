use std::sync::Arc;

use chrono::{DateTime, Utc};
use promo_core::{CoreError, CoreResult, TransitionQueue};
use promo_shared::{TransitionJob, TransitionKind};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Turns (offer, instant, kind) into a queued transition job. A new job
/// replaces the pending job of the same kind for the same offer, unless
/// that one was planned from a newer `version` of the offer.
#[derive(Clone)]
pub struct TransitionScheduler {
    queue: Arc<dyn TransitionQueue>,
}

impl TransitionScheduler {
    pub fn new(queue: Arc<dyn TransitionQueue>) -> Self {
        Self { queue }
    }

    /// Returns `None` when a job planned from a newer offer version is
    /// already pending.
    pub async fn schedule_enable(
        &self,
        offer_id: Uuid,
        at: DateTime<Utc>,
        version: i64,
    ) -> CoreResult<Option<TransitionJob>> {
        self.schedule(TransitionJob::new(offer_id, TransitionKind::Enable, at).with_version(version))
            .await
    }

    pub async fn schedule_disable(
        &self,
        offer_id: Uuid,
        at: DateTime<Utc>,
        version: i64,
    ) -> CoreResult<Option<TransitionJob>> {
        self.schedule(TransitionJob::new(offer_id, TransitionKind::Disable, at).with_version(version))
            .await
    }

    /// Best-effort removal of every pending job for an offer
    pub async fn cancel_all(&self, offer_id: Uuid) {
        for kind in [TransitionKind::Enable, TransitionKind::Disable] {
            match self.queue.cancel(offer_id, kind).await {
                Ok(true) => debug!("Cancelled pending {} for offer {}", kind, offer_id),
                Ok(false) => {}
                Err(e) => warn!("Could not cancel pending {} for offer {}: {}", kind, offer_id, e),
            }
        }
    }

    async fn schedule(&self, job: TransitionJob) -> CoreResult<Option<TransitionJob>> {
        let stored = self.queue.schedule(&job).await.map_err(|e| match e {
            CoreError::SchedulingFailed(_) => e,
            other => CoreError::SchedulingFailed(other.to_string()),
        })?;

        if !stored {
            debug!(
                "Offer {} already has a {} planned from a newer version than {}",
                job.offer_id, job.kind, job.version
            );
            return Ok(None);
        }

        info!("Scheduled {} for offer {} at {} (job {})", job.kind, job.offer_id, job.run_at, job.id);
        Ok(Some(job))
    }
}

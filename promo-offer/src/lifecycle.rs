use std::sync::Arc;

use promo_core::{CoreResult, OfferStore};
use promo_shared::{ChangedFields, Offer, OfferChange, OfferDraft, OfferField, OfferPatch, TransitionJob};
use tracing::warn;
use uuid::Uuid;

use crate::scheduler::TransitionScheduler;

/// Outcome of a create/update. The write itself always succeeded; a
/// non-empty `scheduling_failures` means a timed transition may not happen.
#[derive(Debug, Clone)]
pub struct OfferWrite {
    pub offer: Offer,
    pub changed: ChangedFields,
    pub scheduled: Vec<TransitionJob>,
    pub scheduling_failures: Vec<String>,
}

impl OfferWrite {
    fn new(change: OfferChange) -> Self {
        Self {
            offer: change.offer,
            changed: change.changed,
            scheduled: Vec::new(),
            scheduling_failures: Vec::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.scheduling_failures.is_empty()
    }

    fn record(&mut self, result: CoreResult<Option<TransitionJob>>) {
        match result {
            Ok(Some(job)) => self.scheduled.push(job),
            Ok(None) => {}
            Err(e) => {
                warn!("Offer {} saved but transition not scheduled: {}", self.offer.id, e);
                self.scheduling_failures.push(e.to_string());
            }
        }
    }
}

/// Persists offer writes, then schedules transitions for whichever
/// trigger timestamps the write changed.
#[derive(Clone)]
pub struct OfferLifecycle {
    store: Arc<dyn OfferStore>,
    scheduler: TransitionScheduler,
}

impl OfferLifecycle {
    pub fn new(store: Arc<dyn OfferStore>, scheduler: TransitionScheduler) -> Self {
        Self { store, scheduler }
    }

    pub async fn create_offer(&self, draft: OfferDraft) -> CoreResult<OfferWrite> {
        let change = self.store.create(draft).await?;
        let mut write = OfferWrite::new(change);
        let (id, starts_at, ends_at) = (write.offer.id, write.offer.starts_at, write.offer.ends_at);
        let version = write.offer.lock_version;

        write.record(self.scheduler.schedule_enable(id, starts_at, version).await);
        if let Some(ends_at) = ends_at {
            write.record(self.scheduler.schedule_disable(id, ends_at, version).await);
        }
        Ok(write)
    }

    pub async fn update_offer(&self, id: Uuid, patch: OfferPatch) -> CoreResult<OfferWrite> {
        let change = self.store.update(id, patch).await?;
        let mut write = OfferWrite::new(change);
        let (starts_at, ends_at) = (write.offer.starts_at, write.offer.ends_at);
        // Jobs carry the version this write produced, so a slower
        // overlapping edit cannot replace them with an older plan
        let version = write.offer.lock_version;

        if write.changed.contains(OfferField::StartsAt) {
            write.record(self.scheduler.schedule_enable(id, starts_at, version).await);
        }
        // A cleared end leaves any pending disable to no-op at fire time
        if write.changed.contains(OfferField::EndsAt) {
            if let Some(ends_at) = ends_at {
                write.record(self.scheduler.schedule_disable(id, ends_at, version).await);
            }
        }
        Ok(write)
    }

    pub async fn delete_offer(&self, id: Uuid) -> CoreResult<()> {
        self.store.delete(id).await?;
        self.scheduler.cancel_all(id).await;
        Ok(())
    }

    pub async fn find_offer(&self, id: Uuid) -> CoreResult<Offer> {
        self.store.find(id).await
    }

    pub async fn list_offers(&self) -> CoreResult<Vec<Offer>> {
        self.store.list().await
    }

    pub async fn list_enabled_offers(&self) -> CoreResult<Vec<Offer>> {
        self.store.list_enabled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use promo_core::CoreError;
    use promo_shared::TransitionKind;
    use promo_store::{InMemoryOfferStore, InMemoryTransitionQueue};

    fn valid_draft() -> OfferDraft {
        let now = Utc::now();
        OfferDraft {
            advertiser_name: Some("Advertiser 1".to_string()),
            url: Some("http://example.com".to_string()),
            description: Some("Description text".to_string()),
            starts_at: Some(now),
            ends_at: Some(now + Duration::weeks(1)),
            premium: false,
        }
    }

    fn setup() -> (Arc<InMemoryTransitionQueue>, OfferLifecycle) {
        let queue = Arc::new(InMemoryTransitionQueue::new());
        let store = Arc::new(InMemoryOfferStore::new());
        let lifecycle = OfferLifecycle::new(store, TransitionScheduler::new(queue.clone()));
        (queue, lifecycle)
    }

    #[tokio::test]
    async fn test_create_schedules_enable_and_disable() {
        let (queue, lifecycle) = setup();
        let write = lifecycle.create_offer(valid_draft()).await.unwrap();

        assert!(!write.is_degraded());
        assert_eq!(write.scheduled.len(), 2);
        let enable = queue.pending(write.offer.id, TransitionKind::Enable).await.unwrap();
        let disable = queue.pending(write.offer.id, TransitionKind::Disable).await.unwrap();
        assert_eq!(enable.run_at, write.offer.starts_at);
        assert_eq!(Some(disable.run_at), write.offer.ends_at);
    }

    #[tokio::test]
    async fn test_create_without_end_never_schedules_disable() {
        let (queue, lifecycle) = setup();
        let draft = OfferDraft { ends_at: None, ..valid_draft() };
        let write = lifecycle.create_offer(draft).await.unwrap();

        assert_eq!(write.scheduled.len(), 1);
        assert!(queue.pending(write.offer.id, TransitionKind::Disable).await.is_none());
    }

    #[tokio::test]
    async fn test_description_only_update_schedules_nothing() {
        let (queue, lifecycle) = setup();
        let offer = lifecycle.create_offer(valid_draft()).await.unwrap().offer;
        let calls_before = queue.schedule_calls();
        let enable_before = queue.pending(offer.id, TransitionKind::Enable).await;

        let patch = OfferPatch {
            description: Some("New copy".to_string()),
            ..Default::default()
        };
        let write = lifecycle.update_offer(offer.id, patch).await.unwrap();

        assert!(write.scheduled.is_empty());
        assert_eq!(queue.schedule_calls(), calls_before);
        assert_eq!(queue.pending(offer.id, TransitionKind::Enable).await, enable_before);
    }

    #[tokio::test]
    async fn test_start_change_reschedules_enable_only() {
        let (queue, lifecycle) = setup();
        let offer = lifecycle.create_offer(valid_draft()).await.unwrap().offer;
        let t2 = offer.starts_at + Duration::days(2);

        let patch = OfferPatch { starts_at: Some(t2), ..Default::default() };
        let write = lifecycle.update_offer(offer.id, patch).await.unwrap();

        assert_eq!(write.scheduled.len(), 1);
        assert_eq!(write.scheduled[0].kind, TransitionKind::Enable);
        assert_eq!(queue.pending(offer.id, TransitionKind::Enable).await.unwrap().run_at, t2);
    }

    #[tokio::test]
    async fn test_clearing_end_schedules_nothing() {
        let (queue, lifecycle) = setup();
        let offer = lifecycle.create_offer(valid_draft()).await.unwrap().offer;
        let calls_before = queue.schedule_calls();

        let patch = OfferPatch { ends_at: Some(None), ..Default::default() };
        let write = lifecycle.update_offer(offer.id, patch).await.unwrap();

        assert!(write.changed.contains(OfferField::EndsAt));
        assert!(write.scheduled.is_empty());
        assert_eq!(queue.schedule_calls(), calls_before);
    }

    #[tokio::test]
    async fn test_validation_failure_skips_scheduling() {
        let (queue, lifecycle) = setup();
        let result = lifecycle.create_offer(OfferDraft::default()).await;

        assert!(matches!(result, Err(CoreError::ValidationFailed(_))));
        assert_eq!(queue.schedule_calls(), 0);
        assert_eq!(queue.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_queue_outage_is_degraded_success() {
        let (queue, lifecycle) = setup();
        queue.set_unavailable(true);

        let write = lifecycle.create_offer(valid_draft()).await.unwrap();
        assert!(write.is_degraded());
        assert_eq!(write.scheduling_failures.len(), 2);
        assert!(write.scheduled.is_empty());

        // The record is kept
        let stored = lifecycle.find_offer(write.offer.id).await.unwrap();
        assert_eq!(stored.id, write.offer.id);
    }

    #[tokio::test]
    async fn test_delete_cancels_pending_jobs() {
        let (queue, lifecycle) = setup();
        let offer = lifecycle.create_offer(valid_draft()).await.unwrap().offer;

        lifecycle.delete_offer(offer.id).await.unwrap();

        assert_eq!(queue.pending_count().await, 0);
        assert!(matches!(lifecycle.find_offer(offer.id).await, Err(CoreError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_edits_leave_latest_start_pending() {
        let (queue, lifecycle) = setup();
        let offer = lifecycle.create_offer(valid_draft()).await.unwrap().offer;
        let (id, base) = (offer.id, offer.starts_at);

        for round in 1..=20i64 {
            let a = lifecycle.clone();
            let b = lifecycle.clone();
            let t_a = base + Duration::hours(round);
            let t_b = base + Duration::hours(round) + Duration::minutes(30);

            let (first, second) = tokio::join!(
                tokio::spawn(async move {
                    a.update_offer(id, OfferPatch { starts_at: Some(t_a), ..Default::default() }).await
                }),
                tokio::spawn(async move {
                    b.update_offer(id, OfferPatch { starts_at: Some(t_b), ..Default::default() }).await
                }),
            );
            first.unwrap().unwrap();
            second.unwrap().unwrap();

            let stored = lifecycle.find_offer(id).await.unwrap();
            let pending = queue.pending(id, TransitionKind::Enable).await.unwrap();
            assert_eq!(pending.run_at, stored.starts_at);
            assert_eq!(pending.version, stored.lock_version);
        }
    }

    #[tokio::test]
    async fn test_versions_follow_store_order_not_schedule_order() {
        let queue = Arc::new(InMemoryTransitionQueue::new());
        let store = Arc::new(InMemoryOfferStore::new());
        let scheduler = TransitionScheduler::new(queue.clone());
        let offer = store.create(valid_draft()).await.unwrap().offer;
        let t_a = offer.starts_at + Duration::hours(1);
        let t_b = offer.starts_at + Duration::hours(2);

        let a = store
            .update(offer.id, OfferPatch { starts_at: Some(t_a), ..Default::default() })
            .await
            .unwrap()
            .offer;
        let b = store
            .update(offer.id, OfferPatch { starts_at: Some(t_b), ..Default::default() })
            .await
            .unwrap()
            .offer;

        // Schedule calls land in the opposite order of the writes
        scheduler.schedule_enable(offer.id, b.starts_at, b.lock_version).await.unwrap();
        scheduler.schedule_enable(offer.id, a.starts_at, a.lock_version).await.unwrap();

        assert_eq!(queue.pending(offer.id, TransitionKind::Enable).await.unwrap().run_at, t_b);
    }
}

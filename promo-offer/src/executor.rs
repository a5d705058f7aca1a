use std::sync::Arc;

use chrono::{DateTime, Utc};
use promo_core::{Clock, CoreError, CoreResult, OfferStore};
use promo_shared::{OfferState, TransitionJob, TransitionKind};
use tracing::{debug, info};
use uuid::Uuid;

/// Compare-and-set attempts before giving the job back to the queue
const MAX_CAS_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied { from: OfferState, to: OfferState },
    AlreadyInState,
    /// The offer has no trigger for this kind (no `ends_at` for disable)
    GuardNotMet,
    /// The trigger moved past `now`; the job belongs at `until`
    Deferred { until: DateTime<Utc>, version: i64 },
    OfferMissing,
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }
}

/// Body of a deferred transition. Re-reads the offer at fire time and
/// only writes when the trigger instant has been reached, so duplicate
/// or superseded jobs are harmless.
pub struct TransitionExecutor {
    store: Arc<dyn OfferStore>,
    clock: Arc<dyn Clock>,
}

impl TransitionExecutor {
    pub fn new(store: Arc<dyn OfferStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn execute(&self, job: &TransitionJob) -> CoreResult<TransitionOutcome> {
        self.apply(job.offer_id, job.kind).await
    }

    pub async fn execute_enable(&self, offer_id: Uuid) -> CoreResult<TransitionOutcome> {
        self.apply(offer_id, TransitionKind::Enable).await
    }

    pub async fn execute_disable(&self, offer_id: Uuid) -> CoreResult<TransitionOutcome> {
        self.apply(offer_id, TransitionKind::Disable).await
    }

    async fn apply(&self, offer_id: Uuid, kind: TransitionKind) -> CoreResult<TransitionOutcome> {
        let target = kind.target_state();

        for _ in 0..MAX_CAS_ATTEMPTS {
            let offer = match self.store.find(offer_id).await {
                Ok(offer) => offer,
                Err(CoreError::NotFound(_)) => {
                    debug!("Skipping {} for deleted offer {}", kind, offer_id);
                    return Ok(TransitionOutcome::OfferMissing);
                }
                Err(e) => return Err(e),
            };

            let now = self.clock.now();
            match kind.trigger(&offer) {
                None => {
                    debug!("Skipping {} for offer {}: no trigger set", kind, offer_id);
                    return Ok(TransitionOutcome::GuardNotMet);
                }
                Some(until) if until > now => {
                    debug!("Deferring {} for offer {} until {}", kind, offer_id, until);
                    return Ok(TransitionOutcome::Deferred { until, version: offer.lock_version });
                }
                Some(_) => {}
            }
            if offer.state == target {
                debug!("Offer {} already {}", offer_id, target);
                return Ok(TransitionOutcome::AlreadyInState);
            }

            match self.store.set_state(offer_id, target, offer.lock_version).await {
                Ok(_) => {
                    info!("Offer {} {} -> {}", offer_id, offer.state, target);
                    return Ok(TransitionOutcome::Applied { from: offer.state, to: target });
                }
                Err(CoreError::Conflict(_)) => {
                    debug!("Offer {} changed under {}, re-checking", offer_id, kind);
                }
                Err(CoreError::NotFound(_)) => return Ok(TransitionOutcome::OfferMissing),
                Err(e) => return Err(e),
            }
        }

        Err(CoreError::Conflict(offer_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use promo_core::ManualClock;
    use promo_shared::{Offer, OfferChange, OfferDraft, OfferPatch};
    use promo_store::InMemoryOfferStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn draft(starts_in: Duration, ends_in: Option<Duration>) -> OfferDraft {
        let now = Utc::now();
        OfferDraft {
            advertiser_name: Some(format!("Advertiser {}", Uuid::new_v4())),
            url: Some("http://example.com".to_string()),
            description: Some("Description text".to_string()),
            starts_at: Some(now + starts_in),
            ends_at: ends_in.map(|d| now + d),
            premium: false,
        }
    }

    fn setup() -> (Arc<InMemoryOfferStore>, Arc<ManualClock>, TransitionExecutor) {
        let store = Arc::new(InMemoryOfferStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let executor = TransitionExecutor::new(store.clone(), clock.clone());
        (store, clock, executor)
    }

    #[tokio::test]
    async fn test_enable_when_start_reached() {
        let (store, _clock, executor) = setup();
        let offer = store.create(draft(-Duration::hours(1), None)).await.unwrap().offer;

        let outcome = executor.execute_enable(offer.id).await.unwrap();
        assert_eq!(outcome, TransitionOutcome::Applied { from: OfferState::Disabled, to: OfferState::Enabled });
        assert_eq!(store.find(offer.id).await.unwrap().state, OfferState::Enabled);
    }

    #[tokio::test]
    async fn test_enable_is_idempotent() {
        let (store, _clock, executor) = setup();
        let offer = store.create(draft(-Duration::hours(1), None)).await.unwrap().offer;

        executor.execute_enable(offer.id).await.unwrap();
        let after_first = store.find(offer.id).await.unwrap();
        let second = executor.execute_enable(offer.id).await.unwrap();

        assert_eq!(second, TransitionOutcome::AlreadyInState);
        assert_eq!(store.find(offer.id).await.unwrap(), after_first);
    }

    #[tokio::test]
    async fn test_enable_before_start_is_noop() {
        let (store, clock, executor) = setup();
        let offer = store.create(draft(Duration::hours(2), None)).await.unwrap().offer;

        assert_eq!(
            executor.execute_enable(offer.id).await.unwrap(),
            TransitionOutcome::Deferred { until: offer.starts_at, version: offer.lock_version }
        );
        assert_eq!(store.find(offer.id).await.unwrap().state, OfferState::Disabled);

        clock.set(offer.starts_at);
        assert!(executor.execute_enable(offer.id).await.unwrap().is_applied());
    }

    #[tokio::test]
    async fn test_disable_requires_end() {
        let (store, clock, executor) = setup();
        let open_ended = store.create(draft(-Duration::hours(1), None)).await.unwrap().offer;
        executor.execute_enable(open_ended.id).await.unwrap();

        clock.advance(Duration::weeks(52));
        assert_eq!(executor.execute_disable(open_ended.id).await.unwrap(), TransitionOutcome::GuardNotMet);
        assert_eq!(store.find(open_ended.id).await.unwrap().state, OfferState::Enabled);
    }

    #[tokio::test]
    async fn test_disable_after_end_regardless_of_state() {
        let (store, clock, executor) = setup();
        let offer = store
            .create(draft(-Duration::hours(1), Some(Duration::weeks(1))))
            .await
            .unwrap()
            .offer;
        executor.execute_enable(offer.id).await.unwrap();

        assert!(matches!(
            executor.execute_disable(offer.id).await.unwrap(),
            TransitionOutcome::Deferred { until, .. } if Some(until) == offer.ends_at
        ));

        clock.advance(Duration::weeks(1) + Duration::minutes(1));
        let outcome = executor.execute_disable(offer.id).await.unwrap();
        assert_eq!(outcome, TransitionOutcome::Applied { from: OfferState::Enabled, to: OfferState::Disabled });

        // Already disabled offers stay disabled
        assert_eq!(executor.execute_disable(offer.id).await.unwrap(), TransitionOutcome::AlreadyInState);
    }

    #[tokio::test]
    async fn test_stale_enable_after_reschedule_is_noop() {
        let (store, _clock, executor) = setup();
        let offer = store.create(draft(-Duration::minutes(5), None)).await.unwrap().offer;
        let patch = OfferPatch {
            starts_at: Some(Utc::now() + Duration::days(3)),
            ..Default::default()
        };
        let moved = store.update(offer.id, patch).await.unwrap().offer;

        assert_eq!(
            executor.execute_enable(offer.id).await.unwrap(),
            TransitionOutcome::Deferred { until: moved.starts_at, version: moved.lock_version }
        );
        assert_eq!(store.find(offer.id).await.unwrap().state, OfferState::Disabled);
    }

    #[tokio::test]
    async fn test_deleted_offer_is_silent_noop() {
        let (store, _clock, executor) = setup();
        let offer = store.create(draft(-Duration::hours(1), None)).await.unwrap().offer;
        store.delete(offer.id).await.unwrap();

        assert_eq!(executor.execute_enable(offer.id).await.unwrap(), TransitionOutcome::OfferMissing);
        assert_eq!(executor.execute_disable(offer.id).await.unwrap(), TransitionOutcome::OfferMissing);
    }

    /// Store whose first `set_state` calls lose the race against an edit
    struct RacingStore {
        inner: InMemoryOfferStore,
        conflicts_left: AtomicU32,
    }

    #[async_trait]
    impl OfferStore for RacingStore {
        async fn create(&self, draft: OfferDraft) -> CoreResult<OfferChange> {
            self.inner.create(draft).await
        }
        async fn update(&self, id: Uuid, patch: OfferPatch) -> CoreResult<OfferChange> {
            self.inner.update(id, patch).await
        }
        async fn find(&self, id: Uuid) -> CoreResult<Offer> {
            self.inner.find(id).await
        }
        async fn delete(&self, id: Uuid) -> CoreResult<()> {
            self.inner.delete(id).await
        }
        async fn list(&self) -> CoreResult<Vec<Offer>> {
            self.inner.list().await
        }
        async fn list_enabled(&self) -> CoreResult<Vec<Offer>> {
            self.inner.list_enabled().await
        }
        async fn set_state(&self, id: Uuid, state: OfferState, expected_version: i64) -> CoreResult<Offer> {
            if self.conflicts_left.load(Ordering::SeqCst) > 0 {
                self.conflicts_left.fetch_sub(1, Ordering::SeqCst);
                return Err(CoreError::Conflict(id));
            }
            self.inner.set_state(id, state, expected_version).await
        }
    }

    #[tokio::test]
    async fn test_conflict_is_retried_then_surfaced() {
        let store = Arc::new(RacingStore {
            inner: InMemoryOfferStore::new(),
            conflicts_left: AtomicU32::new(2),
        });
        let executor = TransitionExecutor::new(store.clone(), Arc::new(ManualClock::new(Utc::now())));
        let offer = store.create(draft(-Duration::hours(1), None)).await.unwrap().offer;

        assert!(executor.execute_enable(offer.id).await.unwrap().is_applied());

        let other = store.create(draft(-Duration::hours(1), None)).await.unwrap().offer;
        store.conflicts_left.store(MAX_CAS_ATTEMPTS, Ordering::SeqCst);
        assert!(matches!(executor.execute_enable(other.id).await, Err(CoreError::Conflict(_))));
        assert_eq!(store.find(other.id).await.unwrap().state, OfferState::Disabled);
    }

    /// Real store where an edit lands between the executor's read and its write
    struct EditDuringRead {
        inner: InMemoryOfferStore,
        edit: tokio::sync::Mutex<Option<OfferPatch>>,
    }

    #[async_trait]
    impl OfferStore for EditDuringRead {
        async fn create(&self, draft: OfferDraft) -> CoreResult<OfferChange> {
            self.inner.create(draft).await
        }
        async fn update(&self, id: Uuid, patch: OfferPatch) -> CoreResult<OfferChange> {
            self.inner.update(id, patch).await
        }
        async fn find(&self, id: Uuid) -> CoreResult<Offer> {
            let offer = self.inner.find(id).await?;
            if let Some(patch) = self.edit.lock().await.take() {
                self.inner.update(id, patch).await?;
            }
            Ok(offer)
        }
        async fn delete(&self, id: Uuid) -> CoreResult<()> {
            self.inner.delete(id).await
        }
        async fn list(&self) -> CoreResult<Vec<Offer>> {
            self.inner.list().await
        }
        async fn list_enabled(&self) -> CoreResult<Vec<Offer>> {
            self.inner.list_enabled().await
        }
        async fn set_state(&self, id: Uuid, state: OfferState, expected_version: i64) -> CoreResult<Offer> {
            self.inner.set_state(id, state, expected_version).await
        }
    }

    #[tokio::test]
    async fn test_edit_racing_enable_wins_and_defers() {
        let store = Arc::new(EditDuringRead {
            inner: InMemoryOfferStore::new(),
            edit: tokio::sync::Mutex::new(None),
        });
        let executor = TransitionExecutor::new(store.clone(), Arc::new(ManualClock::new(Utc::now())));
        let offer = store.create(draft(-Duration::hours(1), None)).await.unwrap().offer;

        let later = Utc::now() + Duration::days(2);
        *store.edit.lock().await = Some(OfferPatch { starts_at: Some(later), ..Default::default() });

        // The stale read passes the guard, the write conflicts, the re-read defers
        let outcome = executor.execute_enable(offer.id).await.unwrap();
        assert_eq!(outcome, TransitionOutcome::Deferred { until: later, version: 1 });

        let stored = store.find(offer.id).await.unwrap();
        assert_eq!(stored.state, OfferState::Disabled);
        assert_eq!(stored.starts_at, later);
    }
}

//! In-process store and queue. Used by tests and by `store.backend = "memory"`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use promo_core::validation::{self, ValidationErrors, TAKEN};
use promo_core::{CoreError, CoreResult, OfferStore, TransitionQueue};
use promo_shared::{
    job_key, Offer, OfferChange, OfferDraft, OfferField, OfferPatch, OfferState, TransitionJob, TransitionKind,
};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryOfferStore {
    offers: Mutex<HashMap<Uuid, Offer>>,
}

impl InMemoryOfferStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_unique_name(offers: &HashMap<Uuid, Offer>, name: &str, except: Option<Uuid>) -> CoreResult<()> {
    let taken = offers
        .values()
        .any(|o| o.advertiser_name == name && Some(o.id) != except);
    if taken {
        return Err(ValidationErrors::single(OfferField::AdvertiserName, TAKEN).into());
    }
    Ok(())
}

#[async_trait]
impl OfferStore for InMemoryOfferStore {
    async fn create(&self, draft: OfferDraft) -> CoreResult<OfferChange> {
        let fields = validation::validate_draft(draft)?;
        let mut offers = self.offers.lock().await;
        check_unique_name(&offers, &fields.advertiser_name, None)?;

        let changed = fields.changed_fields();
        let offer = Offer::new(fields, Utc::now());
        offers.insert(offer.id, offer.clone());
        Ok(OfferChange { offer, changed })
    }

    async fn update(&self, id: Uuid, patch: OfferPatch) -> CoreResult<OfferChange> {
        let mut offers = self.offers.lock().await;
        let current = offers.get(&id).ok_or(CoreError::NotFound(id))?;

        let (next, changed) = current.apply_patch(&patch, Utc::now());
        validation::validate_offer(&next)?;
        if changed.contains(OfferField::AdvertiserName) {
            check_unique_name(&offers, &next.advertiser_name, Some(id))?;
        }

        offers.insert(id, next.clone());
        Ok(OfferChange { offer: next, changed })
    }

    async fn find(&self, id: Uuid) -> CoreResult<Offer> {
        let offers = self.offers.lock().await;
        offers.get(&id).cloned().ok_or(CoreError::NotFound(id))
    }

    async fn delete(&self, id: Uuid) -> CoreResult<()> {
        let mut offers = self.offers.lock().await;
        offers.remove(&id).map(|_| ()).ok_or(CoreError::NotFound(id))
    }

    async fn list(&self) -> CoreResult<Vec<Offer>> {
        let offers = self.offers.lock().await;
        let mut all: Vec<Offer> = offers.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn list_enabled(&self) -> CoreResult<Vec<Offer>> {
        let offers = self.offers.lock().await;
        let mut enabled: Vec<Offer> = offers
            .values()
            .filter(|o| o.state == OfferState::Enabled)
            .cloned()
            .collect();
        enabled.sort_by(|a, b| b.premium.cmp(&a.premium).then(b.starts_at.cmp(&a.starts_at)));
        Ok(enabled)
    }

    async fn set_state(&self, id: Uuid, state: OfferState, expected_version: i64) -> CoreResult<Offer> {
        let mut offers = self.offers.lock().await;
        let offer = offers.get_mut(&id).ok_or(CoreError::NotFound(id))?;
        if offer.lock_version != expected_version {
            return Err(CoreError::Conflict(id));
        }

        offer.state = state;
        offer.lock_version += 1;
        offer.updated_at = Utc::now();
        Ok(offer.clone())
    }
}

#[derive(Default)]
struct QueueState {
    pending: HashMap<String, TransitionJob>,
    inflight: HashMap<Uuid, (TransitionJob, DateTime<Utc>)>,
}

/// Queue with the same lease/re-delivery rules as the Redis queue
#[derive(Default)]
pub struct InMemoryTransitionQueue {
    state: Mutex<QueueState>,
    unavailable: AtomicBool,
    schedule_calls: AtomicUsize,
}

impl InMemoryTransitionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail, as if the backing service were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `schedule` calls that reached the queue so far
    pub fn schedule_calls(&self) -> usize {
        self.schedule_calls.load(Ordering::SeqCst)
    }

    pub async fn pending(&self, offer_id: Uuid, kind: TransitionKind) -> Option<TransitionJob> {
        let state = self.state.lock().await;
        state.pending.get(&job_key(offer_id, kind)).cloned()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn inflight_count(&self) -> usize {
        self.state.lock().await.inflight.len()
    }

    fn check_available(&self) -> CoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoreError::SchedulingFailed("transition queue unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TransitionQueue for InMemoryTransitionQueue {
    async fn schedule(&self, job: &TransitionJob) -> CoreResult<bool> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        self.schedule_calls.fetch_add(1, Ordering::SeqCst);

        let key = job.key();
        if let Some(pending) = state.pending.get(&key) {
            if !job.supersedes(pending) {
                return Ok(false);
            }
        }
        state.pending.insert(key, job.clone());
        Ok(true)
    }

    async fn cancel(&self, offer_id: Uuid, kind: TransitionKind) -> CoreResult<bool> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Ok(state.pending.remove(&job_key(offer_id, kind)).is_some())
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: usize, lease: Duration) -> CoreResult<Vec<TransitionJob>> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        let expired: Vec<Uuid> = state
            .inflight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some((job, _)) = state.inflight.remove(&id) {
                state.pending.entry(job.key()).or_insert(job);
            }
        }

        let mut due: Vec<TransitionJob> = state
            .pending
            .values()
            .filter(|job| job.run_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|job| job.run_at);
        due.truncate(limit);

        let deadline = now + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::seconds(30));
        let mut claimed = Vec::with_capacity(due.len());
        for mut job in due {
            state.pending.remove(&job.key());
            job.attempts += 1;
            state.inflight.insert(job.id, (job.clone(), deadline));
            claimed.push(job);
        }
        Ok(claimed)
    }

    async fn complete(&self, job: &TransitionJob) -> CoreResult<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state.inflight.remove(&job.id);
        Ok(())
    }

    async fn retry(&self, job: &TransitionJob, at: DateTime<Utc>) -> CoreResult<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state.inflight.remove(&job.id);
        let mut job = job.clone();
        job.run_at = at;
        state.pending.entry(job.key()).or_insert(job);
        Ok(())
    }
}

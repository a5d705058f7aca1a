use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use promo_shared::{Offer, OfferChange, OfferDraft, OfferPatch, OfferState, TransitionJob, TransitionKind};
use uuid::Uuid;

use crate::CoreResult;

/// Persistence collaborator for offer records
#[async_trait]
pub trait OfferStore: Send + Sync {
    /// Validate and insert a new offer in the `disabled` state
    async fn create(&self, draft: OfferDraft) -> CoreResult<OfferChange>;

    /// Atomically apply a partial update and report which fields changed
    async fn update(&self, id: Uuid, patch: OfferPatch) -> CoreResult<OfferChange>;

    async fn find(&self, id: Uuid) -> CoreResult<Offer>;

    async fn delete(&self, id: Uuid) -> CoreResult<()>;

    /// All offers, newest first
    async fn list(&self) -> CoreResult<Vec<Offer>>;

    /// Enabled offers, premium first
    async fn list_enabled(&self) -> CoreResult<Vec<Offer>>;

    /// Compare-and-set of `state`. Fails with `Conflict` when the record's
    /// `lock_version` no longer matches `expected_version`.
    async fn set_state(&self, id: Uuid, state: OfferState, expected_version: i64) -> CoreResult<Offer>;
}

/// Deferred-execution collaborator. Delivery is at-least-once: a claimed
/// job that is never completed comes back once its lease runs out.
#[async_trait]
pub trait TransitionQueue: Send + Sync {
    /// Upsert the pending job for `(job.offer_id, job.kind)`. A pending job
    /// planned from a newer offer version is kept and `false` is returned.
    async fn schedule(&self, job: &TransitionJob) -> CoreResult<bool>;

    /// Drop a pending job. Returns whether one was removed.
    async fn cancel(&self, offer_id: Uuid, kind: TransitionKind) -> CoreResult<bool>;

    /// Lease up to `limit` jobs whose `run_at <= now`
    async fn claim_due(&self, now: DateTime<Utc>, limit: usize, lease: Duration) -> CoreResult<Vec<TransitionJob>>;

    /// Acknowledge a claimed job
    async fn complete(&self, job: &TransitionJob) -> CoreResult<()>;

    /// Return a claimed job to the pending set at `at`, unless its key
    /// was rescheduled in the meantime
    async fn retry(&self, job: &TransitionJob, at: DateTime<Utc>) -> CoreResult<()>;
}

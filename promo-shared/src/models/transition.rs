use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::offer::{Offer, OfferState};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Enable,
    Disable,
}

impl TransitionKind {
    pub fn target_state(&self) -> OfferState {
        match self {
            TransitionKind::Enable => OfferState::Enabled,
            TransitionKind::Disable => OfferState::Disabled,
        }
    }

    /// The offer timestamp this kind fires on, if it has one. The
    /// transition is due once that instant is reached.
    pub fn trigger(&self, offer: &Offer) -> Option<DateTime<Utc>> {
        match self {
            TransitionKind::Enable => Some(offer.starts_at),
            TransitionKind::Disable => offer.ends_at,
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionKind::Enable => write!(f, "enable"),
            TransitionKind::Disable => write!(f, "disable"),
        }
    }
}

/// Deferred unit of work handed to the transition queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionJob {
    pub id: Uuid,
    pub offer_id: Uuid,
    pub kind: TransitionKind,
    pub run_at: DateTime<Utc>,
    pub attempts: u32,
    /// Offer `lock_version` the job was planned from. A pending job is
    /// never replaced by one planned from an older version.
    #[serde(default)]
    pub version: i64,
}

impl TransitionJob {
    pub fn new(offer_id: Uuid, kind: TransitionKind, run_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            offer_id,
            kind,
            run_at,
            attempts: 0,
            version: 0,
        }
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    /// Whether this job may take the place of `pending` under the same key
    pub fn supersedes(&self, pending: &TransitionJob) -> bool {
        self.version >= pending.version
    }

    /// Queue key; at most one pending job exists per key
    pub fn key(&self) -> String {
        job_key(self.offer_id, self.kind)
    }
}

pub fn job_key(offer_id: Uuid, kind: TransitionKind) -> String {
    format!("{}:{}", offer_id, kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::offer::NewOffer;

    fn offer(ends_at: Option<DateTime<Utc>>) -> Offer {
        let now = Utc::now();
        Offer::new(
            NewOffer {
                advertiser_name: "Advertiser 1".to_string(),
                url: "http://example.com".to_string(),
                description: "Description text".to_string(),
                starts_at: now,
                ends_at,
                premium: false,
            },
            now,
        )
    }

    #[test]
    fn test_trigger_follows_offer_timestamps() {
        let open_ended = offer(None);
        assert_eq!(TransitionKind::Enable.trigger(&open_ended), Some(open_ended.starts_at));
        assert_eq!(TransitionKind::Disable.trigger(&open_ended), None);
    }

    #[test]
    fn test_older_plan_never_supersedes_newer() {
        let offer_id = Uuid::new_v4();
        let newer = TransitionJob::new(offer_id, TransitionKind::Enable, Utc::now()).with_version(3);
        let older = TransitionJob::new(offer_id, TransitionKind::Enable, Utc::now()).with_version(2);

        assert!(!older.supersedes(&newer));
        assert!(newer.supersedes(&older));
        assert!(newer.supersedes(&newer));
    }

    #[test]
    fn test_job_without_version_decodes() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "offer_id": Uuid::new_v4(),
            "kind": "enable",
            "run_at": Utc::now(),
            "attempts": 1
        });
        let job: TransitionJob = serde_json::from_value(json).unwrap();
        assert_eq!(job.version, 0);
    }
}

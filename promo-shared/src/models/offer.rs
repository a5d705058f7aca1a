use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Lifecycle state of an offer
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OfferState {
    #[default]
    Disabled,
    Enabled,
}

impl fmt::Display for OfferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfferState::Disabled => write!(f, "disabled"),
            OfferState::Enabled => write!(f, "enabled"),
        }
    }
}

impl FromStr for OfferState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(OfferState::Disabled),
            "enabled" => Ok(OfferState::Enabled),
            other => Err(format!("unknown offer state: {}", other)),
        }
    }
}

/// A promotional offer as persisted by the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Offer {
    pub id: Uuid,
    pub advertiser_name: String,
    pub url: String,
    pub description: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub state: OfferState,
    pub premium: bool,
    pub lock_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Offer {
    /// Build a fresh, disabled offer from validated input
    pub fn new(fields: NewOffer, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            advertiser_name: fields.advertiser_name,
            url: fields.url,
            description: fields.description,
            starts_at: fields.starts_at,
            ends_at: fields.ends_at,
            state: OfferState::Disabled,
            premium: fields.premium,
            lock_version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update, returning the candidate record and the
    /// fields whose value actually changed. `lock_version` and
    /// `updated_at` are only touched when something changed.
    pub fn apply_patch(&self, patch: &OfferPatch, now: DateTime<Utc>) -> (Offer, ChangedFields) {
        let mut next = self.clone();
        let mut changed = ChangedFields::default();

        if let Some(name) = &patch.advertiser_name {
            if *name != next.advertiser_name {
                next.advertiser_name = name.clone();
                changed.insert(OfferField::AdvertiserName);
            }
        }
        if let Some(url) = &patch.url {
            if *url != next.url {
                next.url = url.clone();
                changed.insert(OfferField::Url);
            }
        }
        if let Some(description) = &patch.description {
            if *description != next.description {
                next.description = description.clone();
                changed.insert(OfferField::Description);
            }
        }
        if let Some(starts_at) = patch.starts_at {
            if starts_at != next.starts_at {
                next.starts_at = starts_at;
                changed.insert(OfferField::StartsAt);
            }
        }
        if let Some(ends_at) = patch.ends_at {
            if ends_at != next.ends_at {
                next.ends_at = ends_at;
                changed.insert(OfferField::EndsAt);
            }
        }
        if let Some(premium) = patch.premium {
            if premium != next.premium {
                next.premium = premium;
                changed.insert(OfferField::Premium);
            }
        }

        if !changed.is_empty() {
            next.lock_version += 1;
            next.updated_at = now;
        }

        (next, changed)
    }
}

/// Create input. Fields are optional so that missing values are reported
/// as validation errors rather than rejected during deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OfferDraft {
    pub advertiser_name: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub premium: bool,
}

/// A draft that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct NewOffer {
    pub advertiser_name: String,
    pub url: String,
    pub description: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub premium: bool,
}

impl NewOffer {
    /// Fields that differ from a blank record. `starts_at` is always set.
    pub fn changed_fields(&self) -> ChangedFields {
        let mut changed = ChangedFields::default();
        if !self.advertiser_name.is_empty() {
            changed.insert(OfferField::AdvertiserName);
        }
        if !self.url.is_empty() {
            changed.insert(OfferField::Url);
        }
        if !self.description.is_empty() {
            changed.insert(OfferField::Description);
        }
        changed.insert(OfferField::StartsAt);
        if self.ends_at.is_some() {
            changed.insert(OfferField::EndsAt);
        }
        if self.premium {
            changed.insert(OfferField::Premium);
        }
        changed
    }
}

/// Partial update. `None` leaves a field untouched; `ends_at` may be
/// explicitly cleared with `null`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OfferPatch {
    pub advertiser_name: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_nullable")]
    pub ends_at: Option<Option<DateTime<Utc>>>,
    pub premium: Option<bool>,
}

fn deserialize_nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Writable offer fields
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OfferField {
    AdvertiserName,
    Url,
    Description,
    StartsAt,
    EndsAt,
    Premium,
}

impl OfferField {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferField::AdvertiserName => "advertiser_name",
            OfferField::Url => "url",
            OfferField::Description => "description",
            OfferField::StartsAt => "starts_at",
            OfferField::EndsAt => "ends_at",
            OfferField::Premium => "premium",
        }
    }
}

impl fmt::Display for OfferField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of fields changed by a single write
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangedFields(BTreeSet<OfferField>);

impl ChangedFields {
    pub fn insert(&mut self, field: OfferField) {
        self.0.insert(field);
    }

    pub fn contains(&self, field: OfferField) -> bool {
        self.0.contains(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = OfferField> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<OfferField> for ChangedFields {
    fn from_iter<I: IntoIterator<Item = OfferField>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Result of a store write: the new record plus what changed
#[derive(Debug, Clone)]
pub struct OfferChange {
    pub offer: Offer,
    pub changed: ChangedFields,
}

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use promo_shared::{NewOffer, Offer, OfferDraft, OfferField};
use serde::Serialize;

pub const DESCRIPTION_MAX_CHARS: usize = 500;

pub const BLANK: &str = "can't be blank";
pub const TAKEN: &str = "has already been taken";
pub const INVALID_URI: &str = "must be a valid URI";

/// Per-field validation messages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn add(&mut self, field: OfferField, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn single(field: OfferField, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.add(field, message);
        errors
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: OfferField) -> bool {
        self.0.contains_key(field.as_str())
    }

    pub fn messages(&self, field: OfferField) -> &[String] {
        self.0.get(field.as_str()).map(Vec::as_slice).unwrap_or(&[])
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{} {}", field, message)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Validate create input and turn it into a complete record
pub fn validate_draft(draft: OfferDraft) -> Result<NewOffer, ValidationErrors> {
    let mut errors = ValidationErrors::default();
    check_fields(
        &mut errors,
        draft.advertiser_name.as_deref(),
        draft.url.as_deref(),
        draft.description.as_deref(),
        draft.starts_at,
    );

    match (draft.advertiser_name, draft.url, draft.description, draft.starts_at) {
        (Some(advertiser_name), Some(url), Some(description), Some(starts_at)) if errors.is_empty() => {
            Ok(NewOffer {
                advertiser_name,
                url,
                description,
                starts_at,
                ends_at: draft.ends_at,
                premium: draft.premium,
            })
        }
        _ => Err(errors),
    }
}

/// Validate a merged record produced by a partial update
pub fn validate_offer(offer: &Offer) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    check_fields(
        &mut errors,
        Some(&offer.advertiser_name),
        Some(&offer.url),
        Some(&offer.description),
        Some(offer.starts_at),
    );
    errors.into_result()
}

fn check_fields(
    errors: &mut ValidationErrors,
    advertiser_name: Option<&str>,
    url: Option<&str>,
    description: Option<&str>,
    starts_at: Option<DateTime<Utc>>,
) {
    if is_blank(advertiser_name) {
        errors.add(OfferField::AdvertiserName, BLANK);
    }

    match url {
        Some(url) if !url.trim().is_empty() => {
            if !is_web_uri(url) {
                errors.add(OfferField::Url, INVALID_URI);
            }
        }
        _ => {
            errors.add(OfferField::Url, BLANK);
            errors.add(OfferField::Url, INVALID_URI);
        }
    }

    match description {
        Some(text) if !text.trim().is_empty() => {
            if text.chars().count() > DESCRIPTION_MAX_CHARS {
                errors.add(
                    OfferField::Description,
                    format!("is too long (maximum is {} characters)", DESCRIPTION_MAX_CHARS),
                );
            }
        }
        _ => errors.add(OfferField::Description, BLANK),
    }

    if starts_at.is_none() {
        errors.add(OfferField::StartsAt, BLANK);
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

fn is_web_uri(value: &str) -> bool {
    match url::Url::parse(value.trim()) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https") && parsed.host().is_some(),
        Err(_) => false,
    }
}

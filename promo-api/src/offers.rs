use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use promo_offer::OfferWrite;
use promo_shared::{Offer, OfferDraft, OfferPatch, OfferState, TransitionKind};
use serde::Serialize;
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct OfferResponse {
    pub id: Uuid,
    pub advertiser_name: String,
    pub url: String,
    pub description: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub state: OfferState,
    pub premium: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Offer> for OfferResponse {
    fn from(offer: Offer) -> Self {
        Self {
            id: offer.id,
            advertiser_name: offer.advertiser_name,
            url: offer.url,
            description: offer.description,
            starts_at: offer.starts_at,
            ends_at: offer.ends_at,
            state: offer.state,
            premium: offer.premium,
            created_at: offer.created_at,
            updated_at: offer.updated_at,
        }
    }
}

/// What visitors see on the public listing
#[derive(Debug, Serialize)]
pub struct PublicOfferResponse {
    pub id: Uuid,
    pub advertiser_name: String,
    pub url: String,
    pub description: String,
    pub premium: bool,
    pub ends_at: Option<DateTime<Utc>>,
}

impl From<Offer> for PublicOfferResponse {
    fn from(offer: Offer) -> Self {
        Self {
            id: offer.id,
            advertiser_name: offer.advertiser_name,
            url: offer.url,
            description: offer.description,
            premium: offer.premium,
            ends_at: offer.ends_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ScheduledTransitionResponse {
    pub job_id: Uuid,
    pub kind: TransitionKind,
    pub run_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct OfferWriteResponse {
    pub offer: OfferResponse,
    pub changed: Vec<String>,
    pub scheduled: Vec<ScheduledTransitionResponse>,
    pub scheduling_degraded: bool,
    pub warnings: Vec<String>,
}

impl From<OfferWrite> for OfferWriteResponse {
    fn from(write: OfferWrite) -> Self {
        let scheduling_degraded = write.is_degraded();
        Self {
            changed: write.changed.iter().map(|f| f.to_string()).collect(),
            scheduled: write
                .scheduled
                .iter()
                .map(|job| ScheduledTransitionResponse {
                    job_id: job.id,
                    kind: job.kind,
                    run_at: job.run_at,
                })
                .collect(),
            scheduling_degraded,
            warnings: write.scheduling_failures,
            offer: write.offer.into(),
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/offers", get(list_public_offers))
        .route("/v1/admin/offers", get(list_offers).post(create_offer))
        .route(
            "/v1/admin/offers/{id}",
            get(get_offer).put(update_offer).patch(update_offer).delete(delete_offer),
        )
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /v1/offers
/// Currently enabled offers, premium first
pub async fn list_public_offers(
    State(state): State<AppState>,
) -> Result<Json<Vec<PublicOfferResponse>>, AppError> {
    let offers = state.lifecycle.list_enabled_offers().await?;
    Ok(Json(offers.into_iter().map(Into::into).collect()))
}

/// GET /v1/admin/offers
pub async fn list_offers(State(state): State<AppState>) -> Result<Json<Vec<OfferResponse>>, AppError> {
    let offers = state.lifecycle.list_offers().await?;
    Ok(Json(offers.into_iter().map(Into::into).collect()))
}

/// POST /v1/admin/offers
pub async fn create_offer(
    State(state): State<AppState>,
    Json(draft): Json<OfferDraft>,
) -> Result<(StatusCode, Json<OfferWriteResponse>), AppError> {
    let write = state.lifecycle.create_offer(draft).await?;
    tracing::info!("Offer {} created", write.offer.id);
    Ok((StatusCode::CREATED, Json(write.into())))
}

/// GET /v1/admin/offers/{id}
pub async fn get_offer(
    State(state): State<AppState>,
    Path(offer_id): Path<Uuid>,
) -> Result<Json<OfferResponse>, AppError> {
    let offer = state.lifecycle.find_offer(offer_id).await?;
    Ok(Json(offer.into()))
}

/// PUT/PATCH /v1/admin/offers/{id}
pub async fn update_offer(
    State(state): State<AppState>,
    Path(offer_id): Path<Uuid>,
    Json(patch): Json<OfferPatch>,
) -> Result<Json<OfferWriteResponse>, AppError> {
    let write = state.lifecycle.update_offer(offer_id, patch).await?;
    tracing::info!("Offer {} updated ({} fields changed)", offer_id, write.changed.len());
    Ok(Json(write.into()))
}

/// DELETE /v1/admin/offers/{id}
pub async fn delete_offer(
    State(state): State<AppState>,
    Path(offer_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.lifecycle.delete_offer(offer_id).await?;
    tracing::info!("Offer {} deleted", offer_id);
    Ok(StatusCode::NO_CONTENT)
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use promo_core::validation::{self, ValidationErrors, TAKEN};
use promo_core::{CoreError, CoreResult, OfferStore};
use promo_shared::{Offer, OfferChange, OfferDraft, OfferField, OfferPatch, OfferState};
use sqlx::PgPool;
use uuid::Uuid;

const OFFER_COLUMNS: &str =
    "id, advertiser_name, url, description, starts_at, ends_at, state, premium, lock_version, created_at, updated_at";

pub struct PostgresOfferStore {
    pub pool: PgPool,
}

impl PostgresOfferStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OfferRow {
    id: Uuid,
    advertiser_name: String,
    url: String,
    description: String,
    starts_at: DateTime<Utc>,
    ends_at: Option<DateTime<Utc>>,
    state: String,
    premium: bool,
    lock_version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OfferRow> for Offer {
    type Error = CoreError;

    fn try_from(row: OfferRow) -> Result<Self, Self::Error> {
        let state: OfferState = row.state.parse().map_err(CoreError::Storage)?;
        Ok(Offer {
            id: row.id,
            advertiser_name: row.advertiser_name,
            url: row.url,
            description: row.description,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            state,
            premium: row.premium,
            lock_version: row.lock_version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Unique index violations on `advertiser_name` become validation errors
fn map_write_error(err: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return ValidationErrors::single(OfferField::AdvertiserName, TAKEN).into();
        }
    }
    storage_error(err)
}

fn storage_error(err: sqlx::Error) -> CoreError {
    tracing::error!("Offer store query failed: {}", err);
    CoreError::Storage(err.to_string())
}

fn into_offers(rows: Vec<OfferRow>) -> CoreResult<Vec<Offer>> {
    rows.into_iter().map(Offer::try_from).collect()
}

#[async_trait]
impl OfferStore for PostgresOfferStore {
    async fn create(&self, draft: OfferDraft) -> CoreResult<OfferChange> {
        let fields = validation::validate_draft(draft)?;
        let changed = fields.changed_fields();
        let offer = Offer::new(fields, Utc::now());

        sqlx::query(
            r#"
            INSERT INTO offers (id, advertiser_name, url, description, starts_at, ends_at, state, premium, lock_version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(offer.id)
        .bind(&offer.advertiser_name)
        .bind(&offer.url)
        .bind(&offer.description)
        .bind(offer.starts_at)
        .bind(offer.ends_at)
        .bind(offer.state.to_string())
        .bind(offer.premium)
        .bind(offer.lock_version)
        .bind(offer.created_at)
        .bind(offer.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(OfferChange { offer, changed })
    }

    async fn update(&self, id: Uuid, patch: OfferPatch) -> CoreResult<OfferChange> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        // Row lock serializes concurrent edits and state transitions
        let row = sqlx::query_as::<_, OfferRow>(&format!(
            "SELECT {} FROM offers WHERE id = $1 FOR UPDATE",
            OFFER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_error)?;

        let Some(row) = row else {
            return Err(CoreError::NotFound(id));
        };
        let current = Offer::try_from(row)?;

        let (next, changed) = current.apply_patch(&patch, Utc::now());
        validation::validate_offer(&next)?;

        if changed.is_empty() {
            return Ok(OfferChange { offer: next, changed });
        }

        sqlx::query(
            r#"
            UPDATE offers
            SET advertiser_name = $2, url = $3, description = $4, starts_at = $5, ends_at = $6,
                premium = $7, lock_version = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&next.advertiser_name)
        .bind(&next.url)
        .bind(&next.description)
        .bind(next.starts_at)
        .bind(next.ends_at)
        .bind(next.premium)
        .bind(next.lock_version)
        .bind(next.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_write_error)?;

        tx.commit().await.map_err(storage_error)?;
        Ok(OfferChange { offer: next, changed })
    }

    async fn find(&self, id: Uuid) -> CoreResult<Offer> {
        let row = sqlx::query_as::<_, OfferRow>(&format!("SELECT {} FROM offers WHERE id = $1", OFFER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        row.ok_or(CoreError::NotFound(id))?.try_into()
    }

    async fn delete(&self, id: Uuid) -> CoreResult<()> {
        let result = sqlx::query("DELETE FROM offers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(id));
        }
        Ok(())
    }

    async fn list(&self) -> CoreResult<Vec<Offer>> {
        let rows = sqlx::query_as::<_, OfferRow>(&format!(
            "SELECT {} FROM offers ORDER BY created_at DESC",
            OFFER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        into_offers(rows)
    }

    async fn list_enabled(&self) -> CoreResult<Vec<Offer>> {
        let rows = sqlx::query_as::<_, OfferRow>(&format!(
            "SELECT {} FROM offers WHERE state = 'enabled' ORDER BY premium DESC, starts_at DESC",
            OFFER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        into_offers(rows)
    }

    async fn set_state(&self, id: Uuid, state: OfferState, expected_version: i64) -> CoreResult<Offer> {
        let row = sqlx::query_as::<_, OfferRow>(&format!(
            r#"
            UPDATE offers
            SET state = $2, lock_version = lock_version + 1, updated_at = NOW()
            WHERE id = $1 AND lock_version = $3
            RETURNING {}
            "#,
            OFFER_COLUMNS
        ))
        .bind(id)
        .bind(state.to_string())
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        if let Some(row) = row {
            return row.try_into();
        }

        // Nothing matched: either the offer is gone or someone else wrote first
        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM offers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        match exists {
            Some(_) => Err(CoreError::Conflict(id)),
            None => Err(CoreError::NotFound(id)),
        }
    }
}

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::models::verification::{
    ListingType, PropertyContext, VerificationResult, VerificationStatus,
};
use crate::services::repository::{PropertyRepository, RepositoryError, ResultSink};

/// PostgreSQL-backed property repository and result sink.
///
/// Reads `properties`, writes `properties.verification_*` and upserts one
/// `verification_logs` row per property. The schema is owned by the listings
/// service; no migrations ship with this crate.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Get the details needed to call about a property
pub async fn get_property_context(
    pool: &PgPool,
    property_id: i64,
) -> Result<Option<PropertyContext>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, full_address, agent_phone, listing_type
        FROM properties
        WHERE id = $1
        "#,
    )
    .bind(property_id)
    .fetch_optional(pool)
    .await?;

    Ok(match row {
        Some(r) => {
            let listing_type: Option<String> = r.try_get("listing_type")?;
            let address: Option<String> = r.try_get("full_address")?;
            Some(PropertyContext {
                property_id: r.try_get("id")?,
                address: address.unwrap_or_default(),
                agent_phone: r.try_get("agent_phone")?,
                listing_type: ListingType::from_listing(listing_type.as_deref()),
            })
        }
        None => None,
    })
}

/// Update the verification status shown on a property
pub async fn update_property_status(
    pool: &PgPool,
    property_id: i64,
    status: VerificationStatus,
    notes: Option<&str>,
) -> Result<(), sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE properties
        SET verification_status = $2,
            last_verified_at = NOW(),
            verification_notes = COALESCE($3, verification_notes)
        WHERE id = $1
        "#,
    )
    .bind(property_id)
    .bind(status.to_string())
    .bind(notes)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        tracing::warn!(property_id, "No property row updated");
    }
    Ok(())
}

/// Insert or replace the verification log for a property
pub async fn upsert_verification_log(
    pool: &PgPool,
    result: &VerificationResult,
    agent_phone: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO verification_logs
            (property_id, call_timestamp, call_duration_seconds, agent_phone,
             agent_response, verification_status, confidence_score, notes, error_message)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (property_id) DO UPDATE SET
            call_timestamp = EXCLUDED.call_timestamp,
            call_duration_seconds = EXCLUDED.call_duration_seconds,
            agent_phone = EXCLUDED.agent_phone,
            agent_response = EXCLUDED.agent_response,
            verification_status = EXCLUDED.verification_status,
            confidence_score = EXCLUDED.confidence_score,
            notes = EXCLUDED.notes,
            error_message = EXCLUDED.error_message
        "#,
    )
    .bind(result.property_id)
    .bind(result.created_at)
    .bind(result.call_duration_seconds.map(|d| d as i32))
    .bind(agent_phone)
    .bind(result.agent_response_summary.as_deref())
    .bind(result.status.to_string())
    .bind(result.confidence)
    .bind(result.notes.as_deref())
    .bind(result.error_message.as_deref())
    .execute(pool)
    .await?;

    Ok(())
}

#[async_trait]
impl PropertyRepository for PgStore {
    async fn get_context(&self, property_id: i64) -> Result<Option<PropertyContext>, RepositoryError> {
        Ok(get_property_context(&self.pool, property_id).await?)
    }
}

#[async_trait]
impl ResultSink for PgStore {
    async fn persist_verification(&self, result: &VerificationResult) -> Result<(), RepositoryError> {
        let agent_phone: Option<String> =
            sqlx::query_scalar("SELECT agent_phone FROM properties WHERE id = $1")
                .bind(result.property_id)
                .fetch_optional(&self.pool)
                .await?
                .flatten();
        upsert_verification_log(&self.pool, result, agent_phone.as_deref()).await?;
        Ok(())
    }

    async fn persist_property_status(
        &self,
        property_id: i64,
        status: VerificationStatus,
        notes: Option<&str>,
    ) -> Result<(), RepositoryError> {
        update_property_status(&self.pool, property_id, status, notes).await?;
        Ok(())
    }
}

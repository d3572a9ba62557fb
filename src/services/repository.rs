use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::verification::{PropertyContext, VerificationResult, VerificationStatus};

/// Source of the property details needed to place a verification call.
#[async_trait]
pub trait PropertyRepository: Send + Sync {
    async fn get_context(&self, property_id: i64) -> Result<Option<PropertyContext>, RepositoryError>;
}

/// Destination of verification outcomes.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Record the full outcome of one verification run.
    async fn persist_verification(&self, result: &VerificationResult) -> Result<(), RepositoryError>;

    /// Update the availability status shown on the property itself.
    async fn persist_property_status(
        &self,
        property_id: i64,
        status: VerificationStatus,
        notes: Option<&str>,
    ) -> Result<(), RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Last status written for a property.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyStatusRecord {
    pub status: VerificationStatus,
    pub notes: Option<String>,
}

/// Map-backed repository and sink.
#[derive(Default)]
pub struct InMemoryStore {
    properties: RwLock<HashMap<i64, PropertyContext>>,
    verifications: RwLock<Vec<VerificationResult>>,
    statuses: RwLock<HashMap<i64, Vec<PropertyStatusRecord>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_property(&self, context: PropertyContext) {
        if let Ok(mut properties) = self.properties.write() {
            properties.insert(context.property_id, context);
        }
    }

    /// Every verification persisted so far, in write order.
    pub fn verifications(&self) -> Vec<VerificationResult> {
        self.verifications.read().map(|v| v.clone()).unwrap_or_default()
    }

    /// Status history of a property, oldest first.
    pub fn status_history(&self, property_id: i64) -> Vec<PropertyStatusRecord> {
        self.statuses
            .read()
            .ok()
            .and_then(|s| s.get(&property_id).cloned())
            .unwrap_or_default()
    }

    pub fn current_status(&self, property_id: i64) -> Option<VerificationStatus> {
        self.status_history(property_id).last().map(|r| r.status)
    }
}

fn poisoned<T>(_: T) -> RepositoryError {
    RepositoryError::Unavailable("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl PropertyRepository for InMemoryStore {
    async fn get_context(&self, property_id: i64) -> Result<Option<PropertyContext>, RepositoryError> {
        let properties = self.properties.read().map_err(poisoned)?;
        Ok(properties.get(&property_id).cloned())
    }
}

#[async_trait]
impl ResultSink for InMemoryStore {
    async fn persist_verification(&self, result: &VerificationResult) -> Result<(), RepositoryError> {
        self.verifications.write().map_err(poisoned)?.push(result.clone());
        Ok(())
    }

    async fn persist_property_status(
        &self,
        property_id: i64,
        status: VerificationStatus,
        notes: Option<&str>,
    ) -> Result<(), RepositoryError> {
        self.statuses
            .write()
            .map_err(poisoned)?
            .entry(property_id)
            .or_default()
            .push(PropertyStatusRecord {
                status,
                notes: notes.map(str::to_string),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::verification::ListingType;

    #[tokio::test]
    async fn stores_contexts_and_results() {
        let store = InMemoryStore::new();
        store.insert_property(PropertyContext {
            property_id: 7,
            address: "7 Mill Lane".to_string(),
            agent_phone: None,
            listing_type: ListingType::Rent,
        });

        assert!(store.get_context(7).await.unwrap().is_some());
        assert!(store.get_context(8).await.unwrap().is_none());

        store
            .persist_property_status(7, VerificationStatus::Processing, None)
            .await
            .unwrap();
        store
            .persist_property_status(7, VerificationStatus::Unclear, Some("no phone"))
            .await
            .unwrap();
        assert_eq!(store.current_status(7), Some(VerificationStatus::Unclear));
        assert_eq!(store.status_history(7).len(), 2);

        let result = VerificationResult::new(7, VerificationStatus::Unclear, 0.0);
        store.persist_verification(&result).await.unwrap();
        assert_eq!(store.verifications(), vec![result]);
    }
}

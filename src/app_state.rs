use std::sync::Arc;
use uuid::Uuid;

use crate::models::job::VerificationJob;
use crate::services::queue::{JobHandler, JobQueue, QueueError, QueueStats};
use crate::services::repository::{PropertyRepository, RepositoryError};

/// Shared application state handed to every caller that submits or inspects jobs.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub properties: Arc<dyn PropertyRepository>,
}

impl AppState {
    pub fn new(queue: JobQueue, properties: Arc<dyn PropertyRepository>) -> Self {
        Self {
            queue: Arc::new(queue),
            properties,
        }
    }

    /// Start processing queued jobs with `handler`.
    pub fn start(&self, handler: Arc<dyn JobHandler>) -> Result<(), QueueError> {
        self.queue.start(handler)
    }

    /// Queue a verification for a property that exists. Returns immediately with
    /// the job in `queued` state.
    pub async fn submit_verification(&self, property_id: i64) -> Result<VerificationJob, SubmitError> {
        if self.properties.get_context(property_id).await?.is_none() {
            return Err(SubmitError::PropertyNotFound(property_id));
        }
        Ok(self.queue.enqueue(property_id)?)
    }

    pub fn job_status(&self, job_id: Uuid) -> Result<Option<VerificationJob>, QueueError> {
        self.queue.get_job(job_id)
    }

    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        self.queue.stats()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Property {0} not found")]
    PropertyNotFound(i64),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

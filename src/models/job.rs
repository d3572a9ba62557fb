use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::verification::VerificationResult;

/// Status of a verification job in the in-process queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// `Completed` and `Failed` admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A property verification job.
///
/// Owned by the [`JobQueue`](crate::services::queue::JobQueue); everything outside
/// the queue only ever sees cloned snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationJob {
    pub job_id: Uuid,
    pub property_id: i64,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<VerificationResult>,
}

impl VerificationJob {
    pub fn new(property_id: i64) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            property_id,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
        }
    }

    /// Queued → Processing. Returns false if the job already left `Queued`.
    pub(crate) fn mark_processing(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Queued {
            return false;
        }
        self.status = JobStatus::Processing;
        self.started_at = Some(now);
        true
    }

    /// Processing → Completed, storing the result.
    pub(crate) fn mark_completed(&mut self, result: VerificationResult, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(now);
        true
    }

    /// Processing → Failed, storing the error message.
    pub(crate) fn mark_failed(&mut self, error: String, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(now);
        true
    }
}

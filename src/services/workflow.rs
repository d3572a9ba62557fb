//! One verification run, start to finish.
//!
//! ```text
//! FetchContext ── no property / no phone ──────────────▶ Unclear
//!      │
//! BuildScript → SelectPhoneTarget ── safety violation ─▶ Unclear
//!      │
//! InitiateCall ── no call id ──────────────────────────▶ Unclear
//!      │
//! PollCompletion ── timeout ───────────────────────────▶ Unclear
//!      │
//! Classify → Persist → Complete
//! ```
//!
//! Every arrow to the right is a business outcome: the job still completes.
//! Only unexpected errors (provider transport, persistence) fail the job.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::models::call::CallRecord;
use crate::models::job::VerificationJob;
use crate::models::verification::{PropertyContext, VerificationResult, VerificationStatus};
use crate::services::classifier;
use crate::services::orchestrator::{CallOrchestrator, OrchestratorError, PollOutcome};
use crate::services::queue::JobHandler;
use crate::services::repository::{PropertyRepository, RepositoryError, ResultSink};
use crate::services::telephony::ProviderError;

/// Call timing for a verification run.
#[derive(Debug, Clone, Copy)]
pub struct CallTimings {
    pub max_wait: Duration,
    pub poll_interval: Duration,
}

impl Default for CallTimings {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Verifies one property per job.
pub struct VerificationWorkflow {
    repository: Arc<dyn PropertyRepository>,
    sink: Arc<dyn ResultSink>,
    orchestrator: CallOrchestrator,
    timings: CallTimings,
}

impl VerificationWorkflow {
    /// The operating mode comes in through the orchestrator's routing policy.
    pub fn new(
        repository: Arc<dyn PropertyRepository>,
        sink: Arc<dyn ResultSink>,
        orchestrator: CallOrchestrator,
        timings: CallTimings,
    ) -> Self {
        Self {
            repository,
            sink,
            orchestrator,
            timings,
        }
    }

    pub async fn run(&self, job: &VerificationJob) -> Result<VerificationResult, WorkflowError> {
        let property_id = job.property_id;

        // FetchContext
        let Some(context) = self.repository.get_context(property_id).await? else {
            tracing::warn!(job_id = %job.job_id, property_id, "Property not found");
            let result = VerificationResult::new(property_id, VerificationStatus::Unclear, 0.0)
                .with_notes(format!("Property {} not found", property_id))
                .with_error("property not found");
            // Nothing to attach the outcome to
            record_outcome(&result);
            return Ok(result);
        };

        let Some(agent_phone) = context.usable_agent_phone() else {
            tracing::warn!(job_id = %job.job_id, property_id, "No agent phone number");
            let result = VerificationResult::new(property_id, VerificationStatus::Unclear, 0.0)
                .with_notes("No agent phone number available for this property")
                .with_error("missing agent phone");
            return self.finish(result).await;
        };

        self.sink
            .persist_property_status(property_id, VerificationStatus::Processing, None)
            .await?;

        // BuildScript
        let script = build_call_script(&context);

        // SelectPhoneTarget
        let target = match self.orchestrator.select_target(agent_phone) {
            Ok(target) => target,
            Err(violation) => {
                tracing::warn!(job_id = %job.job_id, property_id, violation = %violation, "Call refused");
                return self.finish(safety_refusal(property_id, &violation.to_string())).await;
            }
        };

        // InitiateCall
        let call_id = match self.orchestrator.initiate(&target, &script).await {
            Ok(call_id) => call_id,
            Err(OrchestratorError::Safety(violation)) => {
                tracing::warn!(job_id = %job.job_id, property_id, violation = %violation, "Call refused");
                return self.finish(safety_refusal(property_id, &violation.to_string())).await;
            }
            Err(OrchestratorError::Provider(ProviderError::MissingCallId)) => {
                tracing::warn!(job_id = %job.job_id, property_id, "Provider returned no call id");
                let result = VerificationResult::new(property_id, VerificationStatus::Unclear, 0.0)
                    .with_notes("Provider returned no call id; the call was not placed")
                    .with_error("missing call id");
                return self.finish(result).await;
            }
            Err(OrchestratorError::Provider(e)) => return Err(self.provider_failure(property_id, e).await),
        };
        tracing::info!(job_id = %job.job_id, property_id, call_id = %call_id, "Call initiated");

        // PollCompletion
        let outcome = match self
            .orchestrator
            .poll_until_complete(&call_id, self.timings.max_wait, self.timings.poll_interval)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.provider_failure(property_id, e).await),
        };

        let record = match outcome {
            PollOutcome::Finished(record) => record,
            PollOutcome::TimedOut { last } => {
                return self
                    .finish(timeout_result(property_id, self.timings.max_wait, last))
                    .await;
            }
        };

        // Classify
        let result = classified_result(&context, &record);
        tracing::info!(
            job_id = %job.job_id,
            property_id,
            status = %result.status,
            confidence = result.confidence,
            "Verification classified"
        );

        // Persist
        self.finish(result).await
    }

    /// Best-effort property status update before a provider error fails the job.
    async fn provider_failure(&self, property_id: i64, error: ProviderError) -> WorkflowError {
        tracing::error!(property_id, error = %error, "Telephony provider error");
        let notes = format!("Telephony provider error: {}", error);
        if let Err(e) = self
            .sink
            .persist_property_status(property_id, VerificationStatus::Failed, Some(&notes))
            .await
        {
            tracing::warn!(property_id, error = %e, "Could not record provider failure");
        }
        WorkflowError::Provider(error)
    }

    async fn finish(&self, result: VerificationResult) -> Result<VerificationResult, WorkflowError> {
        self.sink.persist_verification(&result).await?;
        self.sink
            .persist_property_status(result.property_id, result.status, result.notes.as_deref())
            .await?;
        record_outcome(&result);
        Ok(result)
    }
}

fn record_outcome(result: &VerificationResult) {
    metrics::counter!("verification_outcomes_total", "status" => result.status.to_string())
        .increment(1);
}

#[async_trait]
impl JobHandler for VerificationWorkflow {
    async fn handle(&self, job: VerificationJob) -> Result<VerificationResult, WorkflowError> {
        self.run(&job).await
    }
}

fn safety_refusal(property_id: i64, violation: &str) -> VerificationResult {
    VerificationResult::new(property_id, VerificationStatus::Unclear, 0.0)
        .with_notes(format!("Safety violation: {}. Call refused.", violation))
        .with_error(format!("safety violation: {}", violation))
}

fn classified_result(context: &PropertyContext, record: &CallRecord) -> VerificationResult {
    let (status, confidence) = classifier::classify_call(record, context.listing_type);
    let transcript = record
        .transcript
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let mut result = VerificationResult::new(context.property_id, status, confidence);
    result.transcript = transcript.map(str::to_string);
    result.call_duration_seconds = Some(record.duration_seconds);

    if record.status.is_failure() {
        result.notes = Some("Call failed to connect or was not answered".to_string());
        result.error_message = Some(format!("Call failed: {}", record.status));
        return result;
    }

    match transcript {
        Some(text) => {
            result.agent_response_summary = Some(classifier::summarize_response(text));
            result.notes = Some(format!("Analyzed {} character transcript", text.chars().count()));
        }
        None => {
            result.agent_response_summary = Some("No response received".to_string());
            result.notes = Some("No transcript available from call".to_string());
        }
    }
    result
}

/// The task handed to the voice agent.
pub fn build_call_script(context: &PropertyContext) -> String {
    let address = &context.address;
    let offer = context.listing_type.phrase();
    format!(
        "You are a helpful and professional property inquiry assistant.

YOUR TASK: Verify if the property at {address} is currently available {offer}.

INSTRUCTIONS:
1. Greet the agent professionally
2. Explain: \"I'm calling to verify the availability of the property at {address}\"
3. Ask: \"Is this property still available {offer}?\"
4. Listen carefully to their response
5. If unclear, ask ONE follow-up question
6. End the conversation within 2-3 minutes

DECISION FRAMEWORK:
- AVAILABLE: The agent clearly states the property IS still available
- SOLD/RENTED: The agent states the property is NO LONGER available, rented out, or sold
- UNCLEAR: The agent is uncertain, wants to check something, or you cannot determine status

IMPORTANT:
- Be brief and professional
- Do NOT identify with any company (stay neutral)
- If you reach voicemail, leave no message and end the call
- Always be polite and respectful

PROPERTY DETAILS:
- Address: {address}
- Reference: {reference}",
        reference = context.property_id,
    )
}

/// A call that never reached a terminal status. `last` is at most an
/// in-progress record, so the outcome is always Unclear.
fn timeout_result(property_id: i64, max_wait: Duration, last: Option<CallRecord>) -> VerificationResult {
    let mut result = VerificationResult::new(property_id, VerificationStatus::Unclear, 0.0)
        .with_notes(format!(
            "Call timed out after {}s without completing; status could not be determined",
            max_wait.as_secs()
        ))
        .with_error("call timeout");
    if let Some(record) = last {
        result.transcript = record.transcript;
        result.call_duration_seconds = Some(record.duration_seconds);
    }
    result
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Telephony provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Persistence error: {0}")]
    Repository(#[from] RepositoryError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::call::CallStatus;
    use crate::models::verification::ListingType;

    fn context(listing_type: ListingType) -> PropertyContext {
        PropertyContext {
            property_id: 999,
            address: "123 Test St, London".to_string(),
            agent_phone: Some("+447911123456".to_string()),
            listing_type,
        }
    }

    #[test]
    fn script_mentions_property_details() {
        let script = build_call_script(&context(ListingType::Rent));
        assert!(script.contains("123 Test St, London"));
        assert!(script.contains("999"));
        assert!(script.contains("available for rent"));
        assert!(script.contains("professional property inquiry assistant"));
        assert!(script.contains("Do NOT identify with any company"));
        assert!(!script.contains("+447911123456"));

        let script = build_call_script(&context(ListingType::Sale));
        assert!(script.contains("available for sale"));
    }

    #[test]
    fn classified_result_carries_call_details() {
        let record = CallRecord {
            call_id: "c".to_string(),
            status: CallStatus::Completed,
            duration_seconds: 120,
            transcript: Some("Yes, the property is available. We have viewings this weekend.".to_string()),
            success: true,
        };
        let result = classified_result(&context(ListingType::Rent), &record);
        assert_eq!(result.status, VerificationStatus::Available);
        assert!(result.confidence > 0.7);
        assert_eq!(result.call_duration_seconds, Some(120));
        assert!(result.notes.unwrap().starts_with("Analyzed"));
        assert!(result.agent_response_summary.unwrap().contains("available"));
    }

    #[test]
    fn failed_call_result() {
        let record = CallRecord {
            call_id: "c".to_string(),
            status: CallStatus::Failed,
            duration_seconds: 0,
            transcript: None,
            success: false,
        };
        let result = classified_result(&context(ListingType::Sale), &record);
        assert_eq!(result.status, VerificationStatus::Failed);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.error_message.as_deref(), Some("Call failed: failed"));
    }

    #[test]
    fn timeout_keeps_partial_call_and_is_unclear() {
        let ringing = CallRecord {
            call_id: "c".to_string(),
            status: CallStatus::InProgress,
            duration_seconds: 41,
            transcript: Some("assistant: Hello, is this the letting agent?".to_string()),
            success: false,
        };
        let result = timeout_result(7, Duration::from_secs(300), Some(ringing));
        assert_eq!(result.status, VerificationStatus::Unclear);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.call_duration_seconds, Some(41));
        assert!(result.transcript.unwrap().contains("letting agent"));
        assert!(result.notes.unwrap().contains("timed out after 300s"));
        assert_eq!(result.error_message.as_deref(), Some("call timeout"));

        let silent = timeout_result(7, Duration::from_secs(300), None);
        assert_eq!(silent.status, VerificationStatus::Unclear);
        assert!(silent.transcript.is_none());
    }
}

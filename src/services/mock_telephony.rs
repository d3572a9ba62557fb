//! In-process telephony provider used in `test` mode and by the test-suite.
//!
//! Calls never leave the process. Each call follows a [`CallScript`]: it reports
//! `in_progress` until the scripted duration has elapsed on the tokio clock, then
//! the scripted final status and transcript.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::call::{CallRecord, CallStatus};
use crate::services::telephony::{ProviderError, TelephonyProvider};

/// Canned answers cycled through when no script is configured.
const DEFAULT_TRANSCRIPTS: &[&str] = &[
    "Yes, that property is still available for rent. We can arrange a viewing whenever you're free.",
    "Sorry, that property has already been rented out. It's no longer available.",
    "Yes, this property is still on the market. We're actively marketing it.",
    "No, that property has been sold. It's off the market now.",
    "I'm not entirely sure about that one. You'd have to check our online listings.",
];

/// How a simulated call behaves.
#[derive(Debug, Clone)]
pub struct CallScript {
    pub transcript: Option<String>,
    /// Time after initiation at which the call reaches `final_status`.
    /// `None` means the call never finishes.
    pub completes_after: Option<Duration>,
    pub final_status: CallStatus,
}

impl CallScript {
    /// A call that is answered and completes after `after`.
    pub fn answered(transcript: impl Into<String>, after: Duration) -> Self {
        Self {
            transcript: Some(transcript.into()),
            completes_after: Some(after),
            final_status: CallStatus::Completed,
        }
    }

    /// A call that stays in progress forever.
    pub fn never_completes() -> Self {
        Self {
            transcript: None,
            completes_after: None,
            final_status: CallStatus::InProgress,
        }
    }

    /// A call that fails (no answer) after `after`.
    pub fn unanswered(after: Duration) -> Self {
        Self {
            transcript: None,
            completes_after: Some(after),
            final_status: CallStatus::Failed,
        }
    }
}

/// What `initiate_call` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitiateBehavior {
    Accept,
    MissingCallId,
    Reject,
}

struct MockCall {
    phone_number: String,
    started: Instant,
    script: CallScript,
}

/// Scripted telephony provider.
pub struct MockTelephony {
    script: Option<CallScript>,
    default_duration: Duration,
    initiate: InitiateBehavior,
    status_failures: AtomicUsize,
    calls: Mutex<HashMap<String, MockCall>>,
    counter: AtomicUsize,
}

impl Default for MockTelephony {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTelephony {
    /// Provider cycling through canned transcripts, each call lasting 3 seconds.
    pub fn new() -> Self {
        Self {
            script: None,
            default_duration: Duration::from_secs(3),
            initiate: InitiateBehavior::Accept,
            status_failures: AtomicUsize::new(0),
            calls: Mutex::new(HashMap::new()),
            counter: AtomicUsize::new(0),
        }
    }

    /// Every call follows `script`.
    pub fn scripted(script: CallScript) -> Self {
        Self {
            script: Some(script),
            ..Self::new()
        }
    }

    /// `initiate_call` fails with a provider error.
    pub fn rejecting() -> Self {
        Self {
            initiate: InitiateBehavior::Reject,
            ..Self::new()
        }
    }

    /// `initiate_call` succeeds at the transport level but yields no call id.
    pub fn without_call_id() -> Self {
        Self {
            initiate: InitiateBehavior::MissingCallId,
            ..Self::new()
        }
    }

    /// The next `n` status fetches fail before the provider recovers.
    pub fn with_status_failures(self, n: usize) -> Self {
        self.status_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Number of calls placed so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Numbers dialled so far, in no particular order.
    pub fn dialled_numbers(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.values().map(|c| c.phone_number.clone()).collect())
            .unwrap_or_default()
    }

    fn next_script(&self) -> CallScript {
        if let Some(script) = &self.script {
            return script.clone();
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        CallScript::answered(DEFAULT_TRANSCRIPTS[n % DEFAULT_TRANSCRIPTS.len()], self.default_duration)
    }
}

#[async_trait]
impl TelephonyProvider for MockTelephony {
    async fn initiate_call(&self, phone_number: &str, task: &str) -> Result<String, ProviderError> {
        match self.initiate {
            InitiateBehavior::Reject => {
                return Err(ProviderError::Rejected("mock provider refused the call".to_string()))
            }
            InitiateBehavior::MissingCallId => return Err(ProviderError::MissingCallId),
            InitiateBehavior::Accept => {}
        }

        let call_id = format!("mock_call_{}", &Uuid::new_v4().simple().to_string()[..12]);
        let call = MockCall {
            phone_number: phone_number.to_string(),
            started: Instant::now(),
            script: self.next_script(),
        };
        self.calls
            .lock()
            .map_err(|_| ProviderError::Rejected("mock call registry poisoned".to_string()))?
            .insert(call_id.clone(), call);

        tracing::info!(call_id = %call_id, phone = %phone_number, task_len = task.len(), "[MOCK] Simulated call started");
        Ok(call_id)
    }

    async fn get_call_status(&self, call_id: &str) -> Result<CallRecord, ProviderError> {
        let failing = self
            .status_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ProviderError::Api {
                status: 503,
                message: "mock provider temporarily unavailable".to_string(),
            });
        }

        let calls = self
            .calls
            .lock()
            .map_err(|_| ProviderError::Rejected("mock call registry poisoned".to_string()))?;
        let call = calls
            .get(call_id)
            .ok_or_else(|| ProviderError::UnknownCall(call_id.to_string()))?;

        let elapsed = call.started.elapsed();
        let finished = call.script.completes_after.is_some_and(|after| elapsed >= after);

        let record = if finished {
            CallRecord {
                call_id: call_id.to_string(),
                status: call.script.final_status,
                duration_seconds: elapsed.as_secs() as u32,
                transcript: call.script.transcript.clone(),
                success: call.script.final_status == CallStatus::Completed,
            }
        } else {
            CallRecord {
                call_id: call_id.to_string(),
                status: CallStatus::InProgress,
                duration_seconds: 0,
                transcript: None,
                success: false,
            }
        };
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn scripted_call_completes_after_duration() {
        let provider = MockTelephony::scripted(CallScript::answered("Yes.", Duration::from_secs(3)));
        let call_id = provider.initiate_call("+44 7000 000000", "task").await.unwrap();
        assert!(call_id.starts_with("mock_call_"));
        assert_eq!(call_id.len(), "mock_call_".len() + 12);

        let record = provider.get_call_status(&call_id).await.unwrap();
        assert_eq!(record.status, CallStatus::InProgress);

        tokio::time::advance(Duration::from_secs(3)).await;
        let record = provider.get_call_status(&call_id).await.unwrap();
        assert_eq!(record.status, CallStatus::Completed);
        assert_eq!(record.transcript.as_deref(), Some("Yes."));
        assert!(record.success);
        assert_eq!(provider.dialled_numbers(), vec!["+44 7000 000000".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn default_provider_rotates_transcripts() {
        let provider = MockTelephony::new();
        let first = provider.initiate_call("1", "t").await.unwrap();
        let second = provider.initiate_call("2", "t").await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;

        let a = provider.get_call_status(&first).await.unwrap().transcript;
        let b = provider.get_call_status(&second).await.unwrap().transcript;
        assert_ne!(a, b);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn unknown_calls_and_failure_modes() {
        let provider = MockTelephony::new();
        assert!(matches!(
            provider.get_call_status("nope").await,
            Err(ProviderError::UnknownCall(_))
        ));
        assert!(matches!(
            MockTelephony::rejecting().initiate_call("1", "t").await,
            Err(ProviderError::Rejected(_))
        ));
        assert!(matches!(
            MockTelephony::without_call_id().initiate_call("1", "t").await,
            Err(ProviderError::MissingCallId)
        ));

        let flaky = MockTelephony::new().with_status_failures(1);
        let id = flaky.initiate_call("1", "t").await.unwrap();
        assert!(flaky.get_call_status(&id).await.is_err());
        assert!(flaky.get_call_status(&id).await.is_ok());
    }
}

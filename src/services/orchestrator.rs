//! Outbound call orchestration and phone routing safety.
//!
//! Which number may be dialled depends on an explicit [`OperatingMode`]:
//!
//! | mode         | dials                  |
//! |--------------|------------------------|
//! | `test`       | sandbox number only    |
//! | `mock`       | sandbox number only    |
//! | `production` | listing agent only     |
//!
//! A [`PhoneTarget`] can only be produced by [`PhoneRoutingPolicy::select`], and
//! [`CallOrchestrator::initiate`] refuses targets selected under another mode.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use strum::{Display, EnumString};
use tokio::time::{sleep, timeout_at, Instant};

use crate::models::call::CallRecord;
use crate::services::telephony::{ProviderError, TelephonyProvider};

/// Minimum digits for a dialable number.
const MIN_PHONE_DIGITS: usize = 7;

/// How calls are routed. Always passed in explicitly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OperatingMode {
    /// Automated tests: sandbox number, in-process provider.
    Test,
    /// Real provider, sandbox number.
    Mock,
    /// Real provider, real listing agent.
    Production,
}

impl OperatingMode {
    pub fn requires_sandbox(self) -> bool {
        !matches!(self, OperatingMode::Production)
    }
}

/// The phone routing invariant was about to be broken. The call is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SafetyViolation {
    #[error("{mode} mode requires a sandbox phone number but none is configured")]
    SandboxNotConfigured { mode: OperatingMode },

    #[error("{mode} mode must dial the sandbox number, refusing {dialled}")]
    NotSandbox { mode: OperatingMode, dialled: String },

    #[error("production mode must dial the listing agent, refusing sandbox number {dialled}")]
    SandboxInProduction { dialled: String },

    #[error("phone number {dialled:?} is not dialable")]
    InvalidNumber { dialled: String },

    #[error("target was selected for {selected} mode but the orchestrator runs in {running} mode")]
    ModeMismatch {
        selected: OperatingMode,
        running: OperatingMode,
    },
}

/// A number cleared for dialling under a specific mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneTarget {
    number: String,
    mode: OperatingMode,
}

impl PhoneTarget {
    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn is_sandbox(&self) -> bool {
        self.mode.requires_sandbox()
    }
}

/// Chooses between the sandbox number and the listing agent's number.
#[derive(Debug, Clone)]
pub struct PhoneRoutingPolicy {
    mode: OperatingMode,
    sandbox_number: Option<String>,
}

impl PhoneRoutingPolicy {
    pub fn new(mode: OperatingMode, sandbox_number: Option<String>) -> Self {
        let sandbox_number = sandbox_number
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        Self { mode, sandbox_number }
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// Pick the number to dial for a listing whose agent is reachable on
    /// `agent_phone`, then check the pick against what the mode requires.
    pub fn select(&self, agent_phone: &str) -> Result<PhoneTarget, SafetyViolation> {
        let number = if self.mode.requires_sandbox() {
            self.sandbox_number
                .clone()
                .ok_or(SafetyViolation::SandboxNotConfigured { mode: self.mode })?
        } else {
            agent_phone.trim().to_string()
        };
        self.check(&number)?;
        Ok(PhoneTarget {
            number,
            mode: self.mode,
        })
    }

    /// Does `number` satisfy the routing rule of this mode?
    pub fn check(&self, number: &str) -> Result<(), SafetyViolation> {
        let dialled = digits(number);
        if dialled.len() < MIN_PHONE_DIGITS {
            return Err(SafetyViolation::InvalidNumber {
                dialled: number.to_string(),
            });
        }

        let is_sandbox = self
            .sandbox_number
            .as_deref()
            .is_some_and(|sandbox| dialled == digits(sandbox));

        match self.mode {
            OperatingMode::Test | OperatingMode::Mock if !is_sandbox => {
                Err(SafetyViolation::NotSandbox {
                    mode: self.mode,
                    dialled: number.to_string(),
                })
            }
            OperatingMode::Production if is_sandbox => Err(SafetyViolation::SandboxInProduction {
                dialled: number.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

fn digits(number: &str) -> String {
    number.chars().filter(char::is_ascii_digit).collect()
}

/// How a wait for call completion ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The provider reported a terminal status.
    Finished(CallRecord),
    /// `max_wait` elapsed first. Carries the last record seen, if any.
    TimedOut { last: Option<CallRecord> },
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Safety violation: {0}")]
    Safety(#[from] SafetyViolation),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Places calls and waits for them to finish.
pub struct CallOrchestrator {
    provider: Arc<dyn TelephonyProvider>,
    policy: PhoneRoutingPolicy,
    max_poll_errors: u32,
}

impl CallOrchestrator {
    pub fn new(provider: Arc<dyn TelephonyProvider>, policy: PhoneRoutingPolicy) -> Self {
        Self {
            provider,
            policy,
            max_poll_errors: 3,
        }
    }

    /// Consecutive status fetch errors tolerated while polling.
    pub fn with_max_poll_errors(mut self, max_poll_errors: u32) -> Self {
        self.max_poll_errors = max_poll_errors;
        self
    }

    pub fn mode(&self) -> OperatingMode {
        self.policy.mode()
    }

    /// Select the number to call for a listing agent.
    pub fn select_target(&self, agent_phone: &str) -> Result<PhoneTarget, SafetyViolation> {
        match self.policy.select(agent_phone) {
            Ok(target) => Ok(target),
            Err(violation) => {
                metrics::counter!("verification_safety_violations_total").increment(1);
                Err(violation)
            }
        }
    }

    /// Place the call. The target is re-checked against this orchestrator's mode
    /// immediately before dialling.
    pub async fn initiate(
        &self,
        target: &PhoneTarget,
        task_description: &str,
    ) -> Result<String, OrchestratorError> {
        let guard = if target.mode != self.policy.mode() {
            Err(SafetyViolation::ModeMismatch {
                selected: target.mode,
                running: self.policy.mode(),
            })
        } else {
            self.policy.check(&target.number)
        };
        if let Err(violation) = guard {
            metrics::counter!("verification_safety_violations_total").increment(1);
            return Err(violation.into());
        }

        tracing::info!(
            mode = %self.policy.mode(),
            sandbox = target.is_sandbox(),
            "Initiating verification call"
        );
        let call_id = self
            .provider
            .initiate_call(&target.number, task_description)
            .await?;
        Ok(call_id)
    }

    /// Poll the provider every `poll_interval` until the call reaches a terminal
    /// status or `max_wait` elapses. A timeout is an outcome, not an error, and a
    /// status request still in flight at the deadline is abandoned.
    ///
    /// `TimedOut::last` only ever holds an in-progress record.
    pub async fn poll_until_complete(
        &self,
        call_id: &str,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> Result<PollOutcome, ProviderError> {
        // `None` when `max_wait` is too large to represent: wait indefinitely
        let deadline = Instant::now().checked_add(max_wait);
        let mut last = None;
        let mut consecutive_errors = 0u32;

        loop {
            let fetch = self.provider.get_call_status(call_id);
            let fetched = match deadline {
                Some(deadline) => match timeout_at(deadline, fetch).await {
                    Ok(fetched) => fetched,
                    Err(_) => {
                        tracing::warn!(call_id = %call_id, "Status request still pending at deadline");
                        break;
                    }
                },
                None => fetch.await,
            };

            match fetched {
                Ok(record) if record.status.is_terminal() => {
                    tracing::info!(
                        call_id = %call_id,
                        status = %record.status,
                        duration_seconds = record.duration_seconds,
                        "Call finished"
                    );
                    metrics::histogram!("verification_call_duration_seconds")
                        .record(record.duration_seconds as f64);
                    return Ok(PollOutcome::Finished(record));
                }
                Ok(record) => {
                    tracing::debug!(call_id = %call_id, status = %record.status, "Call still in progress");
                    consecutive_errors = 0;
                    last = Some(record);
                }
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors > self.max_poll_errors {
                        tracing::error!(call_id = %call_id, error = %e, "Giving up on call status");
                        return Err(e);
                    }
                    tracing::warn!(
                        call_id = %call_id,
                        error = %e,
                        attempt = consecutive_errors,
                        "Failed to fetch call status, will retry"
                    );
                }
            }

            let Some(deadline) = deadline else {
                sleep(poll_interval).await;
                continue;
            };
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(poll_interval.min(deadline - now)).await;
            if Instant::now() >= deadline {
                break;
            }
        }

        tracing::warn!(call_id = %call_id, max_wait_secs = max_wait.as_secs(), "Timed out waiting for call");
        Ok(PollOutcome::TimedOut { last })
    }
}

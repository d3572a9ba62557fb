//! Test helper utilities for running verification jobs in-process

use listing_verify::{
    app_state::AppState,
    models::job::VerificationJob,
    services::{
        mock_telephony::MockTelephony,
        orchestrator::{CallOrchestrator, OperatingMode, PhoneRoutingPolicy},
        queue::{JobQueue, QueueConfig},
        repository::InMemoryStore,
        workflow::{CallTimings, VerificationWorkflow},
    },
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

use crate::fixtures::{PROPERTIES, SANDBOX_NUMBER};

/// A running queue wired to the mock provider and an in-memory store
pub struct Harness {
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub provider: Arc<MockTelephony>,
}

/// Start a test-mode verification stack seeded with every property fixture.
pub fn start_harness(provider: MockTelephony, max_concurrent: usize, timings: CallTimings) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    for fixture in PROPERTIES {
        store.insert_property(fixture.context());
    }

    let provider = Arc::new(provider);
    let policy = PhoneRoutingPolicy::new(OperatingMode::Test, Some(SANDBOX_NUMBER.to_string()));
    let orchestrator = CallOrchestrator::new(provider.clone(), policy);
    let workflow = Arc::new(VerificationWorkflow::new(
        store.clone(),
        store.clone(),
        orchestrator,
        timings,
    ));

    let queue = JobQueue::new(QueueConfig {
        max_concurrent,
        retention: None,
    });
    let state = AppState::new(queue, store.clone());
    state.start(workflow).expect("Failed to start queue");

    Harness {
        state,
        store,
        provider,
    }
}

/// Call timings suited to paused-clock tests
pub fn fast_timings(max_wait_secs: u64) -> CallTimings {
    CallTimings {
        max_wait: Duration::from_secs(max_wait_secs),
        poll_interval: Duration::from_secs(1),
    }
}

/// Poll a job until it reaches a terminal state.
pub async fn wait_for_terminal(state: &AppState, job_id: Uuid) -> VerificationJob {
    for _ in 0..10_000 {
        let job = state
            .job_status(job_id)
            .expect("Failed to read job")
            .expect("Job disappeared");
        if job.status.is_terminal() {
            return job;
        }
        sleep(Duration::from_millis(100)).await;
    }
    panic!("Job {} did not finish", job_id);
}

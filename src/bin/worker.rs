use listing_verify::{
    app_state::{AppState, SubmitError},
    config::AppConfig,
    db::{self, queries::PgStore},
    models::job::VerificationJob,
    services::{
        bland::BlandClient,
        mock_telephony::MockTelephony,
        orchestrator::{CallOrchestrator, OperatingMode},
        queue::JobQueue,
        telephony::TelephonyProvider,
        workflow::VerificationWorkflow,
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Worker exited with error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Starting listing verification worker");

    let property_ids = std::env::args()
        .skip(1)
        .map(|arg| arg.parse::<i64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("property ids must be integers: {}", e))?;
    if property_ids.is_empty() {
        return Err("usage: worker <property_id>...".into());
    }

    // Load configuration
    let config = AppConfig::from_env()?;
    tracing::info!(
        mode = %config.operating_mode,
        max_concurrent = config.max_concurrent,
        "Configuration loaded"
    );

    if let Some(addr) = &config.metrics_addr {
        let addr: SocketAddr = addr.parse()?;
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        describe_metrics();
        tracing::info!(%addr, "Prometheus exporter listening");
    }

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url).await?;
    let store = Arc::new(PgStore::new(db_pool));

    // Initialize services
    let provider: Arc<dyn TelephonyProvider> = match config.operating_mode {
        OperatingMode::Test => Arc::new(MockTelephony::new()),
        OperatingMode::Mock | OperatingMode::Production => Arc::new(BlandClient::new(
            &config.bland_base_url,
            config.bland_api_key.as_deref().unwrap_or_default(),
        )?),
    };
    let orchestrator = CallOrchestrator::new(provider, config.routing_policy())
        .with_max_poll_errors(config.max_poll_errors);
    let workflow = Arc::new(VerificationWorkflow::new(
        store.clone(),
        store.clone(),
        orchestrator,
        config.call_timings(),
    ));

    let state = AppState::new(JobQueue::new(config.queue_config()), store);
    state.start(workflow)?;

    let mut job_ids = Vec::with_capacity(property_ids.len());
    for property_id in property_ids {
        match state.submit_verification(property_id).await {
            Ok(job) => job_ids.push(job.job_id),
            Err(SubmitError::PropertyNotFound(id)) => {
                tracing::warn!(property_id = id, "Skipping unknown property");
            }
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!(jobs = job_ids.len(), "Worker ready, waiting for jobs to finish");

    tokio::select! {
        finished = wait_for_jobs(&state, &job_ids) => {
            for job in finished? {
                log_job(&job);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, leaving in-flight calls to finish");
        }
    }

    state.queue.stop().await;
    Ok(())
}

/// Poll the registry until every job is terminal.
async fn wait_for_jobs(
    state: &AppState,
    job_ids: &[Uuid],
) -> Result<Vec<VerificationJob>, Box<dyn std::error::Error>> {
    loop {
        let mut jobs = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            if let Some(job) = state.job_status(*job_id)? {
                jobs.push(job);
            }
        }

        if jobs.iter().all(|j| j.status.is_terminal()) {
            return Ok(jobs);
        }

        tracing::debug!(stats = ?state.stats()?, "Jobs still running");
        sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
    }
}

fn log_job(job: &VerificationJob) {
    match &job.result {
        Some(result) => tracing::info!(
            job_id = %job.job_id,
            property_id = job.property_id,
            status = %result.status,
            confidence = result.confidence,
            notes = result.notes.as_deref().unwrap_or_default(),
            "Verification finished"
        ),
        None => tracing::warn!(
            job_id = %job.job_id,
            property_id = job.property_id,
            job_status = %job.status,
            error = job.error.as_deref().unwrap_or_default(),
            "Verification finished without a result"
        ),
    }
}

fn describe_metrics() {
    metrics::describe_counter!(
        "verification_jobs_total",
        "Total verification jobs submitted"
    );
    metrics::describe_counter!(
        "verification_jobs_completed",
        "Total verification jobs completed"
    );
    metrics::describe_counter!(
        "verification_jobs_failed",
        "Total verification jobs that failed"
    );
    metrics::describe_gauge!(
        "verification_queue_depth",
        "Current number of queued jobs"
    );
    metrics::describe_gauge!(
        "verification_active_workers",
        "Jobs currently holding a worker slot"
    );
    metrics::describe_histogram!(
        "verification_call_duration_seconds",
        "Duration of finished verification calls"
    );
    metrics::describe_counter!(
        "verification_safety_violations_total",
        "Calls refused by the phone routing policy"
    );
    metrics::describe_counter!(
        "verification_outcomes_total",
        "Verification results by status"
    );
}

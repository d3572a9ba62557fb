use listing_verify::{
    app_state::AppState,
    config::AppConfig,
    db::{self, queries::PgStore},
    models::{
        job::JobStatus,
        verification::{VerificationResult, VerificationStatus},
    },
    services::{
        mock_telephony::{CallScript, MockTelephony},
        orchestrator::CallOrchestrator,
        queue::JobQueue,
        repository::{PropertyRepository, ResultSink},
        workflow::VerificationWorkflow,
    },
};
use sqlx::Row;
use std::sync::Arc;
use std::time::Duration;

/// Integration test: verification against the real property database
///
/// This test verifies:
/// 1. Database connection and the properties/verification_logs schema
/// 2. Reading a property context
/// 3. Upserting the verification log and updating the property status
/// 4. A full queued verification in test mode
///
/// Note: This requires a running PostgreSQL instance configured via
/// DATABASE_URL and SANDBOX_PHONE_NUMBER. Test rows use negative ids.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_full_integration() {
    let config = AppConfig::from_env().expect("Failed to load config");
    let pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    let property_id: i64 = -4242;
    sqlx::query(
        r#"
        INSERT INTO properties (id, full_address, agent_phone, listing_type, verification_status)
        VALUES ($1, '1 Integration Way, Leeds', '+44 113 496 0999', 'rent', 'pending')
        ON CONFLICT (id) DO UPDATE SET verification_status = 'pending'
        "#,
    )
    .bind(property_id)
    .execute(&pool)
    .await
    .expect("Failed to seed property");

    let store = Arc::new(PgStore::new(pool.clone()));

    // Context lookup
    let context = store
        .get_context(property_id)
        .await
        .expect("Failed to read property")
        .expect("Seeded property missing");
    assert_eq!(context.address, "1 Integration Way, Leeds");
    assert!(store.get_context(i64::MIN).await.unwrap().is_none());

    // Log upsert keeps one row per property
    let first = VerificationResult::new(property_id, VerificationStatus::Unclear, 0.2);
    store.persist_verification(&first).await.expect("First upsert failed");
    let mut second = VerificationResult::new(property_id, VerificationStatus::Rented, 0.8)
        .with_notes("integration");
    second.transcript = Some("user: Sorry, it has been let. Someone moved in last week.".to_string());
    second.agent_response_summary = Some("Sorry, it has been let.".to_string());
    store.persist_verification(&second).await.expect("Second upsert failed");

    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS n, MAX(verification_status) AS status, MAX(agent_response) AS agent_response
        FROM verification_logs
        WHERE property_id = $1
        "#,
    )
    .bind(property_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(row.get::<i64, _>("n"), 1);
    assert_eq!(row.get::<String, _>("status"), "rented");
    // The summary is stored, not the raw transcript
    assert_eq!(
        row.get::<Option<String>, _>("agent_response").as_deref(),
        Some("Sorry, it has been let.")
    );

    // Full run through the queue
    let provider = Arc::new(MockTelephony::scripted(CallScript::answered(
        "Yes, it's still available to rent.",
        Duration::from_secs(1),
    )));
    let workflow = Arc::new(VerificationWorkflow::new(
        store.clone(),
        store.clone(),
        CallOrchestrator::new(provider, config.routing_policy()),
        config.call_timings(),
    ));
    let state = AppState::new(JobQueue::new(config.queue_config()), store.clone());
    state.start(workflow).expect("Failed to start queue");

    let job = state.submit_verification(property_id).await.unwrap();
    let job = loop {
        let job = state.job_status(job.job_id).unwrap().unwrap();
        if job.status.is_terminal() {
            break job;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    };
    assert_eq!(job.status, JobStatus::Completed);

    let status: String = sqlx::query("SELECT verification_status FROM properties WHERE id = $1")
        .bind(property_id)
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("verification_status");
    assert_eq!(status, "available");

    let agent_response: Option<String> =
        sqlx::query("SELECT agent_response FROM verification_logs WHERE property_id = $1")
            .bind(property_id)
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("agent_response");
    assert_eq!(
        agent_response,
        job.result.as_ref().and_then(|r| r.agent_response_summary.clone())
    );
    assert_eq!(agent_response.as_deref(), Some("Yes, it's still available to rent."));

    // Cleanup
    state.queue.stop().await;
    sqlx::query("DELETE FROM verification_logs WHERE property_id = $1")
        .bind(property_id)
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("DELETE FROM properties WHERE id = $1")
        .bind(property_id)
        .execute(&pool)
        .await
        .unwrap();
}

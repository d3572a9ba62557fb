//! Bland AI client against a local HTTP mock.

use listing_verify::{
    models::call::CallStatus,
    services::{
        bland::BlandClient,
        telephony::{ProviderError, TelephonyProvider},
    },
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_KEY: &str = "sk-test-key";

async fn client(server: &MockServer) -> BlandClient {
    BlandClient::new(&server.uri(), API_KEY).expect("Failed to build client")
}

#[tokio::test]
async fn test_initiate_call_posts_task() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/calls"))
        .and(header("authorization", "Bearer sk-test-key"))
        .and(body_partial_json(json!({
            "phone_number": "+447700900123",
            "language": "en",
            "voice_id": 0,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "call_id": "9d404c1b-6a23-4426-953a-a52c392ff8f1",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let call_id = client(&server)
        .await
        .initiate_call("+447700900123", "Verify the listing")
        .await
        .unwrap();
    assert_eq!(call_id, "9d404c1b-6a23-4426-953a-a52c392ff8f1");
}

#[tokio::test]
async fn test_missing_call_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/calls"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "success" })))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .initiate_call("+447700900123", "task")
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::MissingCallId));
}

#[tokio::test]
async fn test_api_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/calls"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .initiate_call("+447700900123", "task")
        .await
        .unwrap_err();
    match err {
        ProviderError::Api { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "invalid api key");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_call_status_prefers_concatenated_transcript() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/calls/call-1"))
        .and(header("authorization", "Bearer sk-test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "concatenated_transcript": "user: Yes, still available.",
            "transcript": "ignored",
            "call_length": "47",
            "success": true,
        })))
        .mount(&server)
        .await;

    let record = client(&server).await.get_call_status("call-1").await.unwrap();
    assert_eq!(record.call_id, "call-1");
    assert_eq!(record.status, CallStatus::Completed);
    assert_eq!(record.duration_seconds, 47);
    assert_eq!(record.transcript.as_deref(), Some("user: Yes, still available."));
    assert!(record.success);
}

#[tokio::test]
async fn test_call_status_in_progress_and_no_answer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/calls/ringing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "in-progress" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/calls/unanswered"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "no-answer",
            "transcript": "",
            "call_length": 0,
        })))
        .mount(&server)
        .await;

    let bland = client(&server).await;

    let ringing = bland.get_call_status("ringing").await.unwrap();
    assert_eq!(ringing.status, CallStatus::InProgress);
    assert!(!ringing.status.is_terminal());
    assert_eq!(ringing.duration_seconds, 0);

    let unanswered = bland.get_call_status("unanswered").await.unwrap();
    assert_eq!(unanswered.status, CallStatus::Failed);
    assert!(unanswered.status.is_failure());
    assert!(!unanswered.success);
}

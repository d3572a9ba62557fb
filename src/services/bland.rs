use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::call::{CallRecord, CallStatus};
use crate::services::telephony::{ProviderError, TelephonyProvider};

pub const DEFAULT_BASE_URL: &str = "https://api.bland.ai";

/// Per-request HTTP timeout. Call completion is awaited by polling, not here.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the Bland AI outbound call API.
pub struct BlandClient {
    http: Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct CallRequest<'a> {
    phone_number: &'a str,
    task: &'a str,
    language: &'a str,
    voice_id: u32,
}

#[derive(Deserialize)]
struct CallResponse {
    call_id: Option<String>,
}

#[derive(Deserialize)]
struct CallDetails {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    concatenated_transcript: Option<String>,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    call_length: Option<serde_json::Value>,
    #[serde(default)]
    success: Option<bool>,
}

impl BlandClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured("Bland AI API key is empty".to_string()));
        }
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ProviderError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl TelephonyProvider for BlandClient {
    async fn initiate_call(&self, phone_number: &str, task: &str) -> Result<String, ProviderError> {
        let url = format!("{}/v1/calls", self.base_url);
        let body = CallRequest {
            phone_number,
            task,
            language: "en",
            voice_id: 0,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = Self::error_for_status(response).await?;
        let parsed: CallResponse = response.json().await?;

        let call_id = parsed
            .call_id
            .filter(|id| !id.is_empty())
            .ok_or(ProviderError::MissingCallId)?;
        tracing::info!(call_id = %call_id, "Bland AI call started");
        Ok(call_id)
    }

    async fn get_call_status(&self, call_id: &str) -> Result<CallRecord, ProviderError> {
        let url = format!("{}/v1/calls/{}", self.base_url, call_id);

        let response = self.http.get(&url).bearer_auth(&self.api_key).send().await?;
        let response = Self::error_for_status(response).await?;
        let details: CallDetails = response.json().await?;

        let record = CallRecord {
            call_id: call_id.to_string(),
            status: CallStatus::from_provider(details.status.as_deref().unwrap_or_default()),
            duration_seconds: parse_call_length(details.call_length.as_ref()),
            transcript: details
                .concatenated_transcript
                .filter(|t| !t.is_empty())
                .or(details.transcript),
            success: details.success.unwrap_or(false),
        };
        tracing::debug!(call_id = %call_id, status = %record.status, "Fetched Bland AI call status");
        Ok(record)
    }
}

/// `call_length` arrives as a number or a numeric string depending on API version.
/// Anything unparseable counts as zero.
fn parse_call_length(value: Option<&serde_json::Value>) -> u32 {
    let seconds = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match seconds {
        Some(s) if s.is_finite() && s > 0.0 => s as u32,
        Some(_) => 0,
        None => {
            if let Some(raw) = value.filter(|v| !v.is_null()) {
                tracing::warn!(call_length = %raw, "Could not parse call_length, using 0");
            }
            0
        }
    }
}

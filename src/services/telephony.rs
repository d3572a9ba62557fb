use async_trait::async_trait;

use crate::models::call::CallRecord;

/// An outbound-call provider (AI voice agent).
#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    /// Place a call to `phone_number` with `task` as the agent's script.
    /// Returns the provider's call id.
    async fn initiate_call(&self, phone_number: &str, task: &str) -> Result<String, ProviderError>;

    /// Fetch the current state of a call.
    async fn get_call_status(&self, call_id: &str) -> Result<CallRecord, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Provider response contained no call id")]
    MissingCallId,

    #[error("Unknown call: {0}")]
    UnknownCall(String),

    #[error("Provider is not configured: {0}")]
    NotConfigured(String),

    #[error("Provider rejected the call: {0}")]
    Rejected(String),
}

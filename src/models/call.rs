use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Provider-side status of an outbound call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CallStatus {
    #[strum(to_string = "in_progress", serialize = "in-progress")]
    InProgress,
    Completed,
    #[strum(
        to_string = "failed",
        serialize = "no_answer",
        serialize = "no-answer",
        serialize = "failed_to_connect",
        serialize = "busy",
        serialize = "canceled"
    )]
    Failed,
    Error,
}

impl CallStatus {
    /// Map a raw provider status string. Unknown values (queued, ringing, ...) are
    /// still in progress.
    pub fn from_provider(raw: &str) -> Self {
        raw.trim().parse().unwrap_or(CallStatus::InProgress)
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, CallStatus::InProgress)
    }

    /// The call never produced a conversation worth classifying.
    pub fn is_failure(self) -> bool {
        matches!(self, CallStatus::Failed | CallStatus::Error)
    }
}

/// Raw call record as reported by the telephony provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallRecord {
    pub call_id: String,
    pub status: CallStatus,
    pub duration_seconds: u32,
    pub transcript: Option<String>,
    pub success: bool,
}

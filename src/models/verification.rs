use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Availability status recorded for a property.
///
/// `Pending` and `Processing` describe a property that has not been verified yet or
/// is being verified; the rest are outcomes of a verification run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Processing,
    Available,
    Sold,
    Rented,
    Unclear,
    PendingReview,
    Failed,
}

/// Whether a listing is offered for sale or to let.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ListingType {
    Sale,
    Rent,
}

impl ListingType {
    /// Parse the free-form listing type stored alongside scraped properties.
    /// Anything that is not recognisably a rental is treated as a sale.
    pub fn from_listing(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("rent" | "rental" | "to_rent" | "to-rent" | "lettings" | "let") => ListingType::Rent,
            _ => ListingType::Sale,
        }
    }

    /// Phrase used when talking about the listing, e.g. "for rent".
    pub fn phrase(self) -> &'static str {
        match self {
            ListingType::Sale => "for sale",
            ListingType::Rent => "for rent",
        }
    }
}

/// Everything the workflow needs to know about a property before calling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropertyContext {
    pub property_id: i64,
    pub address: String,
    pub agent_phone: Option<String>,
    pub listing_type: ListingType,
}

impl PropertyContext {
    /// The agent phone, if present and not blank.
    pub fn usable_agent_phone(&self) -> Option<&str> {
        self.agent_phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// Outcome of verifying one property. Produced once per job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationResult {
    pub property_id: i64,
    pub status: VerificationStatus,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_duration_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_response_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl VerificationResult {
    /// Bare result; confidence is clamped into [0, 1].
    pub fn new(property_id: i64, status: VerificationStatus, confidence: f64) -> Self {
        Self {
            property_id,
            status,
            confidence: confidence.clamp(0.0, 1.0),
            transcript: None,
            call_duration_seconds: None,
            agent_response_summary: None,
            notes: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }
}

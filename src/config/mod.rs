use garde::Validate;
use serde::Deserialize;
use std::time::Duration;

use crate::services::orchestrator::{OperatingMode, PhoneRoutingPolicy};
use crate::services::queue::QueueConfig;
use crate::services::workflow::CallTimings;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    /// PostgreSQL connection string
    #[garde(length(min = 1))]
    pub database_url: String,

    /// Call routing mode. Defaults to `test` so nothing real is dialled by accident.
    #[serde(default = "default_operating_mode")]
    #[garde(skip)]
    pub operating_mode: OperatingMode,

    /// Bland AI API key. Not needed in `test` mode.
    #[garde(skip)]
    pub bland_api_key: Option<String>,

    #[serde(default = "default_bland_base_url")]
    #[garde(length(min = 1))]
    pub bland_base_url: String,

    /// Number dialled instead of the listing agent outside production.
    #[garde(skip)]
    pub sandbox_phone_number: Option<String>,

    #[serde(default = "default_max_concurrent")]
    #[garde(range(min = 1, max = 64))]
    pub max_concurrent: usize,

    #[serde(default = "default_call_max_wait_secs")]
    #[garde(range(min = 1, max = 3600))]
    pub call_max_wait_secs: u64,

    #[serde(default = "default_call_poll_interval_secs")]
    #[garde(range(min = 1, max = 60))]
    pub call_poll_interval_secs: u64,

    /// Consecutive status fetch errors tolerated while polling a call.
    #[serde(default = "default_max_poll_errors")]
    #[garde(range(max = 20))]
    pub max_poll_errors: u32,

    /// Finished jobs are dropped from the registry after this long. 0 keeps them.
    #[serde(default = "default_job_retention_secs")]
    #[garde(skip)]
    pub job_retention_secs: u64,

    /// Prometheus listener address (e.g., "0.0.0.0:9100"). Metrics are not exported when unset.
    #[garde(skip)]
    pub metrics_addr: Option<String>,
}

fn default_operating_mode() -> OperatingMode {
    OperatingMode::Test
}

fn default_bland_base_url() -> String {
    crate::services::bland::DEFAULT_BASE_URL.to_string()
}

fn default_max_concurrent() -> usize {
    5
}

fn default_call_max_wait_secs() -> u64 {
    120
}

fn default_call_poll_interval_secs() -> u64 {
    2
}

fn default_max_poll_errors() -> u32 {
    3
}

fn default_job_retention_secs() -> u64 {
    24 * 60 * 60
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.check()?;
        Ok(config)
    }

    /// Field ranges plus the rules that span several fields.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;

        if self.operating_mode.requires_sandbox() && non_empty(&self.sandbox_phone_number).is_none() {
            return Err(ConfigError::Missing("SANDBOX_PHONE_NUMBER"));
        }
        if self.operating_mode != OperatingMode::Test && non_empty(&self.bland_api_key).is_none() {
            return Err(ConfigError::Missing("BLAND_API_KEY"));
        }
        if self.call_poll_interval_secs > self.call_max_wait_secs {
            return Err(ConfigError::Inconsistent(
                "CALL_POLL_INTERVAL_SECS must not exceed CALL_MAX_WAIT_SECS",
            ));
        }
        Ok(())
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_concurrent: self.max_concurrent,
            retention: (self.job_retention_secs > 0)
                .then(|| Duration::from_secs(self.job_retention_secs)),
        }
    }

    pub fn call_timings(&self) -> CallTimings {
        CallTimings {
            max_wait: Duration::from_secs(self.call_max_wait_secs),
            poll_interval: Duration::from_secs(self.call_poll_interval_secs),
        }
    }

    pub fn routing_policy(&self) -> PhoneRoutingPolicy {
        PhoneRoutingPolicy::new(self.operating_mode, self.sandbox_phone_number.clone())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),

    #[error("{0} is required in this operating mode")]
    Missing(&'static str),

    #[error("Inconsistent configuration: {0}")]
    Inconsistent(&'static str),
}

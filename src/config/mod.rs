use std::time::Duration;

use garde::Validate;
use serde::Deserialize;

use crate::services::poll::IntervalPolicy;
use crate::services::push::BackoffConfig;

#[derive(Debug, Deserialize, Validate)]
pub struct SyncConfig {
    /// Base URL of the verification API (e.g., "http://localhost:3000")
    #[garde(length(min = 1))]
    pub api_base_url: String,

    /// WebSocket URL of the job update channel
    #[garde(length(min = 1))]
    pub push_url: String,

    /// Bearer token for both endpoints
    #[serde(default)]
    #[garde(skip)]
    pub api_token: Option<String>,

    /// Timeout of a single status request
    #[serde(default = "default_request_timeout_ms")]
    #[garde(range(min = 1))]
    pub request_timeout_ms: u64,

    /// How long a connected but silent channel is trusted before polling starts
    #[serde(default = "default_fallback_activation_delay_ms")]
    #[garde(range(min = 1))]
    pub fallback_activation_delay_ms: u64,

    /// Poll interval while the job is processing, generating or auditing
    #[serde(default = "default_active_poll_interval_ms")]
    #[garde(range(min = 1))]
    pub active_poll_interval_ms: u64,

    /// Added to the active interval per poll attempt
    #[serde(default = "default_active_poll_growth_ms")]
    #[garde(skip)]
    pub active_poll_growth_ms: u64,

    /// Ceiling of the grown active interval
    #[serde(default = "default_active_poll_max_interval_ms")]
    #[garde(range(min = 1))]
    pub active_poll_max_interval_ms: u64,

    /// Poll interval for every other phase
    #[serde(default = "default_idle_poll_interval_ms")]
    #[garde(range(min = 1))]
    pub idle_poll_interval_ms: u64,

    /// First reconnect delay, doubled on every attempt
    #[serde(default = "default_reconnect_base_delay_ms")]
    #[garde(range(min = 1))]
    pub reconnect_base_delay_ms: u64,

    /// Reconnect delay cap
    #[serde(default = "default_reconnect_max_delay_ms")]
    #[garde(range(min = 1))]
    pub reconnect_max_delay_ms: u64,

    /// Reconnect attempts before the channel is given up
    #[serde(default = "default_reconnect_max_attempts")]
    #[garde(skip)]
    pub reconnect_max_attempts: u32,

    /// Absolute ceiling for a job to reach a terminal phase
    #[serde(default = "default_job_timeout_secs")]
    #[garde(range(min = 1))]
    pub job_timeout_secs: u64,

    /// Prometheus scrape address (e.g., "0.0.0.0:9000"). Metrics stay in-process when unset.
    #[serde(default)]
    #[garde(skip)]
    pub metrics_addr: Option<String>,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_fallback_activation_delay_ms() -> u64 {
    5_000
}

fn default_active_poll_interval_ms() -> u64 {
    3_000
}

fn default_active_poll_growth_ms() -> u64 {
    500
}

fn default_active_poll_max_interval_ms() -> u64 {
    10_000
}

fn default_idle_poll_interval_ms() -> u64 {
    10_000
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_reconnect_max_attempts() -> u32 {
    5
}

fn default_job_timeout_secs() -> u64 {
    600
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Build from explicit key/value pairs, using the same names as the environment.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: SyncConfig = envy::from_iter(vars)?;
        config.validate()?;

        if config.active_poll_max_interval_ms < config.active_poll_interval_ms {
            return Err(ConfigError::Inconsistent(
                "ACTIVE_POLL_MAX_INTERVAL_MS is below ACTIVE_POLL_INTERVAL_MS".to_string(),
            ));
        }
        if config.reconnect_max_delay_ms < config.reconnect_base_delay_ms {
            return Err(ConfigError::Inconsistent(
                "RECONNECT_MAX_DELAY_MS is below RECONNECT_BASE_DELAY_MS".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            fallback_activation_delay: Duration::from_millis(self.fallback_activation_delay_ms),
            poll: IntervalPolicy {
                active_base: Duration::from_millis(self.active_poll_interval_ms),
                active_growth: Duration::from_millis(self.active_poll_growth_ms),
                active_max: Duration::from_millis(self.active_poll_max_interval_ms),
                idle: Duration::from_millis(self.idle_poll_interval_ms),
            },
            backoff: BackoffConfig {
                base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
                max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
                max_attempts: self.reconnect_max_attempts,
            },
            job_timeout: Duration::from_secs(self.job_timeout_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Timing knobs consumed by sync sessions.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub fallback_activation_delay: Duration,
    pub poll: IntervalPolicy,
    pub backoff: BackoffConfig,
    pub job_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            fallback_activation_delay: Duration::from_millis(default_fallback_activation_delay_ms()),
            poll: IntervalPolicy::default(),
            backoff: BackoffConfig::default(),
            job_timeout: Duration::from_secs(default_job_timeout_secs()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),

    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),
}

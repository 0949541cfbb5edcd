//! Layered configuration: built-in defaults, an optional TOML file and
//! `STACKOPS__`-prefixed environment variables (`__` separates sections).

use crate::core::domain::{
    error::{OpsError, OpsResult, ValidationError},
    model::control_plane_connection::ControlPlaneConnection,
    value_object::{
        ApiPassword, ApiUsername, ControlPlaneUrl, validate_password, validate_url,
        validate_username,
    },
};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_NAME: &str = "stackops";
const ENV_PREFIX: &str = "STACKOPS";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub control_plane: ControlPlaneConfig,
    pub timing: TimingConfig,
    pub ssh: SshConfig,
    pub datastore: DatastoreConfig,
    pub selection: SelectionConfig,
}

/// Client-side request throttling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub domain: String,
    pub accept_invalid_certs: bool,
    pub session_lifetime_secs: u64,
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            domain: "/".to_string(),
            accept_invalid_certs: false,
            session_lifetime_secs: 3600,
            rate_limit: None,
        }
    }
}

/// Settings the HTTP client needs besides the connection itself.
#[derive(Debug, Clone, Copy)]
pub struct ClientSettings {
    pub session_lifetime: Duration,
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            session_lifetime: Duration::from_secs(3600),
            rate_limit: None,
        }
    }
}

impl ControlPlaneConfig {
    /// Builds a validated connection from this section.
    pub fn connection(&self) -> Result<ControlPlaneConnection, ValidationError> {
        let url = ControlPlaneUrl::parse(&self.url)?;
        validate_username(&self.username)?;
        validate_password(&self.password)?;
        Ok(ControlPlaneConnection::new(
            url,
            ApiUsername::new_unchecked(self.username.clone()),
            ApiPassword::new_unchecked(self.password.clone()),
            self.domain.clone(),
            self.accept_invalid_certs,
        ))
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            session_lifetime: Duration::from_secs(self.session_lifetime_secs),
            rate_limit: self.rate_limit,
        }
    }
}

/// Poll intervals, delays and budgets, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub job_poll_interval_secs: u64,
    pub transient_retry_budget: u32,
    pub volume_start_delay_secs: u64,
    pub volume_poll_interval_secs: u64,
    pub volume_ready_timeout_secs: u64,
    pub state_poll_interval_secs: u64,
    pub state_wait_timeout_secs: u64,
    pub reachability_interval_secs: u64,
    pub reboot_timeout_secs: u64,
    pub drain_retry_delay_secs: u64,
    pub drain_retry_limit: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            job_poll_interval_secs: 1,
            transient_retry_budget: 10,
            volume_start_delay_secs: 60,
            volume_poll_interval_secs: 5,
            volume_ready_timeout_secs: 7200,
            state_poll_interval_secs: 10,
            state_wait_timeout_secs: 1800,
            reachability_interval_secs: 20,
            reboot_timeout_secs: 3600,
            drain_retry_delay_secs: 60,
            drain_retry_limit: 10,
        }
    }
}

/// Runtime form of [`TimingConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub job_poll_interval: Duration,
    pub transient_retry_budget: u32,
    pub volume_start_delay: Duration,
    pub volume_poll_interval: Duration,
    pub volume_ready_timeout: Duration,
    pub state_poll_interval: Duration,
    pub state_wait_timeout: Duration,
    pub reachability_interval: Duration,
    pub reboot_timeout: Duration,
    pub drain_retry_delay: Duration,
    pub drain_retry_limit: u32,
}

impl Timing {
    /// All waits set to zero; budgets keep their defaults.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            job_poll_interval: Duration::ZERO,
            volume_start_delay: Duration::ZERO,
            volume_poll_interval: Duration::ZERO,
            state_poll_interval: Duration::ZERO,
            reachability_interval: Duration::ZERO,
            drain_retry_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        TimingConfig::default().timing()
    }
}

impl TimingConfig {
    pub fn timing(&self) -> Timing {
        Timing {
            job_poll_interval: Duration::from_secs(self.job_poll_interval_secs),
            transient_retry_budget: self.transient_retry_budget,
            volume_start_delay: Duration::from_secs(self.volume_start_delay_secs),
            volume_poll_interval: Duration::from_secs(self.volume_poll_interval_secs),
            volume_ready_timeout: Duration::from_secs(self.volume_ready_timeout_secs),
            state_poll_interval: Duration::from_secs(self.state_poll_interval_secs),
            state_wait_timeout: Duration::from_secs(self.state_wait_timeout_secs),
            reachability_interval: Duration::from_secs(self.reachability_interval_secs),
            reboot_timeout: Duration::from_secs(self.reboot_timeout_secs),
            drain_retry_delay: Duration::from_secs(self.drain_retry_delay_secs),
            drain_retry_limit: self.drain_retry_limit,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub user: String,
    pub port: u16,
    pub identity_file: Option<String>,
    pub connect_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            port: 22,
            identity_file: None,
            connect_timeout_secs: 10,
        }
    }
}

/// Auxiliary relational datastore used for size reconciliation and offering changes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
    pub url: Option<String>,
    pub zone_disk_offering: Option<String>,
    pub cluster_disk_offering: Option<String>,
    pub zone_service_offering: Option<String>,
    pub cluster_service_offering: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Memory assumed for a workload whose offering cannot be read. `0` disables the fallback.
    pub fallback_workload_memory_mb: u64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            fallback_workload_memory_mb: 1024,
        }
    }
}

impl SelectionConfig {
    pub fn fallback_memory_mb(&self) -> Option<u64> {
        (self.fallback_workload_memory_mb > 0).then_some(self.fallback_workload_memory_mb)
    }
}

impl AppConfig {
    /// Loads configuration from `path` (or `stackops.toml` in the working directory if
    /// present) and the environment, then validates it.
    ///
    /// # Errors
    /// Returns `OpsError::Config` if a source cannot be read or parsed and
    /// `OpsError::Validation` if a value is out of range.
    pub fn load(path: Option<&Path>) -> OpsResult<Self> {
        dotenvy::dotenv().ok();

        let mut builder = Config::builder();
        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_NAME).required(false)),
        };
        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

        let config: AppConfig = builder
            .build()
            .and_then(|config| config.try_deserialize::<AppConfig>())
            .map_err(|e| OpsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that would make the orchestration misbehave.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_url(&self.control_plane.url)?;
        validate_username(&self.control_plane.username)?;
        validate_password(&self.control_plane.password)?;

        if self.timing.transient_retry_budget == 0 {
            return Err(ValidationError::Field {
                field: "timing.transient_retry_budget".to_string(),
                message: "Retry budget must be at least 1".to_string(),
            });
        }
        if self.timing.drain_retry_limit == 0 {
            return Err(ValidationError::Field {
                field: "timing.drain_retry_limit".to_string(),
                message: "Drain retry limit must be at least 1".to_string(),
            });
        }
        if let Some(rate_limit) = self.control_plane.rate_limit {
            if rate_limit.requests_per_second == 0 || rate_limit.burst_size == 0 {
                return Err(ValidationError::ConstraintViolation(
                    "Rate limit values must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }
}

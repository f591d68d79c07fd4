//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::ipc::protocol::DEFAULT_MAX_SESSIONS;
use crate::telemetry::thermal::DEFAULT_THERMAL_ZONE;
use crate::{AppError, Result};

/// Temperature sampling settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TelemetryConfig {
    /// Thermal zone `temp` attribute read for the skin temperature.
    #[serde(default = "default_thermal_zone")]
    pub thermal_zone: PathBuf,
    /// Sampling period in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            thermal_zone: default_thermal_zone(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl TelemetryConfig {
    /// Sampling period.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Profile store settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProfilesConfig {
    /// TOML file profiles are loaded from and saved to; memory-only when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_ipc_name() -> String {
    "clockd".into()
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}

fn default_true() -> bool {
    true
}

fn default_thermal_zone() -> PathBuf {
    PathBuf::from(DEFAULT_THERMAL_ZONE)
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Global configuration parsed from `clockd.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Named pipe / Unix socket identifier.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Maximum concurrent IPC client sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Initial state of the profile-application switch.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Temperature sampling.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Profile persistence.
    #[serde(default)]
    pub profiles: ProfilesConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            ipc_name: default_ipc_name(),
            max_sessions: default_max_sessions(),
            enabled: true,
            telemetry: TelemetryConfig::default(),
            profiles: ProfilesConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.ipc_name.trim().is_empty() {
            return Err(AppError::Config("ipc_name must not be empty".into()));
        }

        if self.max_sessions == 0 {
            return Err(AppError::Config(
                "max_sessions must be greater than zero".into(),
            ));
        }

        if self.telemetry.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "telemetry.poll_interval_ms must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

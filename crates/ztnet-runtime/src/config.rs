//! Runtime configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ztnet_gate::GatePolicy;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid duration {value:?}")]
    InvalidDuration { var: &'static str, value: String },

    #[error("{var}: expected a boolean, got {value:?}")]
    InvalidBool { var: &'static str, value: String },

    #[error("Malformed configuration: {0}")]
    Malformed(String),
}

/// Tracing output
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Engine configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Bound on every controller call
    #[serde(with = "humantime_duration")]
    pub controller_timeout: Duration,
    /// Follow-up passes run after a pass that saw triggers arrive meanwhile
    pub max_coalesced_reruns: u32,
    /// The controller auto-authorizes members
    pub central_api_mode: bool,
    pub gate: GatePolicy,
    pub telemetry: TelemetryConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            controller_timeout: Duration::from_secs(5),
            max_coalesced_reruns: 1,
            central_api_mode: false,
            gate: GatePolicy::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Hosted controller that authorizes on its own
    pub fn central() -> Self {
        RuntimeConfig {
            central_api_mode: true,
            ..Default::default()
        }
    }

    /// Self-hosted controller behind a slow link
    pub fn slow_controller() -> Self {
        RuntimeConfig {
            controller_timeout: Duration::from_secs(30),
            max_coalesced_reruns: 3,
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))
    }

    /// Default configuration overridden by `ZTNET_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`RuntimeConfig::from_env`] over any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = RuntimeConfig::default();

        if let Some(value) = lookup("ZTNET_CONTROLLER_TIMEOUT") {
            config.controller_timeout = humantime::parse_duration(value.trim()).map_err(|_| {
                ConfigError::InvalidDuration {
                    var: "ZTNET_CONTROLLER_TIMEOUT",
                    value,
                }
            })?;
        }
        if let Some(value) = lookup("ZTNET_CENTRAL_API") {
            config.central_api_mode = parse_bool("ZTNET_CENTRAL_API", value)?;
        }
        if let Some(value) = lookup("ZTNET_LOG") {
            config.telemetry.filter = value;
        }
        if let Some(value) = lookup("ZTNET_LOG_JSON") {
            config.telemetry.json = parse_bool("ZTNET_LOG_JSON", value)?;
        }

        Ok(config)
    }
}

fn parse_bool(var: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidBool { var, value }),
    }
}

/// Durations as humantime strings ("5s", "1m 30s")
mod humantime_duration {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(de::Error::custom)
    }
}

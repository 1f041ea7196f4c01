//! Configuration types for the flagsync core
//!
//! This module defines the provider configuration and the fixed constants the
//! lifecycle core relies on.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Capacity of the provider's event channel. Overflow events are dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Treatment returned by a flag client when a flag is unknown or evaluation failed
pub const CONTROL_TREATMENT: &str = "control";

/// Evaluation context attribute holding the targeting key
pub const TARGETING_KEY: &str = "targetingKey";

/// Floor applied to the change monitor's poll interval
pub const MIN_MONITOR_INTERVAL: Duration = Duration::from_secs(5);

/// Added on top of the readiness timeout when deriving a default init deadline
const INIT_TIMEOUT_BUFFER: Duration = Duration::from_secs(5);

/// Default deadline for a shutdown when the readiness timeout is shorter
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// How the wrapped flag client obtains its definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    /// Definitions streamed or polled from the remote service
    Cloud,
    /// Definitions read from a local flag file
    Localhost,
}

impl OperationMode {
    /// Mode name used in logs and health output
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationMode::Cloud => "cloud",
            OperationMode::Localhost => "localhost",
        }
    }
}

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// SDK key, or `"localhost"` for local flag-file mode
    pub api_key: String,

    /// Bound handed to the client's own readiness wait (in seconds)
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    /// How often the change monitor polls for definition changes (in seconds)
    ///
    /// Values below [`MIN_MONITOR_INTERVAL`] are clamped; 0 selects the default.
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    /// Explicit operation mode; inferred from `api_key` when absent
    #[serde(default)]
    pub operation_mode: Option<OperationMode>,

    /// Flag file read in localhost mode
    #[serde(default)]
    pub flag_file: Option<PathBuf>,

    /// Name stamped on every published event
    #[serde(default = "default_provider_name")]
    pub provider_name: String,

    /// Additional metadata to attach to operations
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ProviderConfig {
    /// Create a configuration with defaults for the given key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ready_timeout_secs: default_ready_timeout_secs(),
            monitor_interval_secs: default_monitor_interval_secs(),
            operation_mode: None,
            flag_file: None,
            provider_name: default_provider_name(),
            metadata: HashMap::new(),
        }
    }

    /// Set the readiness timeout
    pub fn with_ready_timeout_secs(mut self, secs: u64) -> Self {
        self.ready_timeout_secs = secs;
        self
    }

    /// Set the monitor poll interval
    pub fn with_monitor_interval_secs(mut self, secs: u64) -> Self {
        self.monitor_interval_secs = secs;
        self
    }

    /// Set the flag file used in localhost mode
    pub fn with_flag_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.flag_file = Some(path.into());
        self
    }

    /// Set the provider name stamped on events
    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = name.into();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.api_key.trim().is_empty() {
            return Err(crate::Error::config("API key cannot be empty"));
        }
        if self.ready_timeout_secs == 0 {
            return Err(crate::Error::config("Readiness timeout must be > 0"));
        }
        if self.provider_name.is_empty() {
            return Err(crate::Error::config("Provider name cannot be empty"));
        }
        if self.operation_mode() == OperationMode::Localhost
            && self.flag_file.as_ref().is_some_and(|p| p.as_os_str().is_empty())
        {
            return Err(crate::Error::config("Flag file path cannot be empty"));
        }
        Ok(())
    }

    /// Effective operation mode
    pub fn operation_mode(&self) -> OperationMode {
        match self.operation_mode {
            Some(mode) => mode,
            None if self.api_key == "localhost" => OperationMode::Localhost,
            None => OperationMode::Cloud,
        }
    }

    /// Bound for the client's readiness wait
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    /// Floor-clamped monitor poll interval
    pub fn monitor_interval(&self) -> Duration {
        if self.monitor_interval_secs == 0 {
            return Duration::from_secs(default_monitor_interval_secs());
        }

        let requested = Duration::from_secs(self.monitor_interval_secs);
        if requested < MIN_MONITOR_INTERVAL {
            warn!(
                requested_secs = self.monitor_interval_secs,
                minimum_secs = MIN_MONITOR_INTERVAL.as_secs(),
                "monitor interval below minimum, using minimum"
            );
            return MIN_MONITOR_INTERVAL;
        }
        requested
    }

    /// Default deadline for [`FlagProvider::init_default`](crate::FlagProvider::init_default)
    pub fn init_timeout(&self) -> Duration {
        self.ready_timeout() + INIT_TIMEOUT_BUFFER
    }

    /// Default deadline for [`FlagProvider::shutdown_default`](crate::FlagProvider::shutdown_default)
    pub fn shutdown_timeout(&self) -> Duration {
        self.ready_timeout().max(DEFAULT_SHUTDOWN_TIMEOUT)
    }
}

fn default_ready_timeout_secs() -> u64 {
    10
}

fn default_monitor_interval_secs() -> u64 {
    30
}

fn default_provider_name() -> String {
    "flagsync".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ProviderConfig::new("sdk-key");
        assert_eq!(config.ready_timeout(), Duration::from_secs(10));
        assert_eq!(config.monitor_interval(), Duration::from_secs(30));
        assert_eq!(config.init_timeout(), Duration::from_secs(15));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(config.operation_mode(), OperationMode::Cloud);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn monitor_interval_is_floor_clamped() {
        let config = ProviderConfig::new("sdk-key").with_monitor_interval_secs(1);
        assert_eq!(config.monitor_interval(), MIN_MONITOR_INTERVAL);

        let config = ProviderConfig::new("sdk-key").with_monitor_interval_secs(0);
        assert_eq!(config.monitor_interval(), Duration::from_secs(30));

        let config = ProviderConfig::new("sdk-key").with_monitor_interval_secs(12);
        assert_eq!(config.monitor_interval(), Duration::from_secs(12));
    }

    #[test]
    fn shutdown_timeout_grows_with_ready_timeout() {
        let config = ProviderConfig::new("sdk-key").with_ready_timeout_secs(45);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(45));
        assert_eq!(config.init_timeout(), Duration::from_secs(50));
    }

    #[test]
    fn localhost_mode_is_inferred_from_key() {
        let config = ProviderConfig::new("localhost");
        assert_eq!(config.operation_mode(), OperationMode::Localhost);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        assert!(ProviderConfig::new("").validate().is_err());
        assert!(
            ProviderConfig::new("sdk-key")
                .with_ready_timeout_secs(0)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: ProviderConfig =
            serde_json::from_str(r#"{"api_key": "localhost", "flag_file": "flags.json"}"#).unwrap();
        assert_eq!(config.ready_timeout_secs, 10);
        assert_eq!(config.provider_name, "flagsync");
        assert_eq!(config.operation_mode(), OperationMode::Localhost);
    }
}

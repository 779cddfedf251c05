//! Configuration file handling

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Device under test
    #[serde(default)]
    pub device: DeviceConfig,

    /// Timeout and settle-time settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Connection reliability measurement settings
    #[serde(default)]
    pub reliability: ReliabilityConfig,

    /// Test engine behaviour
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Device settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Default device URI
    #[serde(default = "default_uri")]
    pub uri: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { uri: default_uri() }
    }
}

fn default_uri() -> String {
    "ip:192.168.2.1".to_string()
}

/// Timeout settings in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Per-test deadline unless the test case sets its own
    #[serde(default = "default_test_timeout")]
    pub default_timeout_ms: u64,

    /// Settle time after connect before the device is queried
    #[serde(default = "default_calibration_wait")]
    pub calibration_wait_ms: u64,

    /// Time given to a measurement to stabilise
    #[serde(default = "default_measurement_wait")]
    pub measurement_wait_ms: u64,

    /// Time given to the instrument after switching tools
    #[serde(default = "default_tool_switch_wait")]
    pub tool_switch_wait_ms: u64,

    /// Interval between condition checks while waiting
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_test_timeout(),
            calibration_wait_ms: default_calibration_wait(),
            measurement_wait_ms: default_measurement_wait(),
            tool_switch_wait_ms: default_tool_switch_wait(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_test_timeout() -> u64 {
    5000
}
fn default_calibration_wait() -> u64 {
    3000
}
fn default_measurement_wait() -> u64 {
    2000
}
fn default_tool_switch_wait() -> u64 {
    1000
}
fn default_poll_interval() -> u64 {
    100
}

impl Timeouts {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn calibration_wait(&self) -> Duration {
        Duration::from_millis(self.calibration_wait_ms)
    }

    pub fn measurement_wait(&self) -> Duration {
        Duration::from_millis(self.measurement_wait_ms)
    }

    pub fn tool_switch_wait(&self) -> Duration {
        Duration::from_millis(self.tool_switch_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Reliability measurement settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    /// Connect/verify/disconnect cycles per measurement
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Shortened calibration wait used for each cycle
    #[serde(default = "default_reliability_calibration")]
    pub calibration_wait_ms: u64,

    /// Wait after each disconnect for the device to fully detach
    #[serde(default = "default_disconnect_settle")]
    pub disconnect_settle_ms: u64,

    /// Cool-down between consecutive attempts
    #[serde(default = "default_between_attempts")]
    pub between_attempts_ms: u64,

    /// Minimum success rate (percent) considered acceptable
    #[serde(default = "default_acceptable_rate")]
    pub acceptable_rate: f64,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            calibration_wait_ms: default_reliability_calibration(),
            disconnect_settle_ms: default_disconnect_settle(),
            between_attempts_ms: default_between_attempts(),
            acceptable_rate: default_acceptable_rate(),
        }
    }
}

fn default_attempts() -> u32 {
    3
}
fn default_reliability_calibration() -> u64 {
    1000
}
fn default_disconnect_settle() -> u64 {
    1000
}
fn default_between_attempts() -> u64 {
    2000
}
fn default_acceptable_rate() -> f64 {
    80.0
}

/// Test engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Skip a test when one of its dependencies did not pass earlier in the run.
    /// Off by default: dependencies are advisory and tests run in registration order.
    #[serde(default)]
    pub enforce_dependencies: bool,
}

/// Values that replace configuration entries for a single run
///
/// Used by `TestEngine::initialize` and by CLI flags. Unset fields keep the
/// configured value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConfigOverrides {
    pub device_uri: Option<String>,
    pub default_timeout_ms: Option<u64>,
    pub calibration_wait_ms: Option<u64>,
    pub measurement_wait_ms: Option<u64>,
    pub tool_switch_wait_ms: Option<u64>,
    pub enforce_dependencies: Option<bool>,
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Merge overrides on top of this configuration
    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(uri) = &overrides.device_uri {
            self.device.uri = uri.clone();
        }
        if let Some(ms) = overrides.default_timeout_ms {
            self.timeouts.default_timeout_ms = ms;
        }
        if let Some(ms) = overrides.calibration_wait_ms {
            self.timeouts.calibration_wait_ms = ms;
        }
        if let Some(ms) = overrides.measurement_wait_ms {
            self.timeouts.measurement_wait_ms = ms;
        }
        if let Some(ms) = overrides.tool_switch_wait_ms {
            self.timeouts.tool_switch_wait_ms = ms;
        }
        if let Some(enforce) = overrides.enforce_dependencies {
            self.engine.enforce_dependencies = enforce;
        }
    }

    /// Render as TOML, as written to a config file
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| super::Error::Config(e.to_string()))
    }
}

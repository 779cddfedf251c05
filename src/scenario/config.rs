//! Scenario file types
//!
//! Defines the data structures for deserializing YAML test scenarios.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::common::{Error, Result};
use crate::device::{Direction, Level};

/// A suite of device tests loaded from a YAML file
#[derive(Deserialize, Debug, Clone)]
pub struct Scenario {
    /// Name of the suite, used as the report title
    pub name: String,
    /// Optional description of the wiring or procedure
    pub description: Option<String>,
    /// Device to run against; configuration defaults fill the gaps
    #[serde(default)]
    pub device: DeviceTarget,
    /// Tool that must be available (and is started) before the tests run
    pub tool: Option<String>,
    /// Tests in execution order
    pub tests: Vec<ScenarioTest>,
}

/// Device selection for a scenario
#[derive(Deserialize, Debug, Clone, Default)]
pub struct DeviceTarget {
    /// Device URI, e.g. "ip:192.168.2.1" or "usb:1.4.5"
    pub uri: Option<String>,
    /// Calibration wait after connecting, in milliseconds
    pub calibration_wait_ms: Option<u64>,
}

/// One test of a scenario
#[derive(Deserialize, Debug, Clone)]
pub struct ScenarioTest {
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Per-test deadline in milliseconds
    pub timeout_ms: Option<u64>,
    /// Ids of tests expected to pass first
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub steps: Vec<Step>,
}

/// A single step of a test
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Configure a pin as input or output
    SetDirection { pin: u8, direction: Direction },
    /// Check a pin's configured direction
    ExpectDirection { pin: u8, direction: Direction },
    /// Drive an output pin
    SetOutput { pin: u8, level: Level },
    /// Check the level read on an input pin
    ExpectInput {
        pin: u8,
        level: Level,
        /// Keep polling up to this many milliseconds instead of reading once
        timeout_ms: Option<u64>,
    },
    /// Pause, by default for the configured measurement settle time
    Wait { ms: Option<u64> },
    /// Start or stop a tool
    RunTool {
        tool: String,
        #[serde(default = "default_true")]
        enabled: bool,
    },
    /// Check whether a tool is available on the device
    ExpectTool {
        tool: String,
        #[serde(default = "default_true")]
        available: bool,
    },
    /// Stop the test here and mark it skipped
    Skip { reason: String },
}

fn default_true() -> bool {
    true
}

impl Step {
    /// Digital pin the step touches, if any
    pub fn pin(&self) -> Option<u8> {
        match self {
            Step::SetDirection { pin, .. }
            | Step::ExpectDirection { pin, .. }
            | Step::SetOutput { pin, .. }
            | Step::ExpectInput { pin, .. } => Some(*pin),
            _ => None,
        }
    }
}

impl Scenario {
    /// Read, parse and validate a scenario file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse and validate scenario YAML
    pub fn parse(content: &str) -> Result<Self> {
        let scenario: Scenario = serde_yaml::from_str(content)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Highest digital pin referenced by any step
    pub fn max_pin(&self) -> Option<u8> {
        self.tests
            .iter()
            .flat_map(|t| t.steps.iter())
            .filter_map(Step::pin)
            .max()
    }

    /// Reject scenarios the engine could not run as written
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_scenario("<unnamed>", "name must not be empty"));
        }
        if self.tests.is_empty() {
            return Err(Error::invalid_scenario(&self.name, "no tests defined"));
        }

        let mut seen = HashSet::new();
        for test in &self.tests {
            if test.id.trim().is_empty() {
                return Err(Error::invalid_scenario(&self.name, "test id must not be empty"));
            }
            if !seen.insert(test.id.as_str()) {
                return Err(Error::invalid_scenario(
                    &self.name,
                    &format!("duplicate test id '{}'", test.id),
                ));
            }
            if test.steps.is_empty() {
                return Err(Error::invalid_scenario(
                    &self.name,
                    &format!("test '{}' has no steps", test.id),
                ));
            }
            if test.timeout_ms == Some(0) {
                return Err(Error::invalid_scenario(
                    &self.name,
                    &format!("test '{}' has a zero timeout", test.id),
                ));
            }
        }

        for test in &self.tests {
            if let Some(missing) = test
                .depends_on
                .iter()
                .find(|dep| !seen.contains(dep.as_str()))
            {
                return Err(Error::invalid_scenario(
                    &self.name,
                    &format!("test '{}' depends on unknown test '{}'", test.id, missing),
                ));
            }
        }

        Ok(())
    }
}

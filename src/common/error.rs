//! Error types for the test harness
//!
//! Connection failures never cross the session manager boundary as errors;
//! they are logged and surfaced as `None`/`false`. The variants below are what
//! driver implementations, assertions and scenario loading report internally.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Device/Connection Errors ===
    #[error("Failed to add device: {0}")]
    DeviceAddFailed(String),

    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    #[error("No tools available on {0} - device connection may have failed")]
    NoToolsAvailable(String),

    #[error("No device session active. Connect a device first")]
    SessionNotActive,

    #[error("Device driver error: {0}")]
    Driver(String),

    #[error("Tool '{0}' not available on this device")]
    ToolNotFound(String),

    #[error("Digital pin {pin} out of range (device has {count} pins)")]
    PinOutOfRange { pin: u8, count: u8 },

    // === Test Errors ===
    #[error("{0}")]
    Assertion(String),

    #[error("Test '{0}' is already registered")]
    DuplicateTest(String),

    #[error("Test failed: {0}")]
    TestFailed(String),

    // === Scenario Errors ===
    #[error("Invalid scenario '{name}': {reason}")]
    InvalidScenario { name: String, reason: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a driver error from anything printable
    pub fn driver<S: std::fmt::Display>(message: S) -> Self {
        Self::Driver(message.to_string())
    }

    /// Create an invalid scenario error
    pub fn invalid_scenario(name: &str, reason: &str) -> Self {
        Self::InvalidScenario {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error came from the assertion library
    pub fn is_assertion(&self) -> bool {
        matches!(self, Self::Assertion(_))
    }

    /// Stable machine-readable code, used in report details
    pub fn code(&self) -> &'static str {
        match self {
            Error::DeviceAddFailed(_) | Error::ConnectionFailed(_) | Error::NoToolsAvailable(_) => {
                "CONNECTION_FAILED"
            }
            Error::SessionNotActive => "SESSION_NOT_ACTIVE",
            Error::Driver(_) => "DRIVER_ERROR",
            Error::ToolNotFound(_) => "TOOL_NOT_FOUND",
            Error::PinOutOfRange { .. } => "PIN_OUT_OF_RANGE",
            Error::Assertion(_) => "ASSERTION_FAILED",
            Error::DuplicateTest(_) => "DUPLICATE_TEST",
            Error::TestFailed(_) => "TEST_FAILED",
            Error::InvalidScenario { .. } => "INVALID_SCENARIO",
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }
}

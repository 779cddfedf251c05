//! External instrument driver contract
//!
//! The driver offers no "is connected" query. The session manager infers a
//! working session from a non-empty tool list.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::Result;

/// Session and tool management operations exposed by the instrument driver
///
/// `Err` means the driver itself misbehaved. A rejected request is reported
/// through the return value (empty id, `false`, empty list).
#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// Register a device by URI. Returns an opaque id, empty when rejected.
    async fn add_device(&self, uri: &str) -> Result<String>;

    /// Open the session for a previously added device
    async fn connect_device(&self, id: &str) -> Result<bool>;

    /// Close the session (best-effort)
    async fn disconnect_device(&self, id: &str) -> Result<bool>;

    /// Unregister a device. Keyed by URI, not by id.
    async fn remove_device(&self, uri: &str) -> Result<bool>;

    /// Tools offered by the connected device
    async fn tools(&self) -> Result<Vec<String>>;

    /// Whether a tool is currently running
    async fn tool_enabled(&self, name: &str) -> Result<bool>;

    /// Start or stop a tool
    async fn run_tool(&self, name: &str, enabled: bool) -> Result<bool>;

    /// Tools contributed by a single plugin
    async fn tools_for_plugin(&self, plugin: &str) -> Result<Vec<String>>;
}

/// Pin direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Input,
    Output,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Logic level of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Self::High
        } else {
            Self::Low
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "0"),
            Self::High => write!(f, "1"),
        }
    }
}

/// Digital I/O subsystem of the instrument
#[async_trait]
pub trait DigitalIo: Send + Sync {
    /// Number of digital pins
    fn pin_count(&self) -> u8;

    async fn set_direction(&self, pin: u8, direction: Direction) -> Result<()>;

    async fn direction(&self, pin: u8) -> Result<Direction>;

    /// Drive an output pin
    async fn set_output(&self, pin: u8, level: Level) -> Result<()>;

    /// Sample the level seen on a pin
    async fn read_input(&self, pin: u8) -> Result<Level>;
}

/// A driver offering both session management and digital I/O
pub trait Instrument: DeviceApi + DigitalIo {}

impl<T: DeviceApi + DigitalIo> Instrument for T {}

//! Device session manager
//!
//! Owns the active device session and the history of sessions opened during a
//! run. The driver cannot report whether a device is connected, so a session
//! only counts as established once the device enumerates at least one tool,
//! and `verify` repeats that check live.
//!
//! Every public operation contains driver failures: they are logged and turned
//! into `None`/`false` so a broken device never aborts the surrounding suite.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::testing::safe_wait;

use super::api::DeviceApi;

/// A device session opened by `SessionManager::connect`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSession {
    /// Opaque id assigned by the driver
    pub id: String,
    /// URI the device was added with (removal is keyed by it)
    pub uri: String,
    pub connected_at: DateTime<Utc>,
    /// Tools enumerated when the session was established
    pub tools: Vec<String>,
}

/// Timing and policy for the session manager
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// URI used when `connect` is called without one
    pub default_uri: String,
    /// Settle time between connect and the first tool query
    pub calibration_wait: Duration,
    /// Shortened settle time used during reliability measurement
    pub reliability_calibration_wait: Duration,
    /// Wait after each reliability disconnect
    pub disconnect_settle: Duration,
    /// Cool-down between reliability attempts
    pub between_attempts: Duration,
    /// Success rate (percent) at which a measurement is acceptable
    pub acceptable_rate: f64,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_uri: config.device.uri.clone(),
            calibration_wait: config.timeouts.calibration_wait(),
            reliability_calibration_wait: Duration::from_millis(
                config.reliability.calibration_wait_ms,
            ),
            disconnect_settle: Duration::from_millis(config.reliability.disconnect_settle_ms),
            between_attempts: Duration::from_millis(config.reliability.between_attempts_ms),
            acceptable_rate: config.reliability.acceptable_rate,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Outcome of a connection reliability measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReliabilityReport {
    pub uri: String,
    pub attempts: u32,
    pub successes: u32,
    /// Percentage in [0, 100]
    pub success_rate: f64,
    pub acceptable_rate: f64,
}

impl ReliabilityReport {
    /// Whether the measured rate reaches the acceptable threshold
    pub fn is_acceptable(&self) -> bool {
        self.success_rate >= self.acceptable_rate
    }
}

/// Manages the connection lifecycle of devices under test
pub struct SessionManager {
    api: Arc<dyn DeviceApi>,
    settings: SessionSettings,
    /// Sessions opened and not yet disconnected
    connected_devices: Vec<DeviceSession>,
    /// Id of the current session; always present in `connected_devices`
    current: Option<String>,
    connection_attempts: u64,
    last_connection_time: Option<DateTime<Utc>>,
}

impl SessionManager {
    pub fn new(api: Arc<dyn DeviceApi>, settings: SessionSettings) -> Self {
        Self {
            api,
            settings,
            connected_devices: Vec::new(),
            current: None,
            connection_attempts: 0,
            last_connection_time: None,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Connect to a device
    ///
    /// Adds the device, opens the session, waits `calibration_wait` for the
    /// instrument to finish its boot/calibration sequence, then requires a
    /// non-empty tool list. Returns the device id, or `None` on any failure.
    #[tracing::instrument(skip(self, calibration_wait))]
    pub async fn connect(
        &mut self,
        uri: Option<&str>,
        calibration_wait: Option<Duration>,
    ) -> Option<String> {
        let uri = uri.unwrap_or(&self.settings.default_uri).to_string();
        let calibration_wait = calibration_wait.unwrap_or(self.settings.calibration_wait);
        self.connection_attempts += 1;

        tracing::info!(uri = %uri, "Connecting to device");

        match self.establish(&uri, calibration_wait).await {
            Ok(session) => {
                let id = session.id.clone();
                tracing::info!(
                    uri = %uri,
                    device_id = %id,
                    tools = session.tools.len(),
                    "Connected to device"
                );
                self.last_connection_time = Some(session.connected_at);
                self.connected_devices.push(session);
                self.current = Some(id.clone());
                Some(id)
            }
            Err(e) => {
                tracing::warn!(uri = %uri, error = %e, "Device connection failed");
                None
            }
        }
    }

    async fn establish(&self, uri: &str, calibration_wait: Duration) -> Result<DeviceSession> {
        let id = self.api.add_device(uri).await?;
        // An empty id means the driver rejected the URI
        if id.trim().is_empty() {
            return Err(Error::DeviceAddFailed(uri.to_string()));
        }

        match self.api.connect_device(&id).await {
            Ok(true) => {}
            Ok(false) => {
                self.rollback(&id, uri, false).await;
                return Err(Error::ConnectionFailed(uri.to_string()));
            }
            Err(e) => {
                self.rollback(&id, uri, false).await;
                return Err(e);
            }
        }

        tracing::debug!(wait_ms = calibration_wait.as_millis() as u64, "Waiting for device calibration");
        safe_wait(calibration_wait).await;

        let tools = match self.api.tools().await {
            Ok(tools) => tools,
            Err(e) => {
                self.rollback(&id, uri, true).await;
                return Err(e);
            }
        };
        if tools.is_empty() {
            self.rollback(&id, uri, true).await;
            return Err(Error::NoToolsAvailable(uri.to_string()));
        }

        Ok(DeviceSession {
            id,
            uri: uri.to_string(),
            connected_at: Utc::now(),
            tools,
        })
    }

    /// Undo a half-established connection so the URI can be added again
    async fn rollback(&self, id: &str, uri: &str, connected: bool) {
        if connected {
            if let Err(e) = self.api.disconnect_device(id).await {
                tracing::warn!(device_id = %id, error = %e, "Disconnect during rollback failed");
            }
        }
        match self.api.remove_device(uri).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(uri = %uri, "Removal during rollback returned false"),
            Err(e) => tracing::warn!(uri = %uri, error = %e, "Removal during rollback failed"),
        }
    }

    /// Disconnect a device, defaulting to the current one
    ///
    /// Running tools are stopped first and a `false` from the driver is only
    /// logged: a device unplugged mid-session must still be torn down. With
    /// `remove_device`, the device is also unregistered by its original URI.
    /// Returns `false` only if a driver call failed outright.
    #[tracing::instrument(skip(self))]
    pub async fn disconnect(&mut self, id: Option<&str>, remove_device: bool) -> bool {
        let Some(id) = id.map(str::to_string).or_else(|| self.current.clone()) else {
            tracing::debug!("No device to disconnect");
            return true;
        };

        tracing::info!(device_id = %id, "Disconnecting device");

        match self.teardown(&id, remove_device).await {
            Ok(()) => {
                tracing::info!(device_id = %id, "Device disconnected");
                true
            }
            Err(e) => {
                tracing::error!(device_id = %id, error = %e, "Device disconnection failed");
                false
            }
        }
    }

    async fn teardown(&mut self, id: &str, remove_device: bool) -> Result<()> {
        self.stop_running_tools().await;

        if !self.api.disconnect_device(id).await? {
            tracing::warn!(device_id = %id, "Device disconnection returned false");
        }

        if remove_device {
            let uri = self
                .connected_devices
                .iter()
                .find(|d| d.id == id)
                .map(|d| d.uri.clone());

            match uri {
                Some(uri) => {
                    if !self.api.remove_device(&uri).await? {
                        tracing::warn!(uri = %uri, "Device removal returned false");
                    }
                }
                None => tracing::warn!(device_id = %id, "Could not find device URI for removal"),
            }
        }

        if self.current.as_deref() == Some(id) {
            self.current = None;
        }
        self.connected_devices.retain(|d| d.id != id);
        Ok(())
    }

    /// Stop every running tool; individual failures are logged and skipped
    async fn stop_running_tools(&self) {
        let tools = match self.api.tools().await {
            Ok(tools) => tools,
            Err(e) => {
                tracing::warn!(error = %e, "Error listing tools before disconnect");
                return;
            }
        };

        for tool in &tools {
            match self.api.tool_enabled(tool).await {
                Ok(true) => match self.api.run_tool(tool, false).await {
                    Ok(true) => tracing::debug!(tool = %tool, "Stopped tool"),
                    Ok(false) => tracing::warn!(tool = %tool, "Stopping tool returned false"),
                    Err(e) => tracing::warn!(tool = %tool, error = %e, "Error stopping tool"),
                },
                Ok(false) => {}
                Err(e) => tracing::warn!(tool = %tool, error = %e, "Error querying tool state"),
            }
        }
    }

    /// Check that the device still enumerates tools
    ///
    /// Always queries the driver; nothing is cached.
    pub async fn verify(&self, id: Option<&str>) -> bool {
        let id = id.map(str::to_string).or_else(|| self.current.clone());
        match self.api.tools().await {
            Ok(tools) if !tools.is_empty() => {
                tracing::debug!(device_id = ?id, tools = tools.len(), "Device verification passed");
                true
            }
            Ok(_) => {
                tracing::warn!(device_id = ?id, "Device verification failed: no tools available");
                false
            }
            Err(e) => {
                tracing::warn!(device_id = ?id, error = %e, "Device verification failed");
                false
            }
        }
    }

    /// Tools offered by the connected device, empty on error
    pub async fn available_tools(&self) -> Vec<String> {
        match self.api.tools().await {
            Ok(tools) => tools,
            Err(e) => {
                tracing::warn!(error = %e, "Error getting available tools");
                Vec::new()
            }
        }
    }

    /// Tools contributed by one plugin, empty on error
    pub async fn plugin_tools(&self, plugin: &str) -> Vec<String> {
        match self.api.tools_for_plugin(plugin).await {
            Ok(tools) => {
                if tools.is_empty() {
                    tracing::warn!(plugin = %plugin, "No tools available for plugin");
                }
                tools
            }
            Err(e) => {
                tracing::warn!(plugin = %plugin, error = %e, "Error getting plugin tools");
                Vec::new()
            }
        }
    }

    /// Measure connection reliability as a success percentage
    pub async fn measure_reliability(&mut self, uri: Option<&str>, attempts: u32) -> f64 {
        self.measure_reliability_report(uri, attempts)
            .await
            .success_rate
    }

    /// Run `attempts` connect/verify/disconnect cycles and report the outcome
    ///
    /// A failed cycle is only counted; nothing is retried. Cycles are spaced
    /// by the configured settle delays because rapid reconnects fail more
    /// often on physical hardware.
    #[tracing::instrument(skip(self))]
    pub async fn measure_reliability_report(
        &mut self,
        uri: Option<&str>,
        attempts: u32,
    ) -> ReliabilityReport {
        let uri = uri.unwrap_or(&self.settings.default_uri).to_string();
        let calibration_wait = self.settings.reliability_calibration_wait;
        let mut successes = 0u32;

        tracing::info!(uri = %uri, attempts, "Measuring connection reliability");

        for attempt in 1..=attempts {
            match self.connect(Some(&uri), Some(calibration_wait)).await {
                Some(id) => {
                    if self.verify(Some(&id)).await {
                        successes += 1;
                        tracing::info!(attempt, "Connection test succeeded");
                    } else {
                        tracing::warn!(attempt, "Connection test failed: no tools available");
                    }

                    self.disconnect(Some(&id), true).await;
                    safe_wait(self.settings.disconnect_settle).await;
                }
                None => tracing::warn!(attempt, "Connection test failed: could not connect"),
            }

            if attempt < attempts {
                safe_wait(self.settings.between_attempts).await;
            }
        }

        let success_rate = if attempts == 0 {
            0.0
        } else {
            f64::from(successes) / f64::from(attempts) * 100.0
        };

        tracing::info!(
            successes,
            attempts,
            success_rate = %format!("{success_rate:.1}"),
            "Connection reliability measured"
        );

        ReliabilityReport {
            uri,
            attempts,
            successes,
            success_rate,
            acceptable_rate: self.settings.acceptable_rate,
        }
    }

    /// Disconnect and remove every tracked session, then reset state
    pub async fn cleanup(&mut self) {
        tracing::info!(sessions = self.connected_devices.len(), "Cleaning up device connections");

        let ids: Vec<String> = self.connected_devices.iter().map(|d| d.id.clone()).collect();
        for id in ids {
            self.disconnect(Some(&id), true).await;
        }

        self.connected_devices.clear();
        self.current = None;
    }

    /// The current session, if any
    pub fn current_device(&self) -> Option<&DeviceSession> {
        let id = self.current.as_deref()?;
        self.connected_devices.iter().find(|d| d.id == id)
    }

    /// Id of the current session, if any
    pub fn current_device_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.current.is_some()
    }

    /// Sessions opened and not yet disconnected, oldest first
    pub fn connected_devices(&self) -> &[DeviceSession] {
        &self.connected_devices
    }

    pub fn connection_attempts(&self) -> u64 {
        self.connection_attempts
    }

    pub fn last_connection_time(&self) -> Option<DateTime<Utc>> {
        self.last_connection_time
    }
}

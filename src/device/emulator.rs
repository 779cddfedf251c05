//! Emulated instrument
//!
//! An in-memory stand-in for the instrument driver, used by the CLI and the
//! test suite. Digital pins 0-7 are wired to pins 8-15 the same way the DIO
//! loopback harness wires a physical board. Faults can be injected to exercise
//! the failure paths of the session manager.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::common::{Error, Result};

use super::api::{DeviceApi, DigitalIo, Direction, Level};

/// Number of digital pins on the emulated board
pub const PIN_COUNT: u8 = 16;

/// Tools offered by the emulated board
pub const DEFAULT_TOOLS: &[&str] = &[
    "Oscilloscope",
    "Spectrum Analyzer",
    "Network Analyzer",
    "Signal Generator",
    "Logic Analyzer",
    "Pattern Generator",
    "Digital I/O",
    "Voltmeter",
    "Power Supply",
];

/// Plugin name the default tools are registered under
pub const DEFAULT_PLUGIN: &str = "m2k";

/// Injectable failure modes
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// `add_device` returns an empty id
    pub reject_add: bool,
    /// `connect_device` returns false
    pub refuse_connect: bool,
    /// Every n-th `connect_device` call returns false (1-based count)
    pub fail_every_nth_connect: Option<u32>,
    /// `tools` returns an empty list even while connected
    pub no_tools: bool,
    /// `disconnect_device` returns false (the session is still closed)
    pub refuse_disconnect: bool,
    /// `remove_device` returns false
    pub refuse_remove: bool,
    /// `add_device` returns an empty id for a URI that is already registered
    pub reject_duplicate_add: bool,
    /// The n-th `connect_device` call fails with a driver error (1-based count)
    pub connect_error_on: Option<u32>,
    /// `remove_device` fails with a driver error
    pub remove_error: bool,
    /// Every session call fails with a driver error
    pub driver_error: bool,
    /// Stopping these tools fails with a driver error
    pub stuck_tools: HashSet<String>,
}

#[derive(Debug, Clone, Copy)]
struct Pin {
    direction: Direction,
    output: Level,
}

#[derive(Debug)]
struct EmulatorState {
    next_id: u32,
    /// Added devices as (id, uri)
    devices: Vec<(String, String)>,
    connected: Option<String>,
    connect_calls: u32,
    tools: Vec<String>,
    plugins: HashMap<String, Vec<String>>,
    running: HashSet<String>,
    pins: Vec<Pin>,
    faults: Faults,
    calls: Vec<String>,
}

/// In-memory instrument implementing both driver traits
#[derive(Debug)]
pub struct Emulator {
    state: Mutex<EmulatorState>,
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Emulator {
    /// Create an emulated board with the default tool set
    pub fn new() -> Self {
        Self::with_tools(DEFAULT_TOOLS.iter().map(|t| t.to_string()).collect())
    }

    /// Create an emulated board offering the given tools under the default plugin
    pub fn with_tools(tools: Vec<String>) -> Self {
        let mut plugins = HashMap::new();
        plugins.insert(DEFAULT_PLUGIN.to_string(), tools.clone());

        Self {
            state: Mutex::new(EmulatorState {
                next_id: 1,
                devices: Vec::new(),
                connected: None,
                connect_calls: 0,
                tools,
                plugins,
                running: HashSet::new(),
                pins: vec![
                    Pin {
                        direction: Direction::Input,
                        output: Level::Low,
                    };
                    PIN_COUNT as usize
                ],
                faults: Faults::default(),
                calls: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EmulatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the injected faults
    pub fn configure(&self, f: impl FnOnce(&mut Faults)) {
        f(&mut self.lock().faults);
    }

    /// Driver calls received so far, as `"<operation> <argument>"`
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Id of the device with an open session
    pub fn connected_device(&self) -> Option<String> {
        self.lock().connected.clone()
    }

    /// URIs currently registered with the driver
    pub fn registered_uris(&self) -> Vec<String> {
        self.lock().devices.iter().map(|(_, uri)| uri.clone()).collect()
    }

    /// Tools currently running
    pub fn running_tools(&self) -> Vec<String> {
        let mut tools: Vec<String> = self.lock().running.iter().cloned().collect();
        tools.sort();
        tools
    }

    /// Begin a driver call: record it and apply the global driver fault
    fn enter(&self, operation: &str, argument: &str) -> Result<MutexGuard<'_, EmulatorState>> {
        let mut state = self.lock();
        state.calls.push(format!("{operation} {argument}").trim_end().to_string());
        if state.faults.driver_error {
            return Err(Error::driver(format!("emulated driver fault in {operation}")));
        }
        Ok(state)
    }

    fn check_pin(pin: u8) -> Result<usize> {
        if pin >= PIN_COUNT {
            return Err(Error::PinOutOfRange {
                pin,
                count: PIN_COUNT,
            });
        }
        Ok(pin as usize)
    }

    fn require_session(state: &EmulatorState) -> Result<()> {
        if state.connected.is_none() {
            return Err(Error::SessionNotActive);
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceApi for Emulator {
    async fn add_device(&self, uri: &str) -> Result<String> {
        let mut state = self.enter("add_device", uri)?;
        let duplicate =
            state.faults.reject_duplicate_add && state.devices.iter().any(|(_, known)| known == uri);
        if state.faults.reject_add || duplicate || uri.trim().is_empty() {
            return Ok(String::new());
        }
        let id = format!("dev{}", state.next_id);
        state.next_id += 1;
        state.devices.push((id.clone(), uri.to_string()));
        Ok(id)
    }

    async fn connect_device(&self, id: &str) -> Result<bool> {
        let mut state = self.enter("connect_device", id)?;
        state.connect_calls += 1;
        if state.faults.connect_error_on == Some(state.connect_calls) {
            return Err(Error::driver("emulated driver fault in connect_device"));
        }
        if !state.devices.iter().any(|(known, _)| known == id) || state.faults.refuse_connect {
            return Ok(false);
        }
        if let Some(n) = state.faults.fail_every_nth_connect {
            if n > 0 && state.connect_calls % n == 0 {
                return Ok(false);
            }
        }
        state.connected = Some(id.to_string());
        Ok(true)
    }

    async fn disconnect_device(&self, id: &str) -> Result<bool> {
        let mut state = self.enter("disconnect_device", id)?;
        if state.connected.as_deref() != Some(id) {
            return Ok(false);
        }
        state.connected = None;
        state.running.clear();
        Ok(!state.faults.refuse_disconnect)
    }

    async fn remove_device(&self, uri: &str) -> Result<bool> {
        let mut state = self.enter("remove_device", uri)?;
        if state.faults.remove_error {
            return Err(Error::driver("emulated driver fault in remove_device"));
        }
        let before = state.devices.len();
        state.devices.retain(|(_, known)| known != uri);
        Ok(state.devices.len() < before && !state.faults.refuse_remove)
    }

    async fn tools(&self) -> Result<Vec<String>> {
        let state = self.enter("tools", "")?;
        if state.connected.is_none() || state.faults.no_tools {
            return Ok(Vec::new());
        }
        Ok(state.tools.clone())
    }

    async fn tool_enabled(&self, name: &str) -> Result<bool> {
        let state = self.enter("tool_enabled", name)?;
        Ok(state.running.contains(name))
    }

    async fn run_tool(&self, name: &str, enabled: bool) -> Result<bool> {
        let mut state = self.enter("run_tool", &format!("{name}={enabled}"))?;
        if state.connected.is_none() || !state.tools.iter().any(|t| t == name) {
            return Ok(false);
        }
        if !enabled && state.faults.stuck_tools.contains(name) {
            return Err(Error::driver(format!("tool '{name}' did not stop")));
        }
        if enabled {
            state.running.insert(name.to_string());
        } else {
            state.running.remove(name);
        }
        Ok(true)
    }

    async fn tools_for_plugin(&self, plugin: &str) -> Result<Vec<String>> {
        let state = self.enter("tools_for_plugin", plugin)?;
        if state.connected.is_none() {
            return Ok(Vec::new());
        }
        Ok(state.plugins.get(plugin).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl DigitalIo for Emulator {
    fn pin_count(&self) -> u8 {
        PIN_COUNT
    }

    async fn set_direction(&self, pin: u8, direction: Direction) -> Result<()> {
        let index = Self::check_pin(pin)?;
        let mut state = self.lock();
        Self::require_session(&state)?;
        state.pins[index].direction = direction;
        Ok(())
    }

    async fn direction(&self, pin: u8) -> Result<Direction> {
        let index = Self::check_pin(pin)?;
        let state = self.lock();
        Self::require_session(&state)?;
        Ok(state.pins[index].direction)
    }

    async fn set_output(&self, pin: u8, level: Level) -> Result<()> {
        let index = Self::check_pin(pin)?;
        let mut state = self.lock();
        Self::require_session(&state)?;
        state.pins[index].output = level;
        Ok(())
    }

    async fn read_input(&self, pin: u8) -> Result<Level> {
        let index = Self::check_pin(pin)?;
        let state = self.lock();
        Self::require_session(&state)?;

        let own = state.pins[index];
        if own.direction == Direction::Output {
            return Ok(own.output);
        }
        // Loopback partner: 0-7 <-> 8-15
        let partner = state.pins[(index + PIN_COUNT as usize / 2) % PIN_COUNT as usize];
        if partner.direction == Direction::Output {
            Ok(partner.output)
        } else {
            Ok(Level::Low)
        }
    }
}

//! YAML test scenarios
//!
//! A scenario file describes a device, an optional tool to start, and a list
//! of digital I/O tests written as steps. The runner executes it through the
//! session manager and the test engine, so scenario runs get the same
//! timeouts, containment and reports as tests written in Rust.

mod config;
mod runner;

pub use config::*;
pub use runner::{run_loaded, run_scenario};

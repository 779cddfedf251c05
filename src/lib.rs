//! hil - hardware-in-the-loop test orchestration
//!
//! Manages device sessions on a measurement instrument, runs test cases
//! against it with per-test isolation and timeouts, and reports the results.

pub mod cli;
pub mod commands;
pub mod common;
pub mod device;
pub mod scenario;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use device::{Emulator, SessionManager};
pub use testing::{ReportSummary, TestCase, TestEngine, Verdict};

//! Common utilities shared by the session manager, engine and CLI

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};

/// Format a duration in seconds with two decimals, as used in reports
pub fn format_secs(duration: std::time::Duration) -> String {
    format!("{:.2}s", duration.as_secs_f64())
}

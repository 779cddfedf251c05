//! Test execution
//!
//! Test cases, the engine that runs them, the assertion helpers they use,
//! and the reports produced at the end of a run.

pub mod assert;
mod case;
mod engine;
mod report;
pub mod wait;

pub use case::{TestCase, TestFn, TestFuture, Verdict};
pub use engine::TestEngine;
pub use report::{DeviceSummary, ReportFormat, ReportSummary, TestResult, TestStatus};
pub use wait::{safe_wait, wait_for_condition};

//! Test execution engine
//!
//! Runs registered test cases one after another against a shared
//! environment. Each test function runs on its own task under a deadline so
//! that a failure, panic or hang in one test is recorded as a result and the
//! suite always reaches its report.

use std::any::Any;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::time::Instant;

use crate::common::config::{Config, ConfigOverrides};
use crate::common::{format_secs, Error, Result};

use super::case::{TestCase, Verdict};
use super::report::{ReportSummary, TestResult, TestStatus};

/// Message used when a test reports failure without saying why
const DEFAULT_FAIL_MESSAGE: &str = "Test returned false";

/// How a test invocation ended, before classification
enum Outcome {
    Completed(Result<Verdict>),
    Panicked(String),
    TimedOut,
    Cancelled(String),
}

/// Sequential test runner with result bookkeeping
pub struct TestEngine {
    config: Config,
    registry: Vec<TestCase>,
    current_test: Option<String>,
    results: Vec<TestResult>,
    total: usize,
    passed: usize,
    failed: usize,
    skipped: usize,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl TestEngine {
    /// Create an engine ready to run with `config`
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: Vec::new(),
            current_test: None,
            results: Vec::new(),
            total: 0,
            passed: 0,
            failed: 0,
            skipped: 0,
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    /// Start a fresh run
    ///
    /// Merges `overrides` into the configuration, clears registered tests,
    /// results and counters, and restarts the run clock.
    pub fn initialize(&mut self, overrides: &ConfigOverrides) {
        self.config.apply(overrides);
        self.registry.clear();
        self.current_test = None;
        self.results.clear();
        self.total = 0;
        self.passed = 0;
        self.failed = 0;
        self.skipped = 0;
        self.started_at = Utc::now();
        self.clock = Instant::now();

        tracing::info!(
            device = %self.config.device.uri,
            default_timeout_ms = self.config.timeouts.default_timeout_ms,
            started_at = %self.started_at.to_rfc3339(),
            "Test engine initialized"
        );
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Add a test to the end of the run order
    pub fn register(&mut self, case: TestCase) -> Result<()> {
        if self.registry.iter().any(|c| c.id() == case.id()) {
            return Err(Error::DuplicateTest(case.id().to_string()));
        }
        tracing::debug!(test_id = %case.id(), "Registered test");
        self.registry.push(case);
        Ok(())
    }

    pub fn registered(&self) -> &[TestCase] {
        &self.registry
    }

    /// Execute every registered test in registration order, then report
    pub async fn run_registered(&mut self) -> ReportSummary {
        let cases = self.registry.clone();
        for (index, case) in cases.iter().enumerate() {
            tracing::debug!(progress = %format!("{}/{}", index + 1, cases.len()), "Next test");
            self.execute_test(case).await;
        }
        self.generate_report()
    }

    /// Execute one test and record its result
    ///
    /// Never fails: errors, panics and timeouts inside the test become FAIL or
    /// TIMEOUT results. Returns whether the test passed.
    #[tracing::instrument(skip(self, case), fields(test_id = %case.id()))]
    pub async fn execute_test(&mut self, case: &TestCase) -> bool {
        self.current_test = Some(case.id().to_string());
        self.total += 1;
        let start = Instant::now();

        tracing::info!(description = %case.description(), "Running test");

        let result = match self.unmet_dependency(case) {
            Some(reason) => TestResult::new(
                case.id(),
                case.description(),
                TestStatus::Skip,
                reason,
                Duration::ZERO,
                json!({ "kind": "dependency" }),
            ),
            None => {
                let timeout = case
                    .timeout()
                    .unwrap_or_else(|| self.config.timeouts.default_timeout());
                let outcome = run_contained(case, timeout).await;
                classify(case, outcome, start.elapsed(), timeout)
            }
        };

        match result.status {
            TestStatus::Pass => {
                self.passed += 1;
                tracing::info!(duration = %format_secs(result.duration), "PASS");
            }
            TestStatus::Skip => {
                self.skipped += 1;
                tracing::info!(reason = %result.message, "SKIP");
            }
            TestStatus::Fail => {
                self.failed += 1;
                if result.message.starts_with("Exception: ") {
                    tracing::error!(message = %result.message, "EXCEPTION");
                } else {
                    tracing::warn!(message = %result.message, "FAIL");
                }
            }
            TestStatus::Timeout => {
                self.failed += 1;
                tracing::error!(message = %result.message, "TIMEOUT");
            }
        }

        let passed = result.status == TestStatus::Pass;
        self.results.push(result);
        self.current_test = None;
        passed
    }

    /// With dependency enforcement on, the reason a test must be skipped
    fn unmet_dependency(&self, case: &TestCase) -> Option<String> {
        if !self.config.engine.enforce_dependencies {
            return None;
        }
        for dependency in case.dependencies() {
            match self.results.iter().rev().find(|r| &r.test_id == dependency) {
                None => return Some(format!("Dependency '{dependency}' has not run")),
                Some(r) if r.status != TestStatus::Pass => {
                    return Some(format!("Dependency '{dependency}' did not pass ({})", r.status))
                }
                Some(_) => {}
            }
        }
        None
    }

    /// Summarize the run so far and log every failure
    pub fn generate_report(&self) -> ReportSummary {
        let duration = self.clock.elapsed();
        let success_rate = ReportSummary::success_rate(self.passed, self.total);

        tracing::info!(
            total = self.total,
            passed = self.passed,
            failed = self.failed,
            skipped = self.skipped,
            success_rate = %format!("{success_rate:.1}%"),
            duration = %format_secs(duration),
            "Test run complete"
        );
        for result in self.results.iter().filter(|r| r.status.is_failure()) {
            tracing::error!(test_id = %result.test_id, status = %result.status, message = %result.message, "Failed test");
        }

        ReportSummary {
            total: self.total,
            passed: self.passed,
            failed: self.failed,
            skipped: self.skipped,
            success_rate,
            duration,
            started_at: self.started_at,
            finished_at: Utc::now(),
            device: None,
            results: self.results.clone(),
        }
    }

    /// Id of the test currently executing
    pub fn current_test(&self) -> Option<&str> {
        self.current_test.as_deref()
    }

    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn passed(&self) -> usize {
        self.passed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// Run the test function on its own task under `timeout`
async fn run_contained(case: &TestCase, timeout: Duration) -> Outcome {
    let mut handle = tokio::spawn(case.invoke());
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(result)) => Outcome::Completed(result),
        Ok(Err(e)) if e.is_panic() => Outcome::Panicked(panic_message(e.into_panic())),
        Ok(Err(e)) => Outcome::Cancelled(e.to_string()),
        Err(_) => {
            handle.abort();
            Outcome::TimedOut
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "test panicked".to_string()
    }
}

fn classify(case: &TestCase, outcome: Outcome, duration: Duration, timeout: Duration) -> TestResult {
    let (status, message, details) = match outcome {
        Outcome::Completed(Ok(Verdict::Pass)) => (TestStatus::Pass, String::new(), json!({})),
        Outcome::Completed(Ok(Verdict::Fail(message))) => {
            let message = if message.is_empty() {
                DEFAULT_FAIL_MESSAGE.to_string()
            } else {
                message
            };
            (TestStatus::Fail, message, json!({ "kind": "verdict" }))
        }
        Outcome::Completed(Ok(Verdict::Skip(reason))) => {
            (TestStatus::Skip, reason, json!({ "kind": "requested" }))
        }
        Outcome::Completed(Err(e)) if e.is_assertion() => {
            let text = e.to_string();
            (
                TestStatus::Fail,
                text.clone(),
                json!({ "kind": "assertion", "code": e.code(), "exception": text }),
            )
        }
        Outcome::Completed(Err(e)) => (
            TestStatus::Fail,
            format!("Exception: {e}"),
            json!({ "kind": "unhandled", "code": e.code(), "exception": e.to_string() }),
        ),
        Outcome::Panicked(text) => (
            TestStatus::Fail,
            format!("Exception: {text}"),
            json!({ "kind": "panic", "exception": text }),
        ),
        Outcome::Cancelled(text) => (
            TestStatus::Fail,
            format!("Exception: {text}"),
            json!({ "kind": "cancelled", "exception": text }),
        ),
        Outcome::TimedOut => (
            TestStatus::Timeout,
            format!("Timed out after {}ms", timeout.as_millis()),
            json!({ "kind": "timeout", "timeout_ms": timeout.as_millis() as u64 }),
        ),
    };

    TestResult::new(case.id(), case.description(), status, message, duration, details)
}

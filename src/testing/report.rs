//! Test results and run reports
//!
//! A `ReportSummary` is what a driver or CI job inspects at the end of a run.
//! It renders as a colored console report, JSON, CSV, or JUnit XML.

use std::io::Cursor;
use std::time::Duration;

use chrono::{DateTime, Utc};
use colored::Colorize;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Serialize, Serializer};

use crate::common::{format_secs, Error, Result};

/// Final status of one executed test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
    /// Deadline elapsed; counted as a failure
    Timeout,
}

impl TestStatus {
    /// Whether this status counts toward the failed total
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Fail | Self::Timeout)
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
            Self::Skip => write!(f, "SKIP"),
            Self::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

fn csv_err<E: std::fmt::Display>(e: E) -> Error {
    Error::Internal(format!("CSV encoding failed: {e}"))
}

fn xml_err<E: std::fmt::Display>(e: E) -> Error {
    Error::Internal(format!("XML encoding failed: {e}"))
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Result of a single test execution, never modified after creation
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub test_id: String,
    pub description: String,
    pub status: TestStatus,
    /// Empty on success
    pub message: String,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    /// Structured diagnostics, e.g. `{"kind": "unhandled", "exception": "..."}`
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl TestResult {
    pub fn new(
        test_id: impl Into<String>,
        description: impl Into<String>,
        status: TestStatus,
        message: impl Into<String>,
        duration: Duration,
        details: serde_json::Value,
    ) -> Self {
        Self {
            test_id: test_id.into(),
            description: description.into(),
            status,
            message: message.into(),
            duration,
            details,
            timestamp: Utc::now(),
        }
    }

    /// Exception text captured in `details`, if any
    pub fn exception(&self) -> Option<&str> {
        self.details.get("exception").and_then(|v| v.as_str())
    }
}

/// Output format for a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
    Csv,
    Junit,
}

/// Device a run was executed against
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSummary {
    pub uri: String,
    pub connected_at: Option<DateTime<Utc>>,
}

/// Summary of a complete run
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    /// Includes timed out tests
    pub failed: usize,
    pub skipped: usize,
    /// Percentage of executed tests that passed; 0 when nothing ran
    pub success_rate: f64,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Set by callers that ran the suite against a device session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceSummary>,
    pub results: Vec<TestResult>,
}

impl ReportSummary {
    /// Success percentage, defined as 0 for an empty run
    pub fn success_rate(passed: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            passed as f64 / total as f64 * 100.0
        }
    }

    /// Attach the device the run used
    pub fn with_device(mut self, uri: impl Into<String>, connected_at: Option<DateTime<Utc>>) -> Self {
        self.device = Some(DeviceSummary {
            uri: uri.into(),
            connected_at,
        });
        self
    }

    /// Process exit code: non-zero when any test failed
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 {
            1
        } else {
            0
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    /// Failed and timed out results, in execution order
    pub fn failures(&self) -> impl Iterator<Item = &TestResult> {
        self.results.iter().filter(|r| r.status.is_failure())
    }

    pub fn timed_out(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == TestStatus::Timeout)
            .count()
    }

    /// Render in the requested format
    pub fn render(&self, format: ReportFormat, suite_name: &str) -> Result<String> {
        match format {
            ReportFormat::Text => Ok(self.render_text(suite_name)),
            ReportFormat::Json => self.to_json(),
            ReportFormat::Csv => self.to_csv(),
            ReportFormat::Junit => self.to_junit_xml(suite_name),
        }
    }

    /// Human-readable report with a breakdown of every failure
    pub fn render_text(&self, suite_name: &str) -> String {
        let rule = "=".repeat(72);
        let mut out = String::new();

        out.push_str(&format!("\n{rule}\n"));
        out.push_str(&format!("{} {}\n", "TEST REPORT:".bold(), suite_name.white().bold()));
        if let Some(device) = &self.device {
            out.push_str(&format!("Device: {}\n", device.uri));
            if let Some(at) = device.connected_at {
                out.push_str(&format!("Connected: {}\n", at.format("%Y-%m-%d %H:%M:%S UTC")));
            }
        }
        out.push_str(&format!("{rule}\n"));

        for result in &self.results {
            let marker = match result.status {
                TestStatus::Pass => "✓".green(),
                TestStatus::Fail => "✗".red(),
                TestStatus::Timeout => "⏱".red(),
                TestStatus::Skip => "⊘".yellow(),
            };
            out.push_str(&format!(
                "  {} {} {} ({})\n",
                marker,
                result.test_id,
                result.description.dimmed(),
                format_secs(result.duration)
            ));
        }

        out.push_str(&format!("\nTotal Tests Executed: {}\n", self.total));
        out.push_str(&format!("Passed: {}\n", self.passed.to_string().green()));
        out.push_str(&format!("Failed: {}\n", self.failed.to_string().red()));
        if self.skipped > 0 {
            out.push_str(&format!("Skipped: {}\n", self.skipped.to_string().yellow()));
        }
        out.push_str(&format!("Overall Success Rate: {:.1}%\n", self.success_rate));
        out.push_str(&format!("Total Duration: {}\n", format_secs(self.duration)));

        if self.failed > 0 {
            out.push_str(&format!("\n{}\n", "FAILED TESTS:".red().bold()));
            for result in self.failures() {
                out.push_str(&format!("  - {} [{}]: {}\n", result.test_id, result.status, result.message));
                if let Some(exception) = result.exception() {
                    if exception != result.message {
                        out.push_str(&format!("      {}\n", exception.dimmed()));
                    }
                }
            }
        }

        out.push_str(&format!("{rule}\n"));
        if self.all_passed() {
            out.push_str(&format!("{}\n", "ALL TESTS PASSED".green().bold()));
        } else {
            out.push_str(&format!("{}\n", "SOME TESTS FAILED - review results above".red().bold()));
        }
        out
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// One row per result
    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());

        writer
            .write_record(["TestID", "Description", "Status", "Message", "DurationMs", "Timestamp"])
            .map_err(csv_err)?;
        for result in &self.results {
            writer
                .write_record([
                    result.test_id.as_str(),
                    result.description.as_str(),
                    result.status.to_string().as_str(),
                    result.message.as_str(),
                    result.duration.as_millis().to_string().as_str(),
                    result.timestamp.to_rfc3339().as_str(),
                ])
                .map_err(csv_err)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(csv_err)?;
        String::from_utf8(bytes).map_err(|e| Error::Internal(e.to_string()))
    }

    /// JUnit XML for CI systems
    pub fn to_junit_xml(&self, suite_name: &str) -> Result<String> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

        let tests = self.total.to_string();
        let failures = self.failed.to_string();
        let skipped = self.skipped.to_string();
        let time = format!("{:.3}", self.duration.as_secs_f64());
        let timestamp = self.started_at.to_rfc3339();

        let suite = BytesStart::new("testsuite").with_attributes([
            ("name", suite_name),
            ("tests", tests.as_str()),
            ("failures", failures.as_str()),
            ("skipped", skipped.as_str()),
            ("time", time.as_str()),
            ("timestamp", timestamp.as_str()),
        ]);
        writer.write_event(Event::Start(suite)).map_err(xml_err)?;

        for result in &self.results {
            let case_time = format!("{:.3}", result.duration.as_secs_f64());
            let case = BytesStart::new("testcase").with_attributes([
                ("name", result.test_id.as_str()),
                ("classname", suite_name),
                ("time", case_time.as_str()),
            ]);

            match result.status {
                TestStatus::Pass => {
                    writer.write_event(Event::Empty(case)).map_err(xml_err)?;
                }
                TestStatus::Skip => {
                    writer.write_event(Event::Start(case)).map_err(xml_err)?;
                    let skipped = BytesStart::new("skipped")
                        .with_attributes([("message", result.message.as_str())]);
                    writer.write_event(Event::Empty(skipped)).map_err(xml_err)?;
                    writer
                        .write_event(Event::End(BytesEnd::new("testcase")))
                        .map_err(xml_err)?;
                }
                TestStatus::Fail | TestStatus::Timeout => {
                    writer.write_event(Event::Start(case)).map_err(xml_err)?;
                    let status = result.status.to_string();
                    let failure = BytesStart::new("failure").with_attributes([
                        ("message", result.message.as_str()),
                        ("type", status.as_str()),
                    ]);
                    writer.write_event(Event::Start(failure)).map_err(xml_err)?;
                    let body = result.exception().unwrap_or(&result.message);
                    writer
                        .write_event(Event::Text(BytesText::new(body)))
                        .map_err(xml_err)?;
                    writer
                        .write_event(Event::End(BytesEnd::new("failure")))
                        .map_err(xml_err)?;
                    writer
                        .write_event(Event::End(BytesEnd::new("testcase")))
                        .map_err(xml_err)?;
                }
            }
        }

        writer
            .write_event(Event::End(BytesEnd::new("testsuite")))
            .map_err(xml_err)?;

        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(
            &String::from_utf8(writer.into_inner().into_inner())
                .map_err(|e| Error::Internal(e.to_string()))?,
        );
        xml.push('\n');
        Ok(xml)
    }
}

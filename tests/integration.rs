//! End-to-end integration tests for the hil harness
//!
//! These tests verify the complete workflow by:
//! 1. Running YAML scenarios against the emulated instrument
//! 2. Driving the session manager and engine from Rust-authored tests
//! 3. Invoking the built `hil` binary and checking reports and exit codes

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::Mutex;

use hil::common::config::{Config, ConfigOverrides};
use hil::device::{DeviceApi, DigitalIo, Direction, Emulator, Level, SessionManager, SessionSettings};
use hil::scenario::run_scenario;
use hil::testing::assert::{assert_approx_equal, assert_equal, assert_true};
use hil::testing::{ReportFormat, TestCase, TestEngine, TestStatus, Verdict};
use hil::Error;

/// Configuration without settle delays
const FAST_CONFIG: &str = r#"
[device]
uri = "ip:192.168.2.1"

[timeouts]
default_timeout_ms = 2000
calibration_wait_ms = 0
measurement_wait_ms = 0
tool_switch_wait_ms = 0
poll_interval_ms = 5

[reliability]
attempts = 4
calibration_wait_ms = 0
disconnect_settle_ms = 0
between_attempts_ms = 0
acceptable_rate = 80.0
"#;

/// Test context with a scratch directory and the binary under test
struct TestContext {
    /// Temporary directory for this test, removed on drop
    temp_dir: TempDir,
    /// Path to the hil binary
    hil_bin: PathBuf,
    /// Path to fixtures directory
    fixtures_dir: PathBuf,
    /// Config file passed through HIL_CONFIG
    config_path: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(&config_path, FAST_CONFIG).expect("Failed to write config");

        let manifest_dir = env!("CARGO_MANIFEST_DIR");
        Self {
            temp_dir,
            hil_bin: PathBuf::from(env!("CARGO_BIN_EXE_hil")),
            fixtures_dir: PathBuf::from(manifest_dir).join("tests").join("fixtures"),
            config_path,
        }
    }

    fn fixture(&self, name: &str) -> PathBuf {
        self.fixtures_dir.join(name)
    }

    fn scratch(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Run a hil command
    fn run_hil(&self, args: &[&str]) -> HilOutput {
        let output = Command::new(&self.hil_bin)
            .args(args)
            .env("HIL_CONFIG", &self.config_path)
            .env("NO_COLOR", "1")
            .env_remove("RUST_LOG")
            .output()
            .expect("Failed to run hil");

        HilOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            code: output.status.code(),
        }
    }
}

/// Output from a hil command
#[derive(Debug)]
struct HilOutput {
    stdout: String,
    stderr: String,
    code: Option<i32>,
}

fn fast_config() -> Config {
    toml::from_str(FAST_CONFIG).expect("valid config")
}

fn path_str(path: &Path) -> &str {
    path.to_str().expect("utf-8 path")
}

// ============== Scenario tests ==============

#[tokio::test(start_paused = true)]
async fn test_loopback_scenario_passes() {
    let ctx = TestContext::new();
    let emulator = Arc::new(Emulator::new());

    let report = run_scenario(
        &ctx.fixture("dio_loopback.yaml"),
        emulator.clone(),
        fast_config(),
        &ConfigOverrides::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.passed, 3, "failures: {:?}", report.failures().collect::<Vec<_>>());
    assert_eq!(report.success_rate, 100.0);
    assert_eq!(report.exit_code(), 0);

    // Session torn down, nothing left running
    assert!(emulator.connected_device().is_none());
    assert!(emulator.registered_uris().is_empty());
    assert!(emulator.running_tools().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failing_scenario_reports_each_outcome() {
    let ctx = TestContext::new();
    let emulator = Arc::new(Emulator::new());

    let report = run_scenario(
        &ctx.fixture("dio_failing.yaml"),
        emulator,
        fast_config(),
        &ConfigOverrides::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.failed, 1);
    // Dependencies are advisory unless enforced
    assert_eq!(report.passed, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.total, report.passed + report.failed + report.skipped);
    assert_eq!(report.exit_code(), 1);

    let failure = report.failures().next().unwrap();
    assert_eq!(failure.test_id, "TST.DIO.WRONG_LEVEL");
    assert!(failure.message.contains("DIO 9"));
}

#[tokio::test(start_paused = true)]
async fn test_enforced_dependencies_skip_dependents() {
    let ctx = TestContext::new();
    let overrides = ConfigOverrides {
        enforce_dependencies: Some(true),
        ..Default::default()
    };

    let report = run_scenario(
        &ctx.fixture("dio_failing.yaml"),
        Arc::new(Emulator::new()),
        fast_config(),
        &overrides,
    )
    .await
    .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.passed, 0);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.results[1].status, TestStatus::Skip);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_device_fails_run() {
    let ctx = TestContext::new();
    let emulator = Arc::new(Emulator::new());
    emulator.configure(|f| f.reject_add = true);

    let err = run_scenario(
        &ctx.fixture("dio_loopback.yaml"),
        emulator,
        fast_config(),
        &ConfigOverrides::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::ConnectionFailed(_)));
}

#[tokio::test(start_paused = true)]
async fn test_flaky_device_still_tears_down() {
    let ctx = TestContext::new();
    let emulator = Arc::new(Emulator::new());
    emulator.configure(|f| {
        f.stuck_tools.insert("Digital I/O".to_string());
    });

    let report = run_scenario(
        &ctx.fixture("dio_loopback.yaml"),
        emulator.clone(),
        fast_config(),
        &ConfigOverrides::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.passed, 3);
    // A tool that refuses to stop must not prevent disconnecting
    assert!(emulator.connected_device().is_none());
    assert!(emulator.registered_uris().is_empty());
}

// ============== Rust-authored suite ==============

#[tokio::test(start_paused = true)]
async fn test_rust_suite_shares_one_session() {
    let emulator = Arc::new(Emulator::new());
    let config = fast_config();
    let session = Arc::new(Mutex::new(SessionManager::new(
        emulator.clone(),
        SessionSettings::from_config(&config),
    )));

    let mut engine = TestEngine::new(config);
    engine.initialize(&ConfigOverrides::default());

    let s = session.clone();
    engine
        .register(TestCase::new("TST.CONNECT", "Device connects", move || {
            let s = s.clone();
            async move { Ok(s.lock().await.connect(None, None).await.is_some()) }
        }))
        .unwrap();

    let s = session.clone();
    engine
        .register(
            TestCase::new("TST.TOOLS", "Digital I/O is offered", move || {
                let s = s.clone();
                async move {
                    let tools = s.lock().await.available_tools().await;
                    assert_true(tools.iter().any(|t| t == "Digital I/O"), None)?;
                    Ok(())
                }
            })
            .with_dependencies(["TST.CONNECT"]),
        )
        .unwrap();

    let io = emulator.clone();
    engine
        .register(TestCase::new("TST.DIO.LOOP", "Pin 3 drives pin 11", move || {
            let io = io.clone();
            async move {
                io.set_direction(3, Direction::Output).await?;
                io.set_direction(11, Direction::Input).await?;
                io.set_output(3, Level::High).await?;
                assert_equal(io.read_input(11).await?, Level::High, None)?;
                Ok(())
            }
        }))
        .unwrap();

    engine
        .register(TestCase::new("TST.VOLTAGE", "Measured within tolerance", || async {
            assert_approx_equal(3.28, 3.3, 0.05, None)?;
            Ok(Verdict::Pass)
        }))
        .unwrap();

    engine
        .register(
            TestCase::new("TST.HANG", "Never answers", || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .with_timeout(Duration::from_millis(500)),
        )
        .unwrap();

    let report = engine.run_registered().await;
    session.lock().await.cleanup().await;

    assert_eq!(report.total, 5);
    assert_eq!(report.passed, 4);
    assert_eq!(report.failed, 1);
    assert_eq!(report.timed_out(), 1);
    assert_eq!(report.results[4].status, TestStatus::Timeout);
    assert!(!session.lock().await.is_connected());
    assert!(emulator.connected_device().is_none());

    let junit = report.render(ReportFormat::Junit, "rust suite").unwrap();
    assert!(junit.contains("tests=\"5\""));
    assert!(junit.contains("TST.HANG"));
}

#[tokio::test(start_paused = true)]
async fn test_reliability_on_flaky_connection() {
    let emulator = Arc::new(Emulator::new());
    emulator.configure(|f| f.fail_every_nth_connect = Some(2));
    let mut session = SessionManager::new(emulator.clone(), SessionSettings::from_config(&fast_config()));

    let report = session.measure_reliability_report(None, 4).await;

    assert_eq!(report.attempts, 4);
    assert_eq!(report.successes, 2);
    assert_eq!(report.success_rate, 50.0);
    assert!(!report.is_acceptable());
    assert!(emulator.registered_uris().is_empty());
    assert!(emulator.tools().await.unwrap().is_empty());
}

// ============== Binary tests ==============

#[test]
fn test_cli_run_passing_scenario() {
    let ctx = TestContext::new();
    let fixture = ctx.fixture("dio_loopback.yaml");
    let output = ctx.run_hil(&["run", path_str(&fixture)]);

    assert_eq!(output.code, Some(0), "stderr: {}", output.stderr);
    assert!(output.stdout.contains("Digital I/O loopback"));
    assert!(output.stdout.contains("Total Tests Executed: 3"));
    assert!(output.stdout.contains("Overall Success Rate: 100.0%"));
}

#[test]
fn test_cli_run_failing_scenario_exits_nonzero() {
    let ctx = TestContext::new();
    let fixture = ctx.fixture("dio_failing.yaml");
    let output = ctx.run_hil(&["run", path_str(&fixture), "--format", "json"]);

    assert_eq!(output.code, Some(1), "stderr: {}", output.stderr);
    let report: serde_json::Value = serde_json::from_str(&output.stdout).expect("json report");
    assert_eq!(report["total"], 3);
    assert_eq!(report["failed"], 1);
    assert_eq!(report["results"][0]["status"], "FAIL");
}

#[test]
fn test_cli_writes_junit_file() {
    let ctx = TestContext::new();
    let fixture = ctx.fixture("dio_failing.yaml");
    let report_path = ctx.scratch("report.xml");
    let output = ctx.run_hil(&[
        "run",
        path_str(&fixture),
        "--format",
        "junit",
        "--output",
        path_str(&report_path),
    ]);

    assert_eq!(output.code, Some(1));
    assert!(output.stderr.contains("Report written to"));
    let xml = std::fs::read_to_string(&report_path).unwrap();
    assert!(xml.starts_with("<?xml"));
    assert!(xml.contains("<failure"));
    assert!(xml.contains("<skipped"));
}

#[test]
fn test_cli_missing_scenario() {
    let ctx = TestContext::new();
    let missing = ctx.scratch("missing.yaml");
    let output = ctx.run_hil(&["run", path_str(&missing)]);

    assert_eq!(output.code, Some(1));
    assert!(output.stderr.contains("Error:"));
    assert!(output.stderr.contains("missing.yaml"));
}

#[test]
fn test_cli_config_prints_effective_settings() {
    let ctx = TestContext::new();
    let output = ctx.run_hil(&["config"]);

    assert_eq!(output.code, Some(0));
    assert!(output.stdout.contains(path_str(&ctx.config_path)));
    let config: Config = toml::from_str(&output.stdout).expect("toml output");
    assert_eq!(config.reliability.attempts, 4);
    assert_eq!(config.timeouts.calibration_wait_ms, 0);
}

#[test]
fn test_cli_tools_and_reliability() {
    let ctx = TestContext::new();

    let output = ctx.run_hil(&["tools"]);
    assert_eq!(output.code, Some(0));
    assert!(output.stdout.contains("Oscilloscope"));

    let output = ctx.run_hil(&["tools", "--plugin", "m2k"]);
    assert_eq!(output.code, Some(0));
    assert!(output.stdout.contains("Digital I/O"));

    let output = ctx.run_hil(&["reliability", "--attempts", "2"]);
    assert_eq!(output.code, Some(0));
    assert!(output.stdout.contains("Successful connections: 2/2"));
}

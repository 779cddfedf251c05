//! Scenario runner
//!
//! Connects to the device through the session manager, turns every scenario
//! test into a `TestCase`, runs them on a `TestEngine` and tears the session
//! down again, whatever happened in between.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::common::config::{Config, ConfigOverrides};
use crate::common::{Error, Result};
use crate::device::{DeviceApi, DigitalIo, Instrument, SessionManager, SessionSettings};
use crate::testing::assert::{assert_equal, assert_true};
use crate::testing::{safe_wait, wait_for_condition, ReportSummary, TestCase, TestEngine, Verdict};

use super::config::{Scenario, ScenarioTest, Step};

/// Run a scenario file against `instrument`
///
/// The device URI is taken from `overrides`, then the scenario file, then
/// `config`. Fails with `Error::ConnectionFailed` when no session can be
/// established and `Error::ToolNotFound` when the scenario's tool is missing;
/// individual test failures only show up in the returned report.
pub async fn run_scenario<I>(
    path: &Path,
    instrument: Arc<I>,
    config: Config,
    overrides: &ConfigOverrides,
) -> Result<ReportSummary>
where
    I: Instrument + 'static,
{
    let scenario = Scenario::load(path)?;
    run_loaded(&scenario, instrument, config, overrides).await
}

/// Run an already parsed scenario
pub async fn run_loaded<I>(
    scenario: &Scenario,
    instrument: Arc<I>,
    config: Config,
    overrides: &ConfigOverrides,
) -> Result<ReportSummary>
where
    I: Instrument + 'static,
{
    let api: Arc<dyn DeviceApi> = instrument.clone();
    let io: Arc<dyn DigitalIo> = instrument;

    let mut effective = overrides.clone();
    if effective.device_uri.is_none() {
        effective.device_uri = scenario.device.uri.clone();
    }
    if effective.calibration_wait_ms.is_none() {
        effective.calibration_wait_ms = scenario.device.calibration_wait_ms;
    }

    let mut engine = TestEngine::new(config);
    engine.initialize(&effective);
    let mut session = SessionManager::new(api.clone(), SessionSettings::from_config(engine.config()));

    tracing::info!(
        scenario = %scenario.name,
        tests = scenario.tests.len(),
        device = %engine.config().device.uri,
        "Running scenario"
    );

    let outcome = run_with_session(scenario, &mut engine, &mut session, api, io).await;
    session.cleanup().await;
    outcome
}

async fn run_with_session(
    scenario: &Scenario,
    engine: &mut TestEngine,
    session: &mut SessionManager,
    api: Arc<dyn DeviceApi>,
    io: Arc<dyn DigitalIo>,
) -> Result<ReportSummary> {
    let uri = engine.config().device.uri.clone();
    let pins = io.pin_count();
    if let Some(pin) = scenario.max_pin().filter(|p| *p >= pins) {
        return Err(Error::invalid_scenario(
            &scenario.name,
            &format!("pin {pin} does not exist (device has {pins} pins)"),
        ));
    }

    if session.connect(Some(&uri), None).await.is_none() {
        return Err(Error::ConnectionFailed(uri));
    }

    if let Some(tool) = &scenario.tool {
        if !session.available_tools().await.iter().any(|t| t == tool) {
            return Err(Error::ToolNotFound(tool.clone()));
        }
        if !api.run_tool(tool, true).await? {
            return Err(Error::driver(format!("tool '{tool}' did not start")));
        }
        safe_wait(engine.config().timeouts.tool_switch_wait()).await;
    }

    let timing = StepTiming {
        poll_interval: engine.config().timeouts.poll_interval(),
        measurement_wait: engine.config().timeouts.measurement_wait(),
    };
    for test in &scenario.tests {
        engine.register(build_case(test, api.clone(), io.clone(), timing))?;
    }

    let report = engine.run_registered().await;
    Ok(report.with_device(uri, session.last_connection_time()))
}

/// Delays applied by steps that do not specify their own
#[derive(Debug, Clone, Copy)]
struct StepTiming {
    poll_interval: Duration,
    measurement_wait: Duration,
}

fn build_case(
    test: &ScenarioTest,
    api: Arc<dyn DeviceApi>,
    io: Arc<dyn DigitalIo>,
    timing: StepTiming,
) -> TestCase {
    let steps: Arc<[Step]> = test.steps.clone().into();
    let case = TestCase::new(test.id.clone(), test.description.clone(), move || {
        let api = api.clone();
        let io = io.clone();
        let steps = steps.clone();
        async move { run_steps(api.as_ref(), io.as_ref(), &steps, timing).await }
    })
    .with_dependencies(test.depends_on.iter().cloned());

    match test.timeout_ms {
        Some(ms) => case.with_timeout(Duration::from_millis(ms)),
        None => case,
    }
}

async fn run_steps(
    api: &dyn DeviceApi,
    io: &dyn DigitalIo,
    steps: &[Step],
    timing: StepTiming,
) -> Result<Verdict> {
    for (index, step) in steps.iter().enumerate() {
        let number = index + 1;
        tracing::debug!(step = number, ?step, "Executing step");

        match step {
            Step::SetDirection { pin, direction } => io.set_direction(*pin, *direction).await?,
            Step::ExpectDirection { pin, direction } => {
                let actual = io.direction(*pin).await?;
                let message =
                    format!("Step {number}: DIO {pin} expected direction {direction} but was {actual}");
                assert_equal(actual, *direction, Some(message.as_str()))?;
            }
            Step::SetOutput { pin, level } => io.set_output(*pin, *level).await?,
            Step::ExpectInput {
                pin,
                level,
                timeout_ms: Some(ms),
            } => {
                let (pin, level) = (*pin, *level);
                let reached = wait_for_condition(
                    move || async move { matches!(io.read_input(pin).await, Ok(l) if l == level) },
                    Duration::from_millis(*ms),
                    timing.poll_interval,
                )
                .await;
                let message = format!("Step {number}: DIO {pin} did not read {level} within {ms}ms");
                assert_true(reached, Some(message.as_str()))?;
            }
            Step::ExpectInput {
                pin,
                level,
                timeout_ms: None,
            } => {
                let actual = io.read_input(*pin).await?;
                let message = format!("Step {number}: DIO {pin} expected {level} but read {actual}");
                assert_equal(actual, *level, Some(message.as_str()))?;
            }
            Step::Wait { ms } => {
                let duration = ms.map_or(timing.measurement_wait, Duration::from_millis);
                safe_wait(duration).await;
            }
            Step::RunTool { tool, enabled } => {
                if !api.run_tool(tool, *enabled).await? {
                    let verb = if *enabled { "start" } else { "stop" };
                    return Ok(Verdict::fail(format!("Step {number}: could not {verb} tool '{tool}'")));
                }
            }
            Step::ExpectTool { tool, available } => {
                let present = api.tools().await?.iter().any(|t| t == tool);
                let message = format!(
                    "Step {number}: tool '{tool}' expected {} but was {}",
                    availability(*available),
                    availability(present)
                );
                assert_equal(present, *available, Some(message.as_str()))?;
            }
            Step::Skip { reason } => return Ok(Verdict::skip(reason.clone())),
        }
    }
    Ok(Verdict::Pass)
}

fn availability(present: bool) -> &'static str {
    if present {
        "available"
    } else {
        "unavailable"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Emulator, Level};
    use crate::testing::TestStatus;

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.timeouts.calibration_wait_ms = 0;
        config.timeouts.tool_switch_wait_ms = 0;
        config.timeouts.poll_interval_ms = 10;
        config
    }

    fn scenario(yaml: &str) -> Scenario {
        Scenario::parse(yaml).unwrap()
    }

    const LOOPBACK: &str = r#"
name: loopback
device: { uri: "emu:m2k" }
tool: Digital I/O
tests:
  - id: T1
    description: Pin 0 drives pin 8
    steps:
      - { action: set_direction, pin: 0, direction: output }
      - { action: set_direction, pin: 8, direction: input }
      - { action: expect_direction, pin: 8, direction: input }
      - { action: set_output, pin: 0, level: high }
      - { action: expect_input, pin: 8, level: high, timeout_ms: 200 }
  - id: T2
    description: Wrong expectation
    steps:
      - { action: set_direction, pin: 1, direction: output }
      - { action: set_direction, pin: 9, direction: input }
      - { action: set_output, pin: 1, level: low }
      - { action: expect_input, pin: 9, level: high }
  - id: T3
    steps:
      - { action: skip, reason: no probe attached }
"#;

    #[tokio::test(start_paused = true)]
    async fn test_loopback_scenario() {
        let emulator = Arc::new(Emulator::new());
        let report = run_loaded(
            &scenario(LOOPBACK),
            emulator.clone(),
            fast_config(),
            &ConfigOverrides::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.total, 3);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.results[1].status, TestStatus::Fail);
        assert_eq!(
            report.results[1].message,
            format!("Step 4: DIO 9 expected {} but read {}", Level::High, Level::Low)
        );
        assert_eq!(report.results[1].details["kind"], "assertion");
        let device = report.device.as_ref().unwrap();
        assert_eq!(device.uri, "emu:m2k");
        assert!(device.connected_at.is_some());

        // session is always torn down
        assert!(emulator.connected_device().is_none());
        assert!(emulator.registered_uris().is_empty());
        assert!(emulator
            .calls()
            .iter()
            .any(|c| c == "add_device emu:m2k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_uri_override_beats_scenario() {
        let emulator = Arc::new(Emulator::new());
        let overrides = ConfigOverrides {
            device_uri: Some("usb:1.4.5".to_string()),
            ..Default::default()
        };
        run_loaded(&scenario(LOOPBACK), emulator.clone(), fast_config(), &overrides)
            .await
            .unwrap();

        assert!(emulator.calls().iter().any(|c| c == "add_device usb:1.4.5"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_failure_aborts_run() {
        let emulator = Arc::new(Emulator::new());
        emulator.configure(|f| f.refuse_connect = true);

        let err = run_loaded(
            &scenario(LOOPBACK),
            emulator.clone(),
            fast_config(),
            &ConfigOverrides::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::ConnectionFailed(uri) if uri == "emu:m2k"));
        assert!(emulator.registered_uris().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_tool_aborts_run() {
        let emulator = Arc::new(Emulator::with_tools(vec!["Oscilloscope".to_string()]));

        let err = run_loaded(
            &scenario(LOOPBACK),
            emulator.clone(),
            fast_config(),
            &ConfigOverrides::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::ToolNotFound(tool) if tool == "Digital I/O"));
        assert!(emulator.connected_device().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_pin_rejected_before_connecting() {
        let emulator = Arc::new(Emulator::new());
        let yaml = "name: range\ndevice: { uri: \"emu:m2k\" }\ntests:\n  - id: T1\n    steps:\n      - { action: set_output, pin: 42, level: high }\n";

        let err = run_loaded(&scenario(yaml), emulator.clone(), fast_config(), &ConfigOverrides::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidScenario { .. }));
        assert!(err.to_string().contains("pin 42"));
        assert!(emulator.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_error_becomes_exception() {
        let emulator = Arc::new(Emulator::new());
        emulator.configure(|f| {
            f.stuck_tools.insert("Oscilloscope".to_string());
        });
        let yaml = "name: stuck\ndevice: { uri: \"emu:m2k\" }\ntests:\n  - id: T1\n    steps:\n      - { action: run_tool, tool: Oscilloscope }\n      - { action: run_tool, tool: Oscilloscope, enabled: false }\n";

        let report = run_loaded(&scenario(yaml), emulator.clone(), fast_config(), &ConfigOverrides::default())
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert!(report.results[0].message.starts_with("Exception: "));
        assert!(report.results[0].message.contains("did not stop"));
        assert_eq!(report.results[0].details["kind"], "unhandled");
        assert!(emulator.connected_device().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout_reports_timeout() {
        let emulator = Arc::new(Emulator::new());
        let yaml = "name: slow\ndevice: { uri: \"emu:m2k\" }\ntests:\n  - id: T1\n    timeout_ms: 100\n    steps:\n      - { action: wait, ms: 5000 }\n  - id: T2\n    steps:\n      - { action: expect_tool, tool: Spectrum Analyzer }\n";

        let report = run_loaded(&scenario(yaml), emulator, fast_config(), &ConfigOverrides::default())
            .await
            .unwrap();

        assert_eq!(report.results[0].status, TestStatus::Timeout);
        assert_eq!(report.results[1].status, TestStatus::Pass);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enforced_dependencies() {
        let emulator = Arc::new(Emulator::new());
        let yaml = "name: deps\ndevice: { uri: \"emu:m2k\" }\ntests:\n  - id: T1\n    steps:\n      - { action: expect_tool, tool: Nope }\n  - id: T2\n    depends_on: [T1]\n    steps:\n      - { action: wait, ms: 1 }\n";
        let overrides = ConfigOverrides {
            enforce_dependencies: Some(true),
            ..Default::default()
        };

        let report = run_loaded(&scenario(yaml), emulator, fast_config(), &overrides)
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.results[1].status, TestStatus::Skip);
    }
}

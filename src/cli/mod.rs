//! CLI command handling
//!
//! Dispatches CLI commands against the built-in emulated instrument and
//! formats output. Each handler returns the process exit code.

use std::path::Path;
use std::sync::Arc;

use colored::Colorize;

use crate::commands::Commands;
use crate::common::config::{Config, ConfigOverrides};
use crate::common::{format_secs, paths, Error, Result};
use crate::device::{Emulator, ReliabilityReport, SessionManager, SessionSettings};
use crate::scenario::{run_loaded, Scenario};
use crate::testing::{ReportFormat, ReportSummary};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, config: Config) -> Result<i32> {
    match command {
        Commands::Run {
            path,
            uri,
            format,
            output,
            timeout_ms,
            calibration_wait_ms,
            enforce_dependencies,
        } => {
            let overrides = ConfigOverrides {
                device_uri: uri,
                default_timeout_ms: timeout_ms,
                calibration_wait_ms,
                enforce_dependencies: enforce_dependencies.then_some(true),
                ..Default::default()
            };

            let scenario = Scenario::load(&path)?;
            if format == ReportFormat::Text && output.is_none() {
                print_scenario_header(&scenario);
            }

            let instrument = Arc::new(Emulator::new());
            let report = run_loaded(&scenario, instrument, config, &overrides).await?;

            match output {
                Some(file) => {
                    colored::control::set_override(false);
                    let written = write_report(&report, format, &scenario.name, &file);
                    colored::control::unset_override();
                    written?;
                    eprintln!("Report written to {} ({})", file.display(), summary_line(&report));
                }
                None => print!("{}", report.render(format, &scenario.name)?),
            }

            Ok(report.exit_code())
        }

        Commands::Reliability { uri, attempts } => {
            let attempts = attempts.unwrap_or(config.reliability.attempts);
            let mut session =
                SessionManager::new(Arc::new(Emulator::new()), SessionSettings::from_config(&config));

            let report = session
                .measure_reliability_report(uri.as_deref(), attempts)
                .await;
            session.cleanup().await;

            print_reliability(&report);
            Ok(if report.is_acceptable() { 0 } else { 1 })
        }

        Commands::Tools { uri, plugin } => {
            let uri = uri.unwrap_or_else(|| config.device.uri.clone());
            let mut session =
                SessionManager::new(Arc::new(Emulator::new()), SessionSettings::from_config(&config));

            if session.connect(Some(&uri), None).await.is_none() {
                return Err(Error::ConnectionFailed(uri));
            }
            let tools = match &plugin {
                Some(plugin) => session.plugin_tools(plugin).await,
                None => session.available_tools().await,
            };
            session.cleanup().await;

            if tools.is_empty() {
                println!("No tools available on {}", uri);
            } else {
                println!("{} {}", "Tools on".cyan(), uri.white().bold());
                for tool in &tools {
                    println!("  - {}", tool);
                }
            }
            Ok(0)
        }

        Commands::Config => {
            match paths::config_path() {
                Some(path) => println!("# {}", path.display()),
                None => println!("# no config directory on this platform"),
            }
            print!("{}", config.to_toml()?);
            Ok(0)
        }
    }
}

fn print_scenario_header(scenario: &Scenario) {
    println!(
        "\n{} {}",
        "Running Scenario:".blue().bold(),
        scenario.name.white().bold()
    );
    if let Some(desc) = &scenario.description {
        println!("  {}", desc.dimmed());
    }
    println!("  {} tests", scenario.tests.len());
}

fn write_report(report: &ReportSummary, format: ReportFormat, suite_name: &str, file: &Path) -> Result<()> {
    let rendered = report.render(format, suite_name)?;
    std::fs::write(file, rendered)?;
    Ok(())
}

fn print_reliability(report: &ReliabilityReport) {
    let rate = format!("{:.1}%", report.success_rate);
    let rate = if report.is_acceptable() {
        rate.green().bold()
    } else {
        rate.red().bold()
    };

    println!("\n{} {}", "Connection reliability:".cyan(), report.uri.white().bold());
    println!("  Successful connections: {}/{}", report.successes, report.attempts);
    println!("  Success rate: {} (acceptable: {:.1}%)", rate, report.acceptable_rate);
    if !report.is_acceptable() {
        println!("  {}", "Connection reliability below acceptable threshold".red());
    }
}

fn summary_line(report: &ReportSummary) -> String {
    format!(
        "{} tests, {} passed, {} failed, {} skipped in {}",
        report.total,
        report.passed,
        report.failed,
        report.skipped,
        format_secs(report.duration)
    )
}

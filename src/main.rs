//! hil - hardware-in-the-loop test runner
//!
//! Runs YAML test scenarios against an instrument's digital I/O, measures
//! connection reliability and reports results for CI.

use std::path::PathBuf;

use clap::Parser;
use hil::cli;
use hil::commands::Commands;
use hil::common::config::Config;
use hil::common::logging;

#[derive(Parser)]
#[command(name = "hil", about = "Hardware-in-the-loop test runner")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: $HIL_CONFIG, then the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write a detailed log to the default log directory
    #[arg(long, global = true)]
    log: bool,

    /// Also write a detailed log to this file
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_path = match &cli.log_file {
        Some(path) => Some(path.clone()),
        None if cli.log => logging::default_log_path(),
        None => None,
    };
    let guard = match log_path {
        Some(path) => match logging::init_with_file(&path, cli.verbose) {
            Ok(guard) => Some(guard),
            Err(e) => {
                eprintln!("Warning: cannot open log file {}: {e}", path.display());
                logging::init_cli(cli.verbose);
                None
            }
        },
        None => {
            logging::init_cli(cli.verbose);
            None
        }
    };

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };

    let code = match config {
        Ok(config) => match cli::dispatch(cli.command, config).await {
            Ok(code) => code,
            Err(e) => {
                eprintln!("Error: {e}");
                1
            }
        },
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };

    // Flush the file log before exiting
    drop(guard);
    std::process::exit(code);
}

//! CLI command definitions
//!
//! Defines the clap commands for the hil CLI.

use clap::Subcommand;
use std::path::PathBuf;

use crate::testing::ReportFormat;

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a test scenario defined in a YAML file
    Run {
        /// Path to the YAML test scenario file
        path: PathBuf,

        /// Device URI, overriding the scenario and the config file
        #[arg(long)]
        uri: Option<String>,

        /// Report format
        #[arg(long, short, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,

        /// Write the report to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Default per-test timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Wait after connecting before tools are queried, in milliseconds
        #[arg(long)]
        calibration_wait_ms: Option<u64>,

        /// Skip tests whose dependencies did not pass
        #[arg(long)]
        enforce_dependencies: bool,
    },

    /// Measure how reliably the device connects
    Reliability {
        /// Device URI (default: from config)
        #[arg(long)]
        uri: Option<String>,

        /// Number of connect/verify/disconnect cycles (default: from config)
        #[arg(long, short = 'n')]
        attempts: Option<u32>,
    },

    /// List the tools a device offers
    Tools {
        /// Device URI (default: from config)
        #[arg(long)]
        uri: Option<String>,

        /// Only list tools registered by this plugin
        #[arg(long)]
        plugin: Option<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

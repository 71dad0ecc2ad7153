//! Command line arguments

use crate::core::logging::LogFormat;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "artemis-host")]
#[command(version, about = "Run message consumers and producers against an in-memory broker")]
pub struct Args {
    /// Configuration file (TOML); the built-in demo configuration is used when omitted
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level or flexi_logger spec, e.g. `debug` or `info,artemis_host::client=debug`
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(
        long = "log-format",
        value_name = "FORMAT",
        default_value = "text",
        value_parser = ["text", "ext", "json"]
    )]
    pub log_format: String,

    /// Also write log output to this file
    #[arg(long = "log-file", value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Disable colored log output
    #[arg(long = "no-color", action = ArgAction::SetTrue)]
    pub no_color: bool,

    /// Shut down on its own after this many seconds
    #[arg(long = "run-for", value_name = "SECONDS")]
    pub run_for: Option<u64>,
}

impl Args {
    pub fn log_format(&self) -> LogFormat {
        self.log_format.parse().unwrap_or_default()
    }

    pub fn run_for(&self) -> Option<Duration> {
        self.run_for.map(Duration::from_secs)
    }
}

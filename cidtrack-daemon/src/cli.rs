//! CLI argument definitions for cidtrack.
//!
//! Every tuning flag is optional so that an unset flag leaves the config
//! file (or its environment override) in charge.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::logging::LogFormat;
use crate::output::OutputFormat;

/// Correlation ID tracker.
///
/// Tails every log file under a directory tree and writes one record per
/// correlation ID found to stdout.
#[derive(Parser, Debug)]
#[command(name = "cidtrack")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Directory to watch recursively [default: /var/log/app].
    ///
    /// Replaces the first active source of the config file.
    #[arg(short = 'l', long)]
    pub log_path: Option<PathBuf>,

    /// Record output format [default: json].
    #[arg(short, long, value_enum)]
    pub output: Option<OutputFormat>,

    /// Enable debug logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Only files whose name ends with this suffix are tailed [default: .log].
    #[arg(short, long)]
    pub suffix: Option<String>,

    /// Tail poll interval at end of file, e.g. `100ms` or `1s`.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub poll_interval: Option<Duration>,

    /// Capacity of the line and record channels [default: 1000].
    #[arg(short, long)]
    pub buffer_size: Option<usize>,

    /// Path to a JSON configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Diagnostic log format written to stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Validate the configuration and exit without watching.
    #[arg(long)]
    pub validate: bool,
}

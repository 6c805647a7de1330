//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// depthcore - frame core of a depth camera SDK
#[derive(Parser, Debug)]
#[command(
    name = "depthcore",
    author,
    version,
    about = "Depth camera frame core: capture, metadata sync and dispatch",
    long_about = "Runs the frame core of a depth camera SDK against simulated streams.\n\n\
                  Frames flow from per-stream capture threads through the frame source, \n\
                  are joined with metadata arriving on a separate (simulated network) \n\
                  channel, and are processed on a dispatcher worker."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "DEPTHCORE_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "DEPTHCORE_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the simulated capture pipeline
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "depthcore.toml",
        env = "DEPTHCORE_CONFIG"
    )]
    pub config: PathBuf,

    /// Stop after this many seconds (0 = until Ctrl-C or max frames)
    #[arg(long, default_value = "0", env = "DEPTHCORE_DURATION_SECS")]
    pub duration_secs: u64,

    /// Frames to capture per stream (0 = unlimited)
    #[arg(long, default_value = "0", env = "DEPTHCORE_MAX_FRAMES")]
    pub max_frames: u64,

    /// Validate configuration and exit without running the pipeline
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "DEPTHCORE_METRICS_PORT")]
    pub metrics_port: u16,

    /// Maximum delay of simulated network metadata (milliseconds)
    #[arg(long, default_value = "20")]
    pub md_jitter_ms: u64,

    /// Lose every Nth metadata message (0 = no loss)
    #[arg(long, default_value = "50")]
    pub md_loss_every: u64,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "depthcore.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "depthcore.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show per-stream details
    #[arg(long)]
    pub streams: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

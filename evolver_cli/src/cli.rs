//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "evolver", version, about = "Turbidostat evolution controller")]
pub struct Cli {
    /// Path to the experiment TOML
    #[arg(long, value_name = "FILE", default_value = "etc/evolver.toml")]
    pub config: PathBuf,

    /// Log and report errors as JSON lines instead of pretty text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); RUST_LOG wins when set
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create every vessel's record streams and seed the step log
    Init,
    /// Run one control tick
    Tick {
        /// Experiment time of this tick, in hours
        #[arg(long, value_name = "HOURS")]
        elapsed_hours: f64,
    },
    /// Tick at a fixed interval until Ctrl-C
    Run {
        /// Seconds between ticks
        #[arg(long, value_name = "SECS", default_value_t = 20)]
        interval_secs: u64,
        /// Experiment hours already elapsed when the loop starts
        #[arg(long, value_name = "HOURS", default_value_t = 0.0)]
        start_hours: f64,
        /// Stop after this many ticks
        #[arg(long, value_name = "N")]
        max_ticks: Option<u64>,
    },
    /// Send one immediate command: a scalar for every slot, or a full
    /// comma-separated array
    Set {
        /// Parameter name (e.g. pump, light, temp)
        param: String,
        /// Value or comma-separated values
        value: String,
    },
    /// Step one vessel's light through the calibration PWM sweep
    LightCal {
        vessel: usize,
        /// Seconds each value is held
        #[arg(long, value_name = "SECS", default_value_t = 10)]
        on_secs: u64,
        /// Seconds of darkness between values
        #[arg(long, value_name = "SECS", default_value_t = 5)]
        off_secs: u64,
    },
    /// Validate the config, ladders and data directory
    SelfCheck,
}

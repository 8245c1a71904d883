//! CLI arguments for the headless runner.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Headless runner: poll one Modbus device and print variable values.
#[derive(Parser, Debug, Clone)]
#[command(name = "hmi-modbus")]
#[command(about = "Polls a Modbus device (TCP/RTU) and prints variable values")]
#[command(version)]
pub struct RunnerArgs {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "hmi.json5")]
    pub config: PathBuf,

    /// Project file (JSON) whose communication block and variables replace
    /// the ones in the configuration file.
    #[arg(short, long)]
    pub project: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Refresh period of the value printout in milliseconds (0 disables it).
    #[arg(long, default_value_t = 1000)]
    pub watch_ms: u64,
}

impl RunnerArgs {
    pub fn watch_interval(&self) -> Option<Duration> {
        (self.watch_ms > 0).then(|| Duration::from_millis(self.watch_ms))
    }
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pulsewatch::config::ProbeStrategy;
use pulsewatch::database::models::{DEFAULT_INTERVAL_SECONDS, DEFAULT_TIMEOUT_SECONDS, NotificationChannel};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Schedule every active monitor and run until Ctrl-C (default)
    Run,
    /// Probe a target once and print the outcome
    Check {
        target: String,
        /// Overrides the configured probe strategy
        #[arg(long, value_enum)]
        strategy: Option<ProbeStrategy>,
        #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECONDS)]
        timeout: u64,
    },
    /// List monitors
    Monitors {
        #[arg(long)]
        owner: Option<i64>,
    },
    /// Register a monitor
    Add {
        name: String,
        target: String,
        #[arg(long, default_value_t = 1)]
        owner: i64,
        #[arg(long, default_value_t = DEFAULT_INTERVAL_SECONDS)]
        interval: u64,
        #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECONDS)]
        timeout: u64,
        #[arg(long)]
        paused: bool,
    },
    /// Pause a monitor
    Pause { monitor_id: i64 },
    /// Resume a paused monitor
    Resume { monitor_id: i64 },
    /// Delete a monitor and its check history
    Delete { monitor_id: i64 },
    /// Show recent checks of a monitor
    History {
        monitor_id: i64,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show the uptime rollup of a monitor
    Summary { monitor_id: i64 },
    /// Add a notification destination for an owner
    Subscribe {
        #[arg(long, default_value_t = 1)]
        owner: i64,
        channel: NotificationChannel,
        destination: String,
        #[arg(long)]
        disabled: bool,
    },
    /// Print the effective configuration
    Config,
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "taskbeat", about = "Schedule agent tasks on intervals or cron expressions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load a config file and run the scheduler until interrupted
    Run {
        /// Path to the YAML config file
        #[arg(short, long, env = "TASKBEAT_CONFIG")]
        config: PathBuf,
        /// Seconds to wait for the queue backend's threads on shutdown
        #[arg(long, default_value_t = 10)]
        stop_timeout: u64,
    },
    /// Validate a config file and report per-task problems
    Check {
        /// Path to the YAML config file
        #[arg(short, long, env = "TASKBEAT_CONFIG")]
        config: PathBuf,
    },
}

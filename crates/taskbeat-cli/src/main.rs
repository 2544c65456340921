mod cli;
mod runner;

use anyhow::{Result, bail};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use cli::{Cli, Commands};
use runner::CommandRunner;
use taskbeat_core::{AppConfig, SchedulerManager};

#[tokio::main]
async fn main() -> Result<()> {
    taskbeat_telemetry::init("info,taskbeat_core=debug");

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            stop_timeout,
        } => run(&config, Duration::from_secs(stop_timeout)).await,
        Commands::Check { config } => check(&config),
    }
}

async fn run(config_path: &Path, stop_timeout: Duration) -> Result<()> {
    let config = AppConfig::load(config_path)?;
    let Some(runner_config) = config.runner.clone() else {
        bail!("config has no runner section; nothing can execute the tasks");
    };

    let (specs, rejected) = config.validate_tasks();
    if specs.is_empty() {
        bail!(
            "no valid tasks in {} ({} invalid)",
            config_path.display(),
            rejected.len()
        );
    }

    let runner = Arc::new(CommandRunner::new(runner_config));
    let mut manager = SchedulerManager::new();
    let report = manager.init(specs, runner).await?;
    info!(
        scheduled = report.scheduled,
        rejected = report.rejected.len() + rejected.len(),
        "Tasks initialized"
    );

    manager.start().await?;
    info!("Scheduler running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    manager.stop(stop_timeout).await?;
    Ok(())
}

fn check(config_path: &Path) -> Result<()> {
    let config = AppConfig::load(config_path)?;
    let (specs, rejected) = config.validate_tasks();

    for spec in &specs {
        println!("ok   {}", spec.id);
    }
    for (id, error) in &rejected {
        println!("fail {id}: {error}");
    }
    if config.runner.is_none() {
        warn!("config has no runner section; 'taskbeat run' will refuse to start");
    }

    if rejected.is_empty() {
        println!("{} task(s) valid", specs.len());
        Ok(())
    } else {
        bail!("{} of {} task(s) invalid", rejected.len(), specs.len() + rejected.len());
    }
}

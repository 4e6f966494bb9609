mod cli;

use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tracing::{error, info};

use cli::{Cli, Command};
use pulsewatch::Engine;
use pulsewatch::config::Config;
use pulsewatch::database::MonitorStore;
use pulsewatch::database::models::{Monitor, NewMonitor, NotificationPreference};
use pulsewatch::monitoring::{MonitoringExecutor, checker_for};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref())?;
    logger::init_with_level(&config.log.level);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config).await,
        Command::Check {
            target,
            strategy,
            timeout,
        } => {
            let mut probe = config.probe.clone();
            if let Some(strategy) = strategy {
                probe.strategy = strategy;
            }
            let executor = MonitoringExecutor::new(checker_for(&probe)?);
            let outcome = executor
                .execute_check(0, &target, Duration::from_secs(timeout.max(1)))
                .await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Command::Config => {
            println!("{config}");
            Ok(())
        }
        command => manage(&config, command).await,
    }
}

/// Schedule all active monitors and run until interrupted
async fn run(config: &Config) -> Result<()> {
    let engine = Engine::open(config).await?;
    let scheduled = engine.start().await?;
    info!(scheduled, strategy = %config.probe.strategy, "PulseWatch running");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }

    info!("Shutdown requested");
    engine.shutdown().await;
    Ok(())
}

/// One-shot management commands against the store
async fn manage(config: &Config, command: Command) -> Result<()> {
    let engine = Engine::open(config).await?;
    let service = &engine.service;

    match command {
        Command::Monitors { owner } => {
            for monitor in service.list_monitors(owner).await? {
                print_monitor(&monitor);
            }
        }
        Command::Add {
            name,
            target,
            owner,
            interval,
            timeout,
            paused,
        } => {
            let monitor = NewMonitor::new(owner, name, target)
                .with_interval(interval)
                .with_timeout(timeout)
                .paused(paused);
            print_monitor(&service.create_monitor(monitor).await?);
        }
        Command::Pause { monitor_id } => print_monitor(&service.set_paused(monitor_id, true).await?),
        Command::Resume { monitor_id } => print_monitor(&service.set_paused(monitor_id, false).await?),
        Command::Delete { monitor_id } => {
            service.delete_monitor(monitor_id).await?;
            println!("deleted monitor {monitor_id}");
        }
        Command::History { monitor_id, limit } => {
            for check in service.list_checks(monitor_id, limit).await? {
                println!(
                    "{}  {:<4}  {:>5}  {:>9}  {}",
                    check.checked_at.to_rfc3339(),
                    if check.is_up { "UP" } else { "DOWN" },
                    check.status_code.map(|code| code.to_string()).unwrap_or_else(|| "-".into()),
                    check
                        .latency_ms
                        .map(|ms| format!("{ms:.1}ms"))
                        .unwrap_or_else(|| "-".into()),
                    check.message
                );
            }
        }
        Command::Summary { monitor_id } => {
            let summary = service.uptime_summary(monitor_id).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Subscribe {
            owner,
            channel,
            destination,
            disabled,
        } => {
            let mut preference = NotificationPreference::new(owner, channel, destination);
            preference.is_enabled = !disabled;
            let id = engine.store.save_notification_preference(&preference).await?;
            println!("saved {channel} preference {id} for owner {owner}");
        }
        other => anyhow::bail!("{other:?} is not a management command"),
    }

    engine.shutdown().await;
    Ok(())
}

fn print_monitor(monitor: &Monitor) {
    let state = match (monitor.is_paused, monitor.last_is_up) {
        (true, _) => "paused",
        (false, Some(true)) => "up",
        (false, Some(false)) => "down",
        (false, None) => "pending",
    };
    println!(
        "#{:<4} {:<8} every {:>4}s  {}  ({})",
        monitor.id, state, monitor.interval_seconds, monitor.name, monitor.target
    );
}

//! dbcycle - scheduled database backup and restore cycles.
//!
//! Usage:
//!   dbcycle <config> run        Run the scheduler until Ctrl+C
//!   dbcycle <config> backup     Run backup targets once
//!   dbcycle <config> restore    Run restore targets once
//!   dbcycle <config> all        Run every backup, then every restore, once
//!   dbcycle <config> validate   Validate the configuration without running
//!   dbcycle <config> list       List schedules and targets

use clap::{Parser, Subcommand};
use dbcycle::{
    Clock, ConfigProvider, ConfigStore, DefaultExecutorFactory, EventBus, JobRunner, ScheduleName,
    Scheduler, Settings, SystemClock, TargetName, TracingHandler,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// dbcycle - scheduled database backup and restore cycles
#[derive(Parser)]
#[command(name = "dbcycle")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until Ctrl+C
    Run {
        /// Only run this schedule
        #[arg(short, long)]
        schedule: Option<String>,

        /// Scheduler tick interval in seconds (default: 1)
        #[arg(long, default_value = "1", value_parser = clap::value_parser!(u64).range(1..))]
        tick_interval: u64,

        /// Seconds to wait for running schedules on shutdown (default: 300)
        #[arg(long, default_value = "300")]
        shutdown_timeout: u64,
    },

    /// Run backup targets once (all of them unless --target is given)
    Backup {
        /// Backup target to run
        #[arg(short, long)]
        target: Option<String>,
    },

    /// Run restore targets once (all of them unless --target is given)
    Restore {
        /// Restore target to run
        #[arg(short, long)]
        target: Option<String>,
    },

    /// Run every backup target, then every restore target, once
    All,

    /// Validate the configuration without running
    Validate,

    /// List schedules and targets
    List,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            schedule,
            tick_interval,
            shutdown_timeout,
        } => {
            run_scheduler(cli.config, schedule, tick_interval, shutdown_timeout).await?;
        }
        Commands::Backup { target } => {
            let (settings, runner) = direct_runner(&cli.config).await?;
            run_backups(&runner, selected(target, settings.backup_target_names())).await?;
        }
        Commands::Restore { target } => {
            let (settings, runner) = direct_runner(&cli.config).await?;
            run_restores(&runner, selected(target, settings.restore_target_names())).await?;
        }
        Commands::All => {
            let (settings, runner) = direct_runner(&cli.config).await?;
            let backups = run_backups(&runner, settings.backup_target_names()).await;
            let restores = run_restores(&runner, settings.restore_target_names()).await;
            backups?;
            restores?;
        }
        Commands::Validate => {
            validate_config(cli.config)?;
        }
        Commands::List => {
            list_config(cli.config)?;
        }
    }

    Ok(())
}

/// Event bus with the logging handler registered.
async fn logging_event_bus() -> Arc<EventBus> {
    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(TracingHandler::new())).await;
    event_bus
}

/// Run the scheduler until Ctrl+C.
async fn run_scheduler(
    config: PathBuf,
    schedule: Option<String>,
    tick_interval: u64,
    shutdown_timeout: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Loading configuration from: {}", config.display());

    let settings = Settings::load(&config)?;
    warn_dangling(&settings);

    if settings.schedules().is_empty() {
        warn!("No schedules configured in {}", config.display());
        return Ok(());
    }

    if let Some(name) = &schedule
        && settings.schedule(&ScheduleName::new(name.as_str())).is_none()
    {
        error!("Schedule '{}' not found", name);
        return Err(format!("Schedule '{}' not found", name).into());
    }

    info!("Loaded {} schedule(s):", settings.schedules().len());
    for entry in settings.schedules() {
        info!(
            "  - {} ({} from {}): {} backup(s), {} restore(s)",
            entry.name(),
            entry.repeat(),
            entry.start_date(),
            entry.backup_targets().len(),
            entry.restore_targets().len()
        );
    }

    let store = Arc::new(ConfigStore::new(settings));
    let mut scheduler = Scheduler::new(store, Arc::new(DefaultExecutorFactory::new()))
        .with_shared_event_bus(logging_event_bus().await)
        .with_tick_interval(Duration::from_secs(tick_interval));

    if let Some(name) = schedule {
        scheduler = scheduler.with_only_schedules([name]);
    }

    info!("Starting scheduler (tick interval: {}s)...", tick_interval);
    info!("Press Ctrl+C to stop");

    let handle = scheduler.spawn();
    handle.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    handle
        .shutdown(Duration::from_secs(shutdown_timeout))
        .await?;

    info!("Goodbye!");
    Ok(())
}

/// Job runner for direct target execution.
async fn direct_runner(
    config: &Path,
) -> Result<(Arc<Settings>, JobRunner), Box<dyn std::error::Error>> {
    let settings = Arc::new(Settings::load(config)?);
    let runner = JobRunner::new(
        settings.clone(),
        Arc::new(DefaultExecutorFactory::new()),
        logging_event_bus().await,
    );
    Ok((settings, runner))
}

/// Names to run: the requested one, or every configured one.
fn selected(requested: Option<String>, all: Vec<TargetName>) -> Vec<TargetName> {
    match requested {
        Some(name) => vec![TargetName::new(name)],
        None => all,
    }
}

async fn run_backups(
    runner: &JobRunner,
    names: Vec<TargetName>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut failed = 0;
    for name in &names {
        if !runner.run_backup(name).await?.success {
            failed += 1;
        }
    }
    finish("backup", names.len(), failed)
}

async fn run_restores(
    runner: &JobRunner,
    names: Vec<TargetName>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut failed = 0;
    for name in &names {
        if !runner.run_restore(name).await?.success {
            failed += 1;
        }
    }
    finish("restore", names.len(), failed)
}

fn finish(kind: &str, total: usize, failed: usize) -> Result<(), Box<dyn std::error::Error>> {
    if failed == 0 {
        info!("{} {} target(s) completed", total, kind);
        Ok(())
    } else {
        error!("{} of {} {} target(s) failed", failed, total, kind);
        Err(format!("{} of {} {} target(s) failed", failed, total, kind).into())
    }
}

fn warn_dangling(settings: &Settings) {
    for (schedule, operation, target) in settings.dangling_references() {
        warn!(
            "Schedule '{}' references unknown {} target '{}'",
            schedule, operation, target
        );
    }
}

/// Validate the configuration without running.
fn validate_config(config: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating configuration: {}", config.display());

    match Settings::load(&config) {
        Ok(settings) => {
            warn_dangling(&settings);
            info!(
                "Configuration is valid: {} schedule(s), {} backup target(s), {} restore target(s)",
                settings.schedules().len(),
                settings.backup_target_names().len(),
                settings.restore_target_names().len()
            );
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// List schedules and targets.
fn list_config(config: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load(&config)?;
    let now = SystemClock.now();

    if settings.schedules().is_empty() {
        println!("No schedules in {}", config.display());
    } else {
        println!("Schedules in {}:", config.display());
        println!();
        for entry in settings.schedules() {
            println!("Name: {}", entry.name());
            println!("  Repeat: {}", entry.repeat());
            println!("  Start: {}", entry.start_date());
            println!("  Next run: {}", entry.next_execute_date(now));
            for target in entry.backup_targets() {
                println!("    - backup {}", target);
            }
            for target in entry.restore_targets() {
                println!("    - restore {}", target);
            }
            println!();
        }
    }

    println!("Backup targets:");
    for name in settings.backup_target_names() {
        println!("  - {}", name);
    }
    println!("Restore targets:");
    for name in settings.restore_target_names() {
        println!("  - {}", name);
    }

    Ok(())
}

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use itsm_storage::{MemoryStore, PgTicketStore, TicketStore};
use itsm_sync::{SyncConfig, SyncOrchestrator, SyncRunResult, SyncScheduler, WorkTimeJob, WorkTimeRunResult};
use itsm_web::AppState;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "itsm-cli")]
#[command(about = "ITSM ticket sync command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync and exit.
    Sync {
        /// Write into an in-memory store instead of the database.
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the scheduler and the control surface until Ctrl-C.
    Serve,
    /// Apply pending database migrations.
    Migrate,
    /// Refresh per-assessment technician time spent from the ITSM database.
    SyncTimeSpent,
    /// Pull work log lines newer than the last stored one.
    SyncWorklogs,
    /// Load one synthetic batch regardless of USE_MOCK_DATA.
    Seed {
        #[arg(long)]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync { dry_run: false }) {
        Commands::Sync { dry_run } => {
            let store: Arc<dyn TicketStore> = if dry_run {
                Arc::new(MemoryStore::new())
            } else {
                Arc::new(PgTicketStore::connect(&config.database_url).await?)
            };
            let orchestrator = SyncOrchestrator::from_config(&config, store)?;
            report(orchestrator.run_once().await)?;
        }
        Commands::Serve => serve(config).await?,
        Commands::Migrate => {
            PgTicketStore::connect(&config.database_url).await?.migrate().await?;
            println!("migrations applied");
        }
        Commands::SyncTimeSpent => run_work_time(&config, WorkTimeJob::TimeSpent).await?,
        Commands::SyncWorklogs => run_work_time(&config, WorkTimeJob::Worklogs).await?,
        Commands::Seed { count } => {
            let mut config = config;
            config.use_mock_data = true;
            if let Some(count) = count {
                config.mock_ticket_count = count;
            }
            let store = PgTicketStore::connect(&config.database_url).await?;
            let orchestrator = SyncOrchestrator::from_config(&config, Arc::new(store))?;
            report(orchestrator.run_once().await)?;
        }
    }

    Ok(())
}

fn report(result: SyncRunResult) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        bail!("sync failed: {}", result.error.as_deref().unwrap_or("unknown error"));
    }
    Ok(())
}

async fn run_work_time(config: &SyncConfig, job: WorkTimeJob) -> Result<()> {
    let store = PgTicketStore::connect(&config.database_url).await?;
    let orchestrator = SyncOrchestrator::from_config(config, Arc::new(store))?;
    report_work_time(orchestrator.work_time().run(job).await)
}

fn report_work_time(result: WorkTimeRunResult) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        bail!(
            "{} sync failed: {}",
            result.job.as_str(),
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn serve(config: SyncConfig) -> Result<()> {
    let store = PgTicketStore::connect(&config.database_url).await?;
    store.migrate().await?;
    let orchestrator = Arc::new(SyncOrchestrator::from_config(&config, Arc::new(store))?);

    let mut scheduler = if config.scheduler_enabled {
        let mut scheduler = SyncScheduler::build(
            Arc::clone(&orchestrator),
            config.sync_interval,
            config.work_time_interval,
        )
        .await?;
        scheduler.start().await?;
        Some(scheduler)
    } else {
        warn!("scheduler disabled; syncs run only on manual trigger");
        None
    };

    let served = itsm_web::serve(AppState::new(orchestrator), config.web_port, shutdown_signal()).await;

    if let Some(scheduler) = scheduler.as_mut() {
        scheduler.shutdown().await?;
    }
    served
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn every_subcommand_has_help_text() {
        let cli = Cli::command();
        for sub in cli.get_subcommands() {
            assert!(sub.get_about().is_some(), "`{}` has no help line", sub.get_name());
        }
    }

    #[test]
    fn work_time_commands_parse() {
        let cli = Cli::try_parse_from(["itsm-cli", "sync-worklogs"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::SyncWorklogs)));
        let cli = Cli::try_parse_from(["itsm-cli", "sync", "--dry-run"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Sync { dry_run: true })));
    }
}

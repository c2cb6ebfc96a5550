//! BNA Market Ingest - ETL runner

use anyhow::{Context, Result};
use bna_common::logging::{init_logging, LogConfig, LogLevel};
use bna_ingest::config::EtlConfig;
use bna_ingest::orchestrator::{DataSource, EtlOrchestrator, SourceStatus};
use bna_ingest::storage::{StorageWriter, TableName};
use clap::{Parser, Subcommand};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "bna-ingest")]
#[command(author, version, about = "BNA Market ETL: Zillow listings and FRED metrics into SQLite")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch, normalize and merge data sources
    Run {
        /// Source to run; repeat for several (default: all)
        #[arg(short, long = "source", value_enum)]
        sources: Vec<DataSource>,

        /// Run sources concurrently
        #[arg(long)]
        parallel: bool,
    },

    /// Create tables and indexes
    InitDb,

    /// Load and validate configuration, then exit
    CheckConfig,

    /// Show recent runs
    Runs {
        /// Number of runs to show
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("bna-ingest")
        .build()
        .merge_env()?;
    let guard = init_logging(&log_config)?;

    match cli.command {
        Command::Run { sources, parallel } => {
            let sources = if sources.is_empty() {
                DataSource::ALL.to_vec()
            } else {
                sources
            };
            let config = EtlConfig::from_env().context("loading configuration")?;
            let orchestrator = EtlOrchestrator::from_config(&config).await?;

            let summary = orchestrator.run_all(&sources, parallel).await;
            orchestrator.storage().close().await;

            for report in &summary.reports {
                let stats = report.stats.unwrap_or_default();
                match &report.status {
                    SourceStatus::Failed { kind, message } => {
                        error!(
                            source = %report.source,
                            error_kind = %kind,
                            error = %message,
                            "FAILED"
                        );
                    },
                    status => info!(
                        source = %report.source,
                        status = status.as_str(),
                        normalized = report.normalized,
                        inserted = stats.inserted,
                        overridden = stats.overridden,
                        retained = stats.retained,
                        "done"
                    ),
                }
            }

            if summary.has_failures() {
                // flush buffered file logs before exiting
                drop(guard);
                std::process::exit(1);
            }
        },
        Command::InitDb => {
            let config = EtlConfig::from_env().context("loading configuration")?;
            let orchestrator = EtlOrchestrator::from_config(&config).await?;
            orchestrator.storage().close().await;
            info!(url = %config.database.url, "database initialized");
        },
        Command::CheckConfig => {
            let config = EtlConfig::from_env().context("loading configuration")?;
            info!(
                database = %config.database.url,
                series = config.fred.unique_series().len(),
                max_pages = config.fetch.max_pages,
                max_attempts = config.retry.max_attempts,
                "configuration is valid"
            );
        },
        Command::Runs { limit } => {
            let (database, tables) =
                EtlConfig::storage_from_env().context("loading configuration")?;
            let storage = StorageWriter::connect(&database).await?;
            let table = TableName::new(tables.runs)?;
            storage.ensure_runs_table(&table).await?;

            let runs = storage.recent_runs(&table, limit).await?;
            if runs.is_empty() {
                println!("no runs recorded");
            }
            for run in runs {
                println!(
                    "{}  {:<9} {:<8} pages={:<3} rows={:<6} +{} ~{} ={}  {}",
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.source,
                    run.status,
                    run.pages,
                    run.normalized,
                    run.inserted,
                    run.overridden,
                    run.retained,
                    run.error_message.as_deref().unwrap_or("")
                );
            }
            storage.close().await;
        },
    }

    Ok(())
}

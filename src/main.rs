// expense-report-service/src/main.rs

mod cleanup;
mod config;
mod error;
mod inbox;
mod models;
mod normalizer;
mod pdf;
mod pipeline;
mod report;
mod uploads;
mod validation;

use crate::cleanup::OutputSweeper;
use crate::config::Config;
use crate::inbox::{InboxWatcher, Mailer, MessageComposer, OutboxMailer, Publisher, SubmissionHandler};
use crate::pipeline::ReportPipeline;
use crate::uploads::UploadStore;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "expense-report-service", about = "Assembles expense report PDFs from submitted receipts")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the inbox and sweep old output until interrupted (default).
    Run,
    /// Handle a single submission file and write its response.
    Process {
        file: PathBuf,
    },
    /// Delete expired uploads and generated reports once.
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Print to stderr BEFORE logging initialization to catch early failures
    eprintln!("Starting expense-report-service...");

    let config = match Config::load() {
        Ok(cfg) => {
            eprintln!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.service.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting Expense Report Service"
    );

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config).await,
        Command::Process { file } => process(&config, &file).await,
        Command::Sweep => sweep(&config).await,
    }
}

fn build_handler(config: &Config, pipeline: Arc<ReportPipeline>) -> anyhow::Result<SubmissionHandler> {
    let composer = MessageComposer::new(&config.mail, &config.report.currency)
        .context("Failed to compile mail body template")?;
    let mailer: Arc<dyn Mailer> = Arc::new(OutboxMailer::new(&config.mail.outbox_dir));
    Ok(SubmissionHandler::new(
        pipeline,
        UploadStore::new(&config.storage.upload_dir),
        composer,
        mailer,
    ))
}

fn sweeper(config: &Config) -> OutputSweeper {
    OutputSweeper::new(
        vec![
            config.storage.output_dir.clone(),
            config.storage.upload_dir.clone(),
            config.storage.temp_dir.clone(),
        ],
        config.cleanup.retention(),
    )
}

async fn prepared_pipeline(config: &Config) -> anyhow::Result<Arc<ReportPipeline>> {
    let pipeline = ReportPipeline::new(config);
    pipeline
        .ensure_directories()
        .await
        .context("Failed to create output directories")?;
    Ok(Arc::new(pipeline))
}

async fn run(config: &Config) -> anyhow::Result<()> {
    let pipeline = prepared_pipeline(config).await?;
    let handler = Arc::new(build_handler(config, pipeline)?);
    let publisher = Arc::new(Publisher::new(&config.inbox.responses_dir));
    let watcher = InboxWatcher::new(&config.inbox, handler, publisher);

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();

    // Spawn signal handler
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal, stopping inbox and sweeper");
                cancel_for_signal.cancel();
            }
            Err(err) => {
                error!("Unable to listen for shutdown signal: {}", err);
            }
        }
    });

    let sweeper = sweeper(config);
    let interval = config.cleanup.interval();
    let sweep_cancel = cancel.clone();
    let sweep_task = tokio::spawn(async move { sweeper.run(interval, sweep_cancel).await });

    let watched = watcher.run(cancel.clone()).await;
    cancel.cancel();
    if let Err(e) = sweep_task.await {
        error!(error = %e, "Sweeper task ended abnormally");
    }

    watched.context("Inbox watcher failed")?;
    info!("Expense Report Service stopped");
    Ok(())
}

async fn process(config: &Config, file: &Path) -> anyhow::Result<()> {
    let pipeline = prepared_pipeline(config).await?;
    let handler = build_handler(config, pipeline)?;
    let publisher = Publisher::new(&config.inbox.responses_dir);

    let response_path = inbox::process_file(&handler, &publisher, file)
        .await
        .with_context(|| format!("Failed to process {}", file.display()))?;

    println!("{}", response_path.display());
    Ok(())
}

async fn sweep(config: &Config) -> anyhow::Result<()> {
    let report = sweeper(config).sweep_once().await.context("Sweep failed")?;
    println!("deleted {} file(s), kept {}", report.deleted, report.retained);
    Ok(())
}

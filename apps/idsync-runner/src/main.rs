//! idsync - run pull and push reconciliation tasks
//!
//! The runner loads a task definition and a sandbox snapshot, runs the task
//! once against an in-memory resource, prints the run report, and writes
//! the updated sandbox back. Sync tokens are kept in the snapshot unless
//! `IDSYNC_DATABASE_URL` points at a PostgreSQL token store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use idsync_connector::prelude::InMemoryConnector;
use idsync_provisioning::{
    Direction, EventSinks, InMemoryIdentityStore, InMemoryRemediationStore, InMemorySyncTokenStore,
    JobReport, PgSyncTokenStore, PullJob, PushJob, SyncToken, SyncTokenStore, TaskConfig,
    TracingEventSink,
};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

mod config;
mod error;
mod logging;
mod snapshot;

use config::RunnerConfig;
use error::{RunnerError, RunnerResult};
use snapshot::Sandbox;

/// idsync - identity reconciliation runner
#[derive(Parser)]
#[command(name = "idsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import changes from the resource into local records
    Pull(RunArgs),

    /// Export local records to the resource
    Push(RunArgs),

    /// Forget the stored sync tokens of a resource
    ResetToken(ResetArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Task definition (JSON)
    #[arg(long)]
    task: PathBuf,

    /// Sandbox snapshot, created if missing
    #[arg(long, env = "IDSYNC_SNAPSHOT", default_value = "idsync-sandbox.json")]
    snapshot: PathBuf,

    /// Compute outcomes without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Print the full report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ResetArgs {
    /// Resource whose tokens are dropped
    resource: String,

    /// Sandbox snapshot
    #[arg(long, env = "IDSYNC_SNAPSHOT", default_value = "idsync-sandbox.json")]
    snapshot: PathBuf,
}

/// Where sync tokens live for this invocation.
enum TokenBackend {
    Sandbox(Arc<InMemorySyncTokenStore>),
    Postgres(Arc<PgSyncTokenStore>),
}

impl TokenBackend {
    async fn open(config: &RunnerConfig, sandbox_tokens: Vec<SyncToken>) -> RunnerResult<Self> {
        let Some(url) = &config.database_url else {
            return Ok(Self::Sandbox(Arc::new(InMemorySyncTokenStore::with_tokens(
                sandbox_tokens,
            ))));
        };

        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .connect(url)
            .await?;
        let store = PgSyncTokenStore::new(pool);
        store.run_migrations().await?;
        info!("Using PostgreSQL sync token store");
        Ok(Self::Postgres(Arc::new(store)))
    }

    fn store(&self) -> Arc<dyn SyncTokenStore> {
        match self {
            Self::Sandbox(store) => store.clone(),
            Self::Postgres(store) => store.clone(),
        }
    }

    /// Tokens to write back into the snapshot; `None` when held elsewhere.
    async fn sandbox_tokens(&self) -> Option<Vec<SyncToken>> {
        match self {
            Self::Sandbox(store) => Some(store.tokens().await),
            Self::Postgres(_) => None,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match RunnerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            let e = RunnerError::from(e);
            e.print();
            std::process::exit(e.exit_code());
        }
    };
    logging::init_logging(&config.log_filter);

    match run(cli, config).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            e.print();
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli, config: RunnerConfig) -> RunnerResult<()> {
    match cli.command {
        Commands::Pull(args) => run_task(Direction::Pull, args, &config).await,
        Commands::Push(args) => run_task(Direction::Push, args, &config).await,
        Commands::ResetToken(args) => reset_token(args, &config).await,
    }
}

fn load_task(path: &Path, direction: Direction, dry_run: bool) -> RunnerResult<TaskConfig> {
    let task_err = |message: String| RunnerError::Task {
        path: path.display().to_string(),
        message,
    };
    let raw = std::fs::read_to_string(path).map_err(|e| task_err(e.to_string()))?;
    let task: TaskConfig = serde_json::from_str(&raw).map_err(|e| task_err(e.to_string()))?;

    if task.direction != direction {
        return Err(task_err(format!(
            "task is a {} task",
            task.direction.as_str().to_lowercase()
        )));
    }
    let dry_run = dry_run || task.dry_run;
    Ok(task.with_dry_run(dry_run))
}

async fn run_task(direction: Direction, args: RunArgs, config: &RunnerConfig) -> RunnerResult<()> {
    let task = load_task(&args.task, direction, args.dry_run)?;
    task.validate()?;
    let sandbox = Sandbox::load(&args.snapshot)?;

    let uid_attribute = task
        .ordered_provisions()
        .first()
        .map(|p| p.key.external.clone())
        .unwrap_or_default();
    let connector = Arc::new(InMemoryConnector::from_snapshot(
        task.resource.clone(),
        uid_attribute,
        sandbox.connector,
    ));
    let store = Arc::new(InMemoryIdentityStore::with_records(sandbox.records));
    let sinks = EventSinks::new().with(Arc::new(TracingEventSink));
    let remediations = Arc::new(InMemoryRemediationStore::new());
    let dry_run = task.dry_run;

    let (report, tokens) = match direction {
        Direction::Pull => {
            let tokens = TokenBackend::open(config, sandbox.tokens.clone()).await?;
            let report = PullJob::new(task, connector.clone(), store.clone(), tokens.store())
                .with_sinks(sinks)
                .with_remediation_store(remediations.clone())
                .run()
                .await?;
            (report, tokens.sandbox_tokens().await)
        }
        Direction::Push => {
            let report = PushJob::new(task, connector.clone(), store.clone())
                .with_sinks(sinks)
                .run()
                .await?;
            (report, None)
        }
    };

    print_report(&report, args.json);

    if !dry_run {
        let mut queued = sandbox.remediations;
        queued.extend(remediations.entries().await);
        let updated = Sandbox {
            connector: connector.snapshot().await,
            records: store.records().await,
            tokens: tokens.unwrap_or(sandbox.tokens),
            remediations: queued,
        };
        updated.save(&args.snapshot)?;
        info!(snapshot = %args.snapshot.display(), "Sandbox saved");
    }

    if report.has_failures() {
        return Err(RunnerError::RecordsFailed {
            failed: report.summary.failed,
        });
    }
    Ok(())
}

fn print_report(report: &JobReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(out) => println!("{out}"),
            Err(e) => eprintln!("Failed to serialize report: {e}"),
        }
        return;
    }

    if let Some(text) = &report.report {
        println!("{text}");
    }
    println!(
        "{} {} on {}: {} processed, {} failed in {} ms",
        report.direction,
        report.task,
        report.resource,
        report.summary.processed,
        report.summary.failed,
        report.duration_ms
    );
    if !report.remediations.is_empty() {
        println!("{} records queued for remediation", report.remediations.len());
    }
}

async fn reset_token(args: ResetArgs, config: &RunnerConfig) -> RunnerResult<()> {
    let mut sandbox = Sandbox::load(&args.snapshot)?;
    let tokens = TokenBackend::open(config, std::mem::take(&mut sandbox.tokens)).await?;

    let removed = tokens.store().reset(&args.resource).await?;
    info!(resource = %args.resource, removed, "Sync tokens reset");

    if let Some(remaining) = tokens.sandbox_tokens().await {
        sandbox.tokens = remaining;
        sandbox.save(&args.snapshot)?;
    }
    println!(
        "{}",
        if removed {
            format!("Sync tokens of {} removed", args.resource)
        } else {
            format!("No sync tokens stored for {}", args.resource)
        }
    );
    Ok(())
}

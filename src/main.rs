use chrono::Utc;
use clap::Parser;
use gigmarket::application::engine::EscrowEngine;
use gigmarket::config::MarketConfig;
use gigmarket::domain::money::Amount;
use gigmarket::domain::ports::TaskStoreBox;
use gigmarket::domain::principal::PrincipalId;
use gigmarket::domain::task::TaskId;
use gigmarket::error::MarketError;
use gigmarket::infrastructure::in_memory::{InMemoryLedger, MemoryBackend};
use gigmarket::infrastructure::notify::{LogNotifier, NoopRewardHook};
use gigmarket::infrastructure::repository::TaskRepository;
use gigmarket::interfaces::csv::command_reader::{Command, CommandReader, Op};
use gigmarket::interfaces::csv::report_writer::ReportWriter;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input commands CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Marketplace configuration JSON (optional)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => MarketConfig::load(path).into_diagnostic()?,
        None => MarketConfig::default(),
    };

    let ledger = InMemoryLedger::new();
    let store = build_store(&cli, &config).await.into_diagnostic()?;
    let engine = EscrowEngine::new(
        store,
        Box::new(ledger.clone()),
        Box::new(LogNotifier),
        Box::new(NoopRewardHook),
        config,
    );
    engine.recover().await.into_diagnostic()?;

    // Process commands
    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for command in reader.commands() {
        match command {
            Ok(command) => {
                if let Err(e) = apply(&engine, command).await {
                    eprintln!("Error processing command: {e}");
                }
            }
            Err(e) => {
                eprintln!("Error reading command: {e}");
            }
        }
    }

    // Output final state
    let balances = ledger.snapshot().await;
    let tasks = engine.tasks_report().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = ReportWriter::new(stdout.lock());
    writer.write_balances(&balances).into_diagnostic()?;
    writer.write_tasks(&tasks).into_diagnostic()?;

    Ok(())
}

async fn build_store(cli: &Cli, config: &MarketConfig) -> gigmarket::error::Result<TaskStoreBox> {
    #[cfg(feature = "storage-rocksdb")]
    {
        if let Some(db_path) = &cli.db_path {
            let backend = gigmarket::infrastructure::rocksdb::RocksBackend::open(db_path)?;
            let repository =
                TaskRepository::with_warm(backend, config.pool_max_size, config.pool_min_warm)
                    .await?;
            return Ok(Box::new(repository));
        }
    }
    #[cfg(not(feature = "storage-rocksdb"))]
    {
        if cli.db_path.is_some() {
            eprintln!("built without the storage-rocksdb feature; using in-memory storage");
        }
    }
    let repository = TaskRepository::with_warm(
        MemoryBackend::new(),
        config.pool_max_size,
        config.pool_min_warm,
    )
    .await?;
    Ok(Box::new(repository))
}

async fn apply(engine: &EscrowEngine, command: Command) -> gigmarket::error::Result<()> {
    match command.op {
        Op::Deposit => {
            engine.deposit(&actor(&command)?, amount(&command)?).await?;
        }
        Op::Post => {
            let title = command.detail.clone().unwrap_or_default();
            engine
                .post(&actor(&command)?, title, String::new(), amount(&command)?)
                .await?;
        }
        Op::Claim => {
            engine.claim(&actor(&command)?, task(&command)?).await?;
        }
        Op::Submit => {
            engine.submit(&actor(&command)?, task(&command)?).await?;
        }
        Op::Approve => {
            engine.approve(&actor(&command)?, task(&command)?).await?;
        }
        Op::Reject => {
            let reason = command.detail.clone().unwrap_or_default();
            engine
                .reject(&actor(&command)?, task(&command)?, reason)
                .await?;
        }
        Op::Cancel => {
            engine.cancel(&actor(&command)?, task(&command)?).await?;
        }
        Op::Sweep => {
            engine.sweep_timeouts(Utc::now()).await;
        }
    }
    Ok(())
}

fn actor(command: &Command) -> gigmarket::error::Result<PrincipalId> {
    command
        .actor
        .as_deref()
        .filter(|name| !name.is_empty())
        .map(PrincipalId::new)
        .ok_or_else(|| MarketError::Command(format!("{:?} needs an actor", command.op)))
}

fn task(command: &Command) -> gigmarket::error::Result<TaskId> {
    command
        .task
        .map(TaskId)
        .ok_or_else(|| MarketError::Command(format!("{:?} needs a task id", command.op)))
}

fn amount(command: &Command) -> gigmarket::error::Result<Amount> {
    let value = command
        .amount
        .ok_or_else(|| MarketError::Command(format!("{:?} needs an amount", command.op)))?;
    Amount::new(value)
}

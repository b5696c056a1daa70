//! `queuectl`: CLI entry point (spec §6). Thin shell over `queuectl-core`'s
//! admin operations, worker loop and supervisor — this binary owns
//! argument parsing, the on-disk config/PID-registry files, and exit
//! codes; it carries no queue logic of its own.

mod config_store;
mod output;
mod paths;

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use queuectl_core::job::JobState;
use queuectl_core::{AdminOps, Clock, Config, ShutdownToken, Store, StoreError, SystemClock, Worker, WorkerConfig};
use queuectl_sqlite::{SqliteStore, SqliteStoreConfig};

#[derive(Parser)]
#[command(name = "queuectl")]
#[command(about = "A persistent, local, multi-worker job queue")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job: `{"id": "...", "command": "..."}`.
    Enqueue {
        /// JSON object with `id` and `command` fields.
        json: String,
    },

    /// Worker process management.
    Worker {
        #[command(subcommand)]
        action: WorkerAction,
    },

    /// Per-state counts and active worker PIDs.
    Status,

    /// List jobs, oldest first.
    List {
        #[arg(long)]
        state: Option<String>,
        #[arg(long, default_value_t = queuectl_core::admin::DEFAULT_LIST_LIMIT)]
        limit: u32,
    },

    /// Dead-letter-queue operations.
    Dlq {
        #[command(subcommand)]
        action: DlqAction,
    },

    /// Read or write `queuectl_config.json`.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum WorkerAction {
    /// Spawn a Supervisor with N worker processes; blocks until stopped.
    Start {
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// Internal: run as a single worker process rather than a Supervisor.
        #[arg(long, hide = true)]
        single: bool,
    },
    /// Send a stop signal to every PID in the registry.
    Stop,
}

#[derive(Subcommand)]
enum DlqAction {
    List {
        #[arg(long, default_value_t = queuectl_core::admin::DEFAULT_LIST_LIMIT)]
        limit: u32,
    },
    Retry {
        id: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Get { key: String },
    Set { key: String, value: String },
    List,
}

/// A CLI-level failure carrying the exit code it maps to (spec §6).
enum Failure {
    Validation(String),
    NotFound(String),
    InvalidTransition(String),
    Internal(anyhow::Error),
}

impl Failure {
    fn code(&self) -> u8 {
        match self {
            Failure::Validation(_) => 1,
            Failure::NotFound(_) => 2,
            Failure::InvalidTransition(_) => 3,
            Failure::Internal(_) => 4,
        }
    }

    fn message(&self) -> String {
        match self {
            Failure::Validation(msg) => msg.clone(),
            Failure::NotFound(msg) => msg.clone(),
            Failure::InvalidTransition(msg) => msg.clone(),
            Failure::Internal(err) => format!("{err:#}"),
        }
    }
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        Failure::Internal(err)
    }
}

fn map_store_error(err: StoreError) -> Failure {
    match err {
        StoreError::NotFound(id) => Failure::NotFound(format!("no job with id {id:?}")),
        StoreError::InvalidTransition { id, actual, expected } => Failure::InvalidTransition(format!(
            "job {id:?} is in state {actual}, expected {expected}"
        )),
        StoreError::DuplicateId(id) => Failure::Validation(format!("job id {id:?} already exists")),
        other => Failure::Internal(anyhow::anyhow!(other)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            error!("{}", failure.message());
            ExitCode::from(failure.code())
        }
    }
}

async fn run(cli: Cli) -> Result<(), Failure> {
    let data_dir = paths::data_dir()?;
    std::fs::create_dir_all(&data_dir).map_err(|e| anyhow::anyhow!(e))?;

    match cli.command {
        Commands::Enqueue { json } => cmd_enqueue(&data_dir, &json).await,
        Commands::Worker { action } => match action {
            WorkerAction::Start { count, single } => cmd_worker_start(&data_dir, count, single).await,
            WorkerAction::Stop => cmd_worker_stop(&data_dir),
        },
        Commands::Status => cmd_status(&data_dir).await,
        Commands::List { state, limit } => cmd_list(&data_dir, state, limit).await,
        Commands::Dlq { action } => match action {
            DlqAction::List { limit } => cmd_dlq_list(&data_dir, limit).await,
            DlqAction::Retry { id } => cmd_dlq_retry(&data_dir, &id).await,
        },
        Commands::Config { action } => cmd_config(&data_dir, action),
    }
}

async fn open_store(data_dir: &std::path::Path) -> Result<Arc<dyn Store>, Failure> {
    let config = config_store::load(&paths::config_path(data_dir))?;
    let store = SqliteStore::open(
        &paths::db_path(data_dir),
        SqliteStoreConfig {
            lease_ttl: std::time::Duration::from_secs(config.lease_ttl_seconds),
        },
    )
    .await
    .map_err(|e| anyhow::anyhow!(e))?;
    Ok(Arc::new(store))
}

async fn cmd_enqueue(data_dir: &std::path::Path, json: &str) -> Result<(), Failure> {
    #[derive(serde::Deserialize)]
    struct EnqueueArg {
        id: String,
        command: String,
        #[serde(default)]
        max_retries: Option<u32>,
    }

    let arg: EnqueueArg = serde_json::from_str(json)
        .map_err(|e| Failure::Validation(format!("invalid job JSON: {e}")))?;

    let config = config_store::load(&paths::config_path(data_dir))?;
    let store = open_store(data_dir).await?;
    let ops = AdminOps::new(store);
    let now = SystemClock.now();
    let job = ops
        .enqueue(arg.id, arg.command, arg.max_retries.unwrap_or(config.max_retries), now)
        .await
        .map_err(|e| match e {
            queuectl_core::admin::EnqueueError::Validation(v) => Failure::Validation(v.to_string()),
            queuectl_core::admin::EnqueueError::Store(s) => map_store_error(s),
        })?;

    println!("enqueued {}", job.id);
    Ok(())
}

/// Grace window between forwarding a shutdown signal to worker children and
/// forcibly killing any still running (spec §4.5), independent of each
/// worker's own grace window (spec §5) and of the lease TTL.
const SUPERVISOR_GRACE_WINDOW: std::time::Duration = std::time::Duration::from_secs(30);

async fn cmd_worker_start(data_dir: &std::path::Path, count: u32, single: bool) -> Result<(), Failure> {
    if single {
        return run_single_worker(data_dir).await;
    }

    let exe = std::env::current_exe().map_err(|e| anyhow::anyhow!(e))?;
    let registry_path = paths::registry_path(data_dir);
    let children = queuectl_core::supervisor::spawn_workers(
        &exe,
        &["worker".into(), "start".into(), "--single".into()],
        count,
        &registry_path,
    )
    .map_err(|e| anyhow::anyhow!(e))?;

    info!(count, "supervisor spawned workers");
    let pids: Vec<u32> = children.iter().map(|c| c.pid).collect();

    let shutdown = ShutdownToken::new();
    #[cfg(unix)]
    {
        let token = shutdown.clone();
        tokio::spawn(async move {
            queuectl_core::shutdown::install_signal_handlers(token).await;
        });
    }

    let wait_all = queuectl_core::supervisor::wait_for_all(children);
    tokio::pin!(wait_all);

    tokio::select! {
        _ = &mut wait_all => {
            info!("all worker processes exited on their own");
        }
        _ = shutdown.wait_requested() => {
            info!(count = pids.len(), "forwarding shutdown to worker processes");
            for pid in &pids {
                queuectl_core::supervisor::terminate(*pid);
            }
            if tokio::time::timeout(SUPERVISOR_GRACE_WINDOW, &mut wait_all).await.is_err() {
                warn!("grace window elapsed, force-killing remaining worker processes");
                for pid in &pids {
                    queuectl_core::supervisor::force_kill(*pid);
                }
                wait_all.await;
            }
        }
    }

    queuectl_core::supervisor::remove_registry(&registry_path);
    Ok(())
}

async fn run_single_worker(data_dir: &std::path::Path) -> Result<(), Failure> {
    let config = config_store::load(&paths::config_path(data_dir))?;
    let store = open_store(data_dir).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let hostname = hostname::get()
        .map_err(|e| anyhow::anyhow!(e))?
        .to_string_lossy()
        .to_string();
    let id = queuectl_core::worker::worker_id(&hostname, std::process::id());

    let shutdown = ShutdownToken::new();
    #[cfg(unix)]
    {
        let token = shutdown.clone();
        tokio::spawn(async move {
            queuectl_core::shutdown::install_signal_handlers(token).await;
        });
    }

    let worker = Worker::new(store, clock, id, WorkerConfig::new(config), shutdown);
    worker.run().await;
    Ok(())
}

fn cmd_worker_stop(data_dir: &std::path::Path) -> Result<(), Failure> {
    let registry_path = paths::registry_path(data_dir);
    let pids = queuectl_core::supervisor::read_registry(&registry_path).map_err(|e| anyhow::anyhow!(e))?;

    for pid in &pids {
        queuectl_core::supervisor::terminate(*pid);
    }
    println!("signalled {} worker process(es)", pids.len());
    Ok(())
}

async fn cmd_status(data_dir: &std::path::Path) -> Result<(), Failure> {
    let store = open_store(data_dir).await?;
    let ops = AdminOps::new(store);
    let detail = ops.status_detail(SystemClock.now()).await.map_err(map_store_error)?;
    let pids = queuectl_core::supervisor::read_registry(&paths::registry_path(data_dir))
        .map_err(|e| anyhow::anyhow!(e))?;
    println!("{}", output::status_detail_block(&detail, &pids));
    Ok(())
}

async fn cmd_list(data_dir: &std::path::Path, state: Option<String>, limit: u32) -> Result<(), Failure> {
    let state = state
        .map(|s| s.parse::<JobState>())
        .transpose()
        .map_err(Failure::Validation)?;
    let store = open_store(data_dir).await?;
    let ops = AdminOps::new(store);
    let jobs = ops.list(state, limit).await.map_err(map_store_error)?;
    println!("{}", output::job_table(&jobs));
    Ok(())
}

async fn cmd_dlq_list(data_dir: &std::path::Path, limit: u32) -> Result<(), Failure> {
    let store = open_store(data_dir).await?;
    let ops = AdminOps::new(store);
    let jobs = ops.dlq_list(limit).await.map_err(map_store_error)?;
    println!("{}", output::job_table(&jobs));
    Ok(())
}

async fn cmd_dlq_retry(data_dir: &std::path::Path, id: &str) -> Result<(), Failure> {
    let store = open_store(data_dir).await?;
    let ops = AdminOps::new(store);
    let now = SystemClock.now();
    let job = ops.dlq_retry(id, now).await.map_err(map_store_error)?;
    println!("requeued {}", job.id);
    Ok(())
}

fn cmd_config(data_dir: &std::path::Path, action: ConfigAction) -> Result<(), Failure> {
    let config_path = paths::config_path(data_dir);
    let mut config = config_store::load(&config_path)?;

    match action {
        ConfigAction::Get { key } => {
            let value = config_store::get(&config, &key).map_err(|e| Failure::Validation(e.to_string()))?;
            println!("{value}");
        }
        ConfigAction::Set { key, value } => {
            config_store::set(&mut config, &key, &value).map_err(|e| Failure::Validation(e.to_string()))?;
            config_store::save(&config_path, &config)?;
            println!("{key} = {value}");
        }
        ConfigAction::List => {
            for (key, value) in config_store::list(&config) {
                println!("{key} = {value}");
            }
        }
    }
    Ok(())
}

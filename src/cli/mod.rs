mod config;

pub use config::StepwiseConfig;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::engine::types::{TaskStatus, WorkflowRequest, WorkflowRun};
use crate::engine::{StatusService, WorkflowEngine};
use crate::error::QueryError;
use crate::storage::RunStore;
use crate::tasks::TaskRegistry;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_MAX_BODY: usize = 1_048_576;

#[derive(Parser)]
#[command(name = "stepwise", version, about = "Step-based workflow runner")]
pub struct Cli {
    /// Path to a .env file to load (default: auto-detect .env in cwd)
    #[arg(long, global = true)]
    dotenv: Option<PathBuf>,

    /// Path to a YAML config file (default: auto-detect stepwise.yaml in cwd)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Redis connection URL
    #[arg(long, global = true, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Prefix for run keys in the store
    #[arg(long, global = true, env = "KEY_PREFIX")]
    key_prefix: Option<String>,

    /// Operator mode; only the value "true" enables it
    #[arg(long, global = true, env = "DEBUG", num_args = 0..=1, default_missing_value = "true", value_parser = parse_switch)]
    debug: Option<bool>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server
    Serve {
        /// Host to bind to
        #[arg(long, env = "HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,

        /// Maximum request body size in bytes (default: 1048576 = 1 MB)
        #[arg(long, env = "MAX_BODY")]
        max_body: Option<usize>,
    },

    /// Execute a workflow JSON file and wait for it to finish
    Run {
        /// Path to a JSON file shaped like the POST /workflow body
        workflow: PathBuf,

        /// Keep state in process memory instead of Redis
        #[arg(long)]
        memory: bool,
    },

    /// Print the stored state of a run
    Status {
        /// Run ID
        run_id: String,
    },

    /// List stored run IDs (operator mode only)
    Runs,

    /// List registered tasks
    Tasks,
}

/// Settings after merging CLI/env over the config file over defaults.
pub struct Settings {
    pub redis_url: String,
    pub key_prefix: String,
    pub operator_mode: bool,
    pub config: StepwiseConfig,
}

impl Settings {
    /// Load the config file named by `--config` (or auto-detected) and merge
    /// the parsed arguments over it.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let config = StepwiseConfig::load(cli.config.as_deref())?;
        Ok(Self {
            redis_url: cli
                .redis_url
                .clone()
                .or_else(|| config.redis_url.clone())
                .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            key_prefix: cli
                .key_prefix
                .clone()
                .or_else(|| config.key_prefix.clone())
                .unwrap_or_default(),
            operator_mode: cli.debug.or(config.debug).unwrap_or(false),
            config,
        })
    }

    /// Log level used when `RUST_LOG` is not set.
    pub fn default_log_level(&self) -> &'static str {
        if self.operator_mode { "debug" } else { "info" }
    }
}

fn parse_switch(value: &str) -> Result<bool, String> {
    Ok(value.eq_ignore_ascii_case("true"))
}

pub async fn run_cli() -> Result<()> {
    // The .env file must be in the environment before clap reads `env =` args.
    let dotenv = dotenv_arg(std::env::args_os());
    let loaded = load_dotenv(dotenv.as_deref());

    let cli = Cli::parse();
    let settings = Settings::from_cli(&cli)?;

    init_tracing(settings.default_log_level());
    if let Some(path) = loaded {
        info!("Loaded env from {}", path.display());
    }

    match cli.command {
        Commands::Serve {
            host,
            port,
            max_body,
        } => cmd_serve(&settings, host, port, max_body).await,
        Commands::Run { workflow, memory } => cmd_run(&settings, &workflow, memory).await,
        Commands::Status { run_id } => cmd_status(&settings, &run_id).await,
        Commands::Runs => cmd_runs(&settings).await,
        Commands::Tasks => cmd_tasks(),
    }
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

/// Value of `--dotenv <path>` or `--dotenv=<path>` in raw arguments.
pub fn dotenv_arg<I>(args: I) -> Option<PathBuf>
where
    I: IntoIterator,
    I::Item: Into<OsString>,
{
    let mut args = args.into_iter().map(Into::into);
    while let Some(arg) = args.next() {
        if arg == "--" {
            break;
        }
        if arg == "--dotenv" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.to_str().and_then(|a| a.strip_prefix("--dotenv=")) {
            return Some(PathBuf::from(path));
        }
    }
    None
}

/// Load environment variables from a .env file and return the file loaded.
/// If an explicit path is given, load from that path (warn if missing).
/// Otherwise, auto-detect .env in the current working directory (silently skip if absent).
/// Variables already set in the process environment are kept.
pub fn load_dotenv(explicit_path: Option<&Path>) -> Option<PathBuf> {
    match explicit_path {
        Some(path) => match dotenvy::from_path(path) {
            Ok(()) => Some(path.to_path_buf()),
            Err(e) => {
                eprintln!(
                    "Warning: Failed to load dotenv file '{}': {}",
                    path.display(),
                    e
                );
                None
            }
        },
        None => match dotenvy::dotenv() {
            Ok(path) => Some(path),
            Err(dotenvy::Error::Io(_)) => None,
            Err(e) => {
                eprintln!("Warning: Failed to parse .env file: {}", e);
                None
            }
        },
    }
}

/// Open the configured store. The connection lives as long as the returned handle.
async fn open_store(settings: &Settings, memory: bool) -> Result<RunStore> {
    if memory {
        return Ok(RunStore::in_memory());
    }

    open_redis(settings).await
}

#[cfg(feature = "redis")]
async fn open_redis(settings: &Settings) -> Result<RunStore> {
    let backend = crate::storage::redis_store::RedisHashStore::connect(&settings.redis_url)
        .await
        .with_context(|| format!("Failed to connect to {}", settings.redis_url))?;
    Ok(RunStore::with_prefix(Arc::new(backend), &settings.key_prefix))
}

#[cfg(not(feature = "redis"))]
async fn open_redis(settings: &Settings) -> Result<RunStore> {
    anyhow::bail!(
        "Built without Redis support; cannot open {} (use --memory)",
        settings.redis_url
    )
}

async fn cmd_serve(
    settings: &Settings,
    host: Option<String>,
    port: Option<u16>,
    max_body: Option<usize>,
) -> Result<()> {
    let host = host
        .or_else(|| settings.config.host.clone())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = port.or(settings.config.port).unwrap_or(DEFAULT_PORT);
    let max_body = max_body
        .or(settings.config.max_body)
        .unwrap_or(DEFAULT_MAX_BODY);

    let store = open_store(settings, false).await?;
    let registry = Arc::new(TaskRegistry::with_builtins());

    let state = Arc::new(AppState {
        engine: WorkflowEngine::new(registry, store.clone()),
        status: StatusService::new(store, settings.operator_mode),
    });

    crate::api::serve(&host, port, max_body, state).await
}

async fn cmd_run(settings: &Settings, path: &Path, memory: bool) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workflow file: {}", path.display()))?;
    let request: WorkflowRequest = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse workflow file: {}", path.display()))?;

    let store = open_store(settings, memory).await?;
    let engine = WorkflowEngine::new(Arc::new(TaskRegistry::with_builtins()), store);

    let run = engine.submit(&request).await?;
    println!("Run ID: {}", run.run_id);

    let run = engine.execute(run).await?;
    print_run(&run);

    Ok(())
}

async fn cmd_status(settings: &Settings, run_id: &str) -> Result<()> {
    let store = open_store(settings, false).await?;
    let status = StatusService::new(store, settings.operator_mode);

    let run = match status.get_run(run_id).await {
        Ok(run) => run,
        Err(QueryError::NotFound(id)) => anyhow::bail!("Run '{}' not found", id),
        Err(e) => return Err(e.into()),
    };

    let body = serde_json::json!({
        "run_id": run.run_id,
        "steps": run.steps,
    });
    println!("{}", serde_json::to_string_pretty(&body)?);

    Ok(())
}

async fn cmd_runs(settings: &Settings) -> Result<()> {
    if !settings.operator_mode {
        anyhow::bail!("Listing runs requires operator mode (--debug or DEBUG=true)");
    }

    let store = open_store(settings, false).await?;
    let run_ids = StatusService::new(store, true).list_runs().await?;

    if run_ids.is_empty() {
        println!("No runs found.");
        return Ok(());
    }

    for id in &run_ids {
        println!("{}", id);
    }
    println!("\nTotal: {} run(s)", run_ids.len());
    Ok(())
}

fn cmd_tasks() -> Result<()> {
    let registry = TaskRegistry::with_builtins();
    let tasks = registry.list();

    println!("{:<20} DESCRIPTION", "TASK");
    println!("{}", "-".repeat(60));

    for (name, desc) in &tasks {
        println!("{:<20} {}", name, desc);
    }

    println!("\nTotal: {} task(s)", tasks.len());
    Ok(())
}

fn print_run(run: &WorkflowRun) {
    for step in &run.steps {
        println!("\nStep {} [{}]", step.index, step.kind);
        for slot in &step.tasks {
            let status_icon = match slot.status {
                TaskStatus::Success => "✓",
                TaskStatus::Failed => "✗",
                TaskStatus::Running => "⟳",
                TaskStatus::Pending => "○",
            };
            println!("  {} {} ({})", status_icon, slot.name, slot.status);
        }
    }
}

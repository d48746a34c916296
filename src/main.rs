use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;

use rigourqa::config::{LoggingConfig, RigourConfig};
use rigourqa::model::{Connection, ExecutionResult, ExecutionStatus, Scene};
use rigourqa::probes::{HttpProbe, DEFAULT_CHECK_TIMEOUT_MS};
use rigourqa::storage::ResultStore;

#[derive(Parser)]
#[command(
    name = "rigourqa",
    about = "Declarative HTTP API scene testing",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (default: $RIGOURQA_CONFIG, then /etc/rigourqa/rigourqa.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server and execution service
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        bind: Option<String>,

        /// SQLite database path (overrides config)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Execute a scene file once and print the verdict
    Run {
        /// Scene definition (JSON)
        #[arg(long)]
        scene: PathBuf,

        /// Connection definition (JSON)
        #[arg(long)]
        connection: Option<PathBuf>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Probe a base URL with a HEAD request
    CheckConnection {
        /// Base URL to probe
        #[arg(long)]
        base_url: String,

        /// Request timeout in milliseconds
        #[arg(long, default_value_t = DEFAULT_CHECK_TIMEOUT_MS)]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RigourConfig::load(path)?,
        None => RigourConfig::load_or_default(),
    };
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind, db } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(db) = db {
                config.storage.db_path = db;
            }
            tracing::info!(bind = %config.server.bind, "Starting RigourQA service");
            rigourqa::serve(config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            scene,
            connection,
            json,
        } => {
            let scene: Scene = read_json(&scene)?;
            let connection: Option<Connection> = connection.as_deref().map(read_json::<Connection>).transpose()?;

            tracing::info!(scene_id = %scene.id, steps = scene.steps.len(), "Running scene");
            let orchestrator = rigourqa::build_orchestrator(ResultStore::in_memory(), &config.engine)?;
            let record = rigourqa::service::run_scene(&orchestrator, &scene, connection.as_ref()).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print_report(&record);
            }
            Ok(match record.status {
                ExecutionStatus::Pass => ExitCode::SUCCESS,
                ExecutionStatus::Fail => ExitCode::from(1),
                _ => ExitCode::from(2),
            })
        }
        Commands::CheckConnection {
            base_url,
            timeout_ms,
        } => {
            let probe = HttpProbe::new()?;
            let check = probe
                .check(&base_url, &BTreeMap::new(), Duration::from_millis(timeout_ms))
                .await;
            if check.success {
                println!(
                    "OK      {} (HTTP {}, {:.1} ms)",
                    base_url,
                    check.status_code.unwrap_or_default(),
                    check.latency_ms
                );
                Ok(ExitCode::SUCCESS)
            } else {
                let reason = check
                    .error
                    .or(check.message)
                    .unwrap_or_else(|| "unknown failure".to_string());
                println!("FAILED  {}: {}", base_url, reason);
                Ok(ExitCode::from(1))
            }
        }
    }
}

/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

fn print_report(record: &ExecutionResult) {
    println!("\nRigourQA Execution: {}", record.scene_name);
    println!("{:<20} | {:<6} | {:>8} | Details", "Step", "Status", "Time");
    println!("{:-<20}-|-{:-<6}-|-{:->8}-|-{:-<40}", "", "", "", "");
    for step in &record.step_results {
        let detail = match (&step.response, &step.error) {
            (_, Some(err)) => err.clone(),
            (Some(resp), None) => format!("HTTP {}", resp.status_code),
            (None, None) => String::new(),
        };
        println!(
            "{:<20} | {:<6} | {:>6}ms | {}",
            step.step_id,
            if step.status.is_pass() { "PASS" } else { "FAIL" },
            step.duration,
            detail
        );
    }

    if !record.assertion_results.is_empty() {
        println!();
        println!("{:<20} | {:<6} | Reasoning", "Assertion", "Status");
        println!("{:-<20}-|-{:-<6}-|-{:-<40}", "", "", "");
        for assertion in &record.assertion_results {
            println!(
                "{:<20} | {:<6} | {}",
                assertion.assertion_id,
                if assertion.status.is_pass() { "PASS" } else { "FAIL" },
                assertion.reasoning
            );
        }
    }

    println!("\nVerdict:  {}", record.status.to_string().to_uppercase());
    if let Some(reasoning) = &record.reasoning {
        println!("{}", reasoning);
    }
    println!();
}

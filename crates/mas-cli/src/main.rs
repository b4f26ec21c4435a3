use clap::{Parser, Subcommand, ValueEnum};
use mas_agent::{register_builtins, AgentRegistry};
use mas_core::Payload;
use mas_orchestrator::{Orchestrator, OrchestratorConfig, TaskRequest, TaskStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mas", about = "mas: multi-agent task orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "mas.toml")]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit one task to the built-in agents and wait for it
    Run {
        /// Agent to run; repeat to chain several in order
        #[arg(short, long = "agent", required = true)]
        agents: Vec<String>,
        /// Task input, parsed as JSON or taken as plain text
        #[arg(short, long, default_value = "")]
        input: String,
        /// Seconds to wait for the task to finish
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
    /// List the built-in agents
    Agents,
    /// Print the effective configuration
    Config,
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

/// Load the config file if present, otherwise fall back to defaults.
fn load_config(path: &Path) -> anyhow::Result<OrchestratorConfig> {
    let config = if path.exists() {
        OrchestratorConfig::load(path)?
    } else {
        warn!(path = %path.display(), "Config file not found, using defaults");
        OrchestratorConfig::default()
    };
    Ok(config.normalized())
}

fn parse_input(raw: &str) -> Payload {
    serde_json::from_str(raw).unwrap_or_else(|_| Payload::String(raw.to_string()))
}

fn builtin_registry() -> anyhow::Result<Arc<AgentRegistry>> {
    let registry = AgentRegistry::new();
    register_builtins(&registry)?;
    Ok(Arc::new(registry))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Run {
            agents,
            input,
            timeout_secs,
        } => {
            let orchestrator = Orchestrator::with_registry(config, builtin_registry()?);
            orchestrator.start();

            let id = orchestrator.submit_task(TaskRequest::new(agents, parse_input(&input)))?;
            info!(task_id = %id, "Waiting for task");
            let outcome = orchestrator
                .wait_for(id, Duration::from_secs(timeout_secs))
                .await;
            if outcome.is_err() {
                if let Err(e) = orchestrator.cancel_task(id) {
                    debug!(task_id = %id, error = %e, "Cancel after failed wait had no effect");
                }
            }
            orchestrator.stop();

            let task = outcome?;
            println!("{}", serde_json::to_string_pretty(&task)?);
            if task.status != TaskStatus::Completed {
                anyhow::bail!("task {} ended {}", task.id, task.status);
            }
        }
        Commands::Agents => {
            let registry = builtin_registry()?;
            println!("Built-in agents:");
            for name in registry.names() {
                println!("  {name}");
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
        }
    }

    Ok(())
}

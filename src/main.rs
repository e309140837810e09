use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use maestro_core::config::MaestroConfig;
use maestro_engine::checkpoint::{CheckpointState, CheckpointStore, FileCheckpointStore};

#[derive(Parser)]
#[command(name = "maestro", version, about = "Multi-agent workflow orchestration engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, env = "MAESTRO_CONFIG", default_value = "maestro.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show effective configuration
    Config,
    /// Inspect and manage persisted workflow checkpoints
    Checkpoints {
        #[command(subcommand)]
        action: CheckpointAction,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// List every checkpoint file, oldest first
    List,
    /// Print the latest checkpoint of a workflow as JSON
    Show {
        /// Workflow ID
        workflow_id: String,
    },
    /// Print the most recent checkpoint across all workflows
    Latest,
    /// Delete all checkpoints of a workflow
    Clear {
        /// Workflow ID
        workflow_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_filter())),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Checkpoints { action } => {
            let store = FileCheckpointStore::from_config(&config);
            info!(dir = %store.dir().display(), "Using checkpoint directory");
            handle_checkpoints(&store, action).await?;
        }
    }

    Ok(())
}

/// Load the config file, or fall back to defaults when it does not exist.
fn load_config(path: &Path) -> anyhow::Result<MaestroConfig> {
    if path.exists() {
        Ok(MaestroConfig::load(path)?)
    } else {
        eprintln!(
            "Warning: {} not found, using default configuration",
            path.display()
        );
        Ok(MaestroConfig::default())
    }
}

async fn handle_checkpoints(
    store: &FileCheckpointStore,
    action: CheckpointAction,
) -> anyhow::Result<()> {
    match action {
        CheckpointAction::List => {
            let entries = store.list().await?;
            if entries.is_empty() {
                println!("No checkpoints in {}", store.dir().display());
                return Ok(());
            }
            println!("{:<32} {:>6}  {:<20}  FILE", "WORKFLOW", "STEP", "SAVED");
            for (path, state) in entries {
                let file = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                println!(
                    "{:<32} {:>6}  {:<20}  {}",
                    state.workflow_id,
                    state.step_index,
                    state.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    file
                );
            }
        }
        CheckpointAction::Show { workflow_id } => match store.load(&workflow_id).await? {
            Some(state) => print_state(&state)?,
            None => anyhow::bail!("no checkpoint for workflow '{}'", workflow_id),
        },
        CheckpointAction::Latest => match store.latest_checkpoint().await? {
            Some(state) => print_state(&state)?,
            None => println!("No checkpoints in {}", store.dir().display()),
        },
        CheckpointAction::Clear { workflow_id } => {
            if store.load(&workflow_id).await?.is_none() {
                warn!(workflow_id = %workflow_id, "No checkpoints to clear");
            }
            store.clear(&workflow_id).await?;
            println!("Cleared checkpoints for '{}'", workflow_id);
        }
    }
    Ok(())
}

fn print_state(state: &CheckpointState) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(state)?);
    Ok(())
}

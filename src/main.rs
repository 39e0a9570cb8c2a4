use clap::{Parser, Subcommand};
use dept_assistant::commands::{ingest, list_departments, run_chat, verify};
use dept_assistant::config::{Config, get_config_dir, run_interactive_config, show_config};
use dept_assistant::indexer::VectorStoreManager;
use dept_assistant::{AssistantError, Result};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "dept-assistant")]
#[command(about = "Department-scoped knowledge assistant over your team's documents")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the vector database
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    /// Override the directory holding one folder per department
    #[arg(long, global = true)]
    data_root: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the corpus location, embeddings and language model
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Log in and chat with your department's assistant
    Chat,
    /// List departments that have documents
    Departments,
    /// Check whether a person is registered in a department
    Verify {
        /// Full name as it appears in the roster
        name: String,
        /// Department name
        department: String,
    },
    /// Build a department's index ahead of time
    Ingest {
        /// Department name
        department: String,
        /// Rebuild even if an index already exists
        #[arg(long)]
        rebuild: bool,
        /// Drop earlier builds, including ones other running chats may still use
        #[arg(long)]
        prune: bool,
    },
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config_dir = match &cli.config_dir {
        Some(dir) => dir.clone(),
        None => get_config_dir().map_err(|e| AssistantError::Config(e.to_string()))?,
    };

    let mut config = Config::load(&config_dir)?;
    if let Some(data_root) = &cli.data_root {
        config.data_root = data_root.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config)?;
            } else {
                run_interactive_config(config)?;
            }
        }
        Commands::Chat => {
            let manager = Arc::new(VectorStoreManager::from_config(&config).await?);
            run_chat(&config, manager).await?;
        }
        Commands::Departments => {
            let manager = VectorStoreManager::from_config(&config).await?;
            list_departments(&manager)?;
        }
        Commands::Verify { name, department } => {
            if !verify(&config, &name, &department) {
                std::process::exit(1);
            }
        }
        Commands::Ingest {
            department,
            rebuild,
            prune,
        } => {
            let manager = VectorStoreManager::from_config(&config).await?;
            ingest(&manager, &department, rebuild, prune).await?;
        }
    }

    Ok(())
}

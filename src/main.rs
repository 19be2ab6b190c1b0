use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use brain::config::BrainConfig;
use brain::logging::init_logging;

mod cmd;

#[derive(Parser)]
#[command(name = "brain")]
#[command(version, about = "Review workflow engine for coding-agent sessions")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to brain.toml (defaults to .brain/brain.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the ledger database. Overrides BRAIN_DB_PATH and brain.toml.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List brain sessions, or show one in detail
    Status {
        #[arg(long)]
        session: Option<String>,
    },
    /// Fail executions left running by a crashed process
    Recover,
    /// Parse a reviewer reply for a signal
    Signal {
        /// Workflow state the reply answers
        #[arg(long)]
        state: String,
        /// File holding the reply (stdin if omitted)
        file: Option<PathBuf>,
    },
    /// Segment a JSON array of stored messages into rounds
    Segment {
        file: PathBuf,
        /// Print rounds as JSON
        #[arg(long)]
        json: bool,
    },
    /// Preview the reviewer instruction for a state
    Instruction {
        #[arg(long)]
        state: String,
        /// Retries already used in the state's stage
        #[arg(long, default_value = "0")]
        retries: u32,
        #[arg(long)]
        working_dir: Option<String>,
    },
    /// View and manage configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default brain.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let config = BrainConfig::with_cli_args(
        project_dir,
        cli.config.clone(),
        cli.db.clone(),
        cli.verbose,
    )?;
    let log_dir = config.log_dir();
    let _log_guard = init_logging(
        &config.log_level(),
        config.toml.log_json(),
        log_dir.as_deref(),
    );

    match &cli.command {
        Commands::Status { session } => cmd::cmd_status(&config, session.as_deref()).await?,
        Commands::Recover => cmd::cmd_recover(&config).await?,
        Commands::Signal { state, file } => cmd::cmd_signal(&config, state, file.as_deref())?,
        Commands::Segment { file, json } => cmd::cmd_segment(&config, file, *json)?,
        Commands::Instruction {
            state,
            retries,
            working_dir,
        } => cmd::cmd_instruction(&config, state, *retries, working_dir.as_deref())?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reviewforge::logging::{self, LogFormat};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "reviewforge")]
#[command(version, about = "Durable multi-agent code review orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Config file. Defaults to .reviewforge/config.toml in the project dir.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database path. Overrides the config file and REVIEWFORGE_DB.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    /// Also write JSON logs to .reviewforge/logs
    #[arg(long, global = true)]
    pub log_file: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record a new pending review
    Submit {
        repo_url: String,
        #[arg(long = "ref", default_value = "main")]
        ref_name: String,
        #[arg(long)]
        commit: Option<String>,
        #[arg(long)]
        pr: Option<i64>,
    },
    /// Evict or requeue reviews left pending or running, then show the queue
    Recover,
    /// Requeue a failed review
    Retry {
        review_id: i64,
        /// Process the queue right away instead of leaving it for the next worker
        #[arg(long)]
        run: bool,
    },
    /// Re-run one failed rule of a review
    RetryRule { review_id: i64, rule_id: String },
    /// Show a review with its rules and runs
    Status {
        review_id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Recover, then drain the queue
    Worker {
        #[arg(short, long, default_value = "2")]
        concurrency: usize,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and list problems
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let config = reviewforge::config::ReviewforgeConfig::new(project_dir, cli.config.as_deref())?
        .with_db_path(cli.db.clone());

    let log_dir = cli.log_file.then(|| config.log_dir());
    let _log_guard = logging::init(cli.log_format, cli.verbose, log_dir.as_deref())?;

    match &cli.command {
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
        Commands::Submit {
            repo_url,
            ref_name,
            commit,
            pr,
        } => {
            let services = cmd::Services::open(config)?;
            cmd::cmd_submit(&services, repo_url, ref_name, commit.as_deref(), *pr).await?;
        }
        Commands::Recover => {
            let services = cmd::Services::open(config)?;
            cmd::cmd_recover(&services).await?;
        }
        Commands::Retry { review_id, run } => {
            let services = cmd::Services::open(config)?;
            cmd::cmd_retry(&services, *review_id, *run).await?;
        }
        Commands::RetryRule { review_id, rule_id } => {
            let services = cmd::Services::open(config)?;
            cmd::cmd_retry_rule(&services, *review_id, rule_id).await?;
        }
        Commands::Status { review_id, json } => {
            let services = cmd::Services::open(config)?;
            cmd::cmd_status(&services, *review_id, *json).await?;
        }
        Commands::Worker { concurrency } => {
            let services = cmd::Services::open(config)?;
            cmd::cmd_worker(&services, *concurrency).await?;
        }
    }

    Ok(())
}

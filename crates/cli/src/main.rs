//! vfsync CLI - mirror a directory onto a git remote

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

mod cmd;
mod disk;
mod paths;

/// vfsync - keep a directory in sync with a git branch
#[derive(Parser)]
#[command(name = "vfsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding config.toml and saved settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone a branch into a directory and push local changes as they happen
    Watch {
        /// Directory to mirror into
        dir: PathBuf,
        /// Repository URL (default: the saved connection)
        #[arg(long)]
        repo: Option<String>,
        /// Branch to sync (default: main, or the saved branch)
        #[arg(short, long)]
        branch: Option<String>,
        /// Access token (default: $VFSYNC_TOKEN)
        #[arg(long)]
        token: Option<String>,
    },
    /// List branches of a repository
    Branches {
        /// Repository URL (default: the saved connection)
        #[arg(long)]
        repo: Option<String>,
        /// Access token (default: $VFSYNC_TOKEN)
        #[arg(long)]
        token: Option<String>,
    },
    /// Show the saved connection and effective configuration
    Status,
    /// Forget the saved connection
    Disconnect,
    /// View or edit configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// List all configuration values
    List,
    /// Print one configuration value
    Get {
        /// Key such as sync.debounce_ms
        key: String,
    },
    /// Change one configuration value
    Set { key: String, value: String },
    /// Print the config file location
    Path,
}

fn init_logging(log_file: Option<&Path>, verbose: u8) -> Result<Option<WorkerGuard>> {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stderr = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let Some(path) = log_file else {
        tracing_subscriber::registry().with(filter).with(stderr).init();
        return Ok(None);
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_file.as_deref(), cli.verbose)?;
    let paths = paths::Paths::resolve(cli.config)?;

    match cli.command {
        Commands::Watch {
            dir,
            repo,
            branch,
            token,
        } => cmd::watch::run(&paths, &dir, repo, branch, token).await,
        Commands::Branches { repo, token } => cmd::branches::run(&paths, repo, token).await,
        Commands::Status => cmd::status::run(&paths),
        Commands::Disconnect => cmd::disconnect::run(&paths),
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::List => cmd::config::run_list(&paths),
            ConfigCommands::Get { key } => cmd::config::run_get(&paths, &key),
            ConfigCommands::Set { key, value } => cmd::config::run_set(&paths, &key, &value),
            ConfigCommands::Path => cmd::config::run_path(&paths),
        },
    }
}

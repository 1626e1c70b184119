use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use lumina::commands;
use lumina::config::Config;
use lumina::session::ChatSession;

const DEFAULT_LOG_FILTER: &str = "lumina=info";

#[derive(Parser)]
#[command(name = "lumina")]
#[command(version)]
#[command(about = "Chat with Lumina from your terminal", long_about = None)]
struct Cli {
    /// Path to the config file (defaults to ~/.lumina/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Keep chats in memory only
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive chat (default)
    Chat,
    /// List saved chats
    List,
    /// Print a chat transcript
    Show {
        /// Chat id or unique id prefix
        id: String,
    },
    /// Send one message and stream the reply to stdout
    Ask {
        #[arg(required = true)]
        text: Vec<String>,
        /// Continue an existing chat instead of starting a new one
        #[arg(long)]
        thread: Option<String>,
    },
    /// Delete a saved chat
    Delete {
        /// Chat id or unique id prefix
        id: String,
    },
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let command = cli.command.unwrap_or(Commands::Chat);

    if let Commands::Config = command {
        let path = cli.config.unwrap_or_else(Config::default_path);
        return commands::show_config(&config, &path);
    }

    let interactive = matches!(command, Commands::Chat);
    init_logging(&config, interactive)?;

    let mut session = ChatSession::open(&config, cli.ephemeral)?;
    match command {
        Commands::Chat => lumina::ui::run(session, config.ui.show_sidebar).await,
        Commands::List => commands::list_threads(&session),
        Commands::Show { id } => commands::show_thread(&session, &id),
        Commands::Ask { text, thread } => {
            commands::ask(&mut session, &text.join(" "), thread.as_deref()).await
        }
        Commands::Delete { id } => commands::delete_thread(&mut session, &id),
        Commands::Config => Ok(()),
    }
}

/// The interactive chat owns the terminal, so it logs to a file; subcommands log to stderr
fn init_logging(config: &Config, interactive: bool) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    if interactive {
        let path = config.log_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    Ok(())
}

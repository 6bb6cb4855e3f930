use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cmd;

#[derive(Parser)]
#[command(name = "taskboard")]
#[command(version, about = "Drag-and-drop Kanban board backed by a JSON file in GitHub")]
pub struct Cli {
    /// Path to board.toml
    #[arg(long, global = true, default_value = taskboard::config::DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the board API and WebSocket
    Serve {
        /// Port to serve on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Interface to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Open the board in a browser once the server is up
        #[arg(long)]
        open: bool,

        /// Enable dev mode (CORS permissive for a local UI dev server)
        #[arg(long)]
        dev: bool,
    },
    /// Inspect and edit tasks from the terminal
    Tasks {
        #[command(subcommand)]
        command: TasksCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum TasksCommands {
    /// List tasks grouped by column
    List {
        /// Print the stored JSON document instead
        #[arg(long)]
        json: bool,
    },
    /// Create a task
    Add {
        title: String,
        #[arg(short, long, default_value = "")]
        description: String,
        #[arg(short, long, default_value = "")]
        assignee: String,
        /// High, Medium or Low
        #[arg(short, long, default_value = "Medium")]
        priority: String,
        /// Column id (defaults to the first column)
        #[arg(short, long)]
        column: Option<String>,
    },
    /// Move a task the way a drag would
    Move {
        task_id: String,
        /// Target column id
        column: String,
        /// Drop onto this task instead of the end of the column
        #[arg(long)]
        before: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default board.toml file
    Init,
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose {
        "taskboard=debug,tower_http=debug,info"
    } else {
        "taskboard=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry().with(filter);

    // stdout is reserved for command output.
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match &cli.command {
        Commands::Serve {
            port,
            host,
            open,
            dev,
        } => {
            cmd::cmd_serve(&cli.config, *port, host.clone(), *open, *dev).await?;
        }
        Commands::Tasks { command } => cmd::cmd_tasks(&cli.config, command.clone()).await?,
        Commands::Config { command } => cmd::cmd_config(&cli.config, command.clone())?,
    }

    Ok(())
}

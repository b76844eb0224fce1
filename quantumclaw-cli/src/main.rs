//! QuantumClaw CLI — thin verb parser over the daemon: config, daemon
//! lifecycle, and pairing management. All agent behavior runs inside the
//! daemon process; this binary never talks to an LLM directly.

mod commands;
mod stages;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// QuantumClaw: a self-hosted, single-tenant AI agent runtime.
#[derive(Parser, Debug)]
#[command(name = "quantumclaw", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Control the background daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Manage channel device pairing requests
    Pairing {
        #[command(subcommand)]
        action: PairingAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
    Show,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum DaemonAction {
    /// Start the daemon in the background
    Start,
    /// Stop a running daemon
    Stop,
    /// Report whether the daemon is running and its degradation level
    Status,
    /// Restart the daemon
    Restart,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum PairingAction {
    /// List pending pairing requests
    List,
    /// Approve a pairing request by code
    Approve { code: String },
    /// Deny a pairing request by code
    Deny { code: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    match cli.command {
        Some(command) => commands::handle_command(command, &workspace, cli.config.as_deref()).await,
        None => {
            println!("quantumclaw: a self-hosted AI agent runtime.");
            println!("Run `quantumclaw config init` to get started, or `quantumclaw --help`.");
            Ok(())
        }
    }
}

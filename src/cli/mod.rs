//! CLI module - command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod common;
pub mod config;
pub mod daemon;
pub mod run;

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "agentmesh")]
#[command(version)]
#[command(about = "Message scheduling and tool-calling engine for LLM agents", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.agentmesh/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario until it goes quiet or hits a step limit
    Run {
        /// Scenario file (agents, seed messages, scripted responses)
        #[arg(long)]
        scenario: PathBuf,
        /// Stop after this many dispatched messages
        #[arg(long)]
        max_steps: Option<u64>,
        /// Print outbound messages and the report as JSON lines
        #[arg(long)]
        json: bool,
        /// Also print runtime events
        #[arg(long)]
        events: bool,
    },
    /// Run the always-on scheduler until SIGINT/SIGTERM
    Daemon {
        /// Scenario file (agents, seed messages, scripted responses)
        #[arg(long)]
        scenario: PathBuf,
        /// Also print runtime events
        #[arg(long)]
        events: bool,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Check the config file for unknown fields and invalid values
    Check,
    /// Print the effective configuration (file + environment overrides)
    Show,
}

/// Entry point for the CLI - called from main().
pub async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(agentmesh::config::Config::path);
    // Fall back to defaults if the config file is unreadable; `config check`
    // reports the problem itself.
    let logging_cfg = agentmesh::config::Config::load_from_path(&config_path)
        .map(|c| c.logging)
        .unwrap_or_default();
    agentmesh::utils::logging::init_logging(&logging_cfg)?;

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Version) => {
            cmd_version();
        }
        Some(Commands::Run {
            scenario,
            max_steps,
            json,
            events,
        }) => {
            run::cmd_run(&config_path, &scenario, max_steps, json, events).await?;
        }
        Some(Commands::Daemon { scenario, events }) => {
            daemon::cmd_daemon(&config_path, &scenario, events).await?;
        }
        Some(Commands::Config { action }) => {
            config::cmd_config(&config_path, action)?;
        }
    }

    Ok(())
}

/// Display version information
fn cmd_version() {
    println!("agentmesh {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Message scheduling and tool-calling engine for LLM agents");
}

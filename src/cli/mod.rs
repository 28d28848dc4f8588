//! Command-line interface.

pub mod commands;
pub mod context;
pub mod display;
pub mod id_resolver;
pub mod progress;

use clap::{Parser, Subcommand};
use console::style;

use commands::{ask::AskArgs, init::InitArgs, mission::MissionArgs, settings::SettingsArgs};

/// Command line interface.
#[derive(Parser, Debug)]
#[command(name = "maestro")]
#[command(about = "Maestro - research mission orchestrator", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Owner whose settings and missions commands act on
    #[arg(long, global = true, env = "MAESTRO_OWNER", default_value = "local")]
    pub owner: String,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize Maestro configuration and database
    Init(InitArgs),

    /// Research mission commands
    Mission(MissionArgs),

    /// Ask a question, optionally about a mission's draft
    Ask(AskArgs),

    /// Per-owner mission settings
    Settings(SettingsArgs),
}

/// Print a command error and exit with status 1.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let chain: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let body = serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "causes": chain,
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("{} {err:#}", style("Error:").red().bold());
    }
    std::process::exit(1)
}

//! Maestro CLI entry point.

use clap::Parser;

use maestro::cli::{commands, handle_error, Cli, Commands};
use maestro::infrastructure::config::ConfigLoader;
use maestro::infrastructure::logging::{LogConfig, LoggerImpl};
use maestro::Config;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // A broken config still gets reported through logging; commands that need
    // it load it again and fail with context.
    let (config, config_error) = match ConfigLoader::load() {
        Ok(config) => (config, None),
        Err(err) => (Config::default(), Some(err)),
    };
    let _logger = match LoggerImpl::init(&LogConfig::from(&config.logging)) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("warning: {err:#}");
            None
        }
    };
    if let Some(err) = config_error {
        tracing::warn!(error = %format!("{err:#}"), "configuration could not be loaded");
    }

    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(args, cli.json).await,
        Commands::Mission(args) => commands::mission::execute(args, &cli.owner, cli.json).await,
        Commands::Ask(args) => commands::ask::execute(args, &cli.owner, cli.json).await,
        Commands::Settings(args) => commands::settings::execute(args, &cli.owner, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}

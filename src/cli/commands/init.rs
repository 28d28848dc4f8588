//! Implementation of the `maestro init` command.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tokio::fs;

use crate::adapters::sqlite::{database_url, initialize_database};
use crate::cli::display::{output, CommandOutput};
use crate::infrastructure::config::CONFIG_DIR;

/// Arguments for `maestro init`.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config.yaml
    #[arg(long, short)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

/// JSON output of `maestro init`.
#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub initialized_path: PathBuf,
    pub directories_created: Vec<String>,
    pub config_written: bool,
    pub database_initialized: bool,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        if !self.directories_created.is_empty() {
            lines.push("\nCreated directories:".to_string());
            for dir in &self.directories_created {
                lines.push(format!("  - {dir}"));
            }
        }
        if self.config_written {
            lines.push(format!(
                "\nWrote {CONFIG_DIR}/config.yaml. Add a model provider and tier bindings before running missions."
            ));
        }
        if self.database_initialized {
            lines.push(format!("\nDatabase initialized at {CONFIG_DIR}/maestro.db"));
        }
        lines.join("\n")
    }
}

const CONFIG_TEMPLATE: &str = r#"# Maestro project configuration.
# Every key can be overridden with MAESTRO_* environment variables,
# using "__" between nested keys (MAESTRO_LOGGING__LEVEL=debug).

database:
  path: .maestro/maestro.db

logging:
  level: warn
  format: pretty
  # log_dir: .maestro/logs

providers:
  openai:
    kind: openai
    api_key_env: OPENAI_API_KEY
  # anthropic:
  #   kind: anthropic
  #   api_key_env: ANTHROPIC_API_KEY

knowledge:
  # Subdirectories are document groups: `maestro mission run -g <group>`.
  library_dir: .maestro/library
  fetch_enabled: false

settings:
  iteration_preset: standard
  models:
    mid:
      provider: openai
      model: gpt-4o-mini
    intelligent:
      provider: openai
      model: gpt-4o
"#;

/// Create the config file and database.
pub async fn execute(args: InitArgs, json_mode: bool) -> Result<()> {
    let target_path = if args.path.is_absolute() {
        args.path.clone()
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(&args.path)
    };

    let maestro_dir = target_path.join(CONFIG_DIR);
    let mut directories_created = vec![];
    for dir in [
        maestro_dir.clone(),
        maestro_dir.join("library"),
        maestro_dir.join("logs"),
    ] {
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            let relative = dir.strip_prefix(&target_path).unwrap_or(&dir);
            directories_created.push(relative.to_string_lossy().to_string());
        }
    }

    let config_path = maestro_dir.join("config.yaml");
    let config_written = args.force || !config_path.exists();
    if config_written {
        fs::write(&config_path, CONFIG_TEMPLATE)
            .await
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
    }

    let db_path = maestro_dir.join("maestro.db");
    let pool = initialize_database(&database_url(&db_path.to_string_lossy()), None)
        .await
        .context("Failed to initialize database")?;
    pool.close().await;

    let message = if directories_created.is_empty() && !config_written {
        "Project already initialized; database schema is up to date.".to_string()
    } else {
        "Project initialized successfully.".to_string()
    };
    output(
        &InitOutput {
            success: true,
            message,
            initialized_path: target_path,
            directories_created,
            config_written,
            database_initialized: true,
        },
        json_mode,
    );
    Ok(())
}

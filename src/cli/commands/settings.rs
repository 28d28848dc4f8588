//! `maestro settings`: the per-owner settings tier.

use anyhow::{bail, Result};
use clap::{Args, Subcommand};

use crate::adapters::sqlite::SqliteSettingsStore;
use crate::cli::context::{load_config, open_database};
use crate::cli::display::{
    action_success, list_table, output, render_list, CommandOutput, DetailView,
};
use crate::domain::models::{EffectiveSettings, ModelTier, SettingsLayer};
use crate::domain::ports::SettingsStore;
use crate::services::settings_resolver::resolve;

/// Arguments for `maestro settings`.
#[derive(Args, Debug)]
pub struct SettingsArgs {
    #[command(subcommand)]
    pub command: SettingsCommands,
}

/// Settings subcommands.
#[derive(Subcommand, Debug)]
pub enum SettingsCommands {
    /// Store a setting for the current owner
    Set {
        /// Setting key, e.g. max_iterations or models.mid
        key: String,
        value: String,
    },
    /// List the current owner's stored settings
    List,
    /// Remove a stored setting
    Unset { key: String },
    /// Show the settings a new mission would get
    Show,
}

/// JSON output of `maestro settings list`.
#[derive(Debug, serde::Serialize)]
pub struct SettingsListOutput {
    pub owner: String,
    pub settings: Vec<SettingEntry>,
}

/// One stored key and its value.
#[derive(Debug, serde::Serialize)]
pub struct SettingEntry {
    pub key: String,
    pub value: String,
}

impl CommandOutput for SettingsListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["key", "value"]);
        for entry in &self.settings {
            table.add_row(vec![entry.key.as_str(), entry.value.as_str()]);
        }
        render_list("setting", &table, self.settings.len())
    }
}

/// JSON output of `settings set` and `settings unset`.
#[derive(Debug, serde::Serialize)]
pub struct SettingsActionOutput {
    pub key: String,
    pub value: Option<String>,
    pub message: String,
}

impl CommandOutput for SettingsActionOutput {
    fn to_human(&self) -> String {
        action_success(&self.message)
    }
}

/// JSON output of `maestro settings show`.
#[derive(Debug, serde::Serialize)]
pub struct EffectiveSettingsOutput {
    pub owner: String,
    pub settings: EffectiveSettings,
}

impl CommandOutput for EffectiveSettingsOutput {
    fn to_human(&self) -> String {
        let s = &self.settings;
        let limits = &s.concurrency;
        let mut view = DetailView::new(&format!("Effective settings for {}", self.owner))
            .field("Preset", s.iteration_preset.as_str())
            .field("Max iterations", s.max_iterations().to_string())
            .field("Queries/round", s.iteration.queries_per_round.to_string())
            .field("Notes/section", s.iteration.notes_per_section.to_string())
            .field("Research rounds", s.iteration.max_research_rounds.to_string())
            .field("Verification", if s.verification_enabled { "on" } else { "off" })
            .section("Limits")
            .field("Workers", limits.worker_pool_limit.to_string())
            .field("Model calls", limits.global_model_call_limit.to_string())
            .field("Per mission", limits.per_mission_model_call_limit.to_string())
            .field("Searches", limits.search_call_limit.to_string())
            .field("Call timeout", format!("{}ms", s.call_timeout_ms))
            .field("Retries", s.max_agent_retries.to_string())
            .section("Models");
        for tier in ModelTier::ALL {
            let binding = s
                .models
                .get(tier)
                .map_or_else(|| "unbound".to_string(), |b| format!("{} via {}", b.model, b.provider));
            view = view.field(tier.as_str(), binding);
        }
        view.render()
    }
}

/// Dispatch a settings subcommand.
pub async fn execute(args: SettingsArgs, owner: &str, json_mode: bool) -> Result<()> {
    let config = load_config()?;
    let store = SqliteSettingsStore::new(open_database(&config).await?);

    match args.command {
        SettingsCommands::Set { key, value } => {
            store.set(owner, &key, &value).await?;
            let message = format!("Set {key} = {value} for {owner}");
            output(
                &SettingsActionOutput {
                    key,
                    value: Some(value),
                    message,
                },
                json_mode,
            );
        }
        SettingsCommands::List => {
            let settings = store
                .list(owner)
                .await?
                .into_iter()
                .map(|(key, value)| SettingEntry { key, value })
                .collect();
            output(
                &SettingsListOutput {
                    owner: owner.to_string(),
                    settings,
                },
                json_mode,
            );
        }
        SettingsCommands::Unset { key } => {
            if !store.unset(owner, &key).await? {
                bail!("No setting '{key}' stored for {owner}");
            }
            let message = format!("Removed {key} for {owner}");
            output(
                &SettingsActionOutput {
                    key,
                    value: None,
                    message,
                },
                json_mode,
            );
        }
        SettingsCommands::Show => {
            let user = SettingsLayer::from_key_values(&store.get_all(owner).await?)?;
            let settings = resolve(
                &SettingsLayer::default(),
                &user,
                &config.settings,
                &SettingsLayer::system_defaults(),
            )?;
            output(
                &EffectiveSettingsOutput {
                    owner: owner.to_string(),
                    settings,
                },
                json_mode,
            );
        }
    }
    Ok(())
}

//! Application configuration: database, providers, knowledge sources and settings defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::settings::SettingsLayer;

/// Main configuration structure for Maestro
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Model providers keyed by the name bindings refer to
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Knowledge sources available to missions
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Environment tier of mission settings
    #[serde(default)]
    pub settings: SettingsLayer,
}

/// Knowledge source configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct KnowledgeConfig {
    /// Directory of `.md`/`.txt` documents; subdirectories are document groups
    #[serde(default)]
    pub library_dir: Option<String>,

    /// Fetch the full page behind top web hits over HTTP
    #[serde(default)]
    pub fetch_enabled: bool,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".maestro/maestro.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Wire protocol spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// `/chat/completions`: OpenAI, OpenRouter, vLLM, Ollama and friends
    Openai,
    /// Anthropic Messages API
    Anthropic,
    /// Scripted in-process provider
    Mock,
}

/// One model provider endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProviderConfig {
    pub kind: ProviderKind,

    /// API base URL; the provider's public endpoint when unset
    #[serde(default)]
    pub base_url: Option<String>,

    /// API key; prefer `api_key_env` outside local files
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,

    /// Client-side request rate cap
    #[serde(default)]
    pub requests_per_second: Option<u32>,
}

const fn default_provider_timeout_secs() -> u64 {
    120
}

impl ProviderConfig {
    /// Config for `kind` with default timeout and no key.
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            base_url: None,
            api_key: None,
            api_key_env: None,
            timeout_secs: default_provider_timeout_secs(),
            requests_per_second: None,
        }
    }

    /// API key from config, falling back to the named environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_ref()
                .and_then(|var| std::env::var(var).ok())
        })
    }
}

//! Layered config loading: defaults, YAML file, then `MAESTRO_` environment variables.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::{Config, ModelTier, ProviderKind};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid rate limit for provider '{0}'. Must be positive")]
    InvalidRateLimit(String),

    #[error("Invalid timeout for provider '{0}'. Must be positive")]
    InvalidTimeout(String),

    #[error("Model binding for the {tier} tier refers to unknown provider '{provider}'")]
    UnknownProvider { tier: ModelTier, provider: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Directory holding project configuration and state.
pub const CONFIG_DIR: &str = ".maestro";

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .maestro/config.yaml (project config, created by init)
    /// 3. .maestro/local.yaml (project local overrides, optional)
    /// 4. Environment variables (MAESTRO_* prefix, `__` separates nested keys)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(CONFIG_DIR)
    }

    /// Same as [`ConfigLoader::load`] with an explicit config directory.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Config> {
        let dir = dir.as_ref();
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed("MAESTRO_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        for (name, provider) in &config.providers {
            if name.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "provider name cannot be empty".to_string(),
                ));
            }
            if provider.requests_per_second == Some(0) {
                return Err(ConfigError::InvalidRateLimit(name.clone()));
            }
            if provider.timeout_secs == 0 {
                return Err(ConfigError::InvalidTimeout(name.clone()));
            }
            if provider.kind != ProviderKind::Mock
                && provider
                    .base_url
                    .as_ref()
                    .is_some_and(|url| !url.starts_with("http://") && !url.starts_with("https://"))
            {
                return Err(ConfigError::ValidationFailed(format!(
                    "provider '{name}' base_url must be an http(s) URL"
                )));
            }
        }

        // Bindings in the env tier must name a declared provider. User and
        // mission tiers are checked when a mission is created.
        if !config.providers.is_empty() {
            for tier in ModelTier::ALL {
                if let Some(binding) = config.settings.models.get(tier) {
                    if !config.providers.contains_key(&binding.provider) {
                        return Err(ConfigError::UnknownProvider {
                            tier,
                            provider: binding.provider.clone(),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{IterationPreset, ModelBinding, ProviderConfig};
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database.path, ".maestro/maestro.db");
        assert_eq!(config.logging.level, "info");
        assert!(config.providers.is_empty());
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
database:
  path: /custom/path.db
  max_connections: 5
logging:
  level: debug
  format: json
providers:
  default:
    kind: openai
    base_url: http://localhost:11434/v1
    requests_per_second: 5
settings:
  per_mission_model_call_limit: 2
  iteration_preset: deep
  models:
    mid:
      model: llama3.1
";
        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.logging.format, "json");
        let provider = &config.providers["default"];
        assert_eq!(provider.kind, ProviderKind::Openai);
        assert_eq!(provider.timeout_secs, 120);
        assert_eq!(config.settings.per_mission_model_call_limit, Some(2));
        assert_eq!(config.settings.iteration_preset, Some(IterationPreset::Deep));
        assert_eq!(config.settings.models.mid.as_ref().unwrap().provider, "default");
        ConfigLoader::validate(&config).unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "logging:\n  level: warn").unwrap();

        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.database.path, ".maestro/maestro.db");
    }

    #[test]
    fn test_env_overrides_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.yaml"),
            "settings:\n  search_call_limit: 3\n  worker_pool_limit: 8\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("local.yaml"), "settings:\n  worker_pool_limit: 9\n")
            .unwrap();

        temp_env::with_vars(
            [
                ("MAESTRO_SETTINGS__SEARCH_CALL_LIMIT", Some("5")),
                ("MAESTRO_LOGGING__LEVEL", Some("debug")),
            ],
            || {
                let config = ConfigLoader::load_from_dir(dir.path()).unwrap();
                assert_eq!(config.settings.search_call_limit, Some(5));
                assert_eq!(config.settings.worker_pool_limit, Some(9));
                assert_eq!(config.logging.level, "debug");
            },
        );
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.database.path = String::new();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyDatabasePath)
        ));

        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));

        let mut config = Config::default();
        let mut provider = ProviderConfig::new(ProviderKind::Openai);
        provider.requests_per_second = Some(0);
        config.providers.insert("default".to_string(), provider);
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidRateLimit(_))
        ));
    }

    #[test]
    fn test_binding_must_name_declared_provider() {
        let mut config = Config::default();
        config
            .providers
            .insert("local".to_string(), ProviderConfig::new(ProviderKind::Openai));
        config.settings.models.mid = Some(ModelBinding::new("llama3").with_provider("remote"));

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::UnknownProvider { tier: ModelTier::Mid, .. })
        ));
    }
}

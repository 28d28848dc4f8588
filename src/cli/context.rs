//! Wiring from loaded configuration to a ready [`MissionControl`].

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info};

use crate::adapters::knowledge::{HttpFetcher, HttpFetcherConfig, InMemoryKnowledgeSource};
use crate::adapters::providers::ProviderRegistry;
use crate::adapters::sqlite::connection::{database_url, PoolConfig};
use crate::adapters::sqlite::{initialize_database, SqliteMissionRepository, SqliteSettingsStore};
use crate::domain::models::{Config, SettingsLayer};
use crate::domain::ports::MissionRepository;
use crate::infrastructure::config::ConfigLoader;
use crate::services::agent_executor::AgentExecutor;
use crate::services::agents::AgentPool;
use crate::services::concurrency::ConcurrencyController;
use crate::services::knowledge_facade::KnowledgeFacade;
use crate::services::mission_control::MissionControl;

/// Open and migrate the configured database.
pub async fn open_database(config: &Config) -> Result<SqlitePool> {
    let url = database_url(&config.database.path);
    initialize_database(
        &url,
        Some(PoolConfig::with_max_connections(config.database.max_connections)),
    )
    .await
    .context("Failed to initialize database. Run 'maestro init' first.")
}

/// Load configuration from file and environment.
pub fn load_config() -> Result<Config> {
    ConfigLoader::load().context("Failed to load configuration")
}

/// Everything a mission command needs.
pub struct AppContext {
    pub config: Config,
    pub pool: SqlitePool,
    pub control: MissionControl,
}

impl AppContext {
    /// Load config, open the database and run migrations.
    pub async fn build() -> Result<Self> {
        let config = load_config()?;
        let pool = open_database(&config).await?;
        let control = build_control(&config, pool.clone()).await?;
        Ok(Self {
            config,
            pool,
            control,
        })
    }
}

/// Knowledge sources enabled in `config`.
pub async fn build_knowledge(config: &Config) -> Result<KnowledgeFacade> {
    let mut knowledge = KnowledgeFacade::new();

    if let Some(dir) = &config.knowledge.library_dir {
        let library = InMemoryKnowledgeSource::load_dir(dir)
            .await
            .with_context(|| format!("Failed to load document library from {dir}"))?;
        info!(library_dir = %dir, documents = library.len(), "document library loaded");
        knowledge = knowledge.with_library(Arc::new(library));
    }

    if config.knowledge.fetch_enabled {
        let fetcher = HttpFetcher::new(HttpFetcherConfig::default())
            .context("Failed to build HTTP fetcher")?;
        knowledge = knowledge.with_fetcher(Arc::new(fetcher));
    }

    Ok(knowledge)
}

/// Mission Control wired to the configured providers and the database.
pub async fn build_control(config: &Config, pool: SqlitePool) -> Result<MissionControl> {
    let providers = ProviderRegistry::from_config(&config.providers)
        .context("Failed to build model providers")?;
    if providers.is_empty() {
        bail!("No model providers configured. Add one under 'providers' in .maestro/config.yaml");
    }
    debug!(providers = ?providers.keys(), "model providers ready");

    let knowledge = build_knowledge(config).await?;
    let repository: Arc<dyn MissionRepository> = Arc::new(SqliteMissionRepository::new(pool.clone()));
    let executor = AgentExecutor::new(
        Arc::new(AgentPool::standard()),
        Arc::new(providers),
        Arc::new(knowledge),
        repository.clone(),
    );

    let defaults = SettingsLayer::system_defaults();
    let limits = MissionControl::process_limits(&config.settings, &defaults);
    let controller = ConcurrencyController::new(&limits);

    Ok(MissionControl::new(executor, repository, controller)
        .with_settings_store(Arc::new(SqliteSettingsStore::new(pool)))
        .with_env_settings(config.settings.clone())
        .with_defaults(defaults))
}

//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use maestro::adapters::knowledge::InMemoryKnowledgeSource;
use maestro::adapters::memory::{InMemoryMissionRepository, InMemorySettingsStore};
use maestro::adapters::providers::{MockModelProvider, ProviderRegistry};
use maestro::domain::models::{IterationPreset, MissionPhase, ModelBinding, SettingsLayer};
use maestro::domain::ports::MissionRepository;
use maestro::services::{AgentExecutor, AgentPool, ConcurrencyController, KnowledgeFacade};
use maestro::MissionControl;
use uuid::Uuid;

pub const OWNER: &str = "alice";
pub const GOAL: &str = "What are the findings?";

/// Defaults tier for tests: one mock binding, custom iteration targets small
/// enough that a mission needs one research round per iteration.
pub fn test_defaults() -> SettingsLayer {
    let mut layer = SettingsLayer::system_defaults();
    layer.models.mid = Some(ModelBinding::new("mock-model"));
    layer.iteration_preset = Some(IterationPreset::Custom);
    layer.max_iterations = Some(2);
    layer.queries_per_round = Some(2);
    layer.notes_per_section = Some(1);
    layer.max_research_rounds = Some(1);
    layer.verification_enabled = Some(false);
    layer.max_agent_retries = Some(0);
    layer.retry_backoff_ms = Some(1);
    layer.gate_wait_timeout_ms = Some(10_000);
    layer
}

pub fn library() -> Arc<InMemoryKnowledgeSource> {
    let library = InMemoryKnowledgeSource::new();
    library.add_document("docs", "doc-1", "Overview", "An overview of the findings.");
    library.add_document("docs", "doc-2", "History", "The history behind the findings.");
    Arc::new(library)
}

pub struct TestStack {
    pub control: MissionControl,
    pub provider: Arc<MockModelProvider>,
    pub repository: Arc<dyn MissionRepository>,
    pub controller: ConcurrencyController,
    pub settings: Arc<InMemorySettingsStore>,
}

pub fn stack(defaults: SettingsLayer) -> TestStack {
    stack_with_repository(defaults, Arc::new(InMemoryMissionRepository::new()))
}

pub fn stack_with_repository(
    defaults: SettingsLayer,
    repository: Arc<dyn MissionRepository>,
) -> TestStack {
    let provider = Arc::new(MockModelProvider::with_canned_responses());
    let executor = AgentExecutor::new(
        Arc::new(AgentPool::standard()),
        Arc::new(ProviderRegistry::new().with_provider("default", provider.clone())),
        Arc::new(KnowledgeFacade::new().with_library(library())),
        repository.clone(),
    );
    let limits = MissionControl::process_limits(&SettingsLayer::default(), &defaults);
    let controller = ConcurrencyController::new(&limits);
    let settings = Arc::new(InMemorySettingsStore::new());
    let control = MissionControl::new(executor, repository.clone(), controller.clone())
        .with_settings_store(settings.clone())
        .with_defaults(defaults);
    TestStack {
        control,
        provider,
        repository,
        controller,
        settings,
    }
}

pub fn docs_scope() -> maestro::MissionScope {
    maestro::MissionScope::documents(vec!["docs".to_string()])
}

/// Poll the stored mission until it reaches `phase` or `timeout` passes.
pub async fn wait_for_phase(
    repository: &Arc<dyn MissionRepository>,
    id: Uuid,
    phase: MissionPhase,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if let Ok(Some(mission)) = repository.get(id).await {
            if mission.phase == phase {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

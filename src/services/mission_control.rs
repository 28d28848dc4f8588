//! Mission Control: the public API of the engine.
//!
//! Creates missions with resolved settings, runs each on its own task with its
//! own cancellation token and per-mission gates, and answers status, report,
//! and direct-question requests.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult, InvocationError};
use crate::domain::models::{
    AgentInput, AgentOutput, AgentResult, ConcurrencyLimits, DraftVersion, EffectiveSettings,
    Mission, MissionFailure, MissionPhase, MissionScope, RouterAction, SectionProvenance,
    SettingsLayer, UnsupportedClaim,
};
use crate::domain::ports::{EmptySettingsStore, MissionFilter, MissionRepository, SettingsStore};
use crate::services::agent_executor::{AgentExecutor, MissionRun};
use crate::services::concurrency::ConcurrencyController;
use crate::services::coverage::CoveragePolicy;
use crate::services::mission_engine::{MissionEngine, MissionEvent};
use crate::services::settings_resolver::{resolve, resolve_concurrency};

/// Snapshot returned by [`MissionControl::get_status`].
#[derive(Debug, Clone, Serialize)]
pub struct MissionStatus {
    pub mission_id: Uuid,
    pub owner: String,
    pub goal: String,
    pub phase: MissionPhase,
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub note_count: usize,
    pub latest_draft: Option<DraftVersion>,
    pub last_error: Option<MissionFailure>,
    pub forced_finalization: bool,
    /// Whether this process is currently driving the mission.
    pub running: bool,
}

/// Final (or latest) draft with its evidence trail.
#[derive(Debug, Clone, Serialize)]
pub struct MissionReport {
    pub mission_id: Uuid,
    pub phase: MissionPhase,
    pub draft_version: Option<u32>,
    pub markdown: Option<String>,
    pub provenance: Vec<SectionProvenance>,
    pub unverified_claims: Vec<UnsupportedClaim>,
    pub forced_finalization: bool,
    pub last_error: Option<MissionFailure>,
}

/// What an instruction turned into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InstructionOutcome {
    MissionStarted {
        mission_id: Uuid,
        parent_id: Option<Uuid>,
    },
    Answered {
        answer: String,
    },
}

struct RunningMission {
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

type RunningMap = Arc<Mutex<HashMap<Uuid, RunningMission>>>;

/// Creates, runs, cancels and reports on missions.
pub struct MissionControl {
    repository: Arc<dyn MissionRepository>,
    settings_store: Arc<dyn SettingsStore>,
    env: SettingsLayer,
    defaults: SettingsLayer,
    controller: ConcurrencyController,
    executor: AgentExecutor,
    engine: Arc<MissionEngine>,
    running: RunningMap,
    shutdown: CancellationToken,
}

impl MissionControl {
    /// `controller` holds the process-wide gates shared by every mission.
    pub fn new(
        executor: AgentExecutor,
        repository: Arc<dyn MissionRepository>,
        controller: ConcurrencyController,
    ) -> Self {
        let engine = Arc::new(MissionEngine::new(executor.clone(), repository.clone()));
        Self {
            repository,
            settings_store: Arc::new(EmptySettingsStore),
            env: SettingsLayer::default(),
            defaults: SettingsLayer::system_defaults(),
            controller,
            executor,
            engine,
            running: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Process gate sizes implied by the environment and default tiers alone.
    ///
    /// Model bindings are not required here; they are checked per mission.
    pub fn process_limits(env: &SettingsLayer, defaults: &SettingsLayer) -> ConcurrencyLimits {
        let builtin = SettingsLayer::system_defaults();
        resolve_concurrency(&[env, defaults, &builtin])
    }

    /// Read user-tier settings from `store`.
    pub fn with_settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = store;
        self
    }

    /// Environment-tier settings.
    pub fn with_env_settings(mut self, env: SettingsLayer) -> Self {
        self.env = env;
        self
    }

    /// Defaults tier, below env and user settings.
    pub fn with_defaults(mut self, defaults: SettingsLayer) -> Self {
        self.defaults = defaults;
        self
    }

    /// Replace the research coverage policy.
    pub fn with_coverage(mut self, coverage: Arc<dyn CoveragePolicy>) -> Self {
        self.engine = Arc::new(
            MissionEngine::new(self.executor.clone(), self.repository.clone()).with_coverage(coverage),
        );
        self
    }

    /// Process-wide admission gates.
    pub fn controller(&self) -> &ConcurrencyController {
        &self.controller
    }

    /// Lifecycle events for every mission.
    pub fn subscribe(&self) -> broadcast::Receiver<MissionEvent> {
        self.engine.subscribe()
    }

    /// Settings `owner` would get with `overrides` as the mission tier.
    pub async fn resolve_settings(
        &self,
        owner: &str,
        overrides: &SettingsLayer,
    ) -> DomainResult<EffectiveSettings> {
        let stored = self.settings_store.get_all(owner).await?;
        let user = SettingsLayer::from_key_values(&stored)?;
        resolve(overrides, &user, &self.env, &self.defaults)
    }

    /// Create a mission and start running it. Returns once the mission is
    /// persisted.
    pub async fn create_mission(
        &self,
        owner: &str,
        goal: &str,
        scope: MissionScope,
        overrides: SettingsLayer,
    ) -> DomainResult<Uuid> {
        self.start(owner, goal, scope, &overrides, None).await
    }

    async fn start(
        &self,
        owner: &str,
        goal: &str,
        scope: MissionScope,
        overrides: &SettingsLayer,
        parent_id: Option<Uuid>,
    ) -> DomainResult<Uuid> {
        if owner.trim().is_empty() {
            return Err(DomainError::ValidationFailed("owner must not be empty".to_string()));
        }
        if goal.trim().is_empty() {
            return Err(DomainError::ValidationFailed("goal must not be empty".to_string()));
        }

        let settings = self.resolve_settings(owner, overrides).await?;
        let mut mission = Mission::new(owner, goal.trim(), scope, settings);
        if let Some(parent_id) = parent_id {
            mission = mission.with_parent(parent_id);
        }
        self.repository.create(&mission).await?;
        info!(
            mission_id = %mission.id,
            owner = %mission.owner,
            preset = mission.settings.iteration_preset.as_str(),
            max_iterations = mission.max_iterations(),
            "mission created"
        );

        let id = mission.id;
        self.launch(mission);
        Ok(id)
    }

    fn launch(&self, mission: Mission) {
        let cancel = self.shutdown.child_token();
        let (done_tx, done_rx) = watch::channel(false);
        lock(&self.running).insert(
            mission.id,
            RunningMission {
                cancel: cancel.clone(),
                done: done_rx,
            },
        );

        let gates = self.controller.for_mission(&mission.settings.concurrency);
        let run = MissionRun::for_mission(&mission, gates, cancel);
        let engine = Arc::clone(&self.engine);
        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            let id = mission.id;
            if let Err(err) = engine.run(mission, run).await {
                error!(mission_id = %id, error = %err, "mission run aborted");
            }
            lock(&running).remove(&id);
            let _ = done_tx.send(true);
        });
    }

    async fn load(&self, id: Uuid) -> DomainResult<Mission> {
        self.repository
            .get(id)
            .await?
            .ok_or(DomainError::MissionNotFound(id))
    }

    /// Whether `id` is currently executing in this process.
    pub fn is_running(&self, id: Uuid) -> bool {
        lock(&self.running).contains_key(&id)
    }

    /// Phase, progress and latest draft of a mission.
    pub async fn get_status(&self, id: Uuid) -> DomainResult<MissionStatus> {
        let mission = self.load(id).await?;
        Ok(MissionStatus {
            mission_id: mission.id,
            owner: mission.owner.clone(),
            goal: mission.goal.clone(),
            phase: mission.phase,
            iteration_count: mission.iteration_count,
            max_iterations: mission.max_iterations(),
            note_count: mission.notes().len(),
            latest_draft: mission.latest_draft().cloned(),
            last_error: mission.last_error.clone(),
            forced_finalization: mission.forced_finalization,
            running: self.is_running(id),
        })
    }

    /// Wait until this process stops driving the mission, then return it.
    pub async fn wait(&self, id: Uuid) -> DomainResult<Mission> {
        let done = lock(&self.running).get(&id).map(|r| r.done.clone());
        if let Some(mut done) = done {
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.load(id).await
    }

    /// Cancel a mission and return the phase it ended in.
    ///
    /// A running mission is signalled and awaited. A stored, non-terminal
    /// mission not running here is marked Cancelled directly, which also stops
    /// another process driving it at its next step. Terminal missions are left
    /// alone.
    pub async fn cancel(&self, id: Uuid) -> DomainResult<MissionPhase> {
        let token = lock(&self.running).get(&id).map(|r| r.cancel.clone());
        if let Some(token) = token {
            info!(mission_id = %id, "cancelling running mission");
            token.cancel();
            return Ok(self.wait(id).await?.phase);
        }

        let mut mission = self.load(id).await?;
        if mission.phase.is_terminal() {
            return Ok(mission.phase);
        }
        mission.transition_to(MissionPhase::Cancelled)?;
        self.repository.update_state(&mission).await?;
        info!(mission_id = %id, "mission cancelled");
        Ok(mission.phase)
    }

    /// Continue a stored, non-terminal mission from its persisted phase.
    pub async fn resume(&self, id: Uuid) -> DomainResult<()> {
        if self.is_running(id) {
            return Err(DomainError::ValidationFailed(format!("mission {id} is already running")));
        }
        let mission = self.load(id).await?;
        if mission.phase.is_terminal() {
            return Err(DomainError::ValidationFailed(format!(
                "mission {id} already ended in {}",
                mission.phase
            )));
        }
        info!(mission_id = %id, phase = %mission.phase, "resuming mission");
        self.launch(mission);
        Ok(())
    }

    /// Final report with provenance for a mission.
    pub async fn report(&self, id: Uuid) -> DomainResult<MissionReport> {
        let mission = self.load(id).await?;
        let latest = mission.latest_draft();
        Ok(MissionReport {
            mission_id: mission.id,
            phase: mission.phase,
            draft_version: latest.map(|d| d.version),
            markdown: latest.map(|d| d.content.to_markdown()),
            provenance: mission.provenance(),
            unverified_claims: mission.unverified_claims.clone(),
            forced_finalization: mission.forced_finalization,
            last_error: mission.last_error.clone(),
        })
    }

    /// Missions matching `filter`, newest first.
    pub async fn list(&self, filter: MissionFilter) -> DomainResult<Vec<Mission>> {
        self.repository.list(filter).await
    }

    fn detached_run(&self, settings: EffectiveSettings) -> MissionRun {
        let gates = self.controller.for_mission(&settings.concurrency);
        MissionRun::detached(settings, gates, self.shutdown.child_token())
    }

    /// Answer a question directly. With a mission, its latest draft is the
    /// context and its settings are used.
    pub async fn ask(&self, owner: &str, question: &str, mission_id: Option<Uuid>) -> DomainResult<String> {
        let (settings, context) = match mission_id {
            Some(id) => {
                let mission = self.load(id).await?;
                let context = mission.latest_draft().map(|d| d.content.to_markdown());
                (mission.settings, context)
            }
            None => (self.resolve_settings(owner, &SettingsLayer::default()).await?, None),
        };

        let run = self.detached_run(settings);
        let input = AgentInput::Message {
            question: question.to_string(),
            context,
        };
        match self.executor.invoke(&run, input).await?.result {
            AgentResult::Terminal(AgentOutput::Answer(answer))
            | AgentResult::Continue(AgentOutput::Answer(answer)) => Ok(answer),
            other => Err(InvocationError::fatal(format!("messenger returned {other:?}")).into()),
        }
    }

    /// Route a free-form instruction: start research, revise an existing
    /// mission through a follow-up mission, or answer it directly.
    pub async fn instruct(
        &self,
        owner: &str,
        instruction: &str,
        mission_id: Option<Uuid>,
    ) -> DomainResult<InstructionOutcome> {
        let parent = match mission_id {
            Some(id) => Some(self.load(id).await?),
            None => None,
        };
        let settings = match &parent {
            Some(mission) => mission.settings.clone(),
            None => self.resolve_settings(owner, &SettingsLayer::default()).await?,
        };

        let run = self.detached_run(settings);
        let input = AgentInput::Route {
            instruction: instruction.to_string(),
            phase: parent.as_ref().map(|m| m.phase),
        };
        let action = match self.executor.invoke(&run, input).await?.result {
            AgentResult::Terminal(AgentOutput::Route(action))
            | AgentResult::Continue(AgentOutput::Route(action)) => action,
            other => return Err(InvocationError::fatal(format!("router returned {other:?}")).into()),
        };
        info!(action = ?action, mission_id = ?mission_id, "instruction routed");

        match (action, parent) {
            (RouterAction::Answer, parent) => {
                let answer = self.ask(owner, instruction, parent.map(|m| m.id)).await?;
                Ok(InstructionOutcome::Answered { answer })
            }
            (RouterAction::ReviseDraft, Some(parent)) => {
                let goal = format!("{}\n\nRevision request: {instruction}", parent.goal);
                let id = self
                    .start(owner, &goal, parent.scope.clone(), &SettingsLayer::default(), Some(parent.id))
                    .await?;
                Ok(InstructionOutcome::MissionStarted {
                    mission_id: id,
                    parent_id: Some(parent.id),
                })
            }
            (RouterAction::StartResearch | RouterAction::ReviseDraft, parent) => {
                let scope = parent.map(|m| m.scope).unwrap_or_default();
                let id = self
                    .start(owner, instruction, scope, &SettingsLayer::default(), None)
                    .await?;
                Ok(InstructionOutcome::MissionStarted {
                    mission_id: id,
                    parent_id: None,
                })
            }
        }
    }

    /// Cancel every running mission and wait for them to stop.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let pending: Vec<(Uuid, watch::Receiver<bool>)> = lock(&self.running)
            .iter()
            .map(|(id, r)| (*id, r.done.clone()))
            .collect();
        if !pending.is_empty() {
            warn!(missions = pending.len(), "stopping running missions");
        }
        for (_, mut done) in pending {
            let _ = done.wait_for(|finished| *finished).await;
        }
    }
}

fn lock(running: &Mutex<HashMap<Uuid, RunningMission>>) -> MutexGuard<'_, HashMap<Uuid, RunningMission>> {
    running.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::knowledge::InMemoryKnowledgeSource;
    use crate::adapters::memory::{InMemoryMissionRepository, InMemorySettingsStore};
    use crate::adapters::providers::{MockModelProvider, MockReply, ProviderRegistry};
    use crate::domain::models::{AgentRole, ModelBinding};
    use crate::services::agents::AgentPool;
    use crate::services::knowledge_facade::KnowledgeFacade;
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        control: MissionControl,
        provider: Arc<MockModelProvider>,
        settings: Arc<InMemorySettingsStore>,
    }

    fn harness() -> Harness {
        let provider = Arc::new(MockModelProvider::with_canned_responses());
        let repository = Arc::new(InMemoryMissionRepository::new());
        let settings = Arc::new(InMemorySettingsStore::new());
        let library = Arc::new(InMemoryKnowledgeSource::new());
        library.add_document("docs", "doc-1", "Overview", "An overview of the findings.");

        let mut defaults = SettingsLayer::system_defaults();
        defaults.models.mid = Some(ModelBinding::new("mock-model"));
        defaults.retry_backoff_ms = Some(1);

        let executor = AgentExecutor::new(
            Arc::new(AgentPool::standard()),
            Arc::new(ProviderRegistry::new().with_provider("default", provider.clone())),
            Arc::new(KnowledgeFacade::new().with_library(library)),
            repository.clone(),
        );
        let limits = MissionControl::process_limits(&SettingsLayer::default(), &defaults);
        let control = MissionControl::new(executor, repository, ConcurrencyController::new(&limits))
            .with_settings_store(settings.clone())
            .with_defaults(defaults);
        Harness {
            control,
            provider,
            settings,
        }
    }

    fn docs() -> MissionScope {
        MissionScope::documents(vec!["docs".to_string()])
    }

    #[tokio::test]
    async fn test_create_run_and_report() {
        let h = harness();
        let id = h
            .control
            .create_mission("alice", "What are the findings?", docs(), SettingsLayer::default())
            .await
            .unwrap();

        let mission = h.control.wait(id).await.unwrap();
        assert_eq!(mission.phase, MissionPhase::Finalized);
        assert!(!h.control.is_running(id));

        let status = h.control.get_status(id).await.unwrap();
        assert_eq!(status.iteration_count, 1);
        assert_eq!(status.latest_draft.unwrap().version, 1);

        let report = h.control.report(id).await.unwrap();
        assert!(report.markdown.unwrap().starts_with("# Research report"));
        assert_eq!(report.provenance[0].notes.len(), 1);
        assert!(report.unverified_claims.is_empty());
    }

    #[tokio::test]
    async fn test_user_settings_and_overrides_apply() {
        let h = harness();
        h.settings.set("alice", "iteration_preset", "deep").await;
        h.settings.set("alice", "verification_enabled", "false").await;

        let overrides = SettingsLayer {
            verification_enabled: Some(true),
            ..Default::default()
        };
        let settings = h.control.resolve_settings("alice", &overrides).await.unwrap();
        assert_eq!(settings.iteration.max_iterations, 4);
        assert!(settings.verification_enabled);

        let bob = h.control.resolve_settings("bob", &SettingsLayer::default()).await.unwrap();
        assert_eq!(bob.iteration.max_iterations, 2);
    }

    #[tokio::test]
    async fn test_create_rejects_empty_goal() {
        let h = harness();
        let err = h
            .control
            .create_mission("alice", "  ", docs(), SettingsLayer::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn test_cancel_running_mission_releases_gates() {
        let h = harness();
        h.provider.set_delay(AgentRole::Planning, Duration::from_secs(30));
        let id = h
            .control
            .create_mission("alice", "slow", docs(), SettingsLayer::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.control.cancel(id).await.unwrap(), MissionPhase::Cancelled);
        assert_eq!(h.control.controller().global_model_gate().in_use(), 0);
        // Cancelling again is a no-op.
        assert_eq!(h.control.cancel(id).await.unwrap(), MissionPhase::Cancelled);
        assert!(h.control.resume(id).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_mission() {
        let h = harness();
        let id = Uuid::new_v4();
        assert!(matches!(
            h.control.get_status(id).await,
            Err(DomainError::MissionNotFound(missing)) if missing == id
        ));
        assert!(h.control.cancel(id).await.is_err());
    }

    #[tokio::test]
    async fn test_ask_uses_mission_draft_as_context() {
        let h = harness();
        let id = h
            .control
            .create_mission("alice", "What are the findings?", docs(), SettingsLayer::default())
            .await
            .unwrap();
        h.control.wait(id).await.unwrap();
        h.provider.push(AgentRole::Messenger, MockReply::text("They are summarized."));

        let answer = h.control.ask("alice", "Summarize?", Some(id)).await.unwrap();
        assert_eq!(answer, "They are summarized.");
        let call = h.provider.calls_for(AgentRole::Messenger).pop().unwrap();
        assert!(call.prompt.contains("Summary of findings."));
    }

    #[tokio::test]
    async fn test_instruct_revise_starts_follow_up() {
        let h = harness();
        let parent = h
            .control
            .create_mission("alice", "What are the findings?", docs(), SettingsLayer::default())
            .await
            .unwrap();
        h.control.wait(parent).await.unwrap();
        h.provider
            .push_json(AgentRole::Router, json!({"action": "revise_draft"}));

        let outcome = h
            .control
            .instruct("alice", "Make it shorter", Some(parent))
            .await
            .unwrap();
        let InstructionOutcome::MissionStarted { mission_id, parent_id } = outcome else {
            panic!("expected a follow-up mission");
        };
        assert_eq!(parent_id, Some(parent));

        let child = h.control.wait(mission_id).await.unwrap();
        assert_eq!(child.parent_id, Some(parent));
        assert!(child.goal.contains("Make it shorter"));
    }

    #[tokio::test]
    async fn test_mid_bound_only_at_user_tier() {
        let defaults = SettingsLayer::system_defaults();
        let limits = MissionControl::process_limits(&SettingsLayer::default(), &defaults);
        assert_eq!(limits.global_model_call_limit, 100);

        let provider = Arc::new(MockModelProvider::with_canned_responses());
        let repository = Arc::new(InMemoryMissionRepository::new());
        let settings = Arc::new(InMemorySettingsStore::new());
        let library = Arc::new(InMemoryKnowledgeSource::new());
        library.add_document("docs", "doc-1", "Overview", "An overview of the findings.");
        let executor = AgentExecutor::new(
            Arc::new(AgentPool::standard()),
            Arc::new(ProviderRegistry::new().with_provider("default", provider)),
            Arc::new(KnowledgeFacade::new().with_library(library)),
            repository.clone(),
        );
        let control = MissionControl::new(executor, repository, ConcurrencyController::new(&limits))
            .with_settings_store(settings.clone())
            .with_defaults(defaults);

        // No tier binds Mid for bob yet.
        assert!(control
            .create_mission("bob", "What are the findings?", docs(), SettingsLayer::default())
            .await
            .is_err());

        settings.set("alice", "models.mid", "user-model").await;
        let id = control
            .create_mission("alice", "What are the findings?", docs(), SettingsLayer::default())
            .await
            .unwrap();
        let mission = control.wait(id).await.unwrap();
        assert_eq!(mission.phase, MissionPhase::Finalized);
        assert_eq!(mission.settings.models.mid.unwrap().model, "user-model");
    }

    #[tokio::test]
    async fn test_instruct_answer() {
        let h = harness();
        let outcome = h.control.instruct("alice", "What is a note?", None).await.unwrap();
        assert_eq!(
            outcome,
            InstructionOutcome::Answered {
                answer: "No further details are available.".to_string()
            }
        );
    }
}

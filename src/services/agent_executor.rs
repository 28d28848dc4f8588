//! Agent invocation with retry, escalation, and an audit record per attempt.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapters::providers::ProviderRegistry;
use crate::domain::errors::InvocationError;
use crate::domain::models::{
    AgentInput, AgentInvocation, AgentResult, EffectiveSettings, InvocationOutcome, Mission,
};
use crate::domain::ports::MissionRepository;
use crate::services::agents::{AgentContext, AgentPool};
use crate::services::concurrency::MissionGates;
use crate::services::knowledge_facade::KnowledgeFacade;
use crate::services::model_router::route;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Shared state of one mission run (or one ad-hoc request).
///
/// Cloning is cheap; clones share the invocation sequence counter.
#[derive(Clone)]
pub struct MissionRun {
    /// `None` for requests outside a mission; those attempts are not recorded.
    pub mission_id: Option<Uuid>,
    pub settings: Arc<EffectiveSettings>,
    pub gates: MissionGates,
    pub cancel: CancellationToken,
    sequence: Arc<AtomicU64>,
}

impl MissionRun {
    /// Run context for one mission's invocations.
    pub fn for_mission(mission: &Mission, gates: MissionGates, cancel: CancellationToken) -> Self {
        Self {
            mission_id: Some(mission.id),
            settings: Arc::new(mission.settings.clone()),
            gates,
            cancel,
            sequence: Arc::new(AtomicU64::new(mission.invocation_count)),
        }
    }

    /// Run context for invocations outside any mission.
    pub fn detached(settings: EffectiveSettings, gates: MissionGates, cancel: CancellationToken) -> Self {
        Self {
            mission_id: None,
            settings: Arc::new(settings),
            gates,
            cancel,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Number of sequence numbers handed out so far.
    pub fn invocation_count(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

/// A successful invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Completed {
    /// Never [`AgentResult::Error`].
    pub result: AgentResult,
    /// Sequence number of the attempt that produced the result.
    pub sequence: u64,
}

/// Runs agents with retry and records every attempt.
#[derive(Clone)]
pub struct AgentExecutor {
    pool: Arc<AgentPool>,
    providers: Arc<ProviderRegistry>,
    knowledge: Arc<KnowledgeFacade>,
    repository: Arc<dyn MissionRepository>,
}

impl AgentExecutor {
    /// Executor over the given agents, providers and knowledge.
    pub fn new(
        pool: Arc<AgentPool>,
        providers: Arc<ProviderRegistry>,
        knowledge: Arc<KnowledgeFacade>,
        repository: Arc<dyn MissionRepository>,
    ) -> Self {
        Self {
            pool,
            providers,
            knowledge,
            repository,
        }
    }

    /// Invoke the agent for `input`'s role.
    ///
    /// Retryable errors are retried with the same input, up to
    /// `max_agent_retries` times with exponential backoff, re-routing on each
    /// attempt so escalating roles move up a tier. Once the budget is spent the
    /// last error is returned as Fatal. Backoff sleeps end early on cancel.
    pub async fn invoke(&self, run: &MissionRun, input: AgentInput) -> Result<Completed, InvocationError> {
        let role = input.role();
        let agent = self.pool.get(role)?;
        let max_attempts = run.settings.max_agent_retries.saturating_add(1);
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(run.settings.retry_backoff())
            .with_multiplier(2.0)
            .with_randomization_factor(0.2)
            .with_max_interval(MAX_BACKOFF)
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0;
        loop {
            if run.cancel.is_cancelled() {
                return Err(InvocationError::Cancelled);
            }

            let routed = route(role, &run.settings, attempt)?;
            let sequence = run.next_sequence();
            debug!(
                mission_id = ?run.mission_id,
                role = %role,
                attempt,
                sequence,
                model = %routed.binding.model,
                reason = %routed.reason,
                "invoking agent"
            );

            let ctx = AgentContext {
                mission_id: run.mission_id,
                sequence,
                attempt,
                routed: routed.clone(),
                gates: run.gates.clone(),
                cancel: run.cancel.clone(),
                call_timeout: run.settings.call_timeout(),
                fetch_top_results: run.settings.fetch_top_results,
                providers: self.providers.clone(),
                knowledge: self.knowledge.clone(),
            };
            let started_at = Utc::now();
            let result = agent.invoke(&ctx, input.clone()).await;

            let (outcome, error) = match &result {
                AgentResult::Error(err) => (InvocationOutcome::from(err.kind()), Some(err.message().to_string())),
                _ => (InvocationOutcome::Success, None),
            };
            if let Some(mission_id) = run.mission_id {
                let record = AgentInvocation {
                    mission_id,
                    sequence,
                    role,
                    tier: routed.resolved_tier,
                    model: routed.binding.model.clone(),
                    attempt,
                    started_at,
                    finished_at: Utc::now(),
                    outcome,
                    error,
                };
                self.repository.record_invocations(&[record]).await?;
            }

            let err = match result {
                AgentResult::Error(err) => err,
                result => return Ok(Completed { result, sequence }),
            };
            attempt += 1;
            if !err.is_retryable() || attempt >= max_attempts {
                if err.is_retryable() {
                    warn!(role = %role, attempts = attempt, error = %err, "retries exhausted");
                }
                return Err(err.exhausted(attempt));
            }

            let delay = backoff.next_backoff().unwrap_or(MAX_BACKOFF);
            warn!(role = %role, attempt, error = %err, delay_ms = delay.as_millis() as u64, "retrying agent");
            tokio::select! {
                biased;
                () = run.cancel.cancelled() => return Err(InvocationError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryMissionRepository;
    use crate::adapters::providers::{MockModelProvider, MockReply};
    use crate::domain::models::{
        AgentOutput, AgentRole, ConcurrencyLimits, MissionScope, ModelBinding, ModelTier,
        SettingsLayer,
    };
    use crate::domain::ports::ProviderError;
    use crate::services::concurrency::ConcurrencyController;
    use crate::services::settings_resolver::resolve;
    use std::time::Instant;

    fn settings(retries: u32) -> EffectiveSettings {
        let mut layer = SettingsLayer::system_defaults();
        layer.models.mid = Some(ModelBinding::new("mid-model"));
        layer.models.intelligent = Some(ModelBinding::new("smart-model"));
        layer.max_agent_retries = Some(retries);
        layer.retry_backoff_ms = Some(5);
        resolve(
            &SettingsLayer::default(),
            &SettingsLayer::default(),
            &SettingsLayer::default(),
            &layer,
        )
        .unwrap()
    }

    struct Harness {
        executor: AgentExecutor,
        provider: Arc<MockModelProvider>,
        repository: Arc<InMemoryMissionRepository>,
        run: MissionRun,
    }

    async fn harness(retries: u32) -> Harness {
        let provider = Arc::new(MockModelProvider::new());
        let repository = Arc::new(InMemoryMissionRepository::new());
        let mission = Mission::new("alice", "goal", MissionScope::default(), settings(retries));
        repository.create(&mission).await.unwrap();

        let limits: ConcurrencyLimits = mission.settings.concurrency;
        let gates = ConcurrencyController::new(&limits).for_mission(&limits);
        let executor = AgentExecutor::new(
            Arc::new(AgentPool::standard()),
            Arc::new(ProviderRegistry::new().with_provider("default", provider.clone())),
            Arc::new(KnowledgeFacade::new()),
            repository.clone(),
        );
        let run = MissionRun::for_mission(&mission, gates, CancellationToken::new());
        Harness {
            executor,
            provider,
            repository,
            run,
        }
    }

    fn message() -> AgentInput {
        AgentInput::Message {
            question: "why?".to_string(),
            context: None,
        }
    }

    #[tokio::test]
    async fn test_retry_then_success_records_each_attempt() {
        let h = harness(2).await;
        h.provider.push(AgentRole::Messenger, MockReply::Error(ProviderError::Timeout));
        h.provider.push(AgentRole::Messenger, MockReply::text("because"));

        let done = h.executor.invoke(&h.run, message()).await.unwrap();
        assert_eq!(
            done.result,
            AgentResult::Terminal(AgentOutput::Answer("because".to_string()))
        );
        assert_eq!(done.sequence, 2);
        assert_eq!(h.run.invocation_count(), 2);

        let records = h.repository.invocations(h.run.mission_id.unwrap()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].outcome, InvocationOutcome::Retryable);
        assert_eq!(records[0].attempt, 0);
        assert_eq!(records[1].outcome, InvocationOutcome::Success);
        assert_eq!(records[1].attempt, 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted_become_fatal() {
        let h = harness(1).await;
        h.provider
            .set_default(AgentRole::Messenger, MockReply::Error(ProviderError::Timeout));

        let err = h.executor.invoke(&h.run, message()).await.unwrap_err();
        assert!(matches!(err, InvocationError::Fatal(_)));
        assert_eq!(h.provider.calls_for(AgentRole::Messenger).len(), 2);
    }

    #[tokio::test]
    async fn test_fatal_is_not_retried() {
        let h = harness(3).await;
        h.provider.push(
            AgentRole::Messenger,
            MockReply::Error(ProviderError::Authentication {
                status: 401,
                message: "bad key".to_string(),
            }),
        );

        let err = h.executor.invoke(&h.run, message()).await.unwrap_err();
        assert!(matches!(err, InvocationError::Fatal(_)));
        assert_eq!(h.provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_research_escalates_on_retry() {
        let h = harness(1).await;
        h.provider.push(AgentRole::QueryStrategy, MockReply::text("not json"));
        h.provider.push_json(
            AgentRole::QueryStrategy,
            serde_json::json!({"queries": [{"text": "q"}]}),
        );

        let input = AgentInput::QueryStrategy {
            goal: "g".to_string(),
            plan: Default::default(),
            notes: Vec::new(),
            uncovered_sections: Vec::new(),
            revision: None,
            max_queries: 3,
            scope: MissionScope::default(),
        };
        h.executor.invoke(&h.run, input).await.unwrap();

        let models: Vec<String> = h.provider.calls().into_iter().map(|c| c.model).collect();
        assert_eq!(models, vec!["mid-model", "smart-model"]);
        let records = h.repository.invocations(h.run.mission_id.unwrap()).await.unwrap();
        assert_eq!(records[1].tier, ModelTier::Intelligent);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let mut h = harness(5).await;
        let mut slow = settings(5);
        slow.retry_backoff_ms = 60_000;
        h.run.settings = Arc::new(slow);
        h.provider
            .set_default(AgentRole::Messenger, MockReply::Error(ProviderError::Timeout));

        let cancel = h.run.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let err = h.executor.invoke(&h.run, message()).await.unwrap_err();
        assert_eq!(err, InvocationError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_detached_runs_are_not_recorded() {
        let h = harness(0).await;
        h.provider.push(AgentRole::Messenger, MockReply::text("ok"));
        let run = MissionRun::detached(settings(0), h.run.gates.clone(), CancellationToken::new());

        h.executor.invoke(&run, message()).await.unwrap();
        let records = h.repository.invocations(h.run.mission_id.unwrap()).await.unwrap();
        assert!(records.is_empty());
    }
}

//! Mission state machine.
//!
//! Drives one mission from its stored phase to a terminal phase. Each step
//! invokes the agents for the current phase, applies their results to the
//! mission, appends notes and drafts to the repository, and persists the
//! mutable record before the next step runs.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainResult, ErrorKind, InvocationError};
use crate::domain::models::{
    AgentInput, AgentOutput, AgentResult, AgentRole, Mission, MissionPhase, Note, NoteCandidate,
    Plan, SearchQuery,
};
use crate::domain::ports::MissionRepository;
use crate::services::agent_executor::{AgentExecutor, Completed, MissionRun};
use crate::services::coverage::{CoveragePolicy, SectionNoteCount};

/// Planning rounds allowed before a partial plan is accepted as is.
const MAX_PLANNING_ROUNDS: u32 = 3;

const EVENT_CAPACITY: usize = 256;

/// Progress notifications for observers of running missions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MissionEvent {
    /// The mission moved between phases.
    PhaseChanged {
        mission_id: Uuid,
        from: MissionPhase,
        to: MissionPhase,
        iteration: u32,
    },
    /// Research filed new notes.
    NotesAdded {
        mission_id: Uuid,
        added: usize,
        total: usize,
    },
    /// A new draft version was stored.
    DraftProduced {
        mission_id: Uuid,
        version: u32,
    },
    /// The mission reached a terminal phase.
    Finished {
        mission_id: Uuid,
        phase: MissionPhase,
    },
}

impl MissionEvent {
    /// Mission the event concerns.
    pub fn mission_id(&self) -> Uuid {
        match self {
            Self::PhaseChanged { mission_id, .. }
            | Self::NotesAdded { mission_id, .. }
            | Self::DraftProduced { mission_id, .. }
            | Self::Finished { mission_id, .. } => *mission_id,
        }
    }
}

type StepResult = Result<(), InvocationError>;

/// Drives one mission through its phases.
pub struct MissionEngine {
    executor: AgentExecutor,
    repository: Arc<dyn MissionRepository>,
    coverage: Arc<dyn CoveragePolicy>,
    events: broadcast::Sender<MissionEvent>,
}

impl MissionEngine {
    /// Engine over `executor`, persisting to `repository`.
    pub fn new(executor: AgentExecutor, repository: Arc<dyn MissionRepository>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            executor,
            repository,
            coverage: Arc::new(SectionNoteCount),
            events,
        }
    }

    /// Replace the research coverage policy.
    pub fn with_coverage(mut self, coverage: Arc<dyn CoveragePolicy>) -> Self {
        self.coverage = coverage;
        self
    }

    /// Lifecycle events from this engine.
    pub fn subscribe(&self) -> broadcast::Receiver<MissionEvent> {
        self.events.subscribe()
    }

    /// Run `mission` until it reaches a terminal phase.
    ///
    /// Agent failures end in Failed or Cancelled and are not returned as
    /// errors; only repository failures are.
    pub async fn run(&self, mut mission: Mission, run: MissionRun) -> DomainResult<Mission> {
        info!(mission_id = %mission.id, phase = %mission.phase, "mission run started");

        while !mission.phase.is_terminal() {
            let before = mission.phase;
            let mut step = if run.cancel.is_cancelled() || self.cancelled_elsewhere(mission.id).await? {
                Err(InvocationError::Cancelled)
            } else {
                match mission.phase {
                    MissionPhase::Planning => self.plan(&mut mission, &run).await,
                    MissionPhase::Researching => self.research(&mut mission, &run).await,
                    MissionPhase::Writing => self.write(&mut mission, &run).await,
                    MissionPhase::Reflecting => self.reflect(&mut mission, &run).await,
                    MissionPhase::Verifying => self.verify(&mut mission, &run).await,
                    MissionPhase::Finalized | MissionPhase::Failed | MissionPhase::Cancelled => Ok(()),
                }
            };
            mission.invocation_count = mission.invocation_count.max(run.invocation_count());
            // A cancel stored while the step ran must not be overwritten below.
            if !mission.phase.is_terminal()
                && !matches!(step, Err(InvocationError::Cancelled))
                && self.cancelled_elsewhere(mission.id).await?
            {
                step = Err(InvocationError::Cancelled);
            }

            match step {
                Ok(()) => {}
                Err(InvocationError::Cancelled) => {
                    info!(mission_id = %mission.id, phase = %mission.phase, "mission cancelled");
                    mission.transition_to(MissionPhase::Cancelled)?;
                }
                Err(err) => {
                    warn!(mission_id = %mission.id, phase = %mission.phase, error = %err, "mission failed");
                    let kind = match err.kind() {
                        ErrorKind::Retryable => ErrorKind::Fatal,
                        kind => kind,
                    };
                    mission.fail(kind, err.message())?;
                }
            }
            self.repository.update_state(&mission).await?;

            if mission.phase != before {
                self.emit(MissionEvent::PhaseChanged {
                    mission_id: mission.id,
                    from: before,
                    to: mission.phase,
                    iteration: mission.iteration_count,
                });
            }
        }

        info!(
            mission_id = %mission.id,
            phase = %mission.phase,
            iterations = mission.iteration_count,
            drafts = mission.drafts().len(),
            "mission run finished"
        );
        self.emit(MissionEvent::Finished {
            mission_id: mission.id,
            phase: mission.phase,
        });
        Ok(mission)
    }

    /// Whether another process marked the mission Cancelled in storage.
    async fn cancelled_elsewhere(&self, id: Uuid) -> DomainResult<bool> {
        Ok(self
            .repository
            .get(id)
            .await?
            .is_some_and(|stored| stored.phase == MissionPhase::Cancelled))
    }

    fn emit(&self, event: MissionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    #[instrument(skip_all, fields(mission_id = %mission.id))]
    async fn plan(&self, mission: &mut Mission, run: &MissionRun) -> StepResult {
        let mut partial: Option<Plan> = None;
        for round in 0..MAX_PLANNING_ROUNDS {
            let input = AgentInput::Plan {
                goal: mission.goal.clone(),
                scope: mission.scope.clone(),
                partial: partial.clone(),
            };
            match self.executor.invoke(run, input).await?.result {
                AgentResult::Terminal(AgentOutput::Plan(plan)) => {
                    partial = Some(plan);
                    break;
                }
                AgentResult::Continue(AgentOutput::Plan(plan)) => {
                    debug!(round, sections = plan.sections.len(), "plan still incomplete");
                    partial = Some(plan);
                }
                AgentResult::NeedsMoreInput(request) => {
                    return Err(InvocationError::fatal(format!(
                        "planning needs more input: {request}"
                    )));
                }
                other => return Err(unexpected(AgentRole::Planning, &other)),
            }
        }

        let plan = partial.ok_or_else(|| InvocationError::fatal("planning produced no plan"))?;
        info!(title = %plan.title, sections = plan.sections.len(), "plan ready");
        mission.plan = Some(plan);
        mission.transition_to(MissionPhase::Researching)?;
        Ok(())
    }

    /// Research rounds for the current iteration, then on to Writing.
    #[instrument(skip_all, fields(mission_id = %mission.id, iteration = mission.iteration_count))]
    async fn research(&self, mission: &mut Mission, run: &MissionRun) -> StepResult {
        let plan = current_plan(mission)?;
        let targets = mission.settings.iteration;

        for round in 0..targets.max_research_rounds {
            let notes = active_notes(mission);
            let refs: Vec<&Note> = notes.iter().collect();
            let uncovered = self.coverage.uncovered_sections(&plan, &refs, &targets);
            let revising = round == 0 && mission.revision_instructions.is_some();
            if uncovered.is_empty() && !revising {
                debug!(round, "coverage sufficient");
                break;
            }

            let input = AgentInput::QueryStrategy {
                goal: mission.goal.clone(),
                plan: plan.clone(),
                notes,
                uncovered_sections: uncovered,
                revision: mission.revision_instructions.clone(),
                max_queries: targets.queries_per_round,
                scope: mission.scope.clone(),
            };
            let queries = match self.executor.invoke(run, input).await?.result {
                AgentResult::Continue(AgentOutput::Queries(q))
                | AgentResult::Terminal(AgentOutput::Queries(q)) => q,
                other => return Err(unexpected(AgentRole::QueryStrategy, &other)),
            };
            if queries.is_empty() {
                debug!(round, "no new queries");
                break;
            }

            let (candidates, failure) = self.gather(mission, run, queries).await;
            let candidates = self.assign_sections(run, &plan, candidates).await?;
            self.append_notes(mission, candidates).await?;
            if let Some(err) = failure {
                return Err(err);
            }
        }

        mission.transition_to(MissionPhase::Writing)?;
        Ok(())
    }

    /// Run one Research invocation per query concurrently and collect the
    /// candidates in the order the invocations finish. The first failure is
    /// returned next to whatever the other queries produced.
    async fn gather(
        &self,
        mission: &Mission,
        run: &MissionRun,
        queries: Vec<SearchQuery>,
    ) -> (Vec<NoteCandidate>, Option<InvocationError>) {
        let mut pending: FuturesUnordered<_> = queries
            .into_iter()
            .map(|query| {
                let input = AgentInput::Research {
                    goal: mission.goal.clone(),
                    query,
                    scope: mission.scope.clone(),
                    results_per_query: mission.settings.results_per_query,
                };
                self.executor.invoke(run, input)
            })
            .collect();

        let mut candidates = Vec::new();
        let mut failure: Option<InvocationError> = None;
        while let Some(outcome) = pending.next().await {
            match outcome {
                Ok(Completed {
                    result:
                        AgentResult::Continue(AgentOutput::Evidence(found))
                        | AgentResult::Terminal(AgentOutput::Evidence(found)),
                    ..
                }) => candidates.extend(found),
                Ok(Completed { result, .. }) => {
                    failure.get_or_insert_with(|| unexpected(AgentRole::Research, &result));
                }
                Err(InvocationError::Cancelled) => failure = Some(InvocationError::Cancelled),
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }
        (candidates, failure)
    }

    /// Ask the Note Assignment agent to place candidates that arrived without
    /// plan sections. Positions of the other candidates are unchanged.
    async fn assign_sections(
        &self,
        run: &MissionRun,
        plan: &Plan,
        mut candidates: Vec<NoteCandidate>,
    ) -> Result<Vec<NoteCandidate>, InvocationError> {
        let unassigned: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.section_ids.is_empty())
            .map(|(i, _)| i)
            .collect();
        if unassigned.is_empty() {
            return Ok(candidates);
        }

        let input = AgentInput::NoteAssignment {
            plan: plan.clone(),
            candidates: unassigned.iter().map(|&i| candidates[i].clone()).collect(),
        };
        let assigned = match self.executor.invoke(run, input).await?.result {
            AgentResult::Terminal(AgentOutput::Assignments(a))
            | AgentResult::Continue(AgentOutput::Assignments(a)) => a,
            other => return Err(unexpected(AgentRole::NoteAssignment, &other)),
        };
        for (index, candidate) in unassigned.into_iter().zip(assigned) {
            candidates[index].section_ids = candidate.section_ids;
        }
        Ok(candidates)
    }

    async fn append_notes(&self, mission: &mut Mission, candidates: Vec<NoteCandidate>) -> StepResult {
        if candidates.is_empty() {
            return Ok(());
        }
        let notes: Vec<Note> = candidates
            .into_iter()
            .map(|candidate| mission.append_note(candidate))
            .collect();
        self.repository.append_notes(mission.id, &notes).await?;
        self.emit(MissionEvent::NotesAdded {
            mission_id: mission.id,
            added: notes.len(),
            total: mission.notes().len(),
        });
        Ok(())
    }

    #[instrument(skip_all, fields(mission_id = %mission.id, iteration = mission.iteration_count))]
    async fn write(&self, mission: &mut Mission, run: &MissionRun) -> StepResult {
        let input = AgentInput::Write {
            goal: mission.goal.clone(),
            plan: current_plan(mission)?,
            notes: active_notes(mission),
            previous: mission.latest_draft().cloned(),
            revision: mission.revision_instructions.clone(),
        };
        let done = self.executor.invoke(run, input).await?;
        let content = match done.result {
            AgentResult::Terminal(AgentOutput::Draft(c)) | AgentResult::Continue(AgentOutput::Draft(c)) => c,
            other => return Err(unexpected(AgentRole::Writing, &other)),
        };

        let draft = mission.push_draft(content, done.sequence);
        self.repository.append_draft(mission.id, &draft).await?;
        info!(version = draft.version, sections = draft.content.sections.len(), "draft written");
        self.emit(MissionEvent::DraftProduced {
            mission_id: mission.id,
            version: draft.version,
        });
        mission.transition_to(MissionPhase::Reflecting)?;
        Ok(())
    }

    #[instrument(skip_all, fields(mission_id = %mission.id, iteration = mission.iteration_count))]
    async fn reflect(&self, mission: &mut Mission, run: &MissionRun) -> StepResult {
        let draft = mission
            .latest_draft()
            .cloned()
            .ok_or_else(|| InvocationError::fatal("reflecting without a draft"))?;
        let input = AgentInput::Reflect {
            goal: mission.goal.clone(),
            plan: current_plan(mission)?,
            notes: active_notes(mission),
            draft,
        };
        let result = self.executor.invoke(run, input).await?.result;

        mission.iteration_count += 1;
        let revision = match result {
            AgentResult::Terminal(AgentOutput::Critique(critique)) if critique.accept => None,
            AgentResult::Terminal(AgentOutput::Critique(critique))
            | AgentResult::Continue(AgentOutput::Critique(critique)) => Some(critique.instructions),
            AgentResult::NeedsMoreInput(request) => Some(request),
            other => return Err(unexpected(AgentRole::Reflection, &other)),
        };

        match revision {
            None => {
                info!(iteration = mission.iteration_count, "draft accepted");
                mission.revision_instructions = None;
                let next = if mission.settings.verification_enabled {
                    MissionPhase::Verifying
                } else {
                    MissionPhase::Finalized
                };
                mission.transition_to(next)?;
            }
            Some(instructions) if mission.iterations_remaining() => {
                info!(iteration = mission.iteration_count, "revision requested");
                mission.revision_instructions = Some(instructions);
                mission.transition_to(MissionPhase::Researching)?;
            }
            Some(_) => {
                info!(iteration = mission.iteration_count, "iteration cap reached, finalizing draft as is");
                mission.forced_finalization = true;
                mission.revision_instructions = None;
                mission.transition_to(MissionPhase::Finalized)?;
            }
        }
        Ok(())
    }

    #[instrument(skip_all, fields(mission_id = %mission.id, iteration = mission.iteration_count))]
    async fn verify(&self, mission: &mut Mission, run: &MissionRun) -> StepResult {
        let draft = mission
            .latest_draft()
            .cloned()
            .ok_or_else(|| InvocationError::fatal("verifying without a draft"))?;
        let input = AgentInput::Verify {
            draft,
            notes: active_notes(mission),
        };
        let report = match self.executor.invoke(run, input).await?.result {
            AgentResult::Terminal(AgentOutput::Verification(r))
            | AgentResult::Continue(AgentOutput::Verification(r)) => r,
            other => return Err(unexpected(AgentRole::Verifier, &other)),
        };

        if report.passed() {
            info!(checked = report.checked_claims, "verification passed");
            mission.unverified_claims.clear();
            mission.transition_to(MissionPhase::Finalized)?;
        } else if mission.iterations_remaining() {
            info!(flagged = report.unsupported_claims.len(), "unsupported claims, revising");
            let listing = report
                .unsupported_claims
                .iter()
                .map(|c| format!("- {} ({})", c.claim, c.reason))
                .collect::<Vec<_>>()
                .join("\n");
            mission.revision_instructions = Some(format!(
                "Find support for or remove these unsupported claims:\n{listing}"
            ));
            mission.transition_to(MissionPhase::Researching)?;
        } else {
            warn!(flagged = report.unsupported_claims.len(), "finalizing with unverified claims");
            mission.unverified_claims = report.unsupported_claims;
            mission.transition_to(MissionPhase::Finalized)?;
        }
        Ok(())
    }
}

fn current_plan(mission: &Mission) -> Result<Plan, InvocationError> {
    mission
        .plan
        .clone()
        .ok_or_else(|| InvocationError::fatal(format!("{} phase without a plan", mission.phase)))
}

fn active_notes(mission: &Mission) -> Vec<Note> {
    mission.active_notes().into_iter().cloned().collect()
}

fn unexpected(role: AgentRole, result: &AgentResult) -> InvocationError {
    let shape = match result {
        AgentResult::Continue(output) => format!("continue({})", output.kind()),
        AgentResult::Terminal(output) => format!("terminal({})", output.kind()),
        AgentResult::NeedsMoreInput(_) => "needs_more_input".to_string(),
        AgentResult::Error(err) => format!("error({})", err.kind().as_str()),
    };
    InvocationError::fatal(format!("{role} agent returned unexpected {shape}"))
}

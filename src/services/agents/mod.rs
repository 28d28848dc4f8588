//! Role-bound agents.
//!
//! Agents are stateless: everything an invocation needs arrives in its
//! [`AgentInput`], and everything it produces is returned as an
//! [`AgentResult`] for the mission engine to apply. The [`AgentContext`]
//! carries the routed model and the gates every model, search and fetch call
//! must hold.

mod messenger;
mod note_assignment;
mod planning;
mod query_strategy;
mod reflection;
mod research;
mod router;
mod verifier;
mod writing;

pub use messenger::MessengerAgent;
pub use note_assignment::NoteAssignmentAgent;
pub use planning::PlanningAgent;
pub use query_strategy::QueryStrategyAgent;
pub use reflection::ReflectionAgent;
pub use research::ResearchAgent;
pub use router::RouterAgent;
pub use verifier::VerifierAgent;
pub use writing::WritingAgent;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::adapters::providers::ProviderRegistry;
use crate::domain::errors::{DomainError, DomainResult, InvocationError};
use crate::domain::models::{AgentInput, AgentResult, AgentRole, Note, Plan};
use crate::domain::ports::CompletionRequest;
use crate::services::concurrency::{bounded, MissionGates};
use crate::services::knowledge_facade::KnowledgeFacade;
use crate::services::model_router::RoutedModel;

/// Everything one agent attempt may use.
#[derive(Clone)]
pub struct AgentContext {
    pub mission_id: Option<Uuid>,
    /// Invocation sequence number of this attempt.
    pub sequence: u64,
    pub attempt: u32,
    pub routed: RoutedModel,
    pub gates: MissionGates,
    pub cancel: CancellationToken,
    pub call_timeout: Duration,
    pub fetch_top_results: usize,
    pub providers: Arc<ProviderRegistry>,
    pub knowledge: Arc<KnowledgeFacade>,
}

impl AgentContext {
    /// One model call on the routed binding, holding a model-call permit for
    /// its whole duration.
    pub async fn complete(&self, system: &str, prompt: String) -> Result<String, InvocationError> {
        let provider = self.providers.get(&self.routed.binding.provider)?;
        let _permit = self.gates.model_call(&self.cancel).await?;

        let request =
            CompletionRequest::new(self.routed.role, &self.routed.binding, prompt).with_system(system);
        let completion = bounded(
            &self.cancel,
            self.call_timeout,
            "model call",
            provider.complete(request),
        )
        .await?;

        debug!(
            role = %self.routed.role,
            model = %completion.model,
            input_tokens = completion.input_tokens,
            output_tokens = completion.output_tokens,
            "model call complete"
        );
        Ok(completion.text)
    }

    /// Model call whose reply must be a JSON document of type `T`.
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        system: &str,
        prompt: String,
    ) -> Result<T, InvocationError> {
        let text = self.complete(system, prompt).await?;
        parse_reply(self.routed.role, &text)
    }
}

/// A stateless worker for one role.
#[async_trait]
pub trait Agent: Send + Sync {
    fn role(&self) -> AgentRole;

    async fn invoke(&self, ctx: &AgentContext, input: AgentInput) -> AgentResult;
}

/// Registry of agents by role.
#[derive(Clone)]
pub struct AgentPool {
    agents: HashMap<AgentRole, Arc<dyn Agent>>,
}

impl AgentPool {
    /// A pool with no agents.
    pub fn empty() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// One agent per role.
    pub fn standard() -> Self {
        Self::empty()
            .with_agent(Arc::new(PlanningAgent))
            .with_agent(Arc::new(RouterAgent))
            .with_agent(Arc::new(QueryStrategyAgent))
            .with_agent(Arc::new(NoteAssignmentAgent))
            .with_agent(Arc::new(ResearchAgent))
            .with_agent(Arc::new(WritingAgent))
            .with_agent(Arc::new(ReflectionAgent))
            .with_agent(Arc::new(VerifierAgent))
            .with_agent(Arc::new(MessengerAgent))
    }

    /// Register `agent`, replacing any agent already bound to its role.
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(agent.role(), agent);
        self
    }

    /// The agent bound to `role`.
    pub fn get(&self, role: AgentRole) -> DomainResult<Arc<dyn Agent>> {
        self.agents
            .get(&role)
            .cloned()
            .ok_or_else(|| DomainError::Configuration(format!("no agent registered for {role}")))
    }
}

impl Default for AgentPool {
    fn default() -> Self {
        Self::standard()
    }
}

/// Collapse an agent body's `Result` into an [`AgentResult`].
pub(crate) fn settle(result: Result<AgentResult, InvocationError>) -> AgentResult {
    result.unwrap_or_else(AgentResult::Error)
}

pub(crate) fn wrong_input(role: AgentRole, input: &AgentInput) -> AgentResult {
    AgentResult::Error(InvocationError::fatal(format!(
        "{role} agent cannot handle {} input",
        input.role()
    )))
}

/// The JSON document inside a model reply, with code fences and surrounding
/// prose stripped.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.rsplit_once("```").map(|(body, _)| body))
        .unwrap_or(trimmed)
        .trim();

    let start = unfenced.find(['{', '[']);
    let end = unfenced.rfind(['}', ']']);
    match (start, end) {
        (Some(start), Some(end)) if end >= start => &unfenced[start..=end],
        _ => unfenced,
    }
}

/// Parse a model reply. Output that does not parse is Retryable.
pub fn parse_reply<T: DeserializeOwned>(role: AgentRole, text: &str) -> Result<T, InvocationError> {
    serde_json::from_str(extract_json(text))
        .map_err(|e| InvocationError::retryable(format!("malformed {role} output: {e}")))
}

/// Label used for the `index`th note in a prompt.
pub(crate) fn note_label(index: usize) -> String {
    format!("N{}", index + 1)
}

/// Notes rendered as labelled evidence for a prompt.
pub(crate) fn render_notes(notes: &[Note]) -> String {
    if notes.is_empty() {
        return "(no notes yet)".to_string();
    }
    notes
        .iter()
        .enumerate()
        .map(|(i, note)| {
            format!(
                "[{}] ({}: {}) sections={:?}\n{}",
                note_label(i),
                note.source.kind.as_str(),
                note.source.reference,
                note.section_ids,
                note.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub(crate) fn render_plan(plan: &Plan) -> String {
    let mut out = format!("{}\n", plan.title);
    for section in &plan.sections {
        out.push_str(&format!("- [{}] {}: {}\n", section.id, section.title, section.description));
    }
    out
}

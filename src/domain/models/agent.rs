//! Agent domain model.
//!
//! Agent roles, the typed inputs and outputs that flow between the state
//! machine and the agent pool, and the audit record of a single invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::knowledge::{SourceKind, SourcePreference};
use super::mission::{DraftVersion, MissionPhase, MissionScope, Note, NoteSource};
use super::settings::ModelTier;
use crate::domain::errors::{ErrorKind, InvocationError};

/// One of the nine fixed functional responsibilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Planning,
    Router,
    QueryStrategy,
    NoteAssignment,
    Research,
    Writing,
    Reflection,
    Verifier,
    Messenger,
}

impl AgentRole {
    /// Every role, in pipeline order.
    pub const ALL: [AgentRole; 9] = [
        Self::Planning,
        Self::Router,
        Self::QueryStrategy,
        Self::NoteAssignment,
        Self::Research,
        Self::Writing,
        Self::Reflection,
        Self::Verifier,
        Self::Messenger,
    ];

    /// Lowercase role name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Router => "router",
            Self::QueryStrategy => "query_strategy",
            Self::NoteAssignment => "note_assignment",
            Self::Research => "research",
            Self::Writing => "writing",
            Self::Reflection => "reflection",
            Self::Verifier => "verifier",
            Self::Messenger => "messenger",
        }
    }

    /// Parse a role name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "planning" => Some(Self::Planning),
            "router" => Some(Self::Router),
            "query_strategy" => Some(Self::QueryStrategy),
            "note_assignment" => Some(Self::NoteAssignment),
            "research" => Some(Self::Research),
            "writing" => Some(Self::Writing),
            "reflection" => Some(Self::Reflection),
            "verifier" => Some(Self::Verifier),
            "messenger" => Some(Self::Messenger),
            _ => None,
        }
    }

    /// Static role → tier table.
    pub fn default_tier(&self) -> ModelTier {
        match self {
            Self::Planning | Self::Router | Self::QueryStrategy | Self::NoteAssignment => {
                ModelTier::Fast
            }
            Self::Research | Self::Writing | Self::Messenger => ModelTier::Mid,
            Self::Reflection => ModelTier::Intelligent,
            Self::Verifier => ModelTier::Verifier,
        }
    }

    /// Roles that move up to the Intelligent tier when retried.
    pub fn escalates_on_retry(&self) -> bool {
        matches!(self, Self::QueryStrategy | Self::Research)
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One section of a research plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSection {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Ordered outline produced by the Planning agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub title: String,
    pub sections: Vec<PlanSection>,
}

impl Plan {
    /// Look up a section by id.
    pub fn section(&self, id: &str) -> Option<&PlanSection> {
        self.sections.iter().find(|s| s.id == id)
    }

    /// Section ids in plan order.
    pub fn section_ids(&self) -> Vec<String> {
        self.sections.iter().map(|s| s.id.clone()).collect()
    }
}

/// A search query chosen by the Query Strategy agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    /// Plan section this query is meant to cover.
    #[serde(default)]
    pub section_id: Option<String>,
    #[serde(default)]
    pub source: SourcePreference,
}

/// Evidence produced by research before it becomes an immutable note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteCandidate {
    pub source: NoteSource,
    pub content: String,
    pub query: String,
    #[serde(default)]
    pub section_ids: Vec<String>,
    /// Sequence number of the research invocation that produced it.
    #[serde(default)]
    pub invocation_seq: u64,
}

impl NoteCandidate {
    /// Kind of source the candidate came from.
    pub fn source_kind(&self) -> SourceKind {
        self.source.kind
    }
}

/// One section of a draft, with the notes that support it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSection {
    pub section_id: String,
    pub heading: String,
    pub body: String,
    #[serde(default)]
    pub note_ids: Vec<Uuid>,
}

/// Content of a draft as produced by the Writing agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftContent {
    pub title: String,
    pub sections: Vec<DraftSection>,
}

impl DraftContent {
    /// Render as markdown.
    pub fn to_markdown(&self) -> String {
        let mut out = format!("# {}\n", self.title);
        for section in &self.sections {
            out.push_str(&format!("\n## {}\n\n{}\n", section.heading, section.body.trim()));
        }
        out
    }
}

/// Reflection verdict on a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critique {
    pub accept: bool,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// A claim the Verifier could not trace to the notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsupportedClaim {
    pub claim: String,
    #[serde(default)]
    pub reason: String,
}

/// Verifier output for one draft.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Version of the draft that was checked.
    pub draft_version: u32,
    #[serde(default)]
    pub checked_claims: u32,
    #[serde(default)]
    pub unsupported_claims: Vec<UnsupportedClaim>,
}

impl VerificationReport {
    /// True when no claim was flagged.
    pub fn passed(&self) -> bool {
        self.unsupported_claims.is_empty()
    }
}

/// Concrete next action for an ambiguous user instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterAction {
    StartResearch,
    ReviseDraft,
    Answer,
}

/// Typed input for one agent invocation.
#[derive(Debug, Clone)]
pub enum AgentInput {
    Plan {
        goal: String,
        scope: MissionScope,
        partial: Option<Plan>,
    },
    Route {
        instruction: String,
        phase: Option<MissionPhase>,
    },
    QueryStrategy {
        goal: String,
        plan: Plan,
        notes: Vec<Note>,
        uncovered_sections: Vec<String>,
        revision: Option<String>,
        max_queries: u32,
        scope: MissionScope,
    },
    NoteAssignment {
        plan: Plan,
        candidates: Vec<NoteCandidate>,
    },
    Research {
        goal: String,
        query: SearchQuery,
        scope: MissionScope,
        results_per_query: usize,
    },
    Write {
        goal: String,
        plan: Plan,
        notes: Vec<Note>,
        previous: Option<DraftVersion>,
        revision: Option<String>,
    },
    Reflect {
        goal: String,
        plan: Plan,
        notes: Vec<Note>,
        draft: DraftVersion,
    },
    Verify {
        draft: DraftVersion,
        notes: Vec<Note>,
    },
    Message {
        question: String,
        context: Option<String>,
    },
}

impl AgentInput {
    /// Role that handles this input.
    pub fn role(&self) -> AgentRole {
        match self {
            Self::Plan { .. } => AgentRole::Planning,
            Self::Route { .. } => AgentRole::Router,
            Self::QueryStrategy { .. } => AgentRole::QueryStrategy,
            Self::NoteAssignment { .. } => AgentRole::NoteAssignment,
            Self::Research { .. } => AgentRole::Research,
            Self::Write { .. } => AgentRole::Writing,
            Self::Reflect { .. } => AgentRole::Reflection,
            Self::Verify { .. } => AgentRole::Verifier,
            Self::Message { .. } => AgentRole::Messenger,
        }
    }
}

/// Structured output returned by an agent.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutput {
    Plan(Plan),
    Route(RouterAction),
    Queries(Vec<SearchQuery>),
    Assignments(Vec<NoteCandidate>),
    Evidence(Vec<NoteCandidate>),
    Draft(DraftContent),
    Critique(Critique),
    Verification(VerificationReport),
    Answer(String),
}

impl AgentOutput {
    /// Short name of the output variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Plan(_) => "plan",
            Self::Route(_) => "route",
            Self::Queries(_) => "queries",
            Self::Assignments(_) => "assignments",
            Self::Evidence(_) => "evidence",
            Self::Draft(_) => "draft",
            Self::Critique(_) => "critique",
            Self::Verification(_) => "verification",
            Self::Answer(_) => "answer",
        }
    }
}

/// Result of one agent invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentResult {
    Continue(AgentOutput),
    NeedsMoreInput(String),
    Terminal(AgentOutput),
    Error(InvocationError),
}

/// Outcome recorded for an invocation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationOutcome {
    Success,
    Retryable,
    Fatal,
    Cancelled,
}

impl InvocationOutcome {
    /// Lowercase outcome name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Retryable => "retryable",
            Self::Fatal => "fatal",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a stored outcome name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "retryable" => Some(Self::Retryable),
            "fatal" => Some(Self::Fatal),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl From<ErrorKind> for InvocationOutcome {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Retryable => Self::Retryable,
            ErrorKind::Fatal => Self::Fatal,
            ErrorKind::Cancelled => Self::Cancelled,
        }
    }
}

/// Audit record of a single agent attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInvocation {
    pub mission_id: Uuid,
    /// Monotonically increasing within the mission.
    pub sequence: u64,
    pub role: AgentRole,
    pub tier: ModelTier,
    pub model: String,
    /// Zero for the first attempt.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: InvocationOutcome,
    pub error: Option<String>,
}

//! Domain models.

pub mod agent;
pub mod config;
pub mod knowledge;
pub mod mission;
pub mod settings;

pub use agent::{
    AgentInput, AgentInvocation, AgentOutput, AgentResult, AgentRole, Critique, DraftContent,
    DraftSection, InvocationOutcome, NoteCandidate, Plan, PlanSection, RouterAction, SearchQuery,
    UnsupportedClaim, VerificationReport,
};
pub use config::{
    Config, DatabaseConfig, KnowledgeConfig, LoggingConfig, ProviderConfig, ProviderKind,
};
pub use knowledge::{FetchedContent, Snippet, SourceKind, SourcePreference};
pub use mission::{
    DraftVersion, Mission, MissionFailure, MissionPhase, MissionScope, Note, NoteSource,
    SectionProvenance,
};
pub use settings::{
    ConcurrencyLimits, EffectiveSettings, IterationPreset, IterationTargets, ModelBinding,
    ModelTier, SettingsLayer, TierBindings,
};

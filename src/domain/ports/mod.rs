//! Port trait definitions (hexagonal architecture).
//!
//! The engine depends only on these traits:
//! - ModelProvider: language-model completions
//! - KnowledgeSource: document library and web search/fetch
//! - SettingsStore: read-only user-tier settings
//! - MissionRepository: durable missions, notes, drafts, and invocations

pub mod knowledge_source;
pub mod mission_repository;
pub mod model_provider;
pub mod settings_store;

pub use knowledge_source::{KnowledgeError, KnowledgeSource};
pub use mission_repository::{MissionFilter, MissionRepository};
pub use model_provider::{Completion, CompletionRequest, ModelProvider, ProviderError};
pub use settings_store::{EmptySettingsStore, SettingsStore};

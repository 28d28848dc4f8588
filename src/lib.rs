//! Maestro - research mission orchestrator
//!
//! Maestro drives a research mission through planning, research, writing,
//! reflection, and verification with a pool of model-backed agents, under
//! shared concurrency budgets and layered settings.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Models, error taxonomy, and port traits
//! - **Service Layer** (`services`): Settings resolution, routing, gates, agents, and the mission engine
//! - **Adapter Layer** (`adapters`): SQLite and in-memory storage, model providers, knowledge sources
//! - **Infrastructure Layer** (`infrastructure`): Configuration and logging
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use maestro::cli::context::build_control;
//!
//! let control = build_control(&config, pool).await?;
//! let id = control.create_mission("alice", "State of fusion power", scope, overrides).await?;
//! let mission = control.wait(id).await?;
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult, ErrorKind, InvocationError};
pub use domain::models::{
    AgentRole, Config, EffectiveSettings, Mission, MissionPhase, MissionScope, ModelTier,
    SettingsLayer,
};
pub use domain::ports::{KnowledgeSource, MissionRepository, ModelProvider, SettingsStore};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{MissionControl, MissionEvent};

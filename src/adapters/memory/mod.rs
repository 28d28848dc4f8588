//! In-process adapters for tests and ephemeral runs.

pub mod mission_repository;
pub mod settings_store;

pub use mission_repository::InMemoryMissionRepository;
pub use settings_store::InMemorySettingsStore;

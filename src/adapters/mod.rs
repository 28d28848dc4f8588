//! Adapters for external systems: storage, model providers, and knowledge
//! sources.

pub mod knowledge;
pub mod memory;
pub mod providers;
pub mod sqlite;

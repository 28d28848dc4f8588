//! CLI command implementations.

pub mod ask;
pub mod init;
pub mod mission;
pub mod settings;

//! Knowledge source adapters.

pub mod http_fetch;
pub mod in_memory;

pub use http_fetch::{HttpFetcher, HttpFetcherConfig};
pub use in_memory::InMemoryKnowledgeSource;

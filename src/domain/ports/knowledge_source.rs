//! Knowledge source port - document library and web collaborators.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::errors::{ErrorKind, InvocationError};
use crate::domain::models::{FetchedContent, MissionScope, Snippet};

/// Failures from a knowledge source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KnowledgeError {
    #[error("knowledge source unavailable: {0}")]
    Unavailable(String),

    #[error("knowledge request timed out")]
    Timeout,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid knowledge request: {0}")]
    InvalidRequest(String),
}

impl KnowledgeError {
    /// Retryable or fatal, by cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) | Self::Timeout => ErrorKind::Retryable,
            Self::NotFound(_) | Self::InvalidRequest(_) => ErrorKind::Fatal,
        }
    }
}

impl From<KnowledgeError> for InvocationError {
    fn from(err: KnowledgeError) -> Self {
        match err.kind() {
            ErrorKind::Retryable => Self::Retryable(err.to_string()),
            ErrorKind::Fatal => Self::Fatal(err.to_string()),
            ErrorKind::Cancelled => Self::Cancelled,
        }
    }
}

/// A searchable body of knowledge.
///
/// The document library and web search are both exposed through this trait;
/// the facade decides which one a query hits.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    fn name(&self) -> &str;

    /// Ranked snippets for a query, best first.
    async fn search(
        &self,
        query: &str,
        scope: &MissionScope,
        limit: usize,
    ) -> Result<Vec<Snippet>, KnowledgeError>;

    /// Extracted content of a URL or document reference.
    async fn fetch(&self, reference: &str) -> Result<FetchedContent, KnowledgeError>;
}

//! Domain errors for the Maestro orchestration engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::models::{MissionPhase, ModelTier};

/// Classification shared by every failure that can reach the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient: timeout, rate limit, momentary provider error.
    Retryable,
    /// Unrecoverable: invalid configuration, missing binding, exhausted retries.
    Fatal,
    /// User- or system-initiated abort.
    Cancelled,
}

impl ErrorKind {
    /// Lowercase name used in logs and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retryable => "retryable",
            Self::Fatal => "fatal",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a stored name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "retryable" => Some(Self::Retryable),
            "fatal" => Some(Self::Fatal),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Error produced by one agent invocation, already classified by the agent adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum InvocationError {
    #[error("retryable: {0}")]
    Retryable(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("cancelled")]
    Cancelled,
}

impl InvocationError {
    /// A transient failure worth retrying.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    /// A failure that ends the invocation.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Retryable(_) => ErrorKind::Retryable,
            Self::Fatal(_) => ErrorKind::Fatal,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the attempt may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Human readable message.
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(m) | Self::Fatal(m) => m,
            Self::Cancelled => "cancelled",
        }
    }

    /// Promote a retryable error to fatal once its retry budget is spent.
    pub fn exhausted(self, attempts: u32) -> Self {
        match self {
            Self::Retryable(m) => Self::Fatal(format!("{m} (gave up after {attempts} attempts)")),
            other => other,
        }
    }
}

impl From<DomainError> for InvocationError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Cancelled => Self::Cancelled,
            DomainError::Invocation(inner) => inner,
            other => Self::Fatal(other.to_string()),
        }
    }
}

/// Domain-level errors that can occur in the Maestro system.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Mission not found: {0}")]
    MissionNotFound(Uuid),

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: MissionPhase, to: MissionPhase },

    #[error("No model bound to the {tier} tier")]
    ModelUnbound { tier: ModelTier },

    #[error("Unknown model provider: {0}")]
    UnknownProvider(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Concurrency conflict: {entity} {id} was modified")]
    ConcurrencyConflict { entity: String, id: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Agent invocation failed: {0}")]
    Invocation(#[from] InvocationError),
}

/// Result alias for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_promotes_retryable_only() {
        let err = InvocationError::retryable("timeout").exhausted(3);
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(err.message().contains("3 attempts"));

        assert_eq!(InvocationError::Cancelled.exhausted(3), InvocationError::Cancelled);
        assert_eq!(
            InvocationError::fatal("bad key").exhausted(1),
            InvocationError::fatal("bad key")
        );
    }

    #[test]
    fn test_domain_error_conversion() {
        let err: InvocationError = DomainError::ModelUnbound { tier: ModelTier::Mid }.into();
        assert_eq!(err.kind(), ErrorKind::Fatal);

        let err: InvocationError = DomainError::Cancelled.into();
        assert_eq!(err, InvocationError::Cancelled);
    }

    #[test]
    fn test_error_kind_roundtrip_strings() {
        for kind in [ErrorKind::Retryable, ErrorKind::Fatal, ErrorKind::Cancelled] {
            assert_eq!(ErrorKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::from_str("canceled"), Some(ErrorKind::Cancelled));
        assert_eq!(ErrorKind::from_str("nope"), None);
    }

    #[test]
    fn test_invocation_error_serializes_tagged() {
        let json = serde_json::to_string(&InvocationError::retryable("slow")).unwrap();
        assert_eq!(json, r#"{"kind":"retryable","message":"slow"}"#);
    }
}

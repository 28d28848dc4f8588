//! Model provider port - interface for language-model backends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::errors::{ErrorKind, InvocationError};
use crate::domain::models::{AgentRole, ModelBinding};

/// A single completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Role making the call, for logging and scripted replies.
    pub role: AgentRole,
    /// Provider-specific model name.
    pub model: String,
    /// System prompt, if any.
    pub system: Option<String>,
    /// User prompt.
    pub prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Request for `role` against `binding`.
    pub fn new(role: AgentRole, binding: &ModelBinding, prompt: impl Into<String>) -> Self {
        Self {
            role,
            model: binding.model.clone(),
            system: None,
            prompt: prompt.into(),
            temperature: binding.temperature,
            max_tokens: binding.max_tokens,
        }
    }

    /// Attach a system prompt.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// A model reply with token usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    /// Reply text.
    pub text: String,
    /// Model that actually answered.
    pub model: String,
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

/// Errors surfaced by model providers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed ({status}): {message}")]
    Authentication { status: u16, message: String },

    #[error("invalid request ({status}): {message}")]
    InvalidRequest { status: u16, message: String },

    #[error("malformed model output: {0}")]
    MalformedOutput(String),

    #[error("provider misconfigured: {0}")]
    Configuration(String),
}

impl ProviderError {
    /// Map an HTTP error status to a provider error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited(message),
            401 | 403 => Self::Authentication { status, message },
            500..=599 => Self::Server { status, message },
            _ => Self::InvalidRequest { status, message },
        }
    }

    /// Retryable or fatal, by cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited(_)
            | Self::Server { .. }
            | Self::Timeout
            | Self::Network(_)
            | Self::MalformedOutput(_) => ErrorKind::Retryable,
            Self::Authentication { .. } | Self::InvalidRequest { .. } | Self::Configuration(_) => {
                ErrorKind::Fatal
            }
        }
    }
}

impl From<ProviderError> for InvocationError {
    fn from(err: ProviderError) -> Self {
        match err.kind() {
            ErrorKind::Retryable => Self::Retryable(err.to_string()),
            ErrorKind::Fatal => Self::Fatal(err.to_string()),
            ErrorKind::Cancelled => Self::Cancelled,
        }
    }
}

/// Trait for language-model backends.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider type name, e.g. `openai` or `anthropic`.
    fn name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ProviderError::from_status(429, "slow down").kind(), ErrorKind::Retryable);
        assert_eq!(ProviderError::from_status(503, "busy").kind(), ErrorKind::Retryable);
        assert_eq!(ProviderError::from_status(400, "bad").kind(), ErrorKind::Fatal);
        assert_eq!(ProviderError::from_status(401, "key").kind(), ErrorKind::Fatal);
        assert_eq!(ProviderError::from_status(404, "model").kind(), ErrorKind::Fatal);
        assert_eq!(ProviderError::Timeout.kind(), ErrorKind::Retryable);
        assert_eq!(
            ProviderError::MalformedOutput("not json".into()).kind(),
            ErrorKind::Retryable
        );
    }

    #[test]
    fn test_into_invocation_error() {
        let err: InvocationError = ProviderError::Timeout.into();
        assert!(err.is_retryable());
        let err: InvocationError = ProviderError::from_status(403, "nope").into();
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }
}

//! Provider registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ProviderConfig, ProviderKind};
use crate::domain::ports::ModelProvider;

use super::anthropic::AnthropicProvider;
use super::mock::MockModelProvider;
use super::openai_compatible::OpenAiCompatibleProvider;

/// Maps the provider key named by a model binding to its implementation.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every provider declared in configuration.
    pub fn from_config(configs: &BTreeMap<String, ProviderConfig>) -> DomainResult<Self> {
        let mut registry = Self::new();
        for (key, config) in configs {
            let provider: Arc<dyn ModelProvider> = match config.kind {
                ProviderKind::Openai => Arc::new(OpenAiCompatibleProvider::new(config)?),
                ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(config)?),
                ProviderKind::Mock => Arc::new(MockModelProvider::with_canned_responses()),
            };
            tracing::debug!(provider = %key, kind = provider.name(), "registered model provider");
            registry.insert(key.clone(), provider);
        }
        Ok(registry)
    }

    /// Register `provider` under `key`.
    pub fn with_provider(mut self, key: impl Into<String>, provider: Arc<dyn ModelProvider>) -> Self {
        self.insert(key, provider);
        self
    }

    /// Register `provider` under `key`, replacing any existing entry.
    pub fn insert(&mut self, key: impl Into<String>, provider: Arc<dyn ModelProvider>) {
        self.providers.insert(key.into(), provider);
    }

    /// Look up a provider. Unknown keys are a configuration error.
    pub fn get(&self, key: &str) -> DomainResult<Arc<dyn ModelProvider>> {
        self.providers
            .get(key)
            .cloned()
            .ok_or_else(|| DomainError::UnknownProvider(key.to_string()))
    }

    /// Registered provider keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.providers.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Whether no provider is registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

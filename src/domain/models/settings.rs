//! Settings models.
//!
//! A [`SettingsLayer`] is one tier of configuration (mission override, user
//! setting, environment, hard-coded default) where every field is optional.
//! [`EffectiveSettings`] is the fully resolved, immutable value a mission runs
//! with for its whole lifetime.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use super::agent::AgentRole;
use crate::domain::errors::{DomainError, DomainResult};

/// Abstract model-quality class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Fast,
    Mid,
    Intelligent,
    Verifier,
}

impl ModelTier {
    /// Every tier, cheapest first.
    pub const ALL: [ModelTier; 4] = [Self::Fast, Self::Mid, Self::Intelligent, Self::Verifier];

    /// Lowercase tier name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Mid => "mid",
            Self::Intelligent => "intelligent",
            Self::Verifier => "verifier",
        }
    }

    /// Parse a tier name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fast" => Some(Self::Fast),
            "mid" => Some(Self::Mid),
            "intelligent" => Some(Self::Intelligent),
            "verifier" => Some(Self::Verifier),
            _ => None,
        }
    }

    /// Next tier to try when this one has no binding. `None` for Mid.
    pub fn fallback(&self) -> Option<ModelTier> {
        match self {
            Self::Fast | Self::Intelligent => Some(Self::Mid),
            Self::Verifier => Some(Self::Intelligent),
            Self::Mid => None,
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_provider() -> String {
    "default".to_string()
}

/// A concrete model endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBinding {
    /// Key into the provider registry.
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelBinding {
    /// Binding to `model` on the default provider.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            provider: default_provider(),
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// Use `provider` instead of the default.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }
}

/// Per-tier model bindings. Any tier may be unbound.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierBindings {
    pub fast: Option<ModelBinding>,
    pub mid: Option<ModelBinding>,
    pub intelligent: Option<ModelBinding>,
    pub verifier: Option<ModelBinding>,
}

impl TierBindings {
    /// Binding for `tier`, if set.
    pub fn get(&self, tier: ModelTier) -> Option<&ModelBinding> {
        match tier {
            ModelTier::Fast => self.fast.as_ref(),
            ModelTier::Mid => self.mid.as_ref(),
            ModelTier::Intelligent => self.intelligent.as_ref(),
            ModelTier::Verifier => self.verifier.as_ref(),
        }
    }

    /// Bind `tier` to `binding`.
    pub fn set(&mut self, tier: ModelTier, binding: ModelBinding) {
        let slot = match tier {
            ModelTier::Fast => &mut self.fast,
            ModelTier::Mid => &mut self.mid,
            ModelTier::Intelligent => &mut self.intelligent,
            ModelTier::Verifier => &mut self.verifier,
        };
        *slot = Some(binding);
    }
}

/// Named research depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationPreset {
    Quick,
    #[default]
    Standard,
    Deep,
    Custom,
}

impl IterationPreset {
    /// Lowercase preset name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Standard => "standard",
            Self::Deep => "deep",
            Self::Custom => "custom",
        }
    }

    /// Parse a preset name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "quick" => Some(Self::Quick),
            "standard" => Some(Self::Standard),
            "deep" => Some(Self::Deep),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    /// Targets implied by a named preset. `None` for Custom.
    pub fn targets(&self) -> Option<IterationTargets> {
        match self {
            Self::Quick => Some(IterationTargets {
                max_iterations: 1,
                queries_per_round: 2,
                notes_per_section: 2,
                max_research_rounds: 1,
            }),
            Self::Standard => Some(IterationTargets {
                max_iterations: 2,
                queries_per_round: 3,
                notes_per_section: 3,
                max_research_rounds: 2,
            }),
            Self::Deep => Some(IterationTargets {
                max_iterations: 4,
                queries_per_round: 5,
                notes_per_section: 5,
                max_research_rounds: 3,
            }),
            Self::Custom => None,
        }
    }
}

/// Iteration and quality targets for one mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationTargets {
    /// Hard cap on research→write→reflect cycles.
    pub max_iterations: u32,
    /// Queries issued per research round.
    pub queries_per_round: u32,
    /// Notes each plan section needs before writing starts.
    pub notes_per_section: u32,
    /// Research rounds allowed per iteration before writing is forced.
    pub max_research_rounds: u32,
}

/// One tier of settings. Every field is optional; absent fields fall through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsLayer {
    pub worker_pool_limit: Option<usize>,
    pub global_model_call_limit: Option<usize>,
    pub per_mission_model_call_limit: Option<usize>,
    pub search_call_limit: Option<usize>,
    pub gate_wait_timeout_ms: Option<u64>,
    pub call_timeout_ms: Option<u64>,
    pub max_agent_retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    pub iteration_preset: Option<IterationPreset>,
    pub max_iterations: Option<u32>,
    pub queries_per_round: Option<u32>,
    pub notes_per_section: Option<u32>,
    pub max_research_rounds: Option<u32>,
    pub results_per_query: Option<usize>,
    pub fetch_top_results: Option<usize>,
    pub verification_enabled: Option<bool>,
    pub models: TierBindings,
    pub role_tiers: BTreeMap<AgentRole, ModelTier>,
}

impl SettingsLayer {
    /// Hard-coded defaults: the lowest tier. Model bindings are left unbound.
    pub fn system_defaults() -> Self {
        Self {
            worker_pool_limit: Some(20),
            global_model_call_limit: Some(100),
            per_mission_model_call_limit: Some(4),
            search_call_limit: Some(2),
            gate_wait_timeout_ms: Some(300_000),
            call_timeout_ms: Some(120_000),
            max_agent_retries: Some(2),
            retry_backoff_ms: Some(1_000),
            iteration_preset: Some(IterationPreset::Standard),
            max_iterations: None,
            queries_per_round: None,
            notes_per_section: None,
            max_research_rounds: None,
            results_per_query: Some(5),
            fetch_top_results: Some(0),
            verification_enabled: Some(true),
            models: TierBindings::default(),
            role_tiers: BTreeMap::new(),
        }
    }

    /// Flat keys accepted by [`SettingsLayer::from_key_values`]. Model bindings use
    /// `models.<tier>[.field]` and role overrides use `role_tiers.<role>`.
    pub const SCALAR_KEYS: [&'static str; 16] = [
        "worker_pool_limit",
        "global_model_call_limit",
        "per_mission_model_call_limit",
        "search_call_limit",
        "gate_wait_timeout_ms",
        "call_timeout_ms",
        "max_agent_retries",
        "retry_backoff_ms",
        "iteration_preset",
        "max_iterations",
        "queries_per_round",
        "notes_per_section",
        "max_research_rounds",
        "results_per_query",
        "fetch_top_results",
        "verification_enabled",
    ];

    /// Whether `key` names a settable field.
    pub fn is_known_key(key: &str) -> bool {
        key.starts_with("models.")
            || key.starts_with("role_tiers.")
            || Self::SCALAR_KEYS.contains(&key)
    }

    /// Parse a flat key/value map, as read from a settings store.
    ///
    /// Unknown keys are ignored. Known keys with unparseable values are a
    /// configuration error.
    pub fn from_key_values(values: &HashMap<String, String>) -> DomainResult<Self> {
        let mut layer = Self::default();

        for (key, raw) in values {
            let value = raw.trim();
            match key.as_str() {
                "worker_pool_limit" => layer.worker_pool_limit = Some(parse(key, value)?),
                "global_model_call_limit" => {
                    layer.global_model_call_limit = Some(parse(key, value)?);
                }
                "per_mission_model_call_limit" => {
                    layer.per_mission_model_call_limit = Some(parse(key, value)?);
                }
                "search_call_limit" => layer.search_call_limit = Some(parse(key, value)?),
                "gate_wait_timeout_ms" => layer.gate_wait_timeout_ms = Some(parse(key, value)?),
                "call_timeout_ms" => layer.call_timeout_ms = Some(parse(key, value)?),
                "max_agent_retries" => layer.max_agent_retries = Some(parse(key, value)?),
                "retry_backoff_ms" => layer.retry_backoff_ms = Some(parse(key, value)?),
                "iteration_preset" => {
                    layer.iteration_preset = Some(IterationPreset::from_str(value).ok_or_else(
                        || DomainError::Configuration(format!("invalid {key}: {value}")),
                    )?);
                }
                "max_iterations" => layer.max_iterations = Some(parse(key, value)?),
                "queries_per_round" => layer.queries_per_round = Some(parse(key, value)?),
                "notes_per_section" => layer.notes_per_section = Some(parse(key, value)?),
                "max_research_rounds" => layer.max_research_rounds = Some(parse(key, value)?),
                "results_per_query" => layer.results_per_query = Some(parse(key, value)?),
                "fetch_top_results" => layer.fetch_top_results = Some(parse(key, value)?),
                "verification_enabled" => layer.verification_enabled = Some(parse(key, value)?),
                other => {
                    if let Some(rest) = other.strip_prefix("models.") {
                        apply_model_key(&mut layer.models, rest, value)?;
                    } else if let Some(role) = other.strip_prefix("role_tiers.") {
                        let role = AgentRole::from_str(role).ok_or_else(|| {
                            DomainError::Configuration(format!("unknown agent role in {key}"))
                        })?;
                        let tier = ModelTier::from_str(value).ok_or_else(|| {
                            DomainError::Configuration(format!("invalid {key}: {value}"))
                        })?;
                        layer.role_tiers.insert(role, tier);
                    } else {
                        tracing::debug!(key = %other, "ignoring unknown settings key");
                    }
                }
            }
        }

        Ok(layer)
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> DomainResult<T> {
    value
        .parse()
        .map_err(|_| DomainError::Configuration(format!("invalid {key}: {value}")))
}

/// `models.<tier>` sets the model; `models.<tier>.provider` sets its provider.
fn apply_model_key(models: &mut TierBindings, rest: &str, value: &str) -> DomainResult<()> {
    let (tier_name, field) = rest.split_once('.').unwrap_or((rest, "model"));
    let tier = ModelTier::from_str(tier_name)
        .ok_or_else(|| DomainError::Configuration(format!("unknown model tier: {tier_name}")))?;

    let mut binding = models
        .get(tier)
        .cloned()
        .unwrap_or_else(|| ModelBinding::new(String::new()));
    match field {
        "model" => binding.model = value.to_string(),
        "provider" => binding.provider = value.to_string(),
        "temperature" => binding.temperature = Some(parse("temperature", value)?),
        "max_tokens" => binding.max_tokens = Some(parse("max_tokens", value)?),
        other => {
            return Err(DomainError::Configuration(format!(
                "unknown model binding field: {other}"
            )))
        }
    }
    models.set(tier, binding);
    Ok(())
}

/// Sizes of the four admission gates plus the wait budget for each acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyLimits {
    pub worker_pool_limit: usize,
    pub global_model_call_limit: usize,
    pub per_mission_model_call_limit: usize,
    pub search_call_limit: usize,
    pub gate_wait_timeout_ms: u64,
}

impl ConcurrencyLimits {
    /// Per-acquisition wait budget.
    pub fn gate_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.gate_wait_timeout_ms)
    }
}

/// Fully resolved settings. Immutable for the lifetime of a mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveSettings {
    pub concurrency: ConcurrencyLimits,
    pub call_timeout_ms: u64,
    pub max_agent_retries: u32,
    pub retry_backoff_ms: u64,
    pub iteration_preset: IterationPreset,
    pub iteration: IterationTargets,
    pub results_per_query: usize,
    pub fetch_top_results: usize,
    pub verification_enabled: bool,
    pub models: TierBindings,
    pub role_tiers: BTreeMap<AgentRole, ModelTier>,
}

impl EffectiveSettings {
    /// Cap on write/reflect cycles.
    pub fn max_iterations(&self) -> u32 {
        self.iteration.max_iterations
    }

    /// Timeout applied to each external call.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Base delay between retries.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Tier for a role, honoring per-role overrides.
    pub fn tier_for(&self, role: AgentRole) -> ModelTier {
        self.role_tiers
            .get(&role)
            .copied()
            .unwrap_or_else(|| role.default_tier())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_tier_fallback_chain() {
        assert_eq!(ModelTier::Fast.fallback(), Some(ModelTier::Mid));
        assert_eq!(ModelTier::Intelligent.fallback(), Some(ModelTier::Mid));
        assert_eq!(ModelTier::Verifier.fallback(), Some(ModelTier::Intelligent));
        assert_eq!(ModelTier::Mid.fallback(), None);
    }

    #[test]
    fn test_preset_targets() {
        assert_eq!(IterationPreset::Quick.targets().unwrap().max_iterations, 1);
        assert_eq!(IterationPreset::Standard.targets().unwrap().max_iterations, 2);
        assert_eq!(IterationPreset::Deep.targets().unwrap().max_iterations, 4);
        assert!(IterationPreset::Custom.targets().is_none());
    }

    #[test]
    fn test_from_key_values() {
        let layer = SettingsLayer::from_key_values(&kv(&[
            ("per_mission_model_call_limit", "3"),
            ("iteration_preset", "deep"),
            ("verification_enabled", "false"),
            ("models.mid", "gpt-4o-mini"),
            ("models.mid.provider", "openai"),
            ("models.intelligent", "o3"),
            ("role_tiers.writing", "intelligent"),
            ("theme", "dark"),
        ]))
        .unwrap();

        assert_eq!(layer.per_mission_model_call_limit, Some(3));
        assert_eq!(layer.iteration_preset, Some(IterationPreset::Deep));
        assert_eq!(layer.verification_enabled, Some(false));
        let mid = layer.models.mid.unwrap();
        assert_eq!(mid.model, "gpt-4o-mini");
        assert_eq!(mid.provider, "openai");
        assert_eq!(layer.models.intelligent.unwrap().provider, "default");
        assert_eq!(
            layer.role_tiers.get(&AgentRole::Writing),
            Some(&ModelTier::Intelligent)
        );
    }

    #[test]
    fn test_from_key_values_rejects_bad_values() {
        assert!(matches!(
            SettingsLayer::from_key_values(&kv(&[("max_iterations", "many")])),
            Err(DomainError::Configuration(_))
        ));
        assert!(matches!(
            SettingsLayer::from_key_values(&kv(&[("models.huge", "x")])),
            Err(DomainError::Configuration(_))
        ));
        assert!(matches!(
            SettingsLayer::from_key_values(&kv(&[("role_tiers.critic", "fast")])),
            Err(DomainError::Configuration(_))
        ));
    }

    #[test]
    fn test_layer_yaml_parsing() {
        let yaml = r"
per_mission_model_call_limit: 2
iteration_preset: quick
models:
  mid:
    model: llama3
    provider: local
role_tiers:
  reflection: mid
";
        let layer: SettingsLayer = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(layer.per_mission_model_call_limit, Some(2));
        assert_eq!(layer.iteration_preset, Some(IterationPreset::Quick));
        assert_eq!(layer.models.mid.unwrap().provider, "local");
        assert!(layer.models.fast.is_none());
        assert_eq!(layer.role_tiers.get(&AgentRole::Reflection), Some(&ModelTier::Mid));
    }
}

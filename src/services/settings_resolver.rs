//! Settings resolution.
//!
//! Merges the four settings tiers field by field with precedence
//! mission → user → environment → default. Resolution is a pure function of
//! its inputs; the result is stored on the mission and never recomputed.

use std::collections::BTreeMap;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ConcurrencyLimits, EffectiveSettings, IterationPreset, IterationTargets, ModelBinding,
    ModelTier, SettingsLayer, TierBindings,
};

/// Resolve effective settings from the four tiers.
///
/// Fields missing from every tier fall back to [`SettingsLayer::system_defaults`].
/// Concurrency limits are floored at 1. The Mid tier must be bound, and every
/// bound tier must name a non-empty model.
pub fn resolve(
    mission: &SettingsLayer,
    user: &SettingsLayer,
    env: &SettingsLayer,
    defaults: &SettingsLayer,
) -> DomainResult<EffectiveSettings> {
    let builtin = SettingsLayer::system_defaults();
    let layers = [mission, user, env, defaults, &builtin];

    macro_rules! pick {
        ($field:ident) => {
            layers.iter().find_map(|layer| layer.$field)
        };
    }

    let concurrency = resolve_concurrency(&layers);

    let iteration_preset = pick!(iteration_preset).unwrap_or_default();
    let iteration = match iteration_preset.targets() {
        Some(targets) => targets,
        None => {
            let standard = IterationPreset::Standard
                .targets()
                .unwrap_or(IterationTargets {
                    max_iterations: 2,
                    queries_per_round: 3,
                    notes_per_section: 3,
                    max_research_rounds: 2,
                });
            IterationTargets {
                max_iterations: pick!(max_iterations).unwrap_or(standard.max_iterations),
                queries_per_round: pick!(queries_per_round).unwrap_or(standard.queries_per_round),
                notes_per_section: pick!(notes_per_section).unwrap_or(standard.notes_per_section),
                max_research_rounds: pick!(max_research_rounds)
                    .unwrap_or(standard.max_research_rounds),
            }
        }
    };
    let iteration = IterationTargets {
        max_iterations: iteration.max_iterations.max(1),
        queries_per_round: iteration.queries_per_round.max(1),
        notes_per_section: iteration.notes_per_section,
        max_research_rounds: iteration.max_research_rounds.max(1),
    };

    let mut models = TierBindings::default();
    for tier in ModelTier::ALL {
        if let Some(binding) = layers.iter().find_map(|layer| layer.models.get(tier)) {
            validate_binding(tier, binding)?;
            models.set(tier, binding.clone());
        }
    }
    if models.mid.is_none() {
        return Err(DomainError::ModelUnbound {
            tier: ModelTier::Mid,
        });
    }

    // Lowest tier first so higher tiers overwrite.
    let mut role_tiers = BTreeMap::new();
    for layer in layers.iter().rev() {
        role_tiers.extend(layer.role_tiers.iter().map(|(role, tier)| (*role, *tier)));
    }

    Ok(EffectiveSettings {
        concurrency,
        call_timeout_ms: pick!(call_timeout_ms).unwrap_or(120_000),
        max_agent_retries: pick!(max_agent_retries).unwrap_or(2),
        retry_backoff_ms: pick!(retry_backoff_ms).unwrap_or(1_000),
        iteration_preset,
        iteration,
        results_per_query: pick!(results_per_query).unwrap_or(5).max(1),
        fetch_top_results: pick!(fetch_top_results).unwrap_or(0),
        verification_enabled: pick!(verification_enabled).unwrap_or(true),
        models,
        role_tiers,
    })
}

/// Concurrency limits from `layers`, highest precedence first.
///
/// Model bindings play no part here, so process-wide gates can be sized
/// before any tier binds a model.
pub fn resolve_concurrency(layers: &[&SettingsLayer]) -> ConcurrencyLimits {
    macro_rules! pick {
        ($field:ident) => {
            layers.iter().find_map(|layer| layer.$field)
        };
    }

    ConcurrencyLimits {
        worker_pool_limit: pick!(worker_pool_limit).unwrap_or(20).max(1),
        global_model_call_limit: pick!(global_model_call_limit).unwrap_or(100).max(1),
        per_mission_model_call_limit: pick!(per_mission_model_call_limit).unwrap_or(4).max(1),
        search_call_limit: pick!(search_call_limit).unwrap_or(2).max(1),
        gate_wait_timeout_ms: pick!(gate_wait_timeout_ms).unwrap_or(300_000),
    }
}

fn validate_binding(tier: ModelTier, binding: &ModelBinding) -> DomainResult<()> {
    if binding.model.trim().is_empty() {
        return Err(DomainError::Configuration(format!(
            "{tier} tier binding has an empty model name"
        )));
    }
    if binding.provider.trim().is_empty() {
        return Err(DomainError::Configuration(format!(
            "{tier} tier binding has an empty provider"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AgentRole;

    fn defaults_with_mid() -> SettingsLayer {
        let mut layer = SettingsLayer::system_defaults();
        layer.models.mid = Some(ModelBinding::new("mid-model"));
        layer
    }

    fn empty() -> SettingsLayer {
        SettingsLayer::default()
    }

    #[test]
    fn test_precedence_mission_over_user_over_env() {
        let mission = SettingsLayer {
            per_mission_model_call_limit: Some(1),
            ..Default::default()
        };
        let user = SettingsLayer {
            per_mission_model_call_limit: Some(2),
            search_call_limit: Some(7),
            ..Default::default()
        };
        let env = SettingsLayer {
            search_call_limit: Some(9),
            worker_pool_limit: Some(11),
            ..Default::default()
        };

        let settings = resolve(&mission, &user, &env, &defaults_with_mid()).unwrap();
        assert_eq!(settings.concurrency.per_mission_model_call_limit, 1);
        assert_eq!(settings.concurrency.search_call_limit, 7);
        assert_eq!(settings.concurrency.worker_pool_limit, 11);
        assert_eq!(settings.concurrency.global_model_call_limit, 100);
    }

    #[test]
    fn test_concurrency_floored_at_one() {
        let mission = SettingsLayer {
            worker_pool_limit: Some(0),
            global_model_call_limit: Some(0),
            per_mission_model_call_limit: Some(0),
            search_call_limit: Some(0),
            ..Default::default()
        };
        let settings = resolve(&mission, &empty(), &empty(), &defaults_with_mid()).unwrap();
        assert_eq!(settings.concurrency.worker_pool_limit, 1);
        assert_eq!(settings.concurrency.global_model_call_limit, 1);
        assert_eq!(settings.concurrency.per_mission_model_call_limit, 1);
        assert_eq!(settings.concurrency.search_call_limit, 1);
    }

    #[test]
    fn test_per_mission_may_exceed_global() {
        let mission = SettingsLayer {
            global_model_call_limit: Some(2),
            per_mission_model_call_limit: Some(8),
            ..Default::default()
        };
        let settings = resolve(&mission, &empty(), &empty(), &defaults_with_mid()).unwrap();
        assert_eq!(settings.concurrency.per_mission_model_call_limit, 8);
        assert_eq!(settings.concurrency.global_model_call_limit, 2);
    }

    #[test]
    fn test_mid_must_be_bound() {
        let err = resolve(&empty(), &empty(), &empty(), &SettingsLayer::system_defaults())
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::ModelUnbound {
                tier: ModelTier::Mid
            }
        ));
    }

    #[test]
    fn test_empty_model_name_rejected() {
        let mut user = empty();
        user.models.fast = Some(ModelBinding::new("  "));
        let err = resolve(&empty(), &user, &empty(), &defaults_with_mid()).unwrap_err();
        assert!(matches!(err, DomainError::Configuration(_)));
    }

    #[test]
    fn test_bindings_resolved_per_tier() {
        let mut mission = empty();
        mission.models.intelligent = Some(ModelBinding::new("big"));
        let mut env = empty();
        env.models.intelligent = Some(ModelBinding::new("env-big"));
        env.models.fast = Some(ModelBinding::new("small"));

        let settings = resolve(&mission, &empty(), &env, &defaults_with_mid()).unwrap();
        assert_eq!(settings.models.intelligent.unwrap().model, "big");
        assert_eq!(settings.models.fast.unwrap().model, "small");
        assert_eq!(settings.models.mid.unwrap().model, "mid-model");
        assert!(settings.models.verifier.is_none());
    }

    #[test]
    fn test_named_preset_sets_targets() {
        let mission = SettingsLayer {
            iteration_preset: Some(IterationPreset::Quick),
            max_iterations: Some(9),
            ..Default::default()
        };
        let settings = resolve(&mission, &empty(), &empty(), &defaults_with_mid()).unwrap();
        assert_eq!(settings.max_iterations(), 1);
        assert_eq!(settings.iteration.queries_per_round, 2);
    }

    #[test]
    fn test_custom_preset_reads_fields_with_standard_fallback() {
        let mission = SettingsLayer {
            iteration_preset: Some(IterationPreset::Custom),
            max_iterations: Some(3),
            ..Default::default()
        };
        let user = SettingsLayer {
            notes_per_section: Some(1),
            ..Default::default()
        };
        let settings = resolve(&mission, &user, &empty(), &defaults_with_mid()).unwrap();
        assert_eq!(settings.iteration_preset, IterationPreset::Custom);
        assert_eq!(settings.iteration.max_iterations, 3);
        assert_eq!(settings.iteration.notes_per_section, 1);
        assert_eq!(settings.iteration.queries_per_round, 3);
        assert_eq!(settings.iteration.max_research_rounds, 2);
    }

    #[test]
    fn test_role_tier_overrides_merge() {
        let mut user = empty();
        user.role_tiers.insert(AgentRole::Writing, ModelTier::Intelligent);
        user.role_tiers.insert(AgentRole::Planning, ModelTier::Mid);
        let mut mission = empty();
        mission.role_tiers.insert(AgentRole::Writing, ModelTier::Fast);

        let settings = resolve(&mission, &user, &empty(), &defaults_with_mid()).unwrap();
        assert_eq!(settings.tier_for(AgentRole::Writing), ModelTier::Fast);
        assert_eq!(settings.tier_for(AgentRole::Planning), ModelTier::Mid);
        assert_eq!(settings.tier_for(AgentRole::Reflection), ModelTier::Intelligent);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let user = SettingsLayer {
            max_agent_retries: Some(5),
            ..Default::default()
        };
        let a = resolve(&empty(), &user, &empty(), &defaults_with_mid()).unwrap();
        let b = resolve(&empty(), &user, &empty(), &defaults_with_mid()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_concurrency_resolves_without_model_bindings() {
        let env = SettingsLayer {
            global_model_call_limit: Some(8),
            search_call_limit: Some(0),
            ..Default::default()
        };
        let builtin = SettingsLayer::system_defaults();
        assert!(builtin.models.mid.is_none());

        let limits = resolve_concurrency(&[&env, &builtin]);
        assert_eq!(limits.global_model_call_limit, 8);
        assert_eq!(limits.search_call_limit, 1);
        assert_eq!(limits.worker_pool_limit, builtin.worker_pool_limit.unwrap_or(20));

        // Same limits as a full resolution once Mid is bound.
        let full = resolve(&empty(), &empty(), &env, &defaults_with_mid()).unwrap();
        assert_eq!(full.concurrency, limits);
    }
}

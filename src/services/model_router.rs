//! Role-aware model routing.
//!
//! Maps an agent role to a model tier using the static role table (or a
//! per-role override from settings), then walks the fixed fallback chain until
//! a bound tier is found. Query Strategy and Research move up to the
//! Intelligent tier when retried.

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentRole, EffectiveSettings, ModelBinding, ModelTier};

/// Result of a routing decision.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedModel {
    /// Role the binding was chosen for.
    pub role: AgentRole,
    /// Tier the role asked for.
    pub tier: ModelTier,
    /// Tier whose binding is actually used after fallback.
    pub resolved_tier: ModelTier,
    /// Provider and model to call.
    pub binding: ModelBinding,
    /// Reason for selection.
    pub reason: String,
    /// Whether this was escalated because of a retry.
    pub escalated: bool,
}

/// Select the model for one invocation of `role`.
///
/// `retry_attempt` is zero for the first attempt.
pub fn route(
    role: AgentRole,
    settings: &EffectiveSettings,
    retry_attempt: u32,
) -> DomainResult<RoutedModel> {
    let base = settings.tier_for(role);
    let escalated = retry_attempt > 0 && role.escalates_on_retry() && base != ModelTier::Intelligent;
    let tier = if escalated { ModelTier::Intelligent } else { base };

    let mut current = tier;
    loop {
        if let Some(binding) = settings.models.get(current) {
            let reason = match (escalated, current == tier) {
                (true, true) => format!("escalated from {base} on retry {retry_attempt}"),
                (true, false) => format!("escalated from {base}, fell back to {current}"),
                (false, true) => format!("{role} runs on {tier}"),
                (false, false) => format!("{tier} unbound, fell back to {current}"),
            };
            return Ok(RoutedModel {
                role,
                tier,
                resolved_tier: current,
                binding: binding.clone(),
                reason,
                escalated,
            });
        }
        match current.fallback() {
            Some(next) => current = next,
            None => return Err(DomainError::ModelUnbound { tier: current }),
        }
    }
}

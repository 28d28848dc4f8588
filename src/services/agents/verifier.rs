//! Verifier agent: flags draft claims the notes do not support.

use async_trait::async_trait;
use serde::Deserialize;

use super::{render_notes, settle, wrong_input, Agent, AgentContext};
use crate::domain::errors::InvocationError;
use crate::domain::models::{
    AgentInput, AgentOutput, AgentResult, AgentRole, DraftVersion, Note, UnsupportedClaim,
    VerificationReport,
};

const SYSTEM: &str = "Check every factual claim in the draft against the labelled notes. Reply \
with JSON only: {\"checked_claims\": number, \"unsupported_claims\": [{\"claim\": string, \
\"reason\": string}]}.";

#[derive(Debug, Deserialize)]
struct VerifierReply {
    #[serde(default)]
    checked_claims: u32,
    unsupported_claims: Vec<UnsupportedClaim>,
}

/// Flags draft claims the notes do not support.
pub struct VerifierAgent;

impl VerifierAgent {
    async fn verify(
        &self,
        ctx: &AgentContext,
        draft: &DraftVersion,
        notes: &[Note],
    ) -> Result<AgentResult, InvocationError> {
        let prompt = format!(
            "Notes:\n{}\n\nDraft version {}:\n{}",
            render_notes(notes),
            draft.version,
            draft.content.to_markdown()
        );
        let reply: VerifierReply = ctx.complete_json(SYSTEM, prompt).await?;

        let unsupported_claims: Vec<UnsupportedClaim> = reply
            .unsupported_claims
            .into_iter()
            .filter(|c| !c.claim.trim().is_empty())
            .collect();
        let report = VerificationReport {
            draft_version: draft.version,
            checked_claims: reply.checked_claims.max(unsupported_claims.len() as u32),
            unsupported_claims,
        };
        Ok(AgentResult::Terminal(AgentOutput::Verification(report)))
    }
}

#[async_trait]
impl Agent for VerifierAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Verifier
    }

    async fn invoke(&self, ctx: &AgentContext, input: AgentInput) -> AgentResult {
        match &input {
            AgentInput::Verify { draft, notes } => settle(self.verify(ctx, draft, notes).await),
            other => wrong_input(self.role(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::providers::MockModelProvider;
    use crate::domain::models::DraftContent;
    use crate::services::agents::test_support::context;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;

    fn input() -> AgentInput {
        AgentInput::Verify {
            draft: DraftVersion {
                version: 3,
                parent_version: Some(2),
                iteration: 2,
                content: DraftContent::default(),
                invocation_seq: 11,
                created_at: Utc::now(),
            },
            notes: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_report_carries_draft_version() {
        let provider = Arc::new(MockModelProvider::new());
        provider.push_json(
            AgentRole::Verifier,
            json!({"unsupported_claims": [
                {"claim": "The sky is green at noon", "reason": "no note"},
                {"claim": " "}
            ]}),
        );
        let ctx = context(AgentRole::Verifier, provider);

        let AgentResult::Terminal(AgentOutput::Verification(report)) = VerifierAgent.invoke(&ctx, input()).await
        else {
            panic!("expected report");
        };
        assert_eq!(report.draft_version, 3);
        assert_eq!(report.unsupported_claims.len(), 1);
        assert_eq!(report.checked_claims, 1);
        assert!(!report.passed());
    }
}

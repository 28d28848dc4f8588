//! Router agent: classifies a free-form instruction into a concrete action.

use async_trait::async_trait;
use serde::Deserialize;

use super::{settle, wrong_input, Agent, AgentContext};
use crate::domain::errors::InvocationError;
use crate::domain::models::{
    AgentInput, AgentOutput, AgentResult, AgentRole, MissionPhase, RouterAction,
};

const SYSTEM: &str = "Classify the user's instruction. Reply with JSON only: \
{\"action\": \"start_research\" | \"revise_draft\" | \"answer\"}. \
Use revise_draft only when a draft exists and the user asks to change it.";

#[derive(Debug, Deserialize)]
struct RouteReply {
    action: RouterAction,
}

/// Classifies a user message into an action.
pub struct RouterAgent;

impl RouterAgent {
    async fn route(
        &self,
        ctx: &AgentContext,
        instruction: &str,
        phase: Option<MissionPhase>,
    ) -> Result<AgentResult, InvocationError> {
        let context = match phase {
            Some(phase) => format!("The user has a mission in phase {phase}."),
            None => "The user has no mission yet.".to_string(),
        };
        let prompt = format!("{context}\n\nInstruction:\n{instruction}");
        let reply: RouteReply = ctx.complete_json(SYSTEM, prompt).await?;

        // Without a mission there is no draft to revise.
        let action = match (reply.action, phase) {
            (RouterAction::ReviseDraft, None) => RouterAction::StartResearch,
            (action, _) => action,
        };
        Ok(AgentResult::Terminal(AgentOutput::Route(action)))
    }
}

#[async_trait]
impl Agent for RouterAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Router
    }

    async fn invoke(&self, ctx: &AgentContext, input: AgentInput) -> AgentResult {
        match &input {
            AgentInput::Route { instruction, phase } => {
                settle(self.route(ctx, instruction, *phase).await)
            }
            other => wrong_input(self.role(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::providers::{MockModelProvider, MockReply};
    use crate::services::agents::test_support::context;
    use serde_json::json;
    use std::sync::Arc;

    fn route(phase: Option<MissionPhase>) -> AgentInput {
        AgentInput::Route {
            instruction: "make it shorter".to_string(),
            phase,
        }
    }

    #[tokio::test]
    async fn test_route_actions() {
        let provider = Arc::new(MockModelProvider::new());
        provider.push_json(AgentRole::Router, json!({"action": "revise_draft"}));
        provider.push_json(AgentRole::Router, json!({"action": "revise_draft"}));
        provider.push(AgentRole::Router, MockReply::text("```json\n{\"action\": \"answer\"}\n```"));
        let ctx = context(AgentRole::Router, provider);

        assert_eq!(
            RouterAgent.invoke(&ctx, route(Some(MissionPhase::Finalized))).await,
            AgentResult::Terminal(AgentOutput::Route(RouterAction::ReviseDraft))
        );
        assert_eq!(
            RouterAgent.invoke(&ctx, route(None)).await,
            AgentResult::Terminal(AgentOutput::Route(RouterAction::StartResearch))
        );
        assert_eq!(
            RouterAgent.invoke(&ctx, route(None)).await,
            AgentResult::Terminal(AgentOutput::Route(RouterAction::Answer))
        );
    }

    #[tokio::test]
    async fn test_unknown_action_is_retryable() {
        let provider = Arc::new(MockModelProvider::new());
        provider.push_json(AgentRole::Router, json!({"action": "dance"}));
        let ctx = context(AgentRole::Router, provider);

        let AgentResult::Error(err) = RouterAgent.invoke(&ctx, route(None)).await else {
            panic!("expected error");
        };
        assert!(err.is_retryable());
    }
}

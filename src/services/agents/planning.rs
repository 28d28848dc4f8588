//! Planning agent: turns the mission goal into an ordered outline.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;

use super::{render_plan, settle, wrong_input, Agent, AgentContext};
use crate::domain::errors::InvocationError;
use crate::domain::models::{AgentInput, AgentOutput, AgentResult, AgentRole, Plan, PlanSection};

const SYSTEM: &str = "You plan research reports. Reply with JSON only: \
{\"title\": string, \"sections\": [{\"id\": string, \"title\": string, \"description\": string}], \
\"complete\": bool, \"needs_input\": string|null}. Set complete to false if the outline needs \
another pass. Use needs_input only when the goal cannot be planned without asking the user.";

#[derive(Debug, Deserialize)]
struct PlanReply {
    #[serde(default)]
    title: String,
    #[serde(default)]
    sections: Vec<SectionReply>,
    #[serde(default = "default_complete")]
    complete: bool,
    #[serde(default)]
    needs_input: Option<String>,
}

fn default_complete() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SectionReply {
    #[serde(default)]
    id: String,
    title: String,
    #[serde(default)]
    description: String,
}

/// Turns a goal into a sectioned report plan.
pub struct PlanningAgent;

impl PlanningAgent {
    async fn plan(
        &self,
        ctx: &AgentContext,
        goal: &str,
        partial: Option<&Plan>,
        web: bool,
    ) -> Result<AgentResult, InvocationError> {
        let mut prompt = format!("Research goal:\n{goal}\n\nWeb search available: {web}\n");
        if let Some(partial) = partial {
            prompt.push_str(&format!("\nRefine this draft outline:\n{}", render_plan(partial)));
        }

        let reply: PlanReply = ctx.complete_json(SYSTEM, prompt).await?;
        if let Some(question) = reply.needs_input.filter(|q| !q.trim().is_empty()) {
            return Ok(AgentResult::NeedsMoreInput(question));
        }

        let plan = normalize(goal, reply.title, reply.sections);
        if plan.sections.is_empty() {
            return Err(InvocationError::retryable("plan has no sections"));
        }
        Ok(if reply.complete {
            AgentResult::Terminal(AgentOutput::Plan(plan))
        } else {
            AgentResult::Continue(AgentOutput::Plan(plan))
        })
    }
}

/// Fill in missing titles and give every section a unique id.
fn normalize(goal: &str, title: String, sections: Vec<SectionReply>) -> Plan {
    let mut seen = HashSet::new();
    let sections = sections
        .into_iter()
        .filter(|s| !s.title.trim().is_empty())
        .enumerate()
        .map(|(i, s)| {
            let mut id = s.id.trim().to_string();
            if id.is_empty() || seen.contains(&id) {
                id = format!("s{}", i + 1);
            }
            while seen.contains(&id) {
                id.push('_');
            }
            seen.insert(id.clone());
            PlanSection {
                id,
                title: s.title.trim().to_string(),
                description: s.description,
            }
        })
        .collect();

    let title = if title.trim().is_empty() {
        goal.to_string()
    } else {
        title.trim().to_string()
    };
    Plan { title, sections }
}

#[async_trait]
impl Agent for PlanningAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Planning
    }

    async fn invoke(&self, ctx: &AgentContext, input: AgentInput) -> AgentResult {
        match &input {
            AgentInput::Plan {
                goal,
                scope,
                partial,
            } => settle(
                self.plan(ctx, goal, partial.as_ref(), scope.web_search_enabled)
                    .await,
            ),
            other => wrong_input(self.role(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::providers::MockModelProvider;
    use crate::domain::models::MissionScope;
    use crate::services::agents::test_support::context;
    use serde_json::json;
    use std::sync::Arc;

    fn input() -> AgentInput {
        AgentInput::Plan {
            goal: "Why is the sky blue?".to_string(),
            scope: MissionScope::default(),
            partial: None,
        }
    }

    #[tokio::test]
    async fn test_complete_plan_is_terminal() {
        let provider = Arc::new(MockModelProvider::new());
        provider.push_json(
            AgentRole::Planning,
            json!({"title": "Sky", "sections": [
                {"id": "s1", "title": "Scattering"},
                {"id": "s1", "title": "Absorption"},
                {"title": "History"}
            ]}),
        );
        let ctx = context(AgentRole::Planning, provider);

        let AgentResult::Terminal(AgentOutput::Plan(plan)) = PlanningAgent.invoke(&ctx, input()).await else {
            panic!("expected terminal plan");
        };
        assert_eq!(plan.section_ids(), vec!["s1", "s2", "s3"]);
    }

    #[tokio::test]
    async fn test_incomplete_plan_continues() {
        let provider = Arc::new(MockModelProvider::new());
        provider.push_json(
            AgentRole::Planning,
            json!({"title": "", "sections": [{"id": "a", "title": "A"}], "complete": false}),
        );
        let ctx = context(AgentRole::Planning, provider);

        let AgentResult::Continue(AgentOutput::Plan(plan)) = PlanningAgent.invoke(&ctx, input()).await else {
            panic!("expected continue");
        };
        assert_eq!(plan.title, "Why is the sky blue?");
    }

    #[tokio::test]
    async fn test_needs_input_and_empty_plan() {
        let provider = Arc::new(MockModelProvider::new());
        provider.push_json(AgentRole::Planning, json!({"sections": [], "needs_input": "Which sky?"}));
        provider.push_json(AgentRole::Planning, json!({"title": "T", "sections": []}));
        let ctx = context(AgentRole::Planning, provider);

        assert_eq!(
            PlanningAgent.invoke(&ctx, input()).await,
            AgentResult::NeedsMoreInput("Which sky?".to_string())
        );
        let AgentResult::Error(err) = PlanningAgent.invoke(&ctx, input()).await else {
            panic!("expected error");
        };
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_rejects_other_inputs() {
        let ctx = context(AgentRole::Planning, Arc::new(MockModelProvider::new()));
        let result = PlanningAgent
            .invoke(
                &ctx,
                AgentInput::Message {
                    question: "hi".to_string(),
                    context: None,
                },
            )
            .await;
        assert!(matches!(result, AgentResult::Error(InvocationError::Fatal(_))));
    }
}

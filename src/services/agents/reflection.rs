//! Reflection agent: accepts a draft or returns revision instructions.

use async_trait::async_trait;
use serde::Deserialize;

use super::{render_notes, render_plan, settle, wrong_input, Agent, AgentContext};
use crate::domain::errors::InvocationError;
use crate::domain::models::{
    AgentInput, AgentOutput, AgentResult, AgentRole, Critique, DraftVersion, Note, Plan,
};

const SYSTEM: &str = "Review the draft against the goal, the plan and the notes. Reply with JSON \
only: {\"accept\": bool, \"instructions\": string, \"issues\": [string], \"needs_input\": \
string|null}. When not accepting, instructions must say what to research or rewrite next.";

#[derive(Debug, Deserialize)]
struct ReflectionReply {
    accept: bool,
    #[serde(default)]
    instructions: String,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    needs_input: Option<String>,
}

/// Accepts a draft or asks for another pass.
pub struct ReflectionAgent;

impl ReflectionAgent {
    async fn reflect(
        &self,
        ctx: &AgentContext,
        goal: &str,
        plan: &Plan,
        notes: &[Note],
        draft: &DraftVersion,
    ) -> Result<AgentResult, InvocationError> {
        let prompt = format!(
            "Goal:\n{goal}\n\nPlan:\n{}\nNotes:\n{}\n\nDraft version {}:\n{}",
            render_plan(plan),
            render_notes(notes),
            draft.version,
            draft.content.to_markdown()
        );
        let reply: ReflectionReply = ctx.complete_json(SYSTEM, prompt).await?;

        if let Some(question) = reply.needs_input.filter(|q| !q.trim().is_empty()) {
            return Ok(AgentResult::NeedsMoreInput(question));
        }
        let mut instructions = reply.instructions.trim().to_string();
        if !reply.accept && instructions.is_empty() {
            instructions = reply.issues.join("\n");
        }
        let critique = Critique {
            accept: reply.accept,
            instructions,
            issues: reply.issues,
        };
        Ok(if critique.accept {
            AgentResult::Terminal(AgentOutput::Critique(critique))
        } else {
            AgentResult::Continue(AgentOutput::Critique(critique))
        })
    }
}

#[async_trait]
impl Agent for ReflectionAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Reflection
    }

    async fn invoke(&self, ctx: &AgentContext, input: AgentInput) -> AgentResult {
        match &input {
            AgentInput::Reflect {
                goal,
                plan,
                notes,
                draft,
            } => settle(self.reflect(ctx, goal, plan, notes, draft).await),
            other => wrong_input(self.role(), other),
        }
    }
}

//! Note Assignment agent: maps research candidates onto plan sections.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::warn;

use super::{render_plan, settle, wrong_input, Agent, AgentContext};
use crate::domain::errors::InvocationError;
use crate::domain::models::{AgentInput, AgentOutput, AgentResult, AgentRole, NoteCandidate, Plan};

const SYSTEM: &str = "Assign each numbered note to the plan sections it supports. Reply with JSON \
only: {\"assignments\": [{\"note\": number, \"sections\": [section id]}]}. A note may support \
several sections or none.";

#[derive(Debug, Deserialize)]
struct AssignmentReply {
    #[serde(default)]
    assignments: Vec<Assignment>,
}

#[derive(Debug, Deserialize)]
struct Assignment {
    note: usize,
    #[serde(default)]
    sections: Vec<String>,
}

/// Files search results as notes against plan sections.
pub struct NoteAssignmentAgent;

impl NoteAssignmentAgent {
    async fn assign(
        &self,
        ctx: &AgentContext,
        plan: &Plan,
        candidates: &[NoteCandidate],
    ) -> Result<AgentResult, InvocationError> {
        if candidates.is_empty() {
            return Ok(AgentResult::Terminal(AgentOutput::Assignments(Vec::new())));
        }

        let listing = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[{i}] {}", c.content))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!("Plan:\n{}\nNotes:\n{listing}", render_plan(plan));
        let reply: AssignmentReply = ctx.complete_json(SYSTEM, prompt).await?;

        let mut assigned = candidates.to_vec();
        for assignment in reply.assignments {
            let Some(candidate) = assigned.get_mut(assignment.note) else {
                warn!(note = assignment.note, "assignment refers to a missing note");
                continue;
            };
            let mut sections: Vec<String> = assignment
                .sections
                .into_iter()
                .filter(|id| plan.section(id).is_some())
                .collect();
            let mut seen = HashSet::new();
            sections.retain(|id| seen.insert(id.clone()));
            if !sections.is_empty() {
                candidate.section_ids = sections;
            }
        }
        Ok(AgentResult::Terminal(AgentOutput::Assignments(assigned)))
    }
}

#[async_trait]
impl Agent for NoteAssignmentAgent {
    fn role(&self) -> AgentRole {
        AgentRole::NoteAssignment
    }

    async fn invoke(&self, ctx: &AgentContext, input: AgentInput) -> AgentResult {
        match &input {
            AgentInput::NoteAssignment { plan, candidates } => {
                settle(self.assign(ctx, plan, candidates).await)
            }
            other => wrong_input(self.role(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::providers::MockModelProvider;
    use crate::domain::models::{NoteSource, PlanSection, SourceKind};
    use crate::services::agents::test_support::context;
    use serde_json::json;
    use std::sync::Arc;

    fn candidate(content: &str) -> NoteCandidate {
        NoteCandidate {
            source: NoteSource {
                kind: SourceKind::Web,
                reference: format!("https://{content}"),
                title: String::new(),
            },
            content: content.to_string(),
            query: "q".to_string(),
            section_ids: Vec::new(),
            invocation_seq: 2,
        }
    }

    #[tokio::test]
    async fn test_assignments_apply_to_known_sections() {
        let provider = Arc::new(MockModelProvider::new());
        provider.push_json(
            AgentRole::NoteAssignment,
            json!({"assignments": [
                {"note": 0, "sections": ["s2", "nope"]},
                {"note": 5, "sections": ["s1"]}
            ]}),
        );
        let ctx = context(AgentRole::NoteAssignment, provider);
        let plan = Plan {
            title: "T".to_string(),
            sections: ["s1", "s2"]
                .into_iter()
                .map(|id| PlanSection {
                    id: id.to_string(),
                    title: id.to_string(),
                    description: String::new(),
                })
                .collect(),
        };

        let input = AgentInput::NoteAssignment {
            plan,
            candidates: vec![candidate("a"), candidate("b")],
        };
        let AgentResult::Terminal(AgentOutput::Assignments(assigned)) = NoteAssignmentAgent.invoke(&ctx, input).await
        else {
            panic!("expected assignments");
        };
        assert_eq!(assigned[0].section_ids, vec!["s2"]);
        assert!(assigned[1].section_ids.is_empty());
    }

    #[tokio::test]
    async fn test_no_candidates_skips_model() {
        let provider = Arc::new(MockModelProvider::new());
        let ctx = context(AgentRole::NoteAssignment, provider.clone());
        let input = AgentInput::NoteAssignment {
            plan: Plan::default(),
            candidates: Vec::new(),
        };
        assert_eq!(
            NoteAssignmentAgent.invoke(&ctx, input).await,
            AgentResult::Terminal(AgentOutput::Assignments(Vec::new()))
        );
        assert!(provider.calls().is_empty());
    }
}

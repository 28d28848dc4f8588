//! Writing agent: produces the next draft version from the plan and notes.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::{note_label, render_notes, render_plan, settle, wrong_input, Agent, AgentContext};
use crate::domain::errors::InvocationError;
use crate::domain::models::{
    AgentInput, AgentOutput, AgentResult, AgentRole, DraftContent, DraftSection, DraftVersion,
    Note, Plan,
};

const SYSTEM: &str = "Write the report one plan section at a time, citing only the labelled \
notes. Reply with JSON only: {\"title\": string, \"sections\": [{\"section_id\": string, \
\"heading\": string, \"body\": string, \"notes\": [note label]}]}.";

#[derive(Debug, Deserialize)]
struct DraftReply {
    #[serde(default)]
    title: String,
    #[serde(default)]
    sections: Vec<SectionReply>,
}

#[derive(Debug, Deserialize)]
struct SectionReply {
    section_id: String,
    #[serde(default)]
    heading: String,
    body: String,
    #[serde(default)]
    notes: Vec<String>,
}

/// Writes a cited draft from the plan and notes.
pub struct WritingAgent;

impl WritingAgent {
    async fn write(
        &self,
        ctx: &AgentContext,
        goal: &str,
        plan: &Plan,
        notes: &[Note],
        previous: Option<&DraftVersion>,
        revision: Option<&str>,
    ) -> Result<AgentResult, InvocationError> {
        let mut prompt = format!(
            "Goal:\n{goal}\n\nPlan:\n{}\nNotes:\n{}\n",
            render_plan(plan),
            render_notes(notes)
        );
        if let Some(previous) = previous {
            prompt.push_str(&format!(
                "\nPrevious draft (version {}):\n{}\n",
                previous.version,
                previous.content.to_markdown()
            ));
        }
        if let Some(revision) = revision {
            prompt.push_str(&format!("\nRevise according to:\n{revision}\n"));
        }

        let reply: DraftReply = ctx.complete_json(SYSTEM, prompt).await?;
        let content = assemble(goal, plan, notes, reply);
        if content.sections.is_empty() {
            return Err(InvocationError::retryable("draft has no sections"));
        }
        Ok(AgentResult::Terminal(AgentOutput::Draft(content)))
    }
}

/// Resolve note labels to note ids and fill in missing headings.
fn assemble(goal: &str, plan: &Plan, notes: &[Note], reply: DraftReply) -> DraftContent {
    let labels: HashMap<String, Uuid> = notes
        .iter()
        .enumerate()
        .map(|(i, n)| (note_label(i), n.id))
        .collect();

    let sections = reply
        .sections
        .into_iter()
        .filter(|s| !s.body.trim().is_empty())
        .map(|s| {
            let heading = if s.heading.trim().is_empty() {
                plan.section(&s.section_id)
                    .map(|p| p.title.clone())
                    .unwrap_or_else(|| s.section_id.clone())
            } else {
                s.heading
            };
            let mut note_ids: Vec<Uuid> = s
                .notes
                .iter()
                .filter_map(|label| labels.get(label.trim()).copied())
                .collect();
            let mut seen = HashSet::new();
            note_ids.retain(|id| seen.insert(*id));
            DraftSection {
                section_id: s.section_id,
                heading,
                body: s.body,
                note_ids,
            }
        })
        .collect();

    let title = match reply.title.trim() {
        "" if plan.title.is_empty() => goal.to_string(),
        "" => plan.title.clone(),
        title => title.to_string(),
    };
    DraftContent { title, sections }
}

#[async_trait]
impl Agent for WritingAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Writing
    }

    async fn invoke(&self, ctx: &AgentContext, input: AgentInput) -> AgentResult {
        match &input {
            AgentInput::Write {
                goal,
                plan,
                notes,
                previous,
                revision,
            } => settle(
                self.write(ctx, goal, plan, notes, previous.as_ref(), revision.as_deref())
                    .await,
            ),
            other => wrong_input(self.role(), other),
        }
    }
}

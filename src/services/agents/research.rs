//! Research agent: runs one query through the knowledge facade and
//! summarizes the hits into note candidates.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{settle, wrong_input, Agent, AgentContext};
use crate::domain::errors::InvocationError;
use crate::domain::models::{
    AgentInput, AgentOutput, AgentResult, AgentRole, MissionScope, NoteCandidate, NoteSource,
    SearchQuery, Snippet,
};

const SYSTEM: &str = "Summarize the numbered search results that bear on the research goal into \
notes. Reply with JSON only: {\"notes\": [{\"snippet\": number, \"content\": string, \
\"sections\": [section id]}]}. Only state what the snippet says; skip irrelevant results.";

#[derive(Debug, Deserialize)]
struct ResearchReply {
    #[serde(default)]
    notes: Vec<NoteReply>,
}

#[derive(Debug, Deserialize)]
struct NoteReply {
    snippet: usize,
    content: String,
    #[serde(default)]
    sections: Vec<String>,
}

/// Runs searches and fetches and returns candidate notes.
pub struct ResearchAgent;

impl ResearchAgent {
    async fn research(
        &self,
        ctx: &AgentContext,
        goal: &str,
        query: &SearchQuery,
        scope: &MissionScope,
        limit: usize,
    ) -> Result<AgentResult, InvocationError> {
        let mut snippets = ctx
            .knowledge
            .search(&ctx.gates, &ctx.cancel, query, scope, limit, ctx.call_timeout)
            .await?;
        ctx.knowledge
            .enrich(
                &ctx.gates,
                &ctx.cancel,
                &mut snippets,
                ctx.fetch_top_results,
                ctx.call_timeout,
            )
            .await?;

        if snippets.is_empty() {
            debug!(query = %query.text, "no results, skipping summary");
            return Ok(AgentResult::Continue(AgentOutput::Evidence(Vec::new())));
        }

        let listing = snippets
            .iter()
            .enumerate()
            .map(|(i, s)| format!("[{i}] {} ({})\n{}", s.title, s.reference, s.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        let section_hint = query
            .section_id
            .as_deref()
            .map(|id| format!("\nTarget section: {id}"))
            .unwrap_or_default();
        let prompt = format!(
            "Goal:\n{goal}\n\nQuery: {}{section_hint}\n\nResults:\n{listing}",
            query.text
        );

        let reply: ResearchReply = ctx.complete_json(SYSTEM, prompt).await?;
        let candidates = to_candidates(ctx.sequence, query, &snippets, reply.notes);
        Ok(AgentResult::Continue(AgentOutput::Evidence(candidates)))
    }
}

fn to_candidates(
    sequence: u64,
    query: &SearchQuery,
    snippets: &[Snippet],
    notes: Vec<NoteReply>,
) -> Vec<NoteCandidate> {
    notes
        .into_iter()
        .filter_map(|note| {
            let Some(snippet) = snippets.get(note.snippet) else {
                warn!(snippet = note.snippet, "note refers to a missing result");
                return None;
            };
            let content = note.content.trim().to_string();
            if content.is_empty() {
                return None;
            }
            let section_ids = if note.sections.is_empty() {
                query.section_id.iter().cloned().collect()
            } else {
                note.sections
            };
            Some(NoteCandidate {
                source: NoteSource {
                    kind: snippet.kind,
                    reference: snippet.reference.clone(),
                    title: snippet.title.clone(),
                },
                content,
                query: query.text.clone(),
                section_ids,
                invocation_seq: sequence,
            })
        })
        .collect()
}

#[async_trait]
impl Agent for ResearchAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Research
    }

    async fn invoke(&self, ctx: &AgentContext, input: AgentInput) -> AgentResult {
        match &input {
            AgentInput::Research {
                goal,
                query,
                scope,
                results_per_query,
            } => settle(
                self.research(ctx, goal, query, scope, *results_per_query)
                    .await,
            ),
            other => wrong_input(self.role(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::knowledge::InMemoryKnowledgeSource;
    use crate::adapters::providers::MockModelProvider;
    use crate::domain::models::{SourceKind, SourcePreference};
    use crate::services::agents::test_support::context_with;
    use crate::services::knowledge_facade::KnowledgeFacade;
    use serde_json::json;
    use std::sync::Arc;

    fn facade() -> KnowledgeFacade {
        let library = InMemoryKnowledgeSource::new();
        library.add_document(
            "papers",
            "doc-rayleigh",
            "Rayleigh scattering",
            "Blue light scatters more than red light in air.",
        );
        KnowledgeFacade::new().with_library(Arc::new(library))
    }

    fn input(text: &str) -> AgentInput {
        AgentInput::Research {
            goal: "Why is the sky blue?".to_string(),
            query: SearchQuery {
                text: text.to_string(),
                section_id: Some("s1".to_string()),
                source: SourcePreference::Any,
            },
            scope: MissionScope::documents(vec!["papers".to_string()]),
            results_per_query: 5,
        }
    }

    #[tokio::test]
    async fn test_research_produces_candidates() {
        let provider = Arc::new(MockModelProvider::new());
        provider.push_json(
            AgentRole::Research,
            json!({"notes": [
                {"snippet": 0, "content": "Blue scatters more strongly."},
                {"snippet": 3, "content": "hallucinated"}
            ]}),
        );
        let ctx = context_with(AgentRole::Research, provider.clone(), facade());

        let AgentResult::Continue(AgentOutput::Evidence(notes)) =
            ResearchAgent.invoke(&ctx, input("blue light scatters")).await
        else {
            panic!("expected evidence");
        };
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].source.reference, "doc-rayleigh");
        assert_eq!(notes[0].source.kind, SourceKind::Document);
        assert_eq!(notes[0].section_ids, vec!["s1"]);
        assert_eq!(notes[0].invocation_seq, ctx.sequence);
        assert!(provider.calls()[0].prompt.contains("Rayleigh scattering"));
        assert_eq!(ctx.gates.process().worker_gate().in_use(), 0);
    }

    #[tokio::test]
    async fn test_no_hits_skips_model() {
        let provider = Arc::new(MockModelProvider::new());
        let ctx = context_with(AgentRole::Research, provider.clone(), facade());

        let result = ResearchAgent.invoke(&ctx, input("volcanoes")).await;
        assert_eq!(result, AgentResult::Continue(AgentOutput::Evidence(Vec::new())));
        assert!(provider.calls().is_empty());
    }
}

//! Query Strategy agent: picks the searches for one research round.
//!
//! When retried this role runs on the Intelligent tier, which doubles as the
//! query-preparation step for rounds the Fast tier could not plan.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;

use super::{render_notes, render_plan, settle, wrong_input, Agent, AgentContext};
use crate::domain::errors::InvocationError;
use crate::domain::models::{
    AgentInput, AgentOutput, AgentResult, AgentRole, MissionScope, Note, Plan, SearchQuery,
    SourcePreference,
};

const SYSTEM: &str = "You choose search queries for a research round. Reply with JSON only: \
{\"queries\": [{\"text\": string, \"section_id\": string, \"source\": \"any\"|\"documents\"|\"web\"}]}. \
Target the uncovered sections first and never repeat a query already run.";

#[derive(Debug, Deserialize)]
struct QueryReply {
    #[serde(default)]
    queries: Vec<SearchQuery>,
}

/// Writes search queries for uncovered sections.
pub struct QueryStrategyAgent;

struct Request<'a> {
    goal: &'a str,
    plan: &'a Plan,
    notes: &'a [Note],
    uncovered: &'a [String],
    revision: Option<&'a str>,
    max_queries: u32,
    scope: &'a MissionScope,
}

impl QueryStrategyAgent {
    async fn choose(&self, ctx: &AgentContext, req: Request<'_>) -> Result<AgentResult, InvocationError> {
        let mut prompt = format!(
            "Goal:\n{}\n\nPlan:\n{}\nUncovered sections: {:?}\nMaximum queries: {}\n\nNotes so far:\n{}\n",
            req.goal,
            render_plan(req.plan),
            req.uncovered,
            req.max_queries,
            render_notes(req.notes)
        );
        if let Some(revision) = req.revision {
            prompt.push_str(&format!("\nReviewer instructions to address:\n{revision}\n"));
        }

        let reply: QueryReply = ctx.complete_json(SYSTEM, prompt).await?;
        let queries = refine(reply.queries, &req);
        Ok(AgentResult::Continue(AgentOutput::Queries(queries)))
    }
}

/// Drop blank and repeated queries, clear unknown section ids, and keep at
/// most `max_queries`.
fn refine(queries: Vec<SearchQuery>, req: &Request<'_>) -> Vec<SearchQuery> {
    let mut seen: HashSet<String> = req.notes.iter().map(|n| n.query.to_lowercase()).collect();
    queries
        .into_iter()
        .filter_map(|mut q| {
            q.text = q.text.trim().to_string();
            if q.text.is_empty() || !seen.insert(q.text.to_lowercase()) {
                return None;
            }
            if q.section_id.as_deref().is_some_and(|id| req.plan.section(id).is_none()) {
                q.section_id = None;
            }
            if q.source == SourcePreference::Web && !req.scope.web_search_enabled {
                q.source = SourcePreference::Any;
            }
            Some(q)
        })
        .take(req.max_queries.max(1) as usize)
        .collect()
}

#[async_trait]
impl Agent for QueryStrategyAgent {
    fn role(&self) -> AgentRole {
        AgentRole::QueryStrategy
    }

    async fn invoke(&self, ctx: &AgentContext, input: AgentInput) -> AgentResult {
        match &input {
            AgentInput::QueryStrategy {
                goal,
                plan,
                notes,
                uncovered_sections,
                revision,
                max_queries,
                scope,
            } => {
                let req = Request {
                    goal,
                    plan,
                    notes,
                    uncovered: uncovered_sections,
                    revision: revision.as_deref(),
                    max_queries: *max_queries,
                    scope,
                };
                settle(self.choose(ctx, req).await)
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
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    fn plan() -> Plan {
        Plan {
            title: "Sky".to_string(),
            sections: vec![PlanSection {
                id: "s1".to_string(),
                title: "Scattering".to_string(),
                description: String::new(),
            }],
        }
    }

    fn note(query: &str) -> Note {
        Note {
            id: Uuid::new_v4(),
            sequence: 1,
            iteration: 0,
            source: NoteSource {
                kind: SourceKind::Document,
                reference: "doc".to_string(),
                title: String::new(),
            },
            content: "c".to_string(),
            query: query.to_string(),
            section_ids: vec!["s1".to_string()],
            invocation_seq: 1,
            supersedes: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_queries_are_refined() {
        let provider = Arc::new(MockModelProvider::new());
        provider.push_json(
            AgentRole::QueryStrategy,
            json!({"queries": [
                {"text": "rayleigh scattering", "section_id": "s1"},
                {"text": "Rayleigh Scattering "},
                {"text": "  "},
                {"text": "already done"},
                {"text": "sky colour physics", "section_id": "s9", "source": "web"},
                {"text": "one too many"}
            ]}),
        );
        let ctx = context(AgentRole::QueryStrategy, provider);

        let input = AgentInput::QueryStrategy {
            goal: "Why is the sky blue?".to_string(),
            plan: plan(),
            notes: vec![note("Already done")],
            uncovered_sections: vec!["s1".to_string()],
            revision: Some("cite sources".to_string()),
            max_queries: 2,
            scope: MissionScope::documents(vec!["papers".to_string()]),
        };
        let AgentResult::Continue(AgentOutput::Queries(queries)) = QueryStrategyAgent.invoke(&ctx, input).await
        else {
            panic!("expected queries");
        };

        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].section_id.as_deref(), Some("s1"));
        assert_eq!(queries[1].text, "sky colour physics");
        assert_eq!(queries[1].section_id, None);
        assert_eq!(queries[1].source, SourcePreference::Any);
    }
}

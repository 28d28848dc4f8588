//! Knowledge access facade.
//!
//! One entry point over the document library, web search, and URL fetch
//! collaborators. Library search and fetch hold a worker-pool slot; web search
//! holds a search-budget slot. Every call is timeout-bound and cancellable.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::errors::InvocationError;
use crate::domain::models::{FetchedContent, MissionScope, SearchQuery, Snippet, SourceKind};
use crate::domain::ports::KnowledgeSource;
use crate::services::concurrency::{bounded, MissionGates};

/// Longest fetched text kept in place of a snippet.
const MAX_FETCHED_CHARS: usize = 8_000;

/// Single entry point to the library, web search and page fetching.
#[derive(Clone, Default)]
pub struct KnowledgeFacade {
    library: Option<Arc<dyn KnowledgeSource>>,
    web_search: Option<Arc<dyn KnowledgeSource>>,
    fetcher: Option<Arc<dyn KnowledgeSource>>,
}

impl KnowledgeFacade {
    /// A facade with no sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `source` for document search.
    pub fn with_library(mut self, source: Arc<dyn KnowledgeSource>) -> Self {
        self.library = Some(source);
        self
    }

    /// Use `source` for web search.
    pub fn with_web_search(mut self, source: Arc<dyn KnowledgeSource>) -> Self {
        self.web_search = Some(source);
        self
    }

    /// Use `source` to fetch page contents.
    pub fn with_fetcher(mut self, source: Arc<dyn KnowledgeSource>) -> Self {
        self.fetcher = Some(source);
        self
    }

    /// Search every source the query and scope allow, merge by score, and keep
    /// the best `limit` hits.
    ///
    /// A source failure is tolerated while another source answers; when every
    /// attempted source fails, the first error is returned.
    pub async fn search(
        &self,
        gates: &MissionGates,
        cancel: &CancellationToken,
        query: &SearchQuery,
        scope: &MissionScope,
        limit: usize,
        timeout: Duration,
    ) -> Result<Vec<Snippet>, InvocationError> {
        let library = self
            .library
            .as_ref()
            .filter(|_| scope.searches_library() && query.source.allows(SourceKind::Document));
        let web = self
            .web_search
            .as_ref()
            .filter(|_| scope.web_search_enabled && query.source.allows(SourceKind::Web));

        let library_search = async {
            let Some(source) = library else {
                return Ok(None);
            };
            let _slot = gates.worker(cancel).await?;
            bounded(cancel, timeout, "library search", source.search(&query.text, scope, limit))
                .await
                .map(Some)
        };
        let web_search = async {
            let Some(source) = web else {
                return Ok(None);
            };
            let _slot = gates.search(cancel).await?;
            bounded(cancel, timeout, "web search", source.search(&query.text, scope, limit))
                .await
                .map(Some)
        };

        let (library_result, web_result): (
            Result<Option<Vec<Snippet>>, InvocationError>,
            Result<Option<Vec<Snippet>>, InvocationError>,
        ) = tokio::join!(library_search, web_search);

        let mut merged = Vec::new();
        let mut first_error = None;
        let mut answered = false;
        for (label, result) in [("library", library_result), ("web", web_result)] {
            match result {
                Ok(Some(snippets)) => {
                    answered = true;
                    merged.extend(snippets);
                }
                Ok(None) => {}
                Err(InvocationError::Cancelled) => return Err(InvocationError::Cancelled),
                Err(err) => {
                    warn!(source = label, query = %query.text, error = %err, "knowledge search failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        if !answered {
            if let Some(err) = first_error {
                return Err(err);
            }
        }

        let merged = merge_ranked(merged, limit);
        debug!(query = %query.text, hits = merged.len(), "knowledge search complete");
        Ok(merged)
    }

    /// Replace the text of the top `count` web hits with their fetched content.
    ///
    /// Fetch failures leave the snippet as it was; cancellation is propagated.
    pub async fn enrich(
        &self,
        gates: &MissionGates,
        cancel: &CancellationToken,
        snippets: &mut [Snippet],
        count: usize,
        timeout: Duration,
    ) -> Result<(), InvocationError> {
        if self.fetcher.is_none() || count == 0 {
            return Ok(());
        }
        let targets: Vec<usize> = snippets
            .iter()
            .enumerate()
            .filter(|(_, s)| s.kind == SourceKind::Web)
            .map(|(i, _)| i)
            .take(count)
            .collect();

        for index in targets {
            let reference = snippets[index].reference.clone();
            match self.fetch(gates, cancel, &reference, timeout).await {
                Ok(content) => {
                    snippets[index].text = content.text.chars().take(MAX_FETCHED_CHARS).collect();
                    if let Some(title) = content.title {
                        snippets[index].title = title;
                    }
                }
                Err(InvocationError::Cancelled) => return Err(InvocationError::Cancelled),
                Err(err) => warn!(url = %reference, error = %err, "fetch failed, keeping snippet"),
            }
        }
        Ok(())
    }

    /// Fetch the extracted content of one reference.
    pub async fn fetch(
        &self,
        gates: &MissionGates,
        cancel: &CancellationToken,
        reference: &str,
        timeout: Duration,
    ) -> Result<FetchedContent, InvocationError> {
        let Some(fetcher) = self.fetcher.as_ref() else {
            return Err(InvocationError::fatal("no fetcher configured"));
        };
        let _slot = gates.worker(cancel).await?;
        bounded(cancel, timeout, "fetch", fetcher.fetch(reference)).await
    }
}

/// Sort by descending score, drop duplicate references, keep `limit`.
fn merge_ranked(mut snippets: Vec<Snippet>, limit: usize) -> Vec<Snippet> {
    snippets.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut seen = std::collections::HashSet::new();
    snippets.retain(|s| seen.insert(s.reference.clone()));
    snippets.truncate(limit);
    snippets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::knowledge::InMemoryKnowledgeSource;
    use crate::domain::models::{ConcurrencyLimits, SourcePreference};
    use crate::domain::ports::KnowledgeError;
    use crate::services::concurrency::ConcurrencyController;
    use async_trait::async_trait;

    fn limits() -> ConcurrencyLimits {
        ConcurrencyLimits {
            worker_pool_limit: 4,
            global_model_call_limit: 4,
            per_mission_model_call_limit: 4,
            search_call_limit: 1,
            gate_wait_timeout_ms: 1_000,
        }
    }

    fn gates() -> MissionGates {
        ConcurrencyController::new(&limits()).for_mission(&limits())
    }

    fn query(text: &str) -> SearchQuery {
        SearchQuery {
            text: text.to_string(),
            section_id: None,
            source: SourcePreference::Any,
        }
    }

    fn snippet(kind: SourceKind, reference: &str, score: f32) -> Snippet {
        Snippet {
            kind,
            reference: reference.to_string(),
            title: reference.to_string(),
            text: "text".to_string(),
            score,
        }
    }

    struct FailingSource(KnowledgeError);

    #[async_trait]
    impl KnowledgeSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        async fn search(
            &self,
            _query: &str,
            _scope: &MissionScope,
            _limit: usize,
        ) -> Result<Vec<Snippet>, KnowledgeError> {
            Err(self.0.clone())
        }

        async fn fetch(&self, _reference: &str) -> Result<FetchedContent, KnowledgeError> {
            Err(self.0.clone())
        }
    }

    fn library() -> Arc<InMemoryKnowledgeSource> {
        let source = InMemoryKnowledgeSource::new();
        source.add_document("papers", "doc-rayleigh", "Rayleigh scattering", "Short wavelengths scatter more strongly in the atmosphere.");
        source.add_document("papers", "doc-ocean", "Ocean colour", "Water absorbs red light.");
        Arc::new(source)
    }

    #[test]
    fn test_merge_ranked() {
        let merged = merge_ranked(
            vec![
                snippet(SourceKind::Document, "a", 0.2),
                snippet(SourceKind::Web, "b", 0.9),
                snippet(SourceKind::Web, "a", 0.1),
                snippet(SourceKind::Document, "c", 0.5),
            ],
            2,
        );
        let refs: Vec<&str> = merged.iter().map(|s| s.reference.as_str()).collect();
        assert_eq!(refs, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_library_search_respects_scope() {
        let facade = KnowledgeFacade::new().with_library(library());
        let gates = gates();
        let cancel = CancellationToken::new();
        let timeout = Duration::from_secs(1);

        let scoped = MissionScope::documents(vec!["papers".to_string()]);
        let hits = facade
            .search(&gates, &cancel, &query("scatter wavelengths"), &scoped, 5, timeout)
            .await
            .unwrap();
        assert_eq!(hits[0].reference, "doc-rayleigh");

        let unscoped = MissionScope::default();
        let hits = facade
            .search(&gates, &cancel, &query("scatter"), &unscoped, 5, timeout)
            .await
            .unwrap();
        assert!(hits.is_empty());
        assert_eq!(gates.process().worker_gate().in_use(), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_is_tolerated() {
        let facade = KnowledgeFacade::new()
            .with_library(library())
            .with_web_search(Arc::new(FailingSource(KnowledgeError::Unavailable(
                "503".to_string(),
            ))));
        let scope = MissionScope::documents(vec!["papers".to_string()]).with_web();

        let hits = facade
            .search(
                &gates(),
                &CancellationToken::new(),
                &query("water"),
                &scope,
                5,
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_all_sources_failing_returns_error() {
        let facade = KnowledgeFacade::new().with_web_search(Arc::new(FailingSource(
            KnowledgeError::Unavailable("down".to_string()),
        )));
        let scope = MissionScope::default().with_web();
        let gates = gates();

        let err = facade
            .search(
                &gates,
                &CancellationToken::new(),
                &query("anything"),
                &scope,
                5,
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(gates.process().search_gate().acquired_count(), 1);
        assert_eq!(gates.process().search_gate().in_use(), 0);
    }

    #[tokio::test]
    async fn test_fetch_without_fetcher_is_fatal() {
        let err = KnowledgeFacade::new()
            .fetch(
                &gates(),
                &CancellationToken::new(),
                "https://example.com",
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_enrich_replaces_web_text() {
        let fetcher = InMemoryKnowledgeSource::new();
        fetcher.add_page("https://sky.example", "Why the sky is blue", "Full article body.");
        let facade = KnowledgeFacade::new().with_fetcher(Arc::new(fetcher));

        let mut hits = vec![
            snippet(SourceKind::Document, "doc-1", 0.9),
            snippet(SourceKind::Web, "https://sky.example", 0.8),
            snippet(SourceKind::Web, "https://missing.example", 0.7),
        ];
        facade
            .enrich(
                &gates(),
                &CancellationToken::new(),
                &mut hits,
                2,
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(hits[0].text, "text");
        assert_eq!(hits[1].text, "Full article body.");
        assert_eq!(hits[1].title, "Why the sky is blue");
        assert_eq!(hits[2].text, "text");
    }
}

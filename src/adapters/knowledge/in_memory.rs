//! In-memory knowledge source.
//!
//! Keyword-ranked documents grouped by library group, plus a set of pages
//! standing in for the web. Used by tests and ephemeral runs.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use crate::domain::models::{FetchedContent, MissionScope, Snippet, SourceKind};
use crate::domain::ports::{KnowledgeError, KnowledgeSource};

#[derive(Debug, Clone)]
struct Entry {
    kind: SourceKind,
    group: Option<String>,
    reference: String,
    title: String,
    text: String,
}

/// Document library held in memory, searched by keyword overlap.
#[derive(Debug, Default)]
pub struct InMemoryKnowledgeSource {
    entries: RwLock<Vec<Entry>>,
}

impl InMemoryKnowledgeSource {
    /// An empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a library document to `group`.
    pub fn add_document(&self, group: &str, id: &str, title: &str, text: &str) {
        self.push(Entry {
            kind: SourceKind::Document,
            group: Some(group.to_string()),
            reference: id.to_string(),
            title: title.to_string(),
            text: text.to_string(),
        });
    }

    /// Add a web page reachable by search (when web search is enabled) and fetch.
    pub fn add_page(&self, url: &str, title: &str, text: &str) {
        self.push(Entry {
            kind: SourceKind::Web,
            group: None,
            reference: url.to_string(),
            title: title.to_string(),
            text: text.to_string(),
        });
    }

    /// Load a library directory: each subdirectory is a document group and
    /// each `.md` or `.txt` file in it a document. Files at the top level go to
    /// the `default` group. The document id is the path relative to `root`.
    pub async fn load_dir(root: impl AsRef<Path>) -> Result<Self, KnowledgeError> {
        let root = root.as_ref();
        let source = Self::new();
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| KnowledgeError::Unavailable(format!("{}: {e}", dir.display())))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| KnowledgeError::Unavailable(format!("{}: {e}", dir.display())))?
            {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                let is_text = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("txt"));
                if !is_text {
                    continue;
                }

                let relative = path.strip_prefix(root).unwrap_or(&path);
                let group = match relative.parent().and_then(|p| p.components().next()) {
                    Some(first) => first.as_os_str().to_string_lossy().to_string(),
                    None => "default".to_string(),
                };
                let text = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| KnowledgeError::Unavailable(format!("{}: {e}", path.display())))?;
                let title = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                source.add_document(&group, &relative.to_string_lossy(), &title, &text);
            }
        }
        debug!(root = %root.display(), documents = source.len(), "library loaded");
        Ok(source)
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the library holds no documents.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, entry: Entry) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_lowercase)
        .collect()
}

/// Fraction of query terms present in the entry.
fn score(query: &HashSet<String>, entry: &Entry) -> f32 {
    if query.is_empty() {
        return 0.0;
    }
    let haystack = terms(&format!("{} {}", entry.title, entry.text));
    let hits = query.iter().filter(|t| haystack.contains(*t)).count();
    hits as f32 / query.len() as f32
}

#[async_trait]
impl KnowledgeSource for InMemoryKnowledgeSource {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn search(
        &self,
        query: &str,
        scope: &MissionScope,
        limit: usize,
    ) -> Result<Vec<Snippet>, KnowledgeError> {
        let query_terms = terms(query);
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);

        let mut hits: Vec<Snippet> = entries
            .iter()
            .filter(|e| match e.kind {
                SourceKind::Document => e
                    .group
                    .as_ref()
                    .is_some_and(|g| scope.document_groups.contains(g)),
                SourceKind::Web => scope.web_search_enabled,
            })
            .filter_map(|e| {
                let score = score(&query_terms, e);
                (score > 0.0).then(|| Snippet {
                    kind: e.kind,
                    reference: e.reference.clone(),
                    title: e.title.clone(),
                    text: e.text.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn fetch(&self, reference: &str) -> Result<FetchedContent, KnowledgeError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .find(|e| e.reference == reference)
            .map(|e| FetchedContent {
                url: e.reference.clone(),
                title: Some(e.title.clone()),
                text: e.text.clone(),
            })
            .ok_or_else(|| KnowledgeError::NotFound(reference.to_string()))
    }
}

//! Knowledge base models: ranked snippets and fetched documents.

use serde::{Deserialize, Serialize};

/// Where a piece of evidence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Private document library.
    Document,
    /// Live web search or fetch.
    Web,
}

impl SourceKind {
    /// Lowercase kind name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Web => "web",
        }
    }

    /// Parse a kind name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "document" => Some(Self::Document),
            "web" => Some(Self::Web),
            _ => None,
        }
    }
}

/// Which part of the knowledge base a query should hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePreference {
    #[default]
    Any,
    Documents,
    Web,
}

impl SourcePreference {
    /// Whether a source of `kind` satisfies this preference.
    pub fn allows(&self, kind: SourceKind) -> bool {
        match self {
            Self::Any => true,
            Self::Documents => kind == SourceKind::Document,
            Self::Web => kind == SourceKind::Web,
        }
    }
}

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub kind: SourceKind,
    /// Document id or URL.
    pub reference: String,
    pub title: String,
    pub text: String,
    /// Higher is more relevant. Only comparable within one search call.
    pub score: f32,
}

/// Extracted content of a fetched URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedContent {
    pub url: String,
    pub title: Option<String>,
    pub text: String,
}

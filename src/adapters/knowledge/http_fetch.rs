//! HTTP page fetcher.
//!
//! Downloads a URL and reduces the HTML to readable text. Fetch-only: this
//! source performs no searches.

use async_trait::async_trait;
use regex::Regex;
use reqwest::{header, Client};
use std::sync::LazyLock;
use std::time::Duration;

use crate::domain::models::{FetchedContent, MissionScope, Snippet};
use crate::domain::ports::{KnowledgeError, KnowledgeSource};

static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"));
static NON_CONTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript|head)[^>]*>.*?</(script|style|noscript|head)>")
        .expect("valid regex")
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Client settings for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Responses longer than this many bytes are truncated.
    pub max_body_bytes: usize,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: format!("maestro/{}", env!("CARGO_PKG_VERSION")),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Fetches web pages and reduces them to readable text.
pub struct HttpFetcher {
    client: Client,
    config: HttpFetcherConfig,
}

impl HttpFetcher {
    /// Build the fetcher. Fails if the HTTP client cannot be constructed.
    pub fn new(config: HttpFetcherConfig) -> Result<Self, KnowledgeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| KnowledgeError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }
}

/// Title and visible text of an HTML document.
pub fn extract_text(html: &str) -> (Option<String>, String) {
    let title = TITLE
        .captures(html)
        .map(|c| collapse(&decode_entities(&c[1])))
        .filter(|t| !t.is_empty());
    let body = NON_CONTENT.replace_all(html, " ");
    let body = TAG.replace_all(&body, " ");
    (title, collapse(&decode_entities(&body)))
}

fn collapse(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn classify_status(status: u16, url: &str) -> KnowledgeError {
    match status {
        404 | 410 => KnowledgeError::NotFound(url.to_string()),
        408 | 429 | 500..=599 => KnowledgeError::Unavailable(format!("{url} returned {status}")),
        _ => KnowledgeError::InvalidRequest(format!("{url} returned {status}")),
    }
}

#[async_trait]
impl KnowledgeSource for HttpFetcher {
    fn name(&self) -> &str {
        "http_fetch"
    }

    async fn search(
        &self,
        _query: &str,
        _scope: &MissionScope,
        _limit: usize,
    ) -> Result<Vec<Snippet>, KnowledgeError> {
        Err(KnowledgeError::InvalidRequest(
            "the HTTP fetcher does not search".to_string(),
        ))
    }

    async fn fetch(&self, reference: &str) -> Result<FetchedContent, KnowledgeError> {
        if !(reference.starts_with("http://") || reference.starts_with("https://")) {
            return Err(KnowledgeError::InvalidRequest(format!(
                "not an http(s) URL: {reference}"
            )));
        }

        let response = self
            .client
            .get(reference)
            .header(header::ACCEPT, "text/html, text/plain;q=0.9, */*;q=0.5")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    KnowledgeError::Timeout
                } else {
                    KnowledgeError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), reference));
        }

        let is_html = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("html"));
        let bytes = response
            .bytes()
            .await
            .map_err(|e| KnowledgeError::Unavailable(e.to_string()))?;
        let body = String::from_utf8_lossy(&bytes[..bytes.len().min(self.config.max_body_bytes)]);

        let (title, text) = if is_html {
            extract_text(&body)
        } else {
            (None, collapse(&body))
        };
        Ok(FetchedContent {
            url: reference.to_string(),
            title,
            text,
        })
    }
}

//! Redaction of credentials from text that may be logged or persisted.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static API_KEY: LazyLock<Regex> = LazyLock::new(|| {
    // Anthropic (sk-ant-...), OpenAI (sk-..., sk-proj-...) and OpenRouter (sk-or-...) keys
    Regex::new(r"sk-[a-zA-Z0-9_-]{20,}").expect("valid regex")
});
static BEARER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Bearer\s+[a-zA-Z0-9_.\-]+").expect("valid regex"));
static KEY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(["']?(?:api_key|apikey|x-api-key|token|secret|password)["']?\s*[:=]\s*)["']?[^"'\s,}&]+["']?"#)
        .expect("valid regex")
});

/// Replace API keys, bearer tokens and `key=value` secrets with placeholders.
pub fn scrub_secrets(text: &str) -> String {
    let scrubbed = API_KEY.replace_all(text, "[API_KEY_REDACTED]");
    let scrubbed = BEARER.replace_all(&scrubbed, "Bearer [TOKEN_REDACTED]");
    KEY_VALUE
        .replace_all(&scrubbed, |caps: &Captures| format!("{}[REDACTED]", &caps[1]))
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scrub_api_keys() {
        let scrubbed = scrub_secrets("invalid key sk-ant-REDACTED");
        assert_eq!(scrubbed, "invalid key [API_KEY_REDACTED]");

        let scrubbed = scrub_secrets("Incorrect API key provided: sk-proj-ABCDEFGHIJKLMNOPQRSTUV");
        assert!(!scrubbed.contains("ABCDEFGHIJ"));
    }

    #[test]
    fn test_scrub_bearer_and_fields() {
        let scrubbed = scrub_secrets("Authorization: Bearer abc.def-123");
        assert_eq!(scrubbed, "Authorization: Bearer [TOKEN_REDACTED]");

        let scrubbed = scrub_secrets(r#"{"api_key": "hunter2-hunter2", "model": "x"}"#);
        assert!(!scrubbed.contains("hunter2"));
        assert!(scrubbed.contains(r#""model": "x""#));

        let scrubbed = scrub_secrets("https://host/path?token=abcdef&q=1");
        assert!(scrubbed.contains("token=[REDACTED]"));
        assert!(scrubbed.contains("&q=1"));
    }

    #[test]
    fn test_plain_text_untouched() {
        let text = "model overloaded, retry later";
        assert_eq!(scrub_secrets(text), text);
    }
}

//! Model provider adapters.

pub mod anthropic;
pub mod mock;
pub mod openai_compatible;
pub mod registry;

pub use anthropic::AnthropicProvider;
pub use mock::{MockModelProvider, MockReply};
pub use openai_compatible::OpenAiCompatibleProvider;
pub use registry::ProviderRegistry;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;

use crate::domain::ports::ProviderError;
use crate::infrastructure::logging::scrub_secrets;

/// Longest error body kept in a provider error.
const MAX_ERROR_BODY: usize = 500;

/// Client-side limiter for `requests_per_second`, if one is configured.
pub(crate) fn rate_limiter(requests_per_second: Option<u32>) -> Option<DefaultDirectRateLimiter> {
    requests_per_second
        .and_then(NonZeroU32::new)
        .map(|rps| RateLimiter::direct(Quota::per_second(rps)))
}

pub(crate) fn send_error(err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Network(scrub_secrets(&err.to_string()))
    }
}

/// Provider error for a non-success response. The body is scrubbed of
/// credentials and truncated before it is kept.
pub(crate) async fn status_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let body: String = scrub_secrets(&body).chars().take(MAX_ERROR_BODY).collect();
    ProviderError::from_status(status, body)
}

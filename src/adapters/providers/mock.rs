//! Scripted model provider for tests and offline runs.
//!
//! Replies are queued per agent role and consumed in order. When a role's
//! queue is empty its default reply (if any) is used. The provider records
//! every request and tracks how many calls were in flight at once.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::domain::models::AgentRole;
use crate::domain::ports::{Completion, CompletionRequest, ModelProvider, ProviderError};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Error(ProviderError),
}

impl MockReply {
    /// A plain text reply.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// A reply carrying `value` serialized as JSON.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::Text(value.to_string())
    }
}

#[derive(Default)]
struct Script {
    queues: HashMap<AgentRole, VecDeque<MockReply>>,
    defaults: HashMap<AgentRole, MockReply>,
    delays: HashMap<AgentRole, Duration>,
    calls: Vec<CompletionRequest>,
}

/// Scripted [`ModelProvider`] that replies per agent role.
#[derive(Default)]
pub struct MockModelProvider {
    script: Mutex<Script>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockModelProvider {
    /// A provider with no scripted replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider whose default replies drive a mission through one
    /// plan/research/write/reflect/verify cycle that is accepted first time.
    pub fn with_canned_responses() -> Self {
        let provider = Self::new();
        let defaults = [
            (
                AgentRole::Planning,
                serde_json::json!({
                    "title": "Research report",
                    "sections": [{"id": "s1", "title": "Findings", "description": "Key findings"}],
                    "complete": true
                }),
            ),
            (AgentRole::Router, serde_json::json!({"action": "answer"})),
            (
                AgentRole::QueryStrategy,
                serde_json::json!({"queries": [{"text": "overview", "section_id": "s1"}]}),
            ),
            (AgentRole::NoteAssignment, serde_json::json!({"assignments": []})),
            (
                AgentRole::Research,
                serde_json::json!({"notes": [{"snippet": 0, "content": "Summary of the top result.", "sections": ["s1"]}]}),
            ),
            (
                AgentRole::Writing,
                serde_json::json!({
                    "title": "Research report",
                    "sections": [{"section_id": "s1", "heading": "Findings", "body": "Summary of findings.", "notes": ["N1"]}]
                }),
            ),
            (AgentRole::Reflection, serde_json::json!({"accept": true})),
            (
                AgentRole::Verifier,
                serde_json::json!({"checked_claims": 1, "unsupported_claims": []}),
            ),
        ];
        for (role, value) in defaults {
            provider.set_default(role, MockReply::json(&value));
        }
        provider.set_default(
            AgentRole::Messenger,
            MockReply::text("No further details are available."),
        );
        provider
    }

    /// Queue a reply for `role`.
    pub fn push(&self, role: AgentRole, reply: MockReply) {
        self.lock().queues.entry(role).or_default().push_back(reply);
    }

    /// Queue a JSON reply for `role`.
    pub fn push_json(&self, role: AgentRole, value: serde_json::Value) {
        self.push(role, MockReply::json(&value));
    }

    /// Reply used for `role` once its queue is empty.
    pub fn set_default(&self, role: AgentRole, reply: MockReply) {
        self.lock().defaults.insert(role, reply);
    }

    /// Delay every call for `role` by `delay`.
    pub fn set_delay(&self, role: AgentRole, delay: Duration) {
        self.lock().delays.insert(role, delay);
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.lock().calls.clone()
    }

    /// Requests received for `role`.
    pub fn calls_for(&self, role: AgentRole) -> Vec<CompletionRequest> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.role == role)
            .cloned()
            .collect()
    }

    /// Highest number of calls observed in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_reply(&self, request: &CompletionRequest) -> (Option<MockReply>, Option<Duration>) {
        let mut script = self.lock();
        script.calls.push(request.clone());
        let queued = script
            .queues
            .get_mut(&request.role)
            .and_then(VecDeque::pop_front);
        let reply = queued.or_else(|| script.defaults.get(&request.role).cloned());
        (reply, script.delays.get(&request.role).copied())
    }
}

#[async_trait]
impl ModelProvider for MockModelProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight {
            counter: &self.in_flight,
        };
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let (reply, delay) = self.next_reply(&request);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Some(MockReply::Text(text)) => Ok(Completion {
                output_tokens: u32::try_from(text.len() / 4).unwrap_or(u32::MAX),
                input_tokens: u32::try_from(request.prompt.len() / 4).unwrap_or(u32::MAX),
                text,
                model: request.model,
            }),
            Some(MockReply::Error(err)) => Err(err),
            None => Err(ProviderError::InvalidRequest {
                status: 400,
                message: format!("no scripted reply for role {}", request.role),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ModelBinding;
    use std::sync::Arc;

    fn request(role: AgentRole) -> CompletionRequest {
        CompletionRequest::new(role, &ModelBinding::new("mock-model"), "prompt")
    }

    #[tokio::test]
    async fn test_queue_then_default() {
        let provider = MockModelProvider::new();
        provider.push(AgentRole::Writing, MockReply::text("first"));
        provider.set_default(AgentRole::Writing, MockReply::text("fallback"));

        let a = provider.complete(request(AgentRole::Writing)).await.unwrap();
        let b = provider.complete(request(AgentRole::Writing)).await.unwrap();
        assert_eq!(a.text, "first");
        assert_eq!(b.text, "fallback");
        assert_eq!(provider.calls_for(AgentRole::Writing).len(), 2);
    }

    #[tokio::test]
    async fn test_unscripted_role_is_fatal() {
        let provider = MockModelProvider::new();
        let err = provider.complete(request(AgentRole::Router)).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_scripted_error() {
        let provider = MockModelProvider::new();
        provider.push(AgentRole::Research, MockReply::Error(ProviderError::Timeout));
        let err = provider.complete(request(AgentRole::Research)).await.unwrap_err();
        assert_eq!(err, ProviderError::Timeout);
    }

    #[tokio::test]
    async fn test_tracks_max_in_flight() {
        let provider = Arc::new(MockModelProvider::with_canned_responses());
        provider.set_delay(AgentRole::Research, Duration::from_millis(50));

        let a = {
            let p = Arc::clone(&provider);
            tokio::spawn(async move { p.complete(request(AgentRole::Research)).await })
        };
        let b = {
            let p = Arc::clone(&provider);
            tokio::spawn(async move { p.complete(request(AgentRole::Research)).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(provider.max_in_flight(), 2);
        assert_eq!(provider.in_flight.load(Ordering::SeqCst), 0);
    }
}

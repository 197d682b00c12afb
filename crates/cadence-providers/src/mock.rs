//! Mock provider for exercising the pipeline without real API calls.
//!
//! Responses come from, in order: a queue of sequenced responses, substring
//! patterns matched against the query and system prompt, and finally a default.
//! Failure patterns make matching calls return a provider error, which is how
//! tests simulate an unreachable repair collaborator.

use async_trait::async_trait;
use cadence_core::{
    Context, Error, ModelProvider, Query, RecoverLock as _, Response, Result, TokenUsage,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// One call observed by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Query text (the user message)
    pub query: String,
    /// System prompt the call was made with
    pub system_prompt: String,
    /// Requested sampling temperature
    pub temperature: Option<f32>,
}

/// Shared mutable state behind a [`MockProvider`].
#[derive(Default)]
struct MockState {
    sequence: VecDeque<String>,
    patterns: Vec<(String, String)>,
    failures: Vec<String>,
    fail_all: bool,
    default_response: Option<String>,
    history: Vec<RecordedCall>,
}

/// Mock provider that returns pre-defined responses.
#[derive(Clone, Default)]
pub struct MockProvider {
    state: Arc<Mutex<MockState>>,
}

impl MockProvider {
    /// Creates a mock with no responses configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a response returned when `pattern` occurs in the query or system prompt.
    #[must_use]
    pub fn with_response(self, pattern: impl Into<String>, response: impl Into<String>) -> Self {
        self.state
            .recover()
            .patterns
            .push((pattern.into(), response.into()));
        self
    }

    /// Queues responses returned one per call, before any pattern is consulted.
    #[must_use]
    pub fn with_sequence<I, T>(self, responses: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.state
            .recover()
            .sequence
            .extend(responses.into_iter().map(Into::into));
        self
    }

    /// Makes calls whose query or system prompt contains `pattern` fail.
    #[must_use]
    pub fn with_failure(self, pattern: impl Into<String>) -> Self {
        self.state.recover().failures.push(pattern.into());
        self
    }

    /// Makes every call fail.
    #[must_use]
    pub fn failing(self) -> Self {
        self.state.recover().fail_all = true;
        self
    }

    /// Sets the response used when nothing else matches.
    #[must_use]
    pub fn with_default_response(self, response: impl Into<String>) -> Self {
        self.state.recover().default_response = Some(response.into());
        self
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.recover().history.clone()
    }

    /// Number of calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.state.with_recovered(|state| state.history.len())
    }

    /// Clear the call history.
    pub fn clear_history(&self) {
        self.state.with_recovered(|state| state.history.clear());
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn generate(&self, query: &Query, context: &Context) -> Result<Response> {
        let mut state = self.state.recover();
        state.history.push(RecordedCall {
            query: query.text.clone(),
            system_prompt: context.system_prompt.clone(),
            temperature: query.generation.temperature,
        });

        let matches = |pattern: &String| {
            query.text.contains(pattern.as_str()) || context.system_prompt.contains(pattern.as_str())
        };

        if state.fail_all || state.failures.iter().any(matches) {
            return Err(Error::Provider("mock provider failure".to_owned()));
        }

        let text = match state.sequence.pop_front() {
            Some(next) => next,
            None => state
                .patterns
                .iter()
                .find(|(pattern, _)| matches(pattern))
                .map(|(_, response)| response.clone())
                .or_else(|| state.default_response.clone())
                .unwrap_or_else(|| format!("Mock response for query: {}", query.text)),
        };
        drop(state);

        Ok(Response {
            text,
            confidence: 1.0,
            tokens_used: TokenUsage {
                input: query.text.len() as u64,
                output: 0,
                cache_read: 0,
                cache_write: 0,
            },
            provider: "mock".to_owned(),
            latency_ms: 0,
            finish_reason: Some("stop".to_owned()),
        })
    }

    fn estimate_cost(&self, _context: &Context) -> f64 {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::GenerationConfig;

    async fn ask(provider: &MockProvider, text: &str) -> Result<Response> {
        provider.generate(&Query::new(text), &Context::new("system")).await
    }

    #[tokio::test]
    async fn test_substring_match() {
        let provider = MockProvider::new().with_response("implement", "I will implement that");
        let response = ask(&provider, "Please implement login").await.unwrap();
        assert_eq!(response.text, "I will implement that");
    }

    #[tokio::test]
    async fn test_system_prompt_match() {
        let provider = MockProvider::new().with_response("system", "matched the system prompt");
        let response = ask(&provider, "anything").await.unwrap();
        assert_eq!(response.text, "matched the system prompt");
    }

    #[tokio::test]
    async fn test_sequence_precedes_patterns() {
        let provider = MockProvider::new()
            .with_sequence(["first", "second"])
            .with_default_response("fallback");
        assert_eq!(ask(&provider, "a").await.unwrap().text, "first");
        assert_eq!(ask(&provider, "b").await.unwrap().text, "second");
        assert_eq!(ask(&provider, "c").await.unwrap().text, "fallback");
    }

    #[tokio::test]
    async fn test_failure_pattern() {
        let provider = MockProvider::new()
            .with_failure("repair")
            .with_default_response("ok");
        assert!(ask(&provider, "please repair this").await.is_err());
        assert!(ask(&provider, "generate").await.is_ok());
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_mode() {
        let provider = MockProvider::new().failing();
        let error = ask(&provider, "anything").await.unwrap_err();
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn test_history_records_temperature() {
        let provider = MockProvider::new();
        let query = Query::new("fix").with_generation(GenerationConfig::deterministic(0.1));
        provider
            .generate(&query, &Context::new("repair prompt"))
            .await
            .unwrap();

        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].temperature, Some(0.1));
        assert_eq!(calls[0].system_prompt, "repair prompt");

        provider.clear_history();
        assert_eq!(provider.call_count(), 0);
    }
}

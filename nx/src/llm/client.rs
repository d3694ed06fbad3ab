//! LlmClient trait and retry helper

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::warn;

use super::error::LlmError;
use super::types::{CompletionRequest, CompletionResponse, StreamChunk};

/// Stateless LLM client - each call is independent
///
/// The system prompt travels with every request; no conversation state is
/// kept inside the client. Callers own their histories.
#[async_trait]
pub trait LlmClient: Send + Sync + std::fmt::Debug {
    /// Send a single completion request (blocking until complete)
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Streaming completion; chunks go to the channel as they arrive.
    /// Returns the final complete response.
    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError>;

    /// Estimate the token count of a string. A chars/4 heuristic unless the
    /// backend has something better.
    fn count_tokens(&self, text: &str) -> u64 {
        (text.chars().count() as u64).div_ceil(4)
    }
}

/// Retry policy for transient LLM failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            factor: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given (0-based) retry, with jitter
    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay * self.factor.saturating_pow(attempt);
        let jitter_ms = rand::rng().random_range(0..=base.as_millis().min(1_000) as u64);
        base + Duration::from_millis(jitter_ms)
    }
}

/// Complete with retries on transient failures
///
/// Rate limits honor the server's retry-after; other retryable errors back
/// off exponentially. Non-retryable errors return immediately.
pub async fn complete_with_retry(
    client: &Arc<dyn LlmClient>,
    request: CompletionRequest,
    policy: RetryPolicy,
) -> Result<CompletionResponse, LlmError> {
    let mut attempt = 0;
    loop {
        match client.complete(request.clone()).await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = e.retry_after().unwrap_or_else(|| policy.delay_for(attempt));
                warn!(attempt, ?delay, error = %e, "LLM call failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Mock client for unit tests across the crate
#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::llm::types::{StopReason, TokenUsage};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted LLM client: returns canned responses in order
    #[derive(Debug)]
    pub struct MockLlmClient {
        responses: Mutex<Vec<Result<CompletionResponse, LlmError>>>,
        call_count: AtomicUsize,
        /// When the script runs out, repeat this text forever
        fallback: Option<String>,
    }

    impl MockLlmClient {
        pub fn new(responses: Vec<CompletionResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(Ok).collect()),
                call_count: AtomicUsize::new(0),
                fallback: None,
            }
        }

        /// Script raw results, including errors
        pub fn with_results(results: Vec<Result<CompletionResponse, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(results),
                call_count: AtomicUsize::new(0),
                fallback: None,
            }
        }

        /// Repeat `text` after the script is exhausted
        pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
            self.fallback = Some(text.into());
            self
        }

        /// Convenience: a client that always answers with `text`
        pub fn always(text: impl Into<String>) -> Self {
            Self::new(vec![]).with_fallback(text)
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        /// Build a plain-text response
        pub fn text_response(text: impl Into<String>) -> CompletionResponse {
            CompletionResponse {
                content: Some(text.into()),
                tool_calls: vec![],
                stop_reason: StopReason::EndTurn,
                usage: TokenUsage {
                    input_tokens: 100,
                    output_tokens: 50,
                    ..Default::default()
                },
            }
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().expect("mock responses mutex poisoned");
            if idx < responses.len() {
                // Replace so errors (non-Clone) can be handed out once
                let slot = std::mem::replace(
                    &mut responses[idx],
                    Err(LlmError::InvalidResponse("mock response already consumed".to_string())),
                );
                return slot;
            }
            match &self.fallback {
                Some(text) => Ok(Self::text_response(text.clone())),
                None => Err(LlmError::InvalidResponse("no more mock responses".to_string())),
            }
        }

        async fn stream(
            &self,
            request: CompletionRequest,
            _chunk_tx: mpsc::Sender<StreamChunk>,
        ) -> Result<CompletionResponse, LlmError> {
            self.complete(request).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockLlmClient;
    use super::*;

    #[tokio::test]
    async fn test_mock_scripted_order() {
        let client = MockLlmClient::new(vec![
            MockLlmClient::text_response("first"),
            MockLlmClient::text_response("second"),
        ]);

        let req = CompletionRequest::default();
        assert_eq!(client.complete(req.clone()).await.unwrap().text(), "first");
        assert_eq!(client.complete(req.clone()).await.unwrap().text(), "second");
        assert!(client.complete(req).await.is_err());
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient() {
        let client: Arc<dyn LlmClient> = Arc::new(MockLlmClient::with_results(vec![
            Err(LlmError::Api {
                status: 503,
                message: "overloaded".to_string(),
            }),
            Ok(MockLlmClient::text_response("recovered")),
        ]));

        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            factor: 2,
        };
        let response = complete_with_retry(&client, CompletionRequest::default(), policy)
            .await
            .unwrap();
        assert_eq!(response.text(), "recovered");
    }

    #[tokio::test]
    async fn test_retry_gives_up_on_fatal() {
        let client: Arc<dyn LlmClient> = Arc::new(MockLlmClient::with_results(vec![Err(LlmError::Authentication(
            "ANTHROPIC_API_KEY".to_string(),
        ))]));

        let result = complete_with_retry(&client, CompletionRequest::default(), RetryPolicy::default()).await;
        assert!(matches!(result, Err(LlmError::Authentication(_))));
    }

    #[test]
    fn test_default_count_tokens() {
        let client = MockLlmClient::always("x");
        assert_eq!(client.count_tokens(""), 0);
        assert_eq!(client.count_tokens("abcd"), 1);
        assert_eq!(client.count_tokens("abcde"), 2);
    }
}

//! Retrying JSON completion client.
//!
//! The one component allowed to retry. Transport failures (429, 5xx gateway
//! errors, timeouts) are retried with exponential backoff; anything else,
//! including a body that arrives but is not JSON, is returned immediately.

use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::backend::traits::{CompletionRequest, LlmBackend, LlmError};
use crate::extract::{extract_json, ExtractError};

/// Default sampling temperature for structured output.
pub const DEFAULT_TEMPERATURE: f32 = 0.1;

/// Errors from a JSON completion.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompletionError {
    /// Transport or service failure (after retries were exhausted)
    #[error("completion service error after {attempts} attempt(s): {source}")]
    Service {
        #[source]
        source: LlmError,
        attempts: u32,
    },

    /// Text arrived but no JSON could be extracted from it
    #[error("completion parse error: {0}")]
    Parse(#[from] ExtractError),
}

/// Backoff schedule for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay to wait after `attempt` (1-based) failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// A parsed completion with bookkeeping for metrics.
#[derive(Debug, Clone)]
pub struct JsonCompletion {
    /// Parsed JSON value
    pub value: Value,
    /// Attempts it took (1 when the first call succeeded)
    pub attempts: u32,
    /// Wall time across all attempts
    pub latency: Duration,
}

/// JSON completion client over an [`LlmBackend`].
#[derive(Clone)]
pub struct CompletionClient {
    backend: Arc<dyn LlmBackend>,
    retry: RetryPolicy,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl CompletionClient {
    /// Create a client with default retry policy and temperature.
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            backend,
            retry: RetryPolicy::default(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
        }
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Cap output tokens.
    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Identifier of the underlying backend.
    pub fn backend_id(&self) -> &str {
        self.backend.id()
    }

    /// Send `prompt` and parse the reply as JSON.
    pub async fn complete_json(&self, prompt: &str) -> Result<JsonCompletion, CompletionError> {
        let start = Instant::now();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        let text = loop {
            attempt += 1;

            let mut request = CompletionRequest::user(prompt)
                .with_temperature(self.temperature)
                .with_json_output();
            if let Some(max) = self.max_tokens {
                request = request.with_max_tokens(max);
            }

            match self.backend.complete(request).await {
                Ok(response) => break response.content,
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let mut delay = self.retry.delay_after(attempt);
                    if let LlmError::RateLimited {
                        retry_after_ms: Some(ms),
                    } = &err
                    {
                        delay = delay.max(Duration::from_millis(*ms));
                    }
                    warn!(
                        backend = %self.backend.id(),
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Completion failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(CompletionError::Service {
                        source: err,
                        attempts: attempt,
                    })
                }
            }
        };

        let value = extract_json(&text)?;
        let latency = start.elapsed();

        debug!(
            backend = %self.backend.id(),
            attempts = attempt,
            latency_ms = latency.as_millis() as u64,
            "Completion parsed"
        );

        Ok(JsonCompletion {
            value,
            attempts: attempt,
            latency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use serde_json::json;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let backend = Arc::new(
            MockBackend::default()
                .with_error(LlmError::Http {
                    status: 502,
                    body: String::new(),
                })
                .with_error(LlmError::Timeout("read".into()))
                .with_response("```json\n{\"ok\": true}\n```"),
        );
        let client = CompletionClient::new(backend.clone()).with_retry(fast_retry());

        let completion = client.complete_json("prompt").await.unwrap();
        assert_eq!(completion.value, json!({"ok": true}));
        assert_eq!(completion.attempts, 3);
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_ceiling() {
        let backend = Arc::new(MockBackend::default().with_error(LlmError::RateLimited {
            retry_after_ms: None,
        }));
        let client = CompletionClient::new(backend.clone()).with_retry(fast_retry());

        let err = client.complete_json("prompt").await.unwrap_err();
        assert!(matches!(
            err,
            CompletionError::Service {
                source: LlmError::RateLimited { .. },
                attempts: 3
            }
        ));
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let backend = Arc::new(MockBackend::default().with_error(LlmError::Http {
            status: 400,
            body: "bad request".into(),
        }));
        let client = CompletionClient::new(backend.clone()).with_retry(fast_retry());

        assert!(client.complete_json("prompt").await.is_err());
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_parse_error_is_terminal() {
        let backend = Arc::new(MockBackend::default().with_response("I cannot help with that."));
        let client = CompletionClient::new(backend.clone()).with_retry(fast_retry());

        let err = client.complete_json("prompt").await.unwrap_err();
        assert!(matches!(err, CompletionError::Parse(_)));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_prompt_is_forwarded() {
        let backend = Arc::new(MockBackend::default().with_response("{}"));
        let client = CompletionClient::new(backend.clone());
        client.complete_json("hello").await.unwrap();
        assert_eq!(backend.prompts(), vec!["hello"]);
    }
}

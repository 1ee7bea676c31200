//! Translation client: the single gateway to the language model.
//!
//! [`TranslationClient`] wraps a [`TranslationProvider`] with everything a
//! long unattended run needs:
//!
//! ```text
//! translate()
//!  ├─ cache lookup        (prompt context, content, source, target)
//!  ├─ rate limiter        token bucket, cancellation-aware
//!  ├─ provider.complete() up to N attempts, exponential backoff + jitter
//!  ├─ audit.log           one JSON line per attempt
//!  └─ usage.json          totals after each success
//! ```
//!
//! The client is `Send + Sync` and shared by `Arc`; build it once per run.

pub mod cache;
pub mod limiter;
pub mod llm;
pub mod retry;
pub mod usage;

pub use cache::{cache_key, ResponseCache};
pub use limiter::RateLimiter;
pub use llm::{resolve_provider, LlmTranslationProvider};
pub use retry::RetryPolicy;
pub use usage::{AuditEntry, UsageMetadata, UsageRecorder};

use crate::cancel::CancellationToken;
use crate::error::{ProviderError, TranslateError};
use crate::prompts::{self, PromptSettings};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationRequest {
    pub system: String,
    pub content: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// A provider's answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// The external model behind the client.
///
/// Implementations classify their failures into [`ProviderError`]; the
/// client never sees a raw transport error.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    async fn complete(&self, request: &TranslationRequest) -> Result<Completion, ProviderError>;
    async fn count_tokens(&self, text: &str) -> Result<usize, ProviderError>;
}

pub struct TranslationClient {
    provider: Arc<dyn TranslationProvider>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    cache: ResponseCache,
    usage: Option<Arc<UsageRecorder>>,
    cancel: CancellationToken,
    prompt: PromptSettings,
    temperature: f32,
    max_tokens: usize,
}

impl std::fmt::Debug for TranslationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationClient")
            .field("provider", &self.provider.name())
            .field("model", &self.provider.model())
            .field("retry", &self.retry)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl TranslationClient {
    pub fn builder(provider: Arc<dyn TranslationProvider>) -> TranslationClientBuilder {
        TranslationClientBuilder {
            provider,
            per_minute: RateLimiter::DEFAULT_PER_MINUTE,
            burst: RateLimiter::DEFAULT_BURST,
            retry: RetryPolicy::default(),
            cache_capacity: cache::DEFAULT_CAPACITY,
            cache_ttl: cache::DEFAULT_TTL,
            usage: None,
            cancel: CancellationToken::new(),
            prompt: PromptSettings::default(),
            temperature: 0.3,
            max_tokens: 4096,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn usage(&self) -> Option<&Arc<UsageRecorder>> {
        self.usage.as_ref()
    }

    /// Translate `content` from `source` to `target`.
    ///
    /// `prompt_context` is appended to the system prompt and is part of the
    /// cache key; `book_title` only fills the `{book}` placeholder.
    pub async fn translate(
        &self,
        prompt_context: &str,
        content: &str,
        source: &str,
        target: &str,
        book_title: &str,
    ) -> Result<String, TranslateError> {
        let key = cache_key(prompt_context, content, source, target);
        if let Some(hit) = self.cache.get(&key) {
            debug!("Cache hit for {} bytes of content", content.len());
            return Ok(hit);
        }

        let request = TranslationRequest {
            system: prompts::system_prompt(&self.prompt, source, target, book_title, prompt_context),
            content: content.to_string(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let attempts = self.retry.max_attempts;
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..attempts {
            if !self.limiter.acquire(&self.cancel).await {
                return Err(TranslateError::Cancelled);
            }

            let result = self
                .provider
                .complete(&request)
                .await
                .and_then(|completion| {
                    if completion.text.trim().is_empty() {
                        Err(ProviderError::Failed("empty response".into()))
                    } else {
                        Ok(completion)
                    }
                });
            self.audit(&request, attempt, &result).await;

            match result {
                Ok(completion) => {
                    debug!(
                        "{} input tokens, {} output tokens (attempt {})",
                        completion.input_tokens,
                        completion.output_tokens,
                        attempt + 1
                    );
                    if let Some(usage) = &self.usage {
                        let model = if completion.model.is_empty() {
                            self.provider.model()
                        } else {
                            completion.model.as_str()
                        };
                        usage
                            .record(model, content, completion.input_tokens, completion.output_tokens)
                            .await;
                    }
                    self.cache.insert(key, completion.text.clone());
                    return Ok(completion.text);
                }
                Err(e) => {
                    let rate_limited = e.is_rate_limited();
                    if attempt + 1 < attempts {
                        let delay = self.retry.backoff(attempt, rate_limited);
                        warn!(
                            "Attempt {}/{} failed: {}; retrying in {}ms",
                            attempt + 1,
                            attempts,
                            e,
                            delay.as_millis()
                        );
                        if !self.cancel.sleep(delay).await {
                            return Err(TranslateError::Cancelled);
                        }
                    } else {
                        warn!("Attempt {}/{} failed: {}", attempt + 1, attempts, e);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(ProviderError::RateLimited(_)) => TranslateError::RateLimitExceeded { attempts },
            Some(e) => TranslateError::Failed {
                attempts,
                detail: e.to_string(),
            },
            None => TranslateError::Failed {
                attempts,
                detail: "no attempt was made".into(),
            },
        })
    }

    /// Token count of `text` as the provider would bill it.
    pub async fn count_tokens(&self, text: &str) -> Result<usize, TranslateError> {
        self.provider
            .count_tokens(text)
            .await
            .map_err(|e| TranslateError::Failed {
                attempts: 1,
                detail: e.to_string(),
            })
    }

    async fn audit(
        &self,
        request: &TranslationRequest,
        attempt: u32,
        result: &Result<Completion, ProviderError>,
    ) {
        let Some(usage) = &self.usage else {
            return;
        };
        let (response, input_tokens, output_tokens, error) = match result {
            Ok(c) => (
                Some(c.text.clone()),
                Some(c.input_tokens),
                Some(c.output_tokens),
                None,
            ),
            Err(e) => (None, None, None, Some(e.to_string())),
        };
        usage
            .audit(&AuditEntry {
                timestamp: Utc::now(),
                provider: self.provider.name().to_string(),
                model: self.provider.model().to_string(),
                attempt,
                system: request.system.clone(),
                request: request.content.clone(),
                response,
                input_tokens,
                output_tokens,
                error,
            })
            .await;
    }
}

/// Builder for [`TranslationClient`].
pub struct TranslationClientBuilder {
    provider: Arc<dyn TranslationProvider>,
    per_minute: u32,
    burst: u32,
    retry: RetryPolicy,
    cache_capacity: usize,
    cache_ttl: Duration,
    usage: Option<Arc<UsageRecorder>>,
    cancel: CancellationToken,
    prompt: PromptSettings,
    temperature: f32,
    max_tokens: usize,
}

impl TranslationClientBuilder {
    pub fn rate_limit(mut self, per_minute: u32, burst: u32) -> Self {
        self.per_minute = per_minute;
        self.burst = burst;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache(mut self, capacity: usize, ttl: Duration) -> Self {
        self.cache_capacity = capacity;
        self.cache_ttl = ttl;
        self
    }

    pub fn usage(mut self, usage: Arc<UsageRecorder>) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn prompt(mut self, prompt: PromptSettings) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.max_tokens = n.max(1);
        self
    }

    pub fn build(self) -> TranslationClient {
        TranslationClient {
            provider: self.provider,
            limiter: RateLimiter::new(self.per_minute, self.burst),
            retry: self.retry,
            cache: ResponseCache::new(self.cache_capacity, self.cache_ttl),
            usage: self.usage,
            cancel: self.cancel,
            prompt: self.prompt,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

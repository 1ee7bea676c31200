//! edgequake-llm adapter and provider resolution.
//!
//! [`LlmTranslationProvider`] turns a [`TranslationRequest`] into one
//! system + one user chat message. Token counting uses Anthropic's
//! `count_tokens` endpoint when the provider is Anthropic and a key is
//! available; every other provider gets a characters / 4 estimate.

use super::{Completion, TranslationProvider, TranslationRequest};
use crate::config::TranslateConfig;
use crate::error::{EpubTransError, ProviderError};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, LlmError, ProviderFactory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_PROVIDER: &str = "anthropic";
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

const ANTHROPIC_COUNT_TOKENS_URL: &str = "https://api.anthropic.com/v1/messages/count_tokens";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_TOKEN_COUNTING_BETA: &str = "token-counting-2024-11-01";

pub struct LlmTranslationProvider {
    llm: Arc<dyn LLMProvider>,
    name: String,
    model: String,
    http: reqwest::Client,
    anthropic_key: Option<String>,
}

impl LlmTranslationProvider {
    pub fn new(llm: Arc<dyn LLMProvider>, name: impl Into<String>, model: impl Into<String>) -> Self {
        let name = name.into();
        let anthropic_key = if name.eq_ignore_ascii_case("anthropic") {
            std::env::var("ANTHROPIC_API_KEY").ok().filter(|k| !k.is_empty())
        } else {
            None
        };
        Self {
            llm,
            name,
            model: model.into(),
            http: reqwest::Client::new(),
            anthropic_key,
        }
    }

    async fn anthropic_count_tokens(&self, key: &str, text: &str) -> Result<usize, ProviderError> {
        let body = CountTokensRequest {
            model: &self.model,
            messages: vec![CountTokensMessage {
                role: "user",
                content: vec![CountTokensContent { kind: "text", text }],
            }],
        };
        let resp = self
            .http
            .post(ANTHROPIC_COUNT_TOKENS_URL)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("anthropic-beta", ANTHROPIC_TOKEN_COUNTING_BETA)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::classify(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(ProviderError::classify(format!(
                "count_tokens returned HTTP {}: {}",
                status.as_u16(),
                detail
            )));
        }
        let parsed: CountTokensResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Failed(format!("count_tokens: {e}")))?;
        Ok(parsed.input_tokens)
    }
}

impl From<LlmError> for ProviderError {
    /// Providers report throttling as [`LlmError::RateLimited`]; everything
    /// else retries with the normal backoff.
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::RateLimited(detail) => ProviderError::RateLimited(detail),
            other => ProviderError::Failed(other.to_string()),
        }
    }
}

/// Rough token count for providers without a counting endpoint.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[async_trait]
impl TranslationProvider for LlmTranslationProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &TranslationRequest) -> Result<Completion, ProviderError> {
        let messages = vec![
            ChatMessage::system(request.system.as_str()),
            ChatMessage::user(request.content.as_str()),
        ];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };
        let response = self
            .llm
            .chat(&messages, Some(&options))
            .await
            .map_err(ProviderError::from)?;
        Ok(Completion {
            text: response.content,
            model: self.model.clone(),
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }

    async fn count_tokens(&self, text: &str) -> Result<usize, ProviderError> {
        match &self.anthropic_key {
            Some(key) => self.anthropic_count_tokens(key, text).await,
            None => Ok(estimate_tokens(text)),
        }
    }
}

#[derive(Serialize)]
struct CountTokensRequest<'a> {
    model: &'a str,
    messages: Vec<CountTokensMessage<'a>>,
}

#[derive(Serialize)]
struct CountTokensMessage<'a> {
    role: &'a str,
    content: Vec<CountTokensContent<'a>>,
}

#[derive(Serialize)]
struct CountTokensContent<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct CountTokensResponse {
    input_tokens: usize,
}

fn create_provider(name: &str, model: &str) -> Result<LlmTranslationProvider, EpubTransError> {
    let llm = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        EpubTransError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok(LlmTranslationProvider::new(llm, name, model))
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Resolve the translation provider, from most-specific to least-specific:
///
/// 1. a pre-built provider in the config,
/// 2. a named provider (`--provider`) with `--model` or the default model,
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`,
/// 4. Anthropic when `ANTHROPIC_API_KEY` is set,
/// 5. whatever `ProviderFactory::from_env()` detects.
pub fn resolve_provider(
    config: &TranslateConfig,
) -> Result<Arc<dyn TranslationProvider>, EpubTransError> {
    if let Some(provider) = &config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(name) = &config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return Ok(Arc::new(create_provider(name, model)?));
    }

    if let (Some(name), Some(model)) = (
        non_empty_env("EDGEQUAKE_LLM_PROVIDER"),
        non_empty_env("EDGEQUAKE_MODEL"),
    ) {
        return Ok(Arc::new(create_provider(&name, &model)?));
    }

    if non_empty_env("ANTHROPIC_API_KEY").is_some() {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return Ok(Arc::new(create_provider(DEFAULT_PROVIDER, model)?));
    }

    let (llm, _embedding) =
        ProviderFactory::from_env().map_err(|e| EpubTransError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set ANTHROPIC_API_KEY, OPENAI_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;
    let model = config.model.clone().unwrap_or_else(|| "auto".to_string());
    debug!("Auto-detected provider from environment");
    Ok(Arc::new(LlmTranslationProvider::new(llm, "auto", model)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("héllo"), 2);
    }

    #[test]
    fn llm_errors_map_by_variant() {
        let throttled = ProviderError::from(LlmError::RateLimited("slow down".into()));
        assert_eq!(throttled, ProviderError::RateLimited("slow down".into()));

        let failed = ProviderError::from(LlmError::ApiError("HTTP 429 from upstream proxy".into()));
        assert!(!failed.is_rate_limited());
        assert!(failed.to_string().contains("HTTP 429 from upstream proxy"));
        assert!(!ProviderError::from(LlmError::Timeout).is_rate_limited());
    }

    #[test]
    fn count_tokens_body_matches_api_shape() {
        let body = CountTokensRequest {
            model: "claude",
            messages: vec![CountTokensMessage {
                role: "user",
                content: vec![CountTokensContent {
                    kind: "text",
                    text: "Hello",
                }],
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["content"][0]["type"], "text");
        assert_eq!(json["messages"][0]["content"][0]["text"], "Hello");
    }

    struct Fixed;

    #[async_trait]
    impl TranslationProvider for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn model(&self) -> &str {
            "fixed-1"
        }

        async fn complete(&self, _request: &TranslationRequest) -> Result<Completion, ProviderError> {
            Ok(Completion::default())
        }

        async fn count_tokens(&self, _text: &str) -> Result<usize, ProviderError> {
            Ok(0)
        }
    }

    #[test]
    fn explicit_provider_wins() {
        let config = TranslateConfig::builder()
            .provider(Arc::new(Fixed))
            .provider_name("openai")
            .build()
            .unwrap();
        let provider = resolve_provider(&config).unwrap();
        assert_eq!(provider.name(), "fixed");
    }
}

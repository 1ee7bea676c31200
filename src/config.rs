//! Configuration for the translate stage.
//!
//! Every knob lives in [`TranslateConfig`], built via
//! [`TranslateConfigBuilder`]. The builder clamps obviously out-of-range
//! values and [`TranslateConfigBuilder::build`] rejects the rest.

use crate::client::TranslationProvider;
use crate::error::EpubTransError;
use crate::pipeline::batch::SizeMetric;
use crate::progress::ProgressCallback;
use crate::prompts::{PromptPreset, PromptSettings};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for translating one unpacked book.
///
/// # Example
/// ```rust
/// use epubtrans::TranslateConfig;
///
/// let config = TranslateConfig::builder()
///     .source_lang("English")
///     .target_lang("French")
///     .batch_size(1500)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_attempts, 3);
/// ```
#[derive(Clone)]
pub struct TranslateConfig {
    /// Language of the book. Default: English.
    pub source_lang: String,

    /// Language to translate into. Default: Vietnamese.
    pub target_lang: String,

    /// Model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// Provider name (e.g. "anthropic", "openai", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn TranslationProvider>>,

    /// Sampling temperature. Default: 0.3.
    pub temperature: f32,

    /// Maximum output tokens per call. Default: 4096.
    ///
    /// A batch's translation must fit in here, so keep it comfortably above
    /// `batch_size` when the metric is estimated tokens.
    pub max_tokens: usize,

    /// Batch ceiling, measured in `size_metric` units. Default: 2000.
    pub batch_size: usize,

    /// How unit sizes are measured. Default: estimated tokens.
    pub size_metric: SizeMetric,

    /// Sustained request rate. Default: 50 per minute.
    pub requests_per_minute: u32,

    /// Requests allowed back-to-back before the rate applies. Default: 10.
    pub burst: u32,

    /// Attempts per batch, the first included. Default: 3.
    pub max_attempts: u32,

    /// Base backoff delay in milliseconds. Default: 1000.
    pub retry_backoff_ms: u64,

    /// Response cache lifetime in seconds. Default: 900.
    pub cache_ttl_secs: u64,

    /// Response cache entries. Default: 1024.
    pub cache_capacity: usize,

    /// Files translated at the same time. Default: 1.
    pub concurrency: usize,

    /// Re-measure the tokens-per-word ratio every N batches. 0 disables.
    /// Default: 10.
    pub token_recount_interval: usize,

    /// Guidelines preset and overrides.
    pub prompt: PromptSettings,

    /// Write `usage.json` and `audit.log` to the book's state directory.
    /// Default: true.
    pub record_usage: bool,

    /// Receives per-file events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            source_lang: "English".to_string(),
            target_lang: "Vietnamese".to_string(),
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.3,
            max_tokens: 4096,
            batch_size: 2000,
            size_metric: SizeMetric::default(),
            requests_per_minute: 50,
            burst: 10,
            max_attempts: 3,
            retry_backoff_ms: 1000,
            cache_ttl_secs: 15 * 60,
            cache_capacity: 1024,
            concurrency: 1,
            token_recount_interval: 10,
            prompt: PromptSettings::default(),
            record_usage: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for TranslateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslateConfig")
            .field("source_lang", &self.source_lang)
            .field("target_lang", &self.target_lang)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|p| p.name().to_string()))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("batch_size", &self.batch_size)
            .field("size_metric", &self.size_metric)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("burst", &self.burst)
            .field("max_attempts", &self.max_attempts)
            .field("concurrency", &self.concurrency)
            .field("prompt", &self.prompt)
            .finish()
    }
}

impl TranslateConfig {
    pub fn builder() -> TranslateConfigBuilder {
        TranslateConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Builder for [`TranslateConfig`].
#[derive(Debug)]
pub struct TranslateConfigBuilder {
    config: TranslateConfig,
}

impl TranslateConfigBuilder {
    pub fn source_lang(mut self, lang: impl Into<String>) -> Self {
        self.config.source_lang = lang.into();
        self
    }

    pub fn target_lang(mut self, lang: impl Into<String>) -> Self {
        self.config.target_lang = lang.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn TranslationProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n;
        self
    }

    pub fn size_metric(mut self, metric: SizeMetric) -> Self {
        self.config.size_metric = metric;
        self
    }

    pub fn rate_limit(mut self, per_minute: u32, burst: u32) -> Self {
        self.config.requests_per_minute = per_minute;
        self.config.burst = burst;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn cache(mut self, capacity: usize, ttl_secs: u64) -> Self {
        self.config.cache_capacity = capacity;
        self.config.cache_ttl_secs = ttl_secs;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn token_recount_interval(mut self, n: usize) -> Self {
        self.config.token_recount_interval = n;
        self
    }

    pub fn preset(mut self, preset: PromptPreset) -> Self {
        self.config.prompt.preset = preset;
        self
    }

    pub fn guidelines(mut self, text: impl Into<String>) -> Self {
        self.config.prompt.guidelines = Some(text.into());
        self
    }

    pub fn system_prompt(mut self, text: impl Into<String>) -> Self {
        self.config.prompt.system_override = Some(text.into());
        self
    }

    pub fn record_usage(mut self, v: bool) -> Self {
        self.config.record_usage = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<TranslateConfig, EpubTransError> {
        let c = &self.config;
        if c.source_lang.trim().is_empty() || c.target_lang.trim().is_empty() {
            return Err(EpubTransError::InvalidConfig(
                "Source and target languages must not be empty".into(),
            ));
        }
        if c.source_lang.trim().eq_ignore_ascii_case(c.target_lang.trim()) {
            return Err(EpubTransError::InvalidConfig(format!(
                "Source and target language are both '{}'",
                c.target_lang
            )));
        }
        if c.batch_size == 0 {
            return Err(EpubTransError::InvalidConfig("Batch size must be ≥ 1".into()));
        }
        if c.max_tokens == 0 {
            return Err(EpubTransError::InvalidConfig("Max tokens must be ≥ 1".into()));
        }
        if c.requests_per_minute == 0 || c.burst == 0 {
            return Err(EpubTransError::InvalidConfig(
                "Rate limit and burst must be ≥ 1".into(),
            ));
        }
        if c.max_attempts == 0 {
            return Err(EpubTransError::InvalidConfig(
                "At least one attempt is required".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Worker count for the CPU-bound stages (clean, mark, styling).
pub fn default_stage_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = TranslateConfig::default();
        assert_eq!(c.source_lang, "English");
        assert_eq!(c.target_lang, "Vietnamese");
        assert_eq!(c.temperature, 0.3);
        assert_eq!(c.max_tokens, 4096);
        assert_eq!((c.requests_per_minute, c.burst), (50, 10));
        assert_eq!(c.cache_ttl(), Duration::from_secs(900));
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.size_metric, SizeMetric::EstimatedTokens);
    }

    #[test]
    fn builder_clamps_and_sets() {
        let c = TranslateConfig::builder()
            .temperature(5.0)
            .concurrency(0)
            .preset(PromptPreset::Literary)
            .guidelines("Be brief")
            .build()
            .unwrap();
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.prompt.preset, PromptPreset::Literary);
        assert_eq!(c.prompt.guidelines.as_deref(), Some("Be brief"));
    }

    #[test]
    fn build_rejects_bad_values() {
        assert!(TranslateConfig::builder().batch_size(0).build().is_err());
        assert!(TranslateConfig::builder().max_attempts(0).build().is_err());
        assert!(TranslateConfig::builder().rate_limit(0, 10).build().is_err());
        assert!(TranslateConfig::builder()
            .source_lang("French")
            .target_lang("french")
            .build()
            .is_err());
        assert!(TranslateConfig::builder().target_lang("  ").build().is_err());
    }

    #[test]
    fn stage_concurrency_is_positive() {
        assert!(default_stage_concurrency() >= 1);
    }
}

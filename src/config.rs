//! Configuration types for the page pipeline and the HTTP service.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The HTTP listener has its own small
//! [`ServerConfig`]. The binary maps CLI flags and `DOC2MD_*` environment
//! variables onto both.

use crate::error::Doc2MdError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Model used when neither the request nor the config names one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Configuration for one document job.
///
/// # Example
/// ```rust
/// use doc2md::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .zoom(2.0)
///     .concurrency(4)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 4);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Render scale applied to each PDF page. Default: 2.0.
    ///
    /// 1.0 renders at the page's native 72 DPI; 2.0 gives 144 DPI, which is
    /// enough for a vision model to read body text reliably.
    pub zoom: f32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 4000.
    ///
    /// Caps oversize pages (posters, engineering drawings) regardless of zoom.
    pub max_rendered_pixels: u32,

    /// Maximum number of model calls in flight for one document. Default: 4.
    ///
    /// Zero is coerced to 1 so a single page always makes progress.
    pub concurrency: usize,

    /// Default model identifier when the request does not name one.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.2.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 1000.
    pub max_tokens: usize,

    /// Retry attempts on a failed model call. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call model timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom OCR prompt. If None, uses [`crate::prompts::DEFAULT_OCR_PROMPT`].
    pub prompt: Option<String>,

    /// Delay after the end-of-stream marker before the channel is dropped,
    /// letting the transport flush. Default: 100 ms.
    pub finish_grace_ms: u64,

    /// Apply [`crate::pipeline::postprocess::clean_page_text`] to successful
    /// page text. Default: true.
    pub clean_output: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            zoom: 2.0,
            max_rendered_pixels: 4000,
            concurrency: 4,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.2,
            max_tokens: 1000,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            password: None,
            prompt: None,
            finish_grace_ms: 100,
            clean_output: true,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("zoom", &self.zoom)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("finish_grace_ms", &self.finish_grace_ms)
            .field("clean_output", &self.clean_output)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// The model to use for a request, falling back to the configured default.
    pub fn model_for<'a>(&'a self, requested: &'a str) -> &'a str {
        let requested = requested.trim();
        if !requested.is_empty() {
            return requested;
        }
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn finish_grace(&self) -> Duration {
        Duration::from_millis(self.finish_grace_ms)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn zoom(mut self, zoom: f32) -> Self {
        self.config.zoom = zoom;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
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

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
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

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn finish_grace_ms(mut self, ms: u64) -> Self {
        self.config.finish_grace_ms = ms;
        self
    }

    pub fn clean_output(mut self, v: bool) -> Self {
        self.config.clean_output = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, Doc2MdError> {
        let c = &self.config;
        if !(0.1..=10.0).contains(&c.zoom) {
            return Err(Doc2MdError::InvalidConfig(format!(
                "Zoom must be 0.1–10.0, got {}",
                c.zoom
            )));
        }
        if c.max_tokens == 0 {
            return Err(Doc2MdError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(Doc2MdError::InvalidConfig(
                "API timeout must be ≥ 1s".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Listener settings for the HTTP service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind. Default: "0.0.0.0".
    pub host: String,
    /// TCP port. Default: 8855.
    pub port: u16,
    /// Maximum accepted request body in bytes. Default: 64 MiB.
    pub body_limit_bytes: usize,
    /// Interval between SSE keep-alive comments in seconds. Default: 15.
    pub keep_alive_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8855,
            body_limit_bytes: 64 * 1024 * 1024,
            keep_alive_secs: 15,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// How to separate pages when assembling a single text document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSeparator {
    /// Pages joined with a blank line. (default)
    #[default]
    None,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// HTML comment with page number: "<!-- page N -->"
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator placed before the given page (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_behaviour() {
        let c = PipelineConfig::default();
        assert_eq!(c.zoom, 2.0);
        assert_eq!(c.max_tokens, 1000);
        assert_eq!(c.finish_grace(), Duration::from_millis(100));
        assert!(c.clean_output);
    }

    #[test]
    fn zero_concurrency_is_coerced_to_one() {
        let c = PipelineConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn out_of_range_zoom_is_rejected() {
        let err = PipelineConfig::builder().zoom(0.0).build().unwrap_err();
        assert!(matches!(err, Doc2MdError::InvalidConfig(_)));
    }

    #[test]
    fn model_for_prefers_request_then_config_then_default() {
        let c = PipelineConfig::default();
        assert_eq!(c.model_for(""), DEFAULT_MODEL);
        assert_eq!(c.model_for("  "), DEFAULT_MODEL);

        let c = PipelineConfig::builder().model("llava").build().unwrap();
        assert_eq!(c.model_for(""), "llava");
        assert_eq!(c.model_for("gpt-4.1"), "gpt-4.1");
    }

    #[test]
    fn server_defaults() {
        let s = ServerConfig::default();
        assert_eq!(s.bind_address(), "0.0.0.0:8855");
    }

    #[test]
    fn separator_render() {
        assert_eq!(PageSeparator::None.render(2), "\n\n");
        assert_eq!(PageSeparator::Comment.render(3), "\n\n<!-- page 3 -->\n\n");
        assert_eq!(
            PageSeparator::Custom("***".into()).render(1),
            "\n\n***\n\n"
        );
    }
}

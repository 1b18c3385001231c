//! Vision-model adapter: send one page image, get its text back.
//!
//! [`VlmAdapter`] is the production [`InferenceAdapter`]. It resolves an
//! edgequake-llm provider per model (cached for the life of the adapter),
//! wraps each call in a timeout, and retries transient failures with
//! exponential backoff (`retry_backoff_ms * 2^attempt`): with a 500 ms base
//! and 2 retries the waits are 500 ms then 1 s.
//!
//! All prompt text lives in [`crate::prompts`].

use crate::adapter::{Inference, InferenceAdapter, InferenceRequest};
use crate::config::{PipelineConfig, DEFAULT_MODEL};
use crate::error::{Doc2MdError, PageError};
use crate::pipeline::{encode, postprocess};
use crate::prompts::ocr_prompt;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Retry and timeout policy for a single page's model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
            call_timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Run `call` until it succeeds or the policy is exhausted.
///
/// Returns the value and the number of retries used. If every attempt timed
/// out the error is [`PageError::Timeout`], otherwise
/// [`PageError::InferenceFailed`] carrying the last failure.
pub async fn call_with_retry<T, F, Fut>(
    page_num: usize,
    policy: &RetryPolicy,
    mut call: F,
) -> Result<(T, u8), PageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let mut last_err: Option<String> = None;
    let mut all_timed_out = true;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.delay_before(attempt);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page_num,
                attempt,
                policy.max_retries,
                delay.as_millis()
            );
            sleep(delay).await;
        }

        match timeout(policy.call_timeout, call()).await {
            Ok(Ok(value)) => return Ok((value, retry_count(attempt))),
            Ok(Err(e)) => {
                warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, e);
                all_timed_out = false;
                last_err = Some(e);
            }
            Err(_) => {
                warn!(
                    "Page {}: attempt {} timed out after {}s",
                    page_num,
                    attempt + 1,
                    policy.call_timeout.as_secs()
                );
            }
        }
    }

    if all_timed_out {
        return Err(PageError::Timeout {
            page: page_num,
            secs: policy.call_timeout.as_secs(),
        });
    }
    Err(PageError::InferenceFailed {
        page: page_num,
        retries: retry_count(policy.max_retries),
        detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
    })
}

/// Retries as reported per page; saturates rather than wrapping.
fn retry_count(n: u32) -> u8 {
    u8::try_from(n).unwrap_or(u8::MAX)
}

/// [`InferenceAdapter`] backed by an edgequake-llm vision provider.
pub struct VlmAdapter {
    config: PipelineConfig,
    providers: Mutex<HashMap<String, Arc<dyn LLMProvider>>>,
}

impl VlmAdapter {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            providers: Mutex::new(HashMap::new()),
        }
    }

    /// Provider for `model`, created on first use.
    fn provider_for(&self, model: &str) -> Result<Arc<dyn LLMProvider>, Doc2MdError> {
        let mut cache = self
            .providers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(provider) = cache.get(model) {
            return Ok(Arc::clone(provider));
        }
        let provider = resolve_provider(&self.config, model)?;
        info!("Resolved vision provider for model '{}'", model);
        cache.insert(model.to_string(), Arc::clone(&provider));
        Ok(provider)
    }

    fn options(&self) -> CompletionOptions {
        build_options(&self.config)
    }
}

#[async_trait]
impl InferenceAdapter for VlmAdapter {
    async fn prepare(&self, model: &str) -> Result<(), Doc2MdError> {
        self.provider_for(model).map(|_| ())
    }

    async fn infer(&self, request: InferenceRequest<'_>) -> Result<Inference, PageError> {
        let page_num = request.page_num;
        let provider = self
            .provider_for(request.model)
            .map_err(|e| PageError::InferenceFailed {
                page: page_num,
                retries: 0,
                detail: e.to_string(),
            })?;

        let prompt = ocr_prompt(self.config.prompt.as_deref());
        let messages = vec![ChatMessage::user_with_images(
            prompt,
            vec![encode::to_image_data(request.image)],
        )];
        let options = self.options();
        let policy = RetryPolicy::from_config(&self.config);

        let (response, retries) = call_with_retry(page_num, &policy, || {
            let provider = Arc::clone(&provider);
            let messages = &messages;
            let options = &options;
            async move {
                provider
                    .chat(messages, Some(options))
                    .await
                    .map_err(|e| e.to_string())
            }
        })
        .await?;

        debug!(
            "Page {}: {} input tokens, {} output tokens",
            page_num, response.prompt_tokens, response.completion_tokens
        );

        let text = if self.config.clean_output {
            postprocess::clean_page_text(&response.content)
        } else {
            response.content
        };

        Ok(Inference {
            text,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
            retries,
        })
    }
}

/// Build `CompletionOptions` from the pipeline config.
fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, Doc2MdError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Doc2MdError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the provider for `model`, from most to least specific:
///
/// 1. pre-built `config.provider`, used as-is;
/// 2. `config.provider_name`;
/// 3. `EDGEQUAKE_LLM_PROVIDER` from the environment;
/// 4. OpenAI when `OPENAI_API_KEY` is set;
/// 5. whatever [`ProviderFactory::from_env`] detects.
pub fn resolve_provider(
    config: &PipelineConfig,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, Doc2MdError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = if model.trim().is_empty() {
        config.model.as_deref().unwrap_or(DEFAULT_MODEL)
    } else {
        model
    };

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, model);
    }

    if let Ok(prov) = std::env::var("EDGEQUAKE_LLM_PROVIDER") {
        if !prov.is_empty() {
            return create_vision_provider(&prov, model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Doc2MdError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

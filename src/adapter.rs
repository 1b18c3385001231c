//! The seam between the pipeline and the vision model.
//!
//! The pipeline only knows it can turn a page image into text or a
//! [`PageError`]. Prompting, retries, and timeouts live behind this trait;
//! the production implementation is [`crate::pipeline::llm::VlmAdapter`].

use crate::error::{Doc2MdError, PageError};
use crate::page::PageImage;
use async_trait::async_trait;

/// One model call.
#[derive(Debug, Clone, Copy)]
pub struct InferenceRequest<'a> {
    /// 1-based page number, for logging and error attribution.
    pub page_num: usize,
    pub image: &'a PageImage,
    /// Model identifier, already resolved against the configured default.
    pub model: &'a str,
}

/// Text extracted from a page plus usage counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inference {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub retries: u8,
}

impl Inference {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Turns page images into text.
///
/// Implementations are shared across worker tasks and must be `Send + Sync`.
/// `infer` must always resolve: a failure is returned as a [`PageError`], which
/// the pipeline records against that page only.
#[async_trait]
pub trait InferenceAdapter: Send + Sync {
    async fn infer(&self, request: InferenceRequest<'_>) -> Result<Inference, PageError>;

    /// Checked once per job before any page work starts. An error here is a
    /// job-level failure (e.g. no provider configured for `model`).
    async fn prepare(&self, model: &str) -> Result<(), Doc2MdError> {
        let _ = model;
        Ok(())
    }
}

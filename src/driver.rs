//! Job orchestration: one document from upload to terminal event.
//!
//! ```text
//! Init ──▶ Enumerating ──▶ Processing ──▶ Draining ──▶ Terminated(Complete)
//!   │            │              │
//!   └────────────┴──────────────┴──────────────────▶ Terminated(Error)
//! ```
//!
//! * **Init** validates the declared type and bytes and checks that a
//!   provider exists for the requested model.
//! * **Enumerating** turns the document into [`PageUnit`]s: one per rendered
//!   PDF page, or exactly one carrying an uploaded image unchanged.
//! * **Processing** runs the [`WorkerPool`] and feeds completions through the
//!   [`Sequencer`]; every released page becomes a `progress` event.
//! * **Draining** emits `complete` once all pages have been released.
//!
//! A job-level error in any state ends the job with a single `error` event.
//! If the caller goes away the driver returns
//! [`Doc2MdError::ClientDisconnected`] and drops the pool, which stops it.

use crate::adapter::InferenceAdapter;
use crate::config::PipelineConfig;
use crate::error::Doc2MdError;
use crate::event::{EventEmitter, ParsedPage};
use crate::page::{DocumentKind, PageImage, PageOutcome, PageResult, PageUnit};
use crate::pipeline::input::validate_upload;
use crate::pipeline::llm::VlmAdapter;
use crate::pipeline::render::{DocumentRenderer, PdfiumRenderer};
use crate::pool::WorkerPool;
use crate::sequencer::Sequencer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// One uploaded document and the model to read it with.
#[derive(Debug, Clone)]
pub struct DocumentJob {
    /// Declared MIME type, as received.
    pub content_type: String,
    pub bytes: Vec<u8>,
    /// Requested model; empty selects the configured default.
    pub model: String,
    /// Original file name, for logs only.
    pub file_name: Option<String>,
}

impl DocumentJob {
    pub fn new(content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            bytes,
            model: String::new(),
            file_name: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Init,
    Enumerating,
    Processing,
    Draining,
    Terminated,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Init => "init",
            JobState::Enumerating => "enumerating",
            JobState::Processing => "processing",
            JobState::Draining => "draining",
            JobState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Aggregate numbers for a finished job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total_pages: usize,
    pub succeeded_pages: usize,
    pub failed_pages: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
}

impl JobStats {
    fn record(&mut self, result: &PageResult) {
        match result.outcome {
            PageOutcome::Succeeded(_) => self.succeeded_pages += 1,
            PageOutcome::Failed(_) => self.failed_pages += 1,
        }
        self.input_tokens += result.stats.input_tokens as u64;
        self.output_tokens += result.stats.output_tokens as u64;
    }
}

/// Every page of a completed job, in order.
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub pages: Vec<ParsedPage>,
    pub stats: JobStats,
}

/// Runs document jobs. Cheap to clone; jobs share no mutable state.
#[derive(Clone)]
pub struct PipelineDriver {
    adapter: Arc<dyn InferenceAdapter>,
    renderer: Arc<dyn DocumentRenderer>,
    config: Arc<PipelineConfig>,
}

impl PipelineDriver {
    /// Production driver: edgequake-llm vision adapter and pdfium renderer.
    pub fn new(config: PipelineConfig) -> Self {
        let renderer = Arc::new(PdfiumRenderer::new(&config));
        let adapter = Arc::new(VlmAdapter::new(config.clone()));
        Self::with_components(config, adapter, renderer)
    }

    pub fn with_components(
        config: PipelineConfig,
        adapter: Arc<dyn InferenceAdapter>,
        renderer: Arc<dyn DocumentRenderer>,
    ) -> Self {
        Self {
            adapter,
            renderer,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one job to its terminal event.
    ///
    /// On success the emitter has sent every `progress` event, `complete` and
    /// the end marker. On a job-level error it has sent `error` and the end
    /// marker, unless the caller is already gone.
    pub async fn run(
        &self,
        job: DocumentJob,
        emitter: &mut EventEmitter,
    ) -> Result<JobOutput, Doc2MdError> {
        let start = Instant::now();
        let label = job
            .file_name
            .clone()
            .unwrap_or_else(|| job.content_type.clone());
        info!("Starting job: {} ({} bytes)", label, job.bytes.len());

        let mut state = JobState::Init;
        let result = self.drive(job, emitter, &mut state).await;
        transition(&mut state, JobState::Terminated);

        match result {
            Ok(mut output) => {
                output.stats.duration_ms = start.elapsed().as_millis() as u64;
                info!(
                    "Job complete: {}: {}/{} pages ok, {}ms",
                    label,
                    output.stats.succeeded_pages,
                    output.stats.total_pages,
                    output.stats.duration_ms
                );
                Ok(output)
            }
            Err(Doc2MdError::ClientDisconnected) => {
                warn!("Job abandoned: {}: client disconnected", label);
                Err(Doc2MdError::ClientDisconnected)
            }
            Err(e) => {
                error!("Job failed: {}: {}", label, e);
                if !emitter.is_terminated() {
                    if let Err(emit_err) = emitter.error(&e).await {
                        debug!("Could not deliver error event: {}", emit_err);
                    }
                }
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        job: DocumentJob,
        emitter: &mut EventEmitter,
        state: &mut JobState,
    ) -> Result<JobOutput, Doc2MdError> {
        let kind = validate_upload(&job.content_type, &job.bytes)?;
        let model = self.config.model_for(&job.model).to_string();
        self.adapter.prepare(&model).await?;

        transition(state, JobState::Enumerating);
        let units = self.enumerate(kind, job.bytes).await?;
        let total_pages = units.len();
        if total_pages == 0 {
            return Err(Doc2MdError::EmptyDocument);
        }

        transition(state, JobState::Processing);
        let pool = WorkerPool::new(Arc::clone(&self.adapter), self.config.concurrency);
        debug!(
            "Processing {} pages with model '{}', concurrency {}",
            total_pages,
            model,
            pool.limit()
        );
        let mut handle = pool.spawn(units, model);
        let mut sequencer = Sequencer::new(total_pages);
        let mut pages = Vec::with_capacity(total_pages);
        let mut stats = JobStats {
            total_pages,
            ..Default::default()
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = emitter.closed() => return Err(Doc2MdError::ClientDisconnected),
                next = handle.next() => next,
            };
            let Some(result) = next else { break };

            if let Err(e) = sequencer.insert(result) {
                warn!("Ignoring completion: {}", e);
                continue;
            }
            while let Some(ready) = sequencer.pop_ready() {
                let page = ParsedPage::from_result(&ready);
                emitter
                    .progress(total_pages, ready.page_num(), &page)
                    .await?;
                stats.record(&ready);
                pages.push(page);
            }
        }

        handle.join().await?;
        if !sequencer.is_done() {
            return Err(Doc2MdError::Internal(format!(
                "Only {} of {} pages completed",
                sequencer.next_expected(),
                total_pages
            )));
        }

        transition(state, JobState::Draining);
        emitter.complete(pages.clone()).await?;
        Ok(JobOutput { pages, stats })
    }

    async fn enumerate(
        &self,
        kind: DocumentKind,
        bytes: Vec<u8>,
    ) -> Result<Vec<PageUnit>, Doc2MdError> {
        if kind.is_image() {
            return Ok(vec![PageUnit::new(0, PageImage::new(bytes, kind.mime_type()))]);
        }

        let renderer = Arc::clone(&self.renderer);
        let render_start = Instant::now();
        let images = tokio::task::spawn_blocking(move || renderer.render_pdf(&bytes))
            .await
            .map_err(|e| Doc2MdError::Internal(format!("Render task panicked: {}", e)))??;
        info!(
            "Rendered {} pages in {}ms",
            images.len(),
            render_start.elapsed().as_millis()
        );

        Ok(images
            .into_iter()
            .enumerate()
            .map(|(index, image)| PageUnit::new(index, image))
            .collect())
    }
}

fn transition(state: &mut JobState, next: JobState) {
    debug!("Job state: {} → {}", state, next);
    *state = next;
}

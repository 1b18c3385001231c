//! # doc2md
//!
//! Turn PDF and image uploads into text, page by page, using Vision Language
//! Models, and stream each page to the caller the moment it (and every page
//! before it) is done.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload (PDF / JPEG / PNG)
//!  │
//!  ├─ 1. Validate   allow-listed type, non-empty, magic bytes match
//!  ├─ 2. Enumerate  PDF → one PNG per page (pdfium, spawn_blocking);
//!  │                image → one page, bytes unchanged
//!  ├─ 3. Infer      WorkerPool: ≤ N concurrent VLM calls, any finish order
//!  ├─ 4. Sequence   Sequencer: release pages strictly in page order
//!  └─ 5. Emit       progress × N → complete → [DONE]
//! ```
//!
//! A failed page never aborts the document: its text becomes an inline
//! `<error>Failed to process page: …</error>` marker and the job still
//! completes. Only job-level problems (bad upload, unreadable PDF, no model
//! provider) produce an `error` event.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use doc2md::{DocumentJob, EventEmitter, PipelineConfig, PipelineDriver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let driver = PipelineDriver::new(PipelineConfig::default());
//!     let bytes = std::fs::read("document.pdf")?;
//!     let job = DocumentJob::new("application/pdf", bytes).with_model("gpt-4.1-mini");
//!
//!     let (mut emitter, mut frames) = EventEmitter::channel(driver.config().finish_grace());
//!     let run = tokio::spawn(async move { driver.run(job, &mut emitter).await });
//!     while let Some(frame) = frames.recv().await {
//!         println!("data: {}", frame.data());
//!     }
//!     run.await??;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | axum HTTP service (`POST /file/stream`, `POST /file/`) |
//! | `cli`    | on      | the `doc2md` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Library-only use:
//! ```toml
//! doc2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod adapter;
pub mod config;
pub mod convert;
pub mod driver;
pub mod error;
pub mod event;
pub mod page;
pub mod pipeline;
pub mod pool;
pub mod prompts;
pub mod sequencer;
#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use adapter::{Inference, InferenceAdapter, InferenceRequest};
pub use config::{PageSeparator, PipelineConfig, PipelineConfigBuilder, ServerConfig};
pub use convert::{assemble_text, convert_document, load_job, write_output};
pub use driver::{DocumentJob, JobOutput, JobState, JobStats, PipelineDriver};
pub use error::{Doc2MdError, PageError};
pub use event::{EventEmitter, ParseResult, ParsedPage, StreamEvent, StreamFrame, END_OF_STREAM};
pub use page::{DocumentKind, PageImage, PageOutcome, PageResult, PageStats, PageUnit};
pub use pipeline::llm::VlmAdapter;
pub use pipeline::render::{DocumentRenderer, PdfiumRenderer};
pub use pool::{PoolHandle, WorkerPool};
pub use sequencer::Sequencer;

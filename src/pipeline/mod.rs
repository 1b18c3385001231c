//! Pipeline stages around the core scheduler.
//!
//! ```text
//! input ──▶ render ──▶ [WorkerPool → llm → postprocess] ──▶ Sequencer ──▶ events
//! (validate)  (pdfium)        (VLM, retry, cleanup)
//! ```
//!
//! 1. [`input`]  validates uploads and loads CLI inputs (path or URL)
//! 2. [`render`] rasterises PDF pages; blocking, runs in `spawn_blocking`
//! 3. [`encode`] PNG-encodes rendered pages and wraps images for the model
//! 4. [`llm`]    the production adapter: provider resolution, retry, timeout
//! 5. [`postprocess`] deterministic cleanup of model output

pub mod encode;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod render;

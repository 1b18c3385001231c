//! Prompts sent to the vision model with each page image.
//!
//! Callers can override the default via [`crate::config::PipelineConfig::prompt`];
//! the constant here is used only when no override is provided.

/// Default OCR prompt, sent as the text part of the user message next to the
/// page image.
pub const DEFAULT_OCR_PROMPT: &str = "Extract the text from the above document as if you were reading it naturally. \
Return the tables in html format. Watermarks should be wrapped in brackets. \
Ex: <watermark>OFFICIAL COPY</watermark>. Page numbers should be wrapped in brackets. \
Ex: <page_number>14</page_number> or <page_number>9/22</page_number>. \
Prefer using ☐ and ☑ for check boxes.";

/// Resolve the prompt for a request.
pub fn ocr_prompt(custom: Option<&str>) -> &str {
    match custom {
        Some(p) if !p.trim().is_empty() => p,
        _ => DEFAULT_OCR_PROMPT,
    }
}

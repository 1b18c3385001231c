//! Error types for the doc2md library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Doc2MdError`]: **Job-level**, the document cannot be processed at all
//!   (unsupported type, empty upload, unreadable PDF, provider not
//!   configured). It terminates the job and is surfaced to the caller exactly
//!   once, as an `error` event or an HTTP error response.
//!
//! * [`PageError`]: **Page-level**, one page's model call failed (timeout,
//!   provider error after retries) but every other page is fine. It is stored
//!   as data inside [`crate::page::PageOutcome`] and rendered inline as a
//!   failure marker; it never aborts sibling pages.

use std::path::PathBuf;
use thiserror::Error;

/// All job-level errors returned by the doc2md library.
///
/// Page-level failures use [`PageError`] and travel inside
/// [`crate::page::PageResult`] rather than being propagated here.
#[derive(Debug, Error)]
pub enum Doc2MdError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The declared content type is not on the allow-list.
    #[error("Unsupported content type '{content_type}'. Supported types: application/pdf, image/jpeg, image/png")]
    UnsupportedMediaType { content_type: String },

    /// The uploaded file has no bytes.
    #[error("Uploaded file is empty")]
    EmptyUpload,

    /// The bytes do not match the declared content type.
    #[error("Content does not look like {expected}: first bytes {magic:?}")]
    ContentMismatch { expected: String, magic: Vec<u8> },

    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Document errors ───────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("Document is corrupt or unreadable: {detail}")]
    CorruptDocument { detail: String },

    /// PDF requires a password but none (or the wrong one) was provided.
    #[error("Document is encrypted and requires a valid password")]
    PasswordRequired,

    /// The document parsed but contains no pages.
    #[error("Document has no pages")]
    EmptyDocument,

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Model errors ──────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Transport errors ──────────────────────────────────────────────────
    /// The caller went away before the job finished.
    #[error("Client disconnected before the job finished")]
    ClientDisconnected,

    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Doc2MdError {
    /// Stable name of the error condition, sent as the `details` field of an
    /// `error` event.
    pub fn kind(&self) -> &'static str {
        match self {
            Doc2MdError::UnsupportedMediaType { .. } => "UnsupportedMediaType",
            Doc2MdError::EmptyUpload => "EmptyUpload",
            Doc2MdError::ContentMismatch { .. } => "ContentMismatch",
            Doc2MdError::FileNotFound { .. } => "FileNotFound",
            Doc2MdError::PermissionDenied { .. } => "PermissionDenied",
            Doc2MdError::InvalidInput { .. } => "InvalidInput",
            Doc2MdError::DownloadFailed { .. } => "DownloadFailed",
            Doc2MdError::DownloadTimeout { .. } => "DownloadTimeout",
            Doc2MdError::CorruptDocument { .. } => "CorruptDocument",
            Doc2MdError::PasswordRequired => "PasswordRequired",
            Doc2MdError::EmptyDocument => "EmptyDocument",
            Doc2MdError::RasterisationFailed { .. } => "RasterisationFailed",
            Doc2MdError::PdfiumBindingFailed(_) => "PdfiumBindingFailed",
            Doc2MdError::ProviderNotConfigured { .. } => "ProviderNotConfigured",
            Doc2MdError::ClientDisconnected => "ClientDisconnected",
            Doc2MdError::OutputWriteFailed { .. } => "OutputWriteFailed",
            Doc2MdError::InvalidConfig(_) => "InvalidConfig",
            Doc2MdError::Internal(_) => "Internal",
        }
    }

    /// True for errors caused by what the caller sent, as opposed to a
    /// failure on our side.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Doc2MdError::UnsupportedMediaType { .. }
                | Doc2MdError::EmptyUpload
                | Doc2MdError::ContentMismatch { .. }
                | Doc2MdError::InvalidInput { .. }
        )
    }

    /// HTTP status code used by the non-streaming endpoint.
    pub fn status_code(&self) -> u16 {
        match self {
            e if e.is_input_error() => 400,
            Doc2MdError::CorruptDocument { .. }
            | Doc2MdError::PasswordRequired
            | Doc2MdError::EmptyDocument
            | Doc2MdError::RasterisationFailed { .. } => 422,
            Doc2MdError::ProviderNotConfigured { .. } => 503,
            _ => 500,
        }
    }
}

/// A non-fatal error for a single page.
///
/// Stored inside [`crate::page::PageOutcome::Failed`]. The job continues and
/// still reaches `complete`; the page's text is replaced by an inline marker.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Model call failed after retries.
    #[error("Page {page}: inference failed after {retries} retries: {detail}")]
    InferenceFailed {
        page: usize,
        retries: u8,
        detail: String,
    },

    /// Model call timed out on every attempt.
    #[error("Page {page}: inference timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}

impl PageError {
    /// 1-based page number the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::InferenceFailed { page, .. } | PageError::Timeout { page, .. } => *page,
        }
    }
}

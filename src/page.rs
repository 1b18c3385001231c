//! Per-page data model.
//!
//! A [`PageUnit`] is created for every page during enumeration and is
//! *Pending* for as long as it exists. The worker that runs it consumes the
//! unit and produces a [`PageResult`] carrying a terminal [`PageOutcome`], so
//! the Pending → Succeeded/Failed transition happens exactly once and cannot
//! be reverted: there is no way back from a `PageResult` to a `PageUnit`.

use crate::error::PageError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How far into a file pdfium looks for the `%PDF` header.
pub const PDF_HEADER_WINDOW: usize = 1024;

/// Accepted input document types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Jpeg,
    Png,
}

impl DocumentKind {
    /// MIME types accepted on upload. `image/jpg` is a common non-standard
    /// alias of `image/jpeg` and is accepted as such.
    pub const SUPPORTED_MIME_TYPES: &'static [&'static str] =
        &["application/pdf", "image/jpeg", "image/png", "image/jpg"];

    /// Parse a declared content type. Parameters (`; charset=…`) and case are
    /// ignored.
    pub fn from_mime(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/pdf" => Some(DocumentKind::Pdf),
            "image/jpeg" | "image/jpg" => Some(DocumentKind::Jpeg),
            "image/png" => Some(DocumentKind::Png),
            _ => None,
        }
    }

    /// Infer the kind from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "jpg" | "jpeg" => Some(DocumentKind::Jpeg),
            "png" => Some(DocumentKind::Png),
            _ => None,
        }
    }

    /// Infer the kind from the leading bytes. A PDF header may be preceded by
    /// junk, as long as it starts within the first [`PDF_HEADER_WINDOW`] bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        let head = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
        if head.windows(4).any(|w| w == b"%PDF") {
            return Some(DocumentKind::Pdf);
        }
        match image::guess_format(bytes).ok()? {
            image::ImageFormat::Jpeg => Some(DocumentKind::Jpeg),
            image::ImageFormat::Png => Some(DocumentKind::Png),
            _ => None,
        }
    }

    /// Canonical MIME type.
    pub fn mime_type(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "application/pdf",
            DocumentKind::Jpeg => "image/jpeg",
            DocumentKind::Png => "image/png",
        }
    }

    pub fn is_image(&self) -> bool {
        !matches!(self, DocumentKind::Pdf)
    }
}

/// An encoded page image (PNG for rendered PDF pages, the uploaded bytes for
/// image inputs). Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    mime_type: &'static str,
    bytes: Vec<u8>,
}

impl PageImage {
    pub fn new(bytes: Vec<u8>, mime_type: &'static str) -> Self {
        Self { mime_type, bytes }
    }

    pub fn png(bytes: Vec<u8>) -> Self {
        Self::new(bytes, "image/png")
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// Self-describing `data:<mime>;base64,<payload>` reference, renderable by
    /// a browser without any side channel.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

/// One page's unit of work, Pending until a worker consumes it.
#[derive(Debug, Clone)]
pub struct PageUnit {
    index: usize,
    image: Arc<PageImage>,
}

impl PageUnit {
    pub fn new(index: usize, image: PageImage) -> Self {
        Self {
            index,
            image: Arc::new(image),
        }
    }

    /// 0-based position in the document.
    pub fn index(&self) -> usize {
        self.index
    }

    /// 1-based page number, as shown to callers.
    pub fn page_num(&self) -> usize {
        self.index + 1
    }

    pub fn image(&self) -> &Arc<PageImage> {
        &self.image
    }

    /// Resolve this unit into its terminal result.
    pub fn finish(self, outcome: PageOutcome, stats: PageStats) -> PageResult {
        PageResult {
            index: self.index,
            image: self.image,
            outcome,
            stats,
        }
    }
}

/// Terminal state of a page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    Succeeded(String),
    Failed(PageError),
}

impl PageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PageOutcome::Succeeded(_))
    }

    /// The page text sent to callers. Failed pages render as an explicit
    /// inline marker so a caller can always tell a failure from an empty page.
    pub fn content(&self) -> String {
        match self {
            PageOutcome::Succeeded(text) => text.clone(),
            PageOutcome::Failed(err) => failure_marker(err),
        }
    }
}

const FAILURE_MARKER_PREFIX: &str = "<error>Failed to process page: ";

/// Inline marker used as the content of a failed page.
pub fn failure_marker(err: &PageError) -> String {
    format!("{}{}</error>", FAILURE_MARKER_PREFIX, err)
}

/// True if `content` is a failed page's marker rather than extracted text.
pub fn is_failure_marker(content: &str) -> bool {
    content.starts_with(FAILURE_MARKER_PREFIX) && content.ends_with("</error>")
}

/// Per-page statistics. Logged and summarised, never sent on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageStats {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
    pub retries: u8,
}

/// A page after its model call finished, successfully or not.
#[derive(Debug, Clone)]
pub struct PageResult {
    pub index: usize,
    pub image: Arc<PageImage>,
    pub outcome: PageOutcome,
    pub stats: PageStats,
}

impl PageResult {
    pub fn page_num(&self) -> usize {
        self.index + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_parsing_accepts_allow_list_only() {
        assert_eq!(DocumentKind::from_mime("application/pdf"), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_mime("image/jpg"), Some(DocumentKind::Jpeg));
        assert_eq!(DocumentKind::from_mime("IMAGE/PNG"), Some(DocumentKind::Png));
        assert_eq!(
            DocumentKind::from_mime("application/pdf; name=x.pdf"),
            Some(DocumentKind::Pdf)
        );
        assert_eq!(DocumentKind::from_mime("image/gif"), None);
        assert_eq!(DocumentKind::from_mime("text/plain"), None);
        assert_eq!(DocumentKind::from_mime(""), None);
    }

    #[test]
    fn jpg_alias_normalises_to_jpeg() {
        let kind = DocumentKind::from_mime("image/jpg").unwrap();
        assert_eq!(kind.mime_type(), "image/jpeg");
    }

    #[test]
    fn sniff_detects_pdf_and_png() {
        assert_eq!(DocumentKind::sniff(b"%PDF-1.7\n"), Some(DocumentKind::Pdf));
        let png_magic = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        assert_eq!(DocumentKind::sniff(&png_magic), Some(DocumentKind::Png));
        assert_eq!(DocumentKind::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(DocumentKind::Jpeg));
        assert_eq!(DocumentKind::sniff(b"hello"), None);
    }

    #[test]
    fn sniff_finds_pdf_header_after_leading_junk() {
        let mut bytes = vec![b' '; 500];
        bytes.extend_from_slice(b"%PDF-1.4\n");
        assert_eq!(DocumentKind::sniff(&bytes), Some(DocumentKind::Pdf));

        let mut late = vec![0u8; PDF_HEADER_WINDOW];
        late.extend_from_slice(b"%PDF-1.4\n");
        assert_eq!(DocumentKind::sniff(&late), None);
    }

    #[test]
    fn data_url_is_mime_tagged() {
        let img = PageImage::png(vec![1, 2, 3]);
        assert_eq!(img.to_data_url(), "data:image/png;base64,AQID");
    }

    #[test]
    fn unit_finishes_into_result_with_same_identity() {
        let unit = PageUnit::new(4, PageImage::png(vec![9]));
        assert_eq!(unit.page_num(), 5);
        let image = Arc::clone(unit.image());
        let result = unit.finish(PageOutcome::Succeeded("text".into()), PageStats::default());
        assert_eq!(result.index, 4);
        assert!(Arc::ptr_eq(&image, &result.image));
    }

    #[test]
    fn failed_outcome_renders_marker() {
        let outcome = PageOutcome::Failed(PageError::Timeout { page: 2, secs: 5 });
        let content = outcome.content();
        assert!(content.starts_with("<error>Failed to process page:"));
        assert!(content.ends_with("</error>"));
        assert!(is_failure_marker(&content));
        assert!(!is_failure_marker("ordinary text"));
        assert!(!outcome.is_success());
    }
}

//! PDF rasterisation: one PNG per page via pdfium.
//!
//! pdfium is a blocking C library; the driver calls [`DocumentRenderer`]
//! from `tokio::task::spawn_blocking` so rendering never stalls the async
//! workers.
//!
//! `max_rendered_pixels` caps the longest edge regardless of zoom, keeping
//! memory bounded on posters and engineering drawings.

use crate::config::PipelineConfig;
use crate::error::Doc2MdError;
use crate::page::PageImage;
use crate::pipeline::encode;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable pointing at a pdfium shared library (file or
/// directory).
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Turns a PDF into page images. Blocking; called on the blocking pool.
pub trait DocumentRenderer: Send + Sync {
    /// Render every page, in document order.
    fn render_pdf(&self, bytes: &[u8]) -> Result<Vec<PageImage>, Doc2MdError>;
}

/// [`DocumentRenderer`] backed by pdfium-render.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    zoom: f32,
    max_pixels: u32,
    password: Option<String>,
    library_path: Option<PathBuf>,
}

impl PdfiumRenderer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            zoom: config.zoom,
            max_pixels: config.max_rendered_pixels,
            password: config.password.clone(),
            library_path: std::env::var_os(PDFIUM_LIB_PATH_ENV).map(PathBuf::from),
        }
    }

    /// Bind to an explicit pdfium library instead of `PDFIUM_LIB_PATH`.
    pub fn with_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }

    fn render_config(&self) -> PdfRenderConfig {
        PdfRenderConfig::new()
            .scale_page_by_factor(self.zoom)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32)
    }
}

impl DocumentRenderer for PdfiumRenderer {
    fn render_pdf(&self, bytes: &[u8]) -> Result<Vec<PageImage>, Doc2MdError> {
        let pdfium = bind_pdfium(self.library_path.as_deref())?;
        let password = self.password.as_deref();

        let document = pdfium
            .load_pdf_from_byte_slice(bytes, password)
            .map_err(|e| classify_load_error(e, password.is_some()))?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        info!("PDF loaded: {} pages", total_pages);
        if total_pages == 0 {
            return Err(Doc2MdError::EmptyDocument);
        }

        let render_config = self.render_config();
        let mut images = Vec::with_capacity(total_pages);

        for (idx, page) in pages.iter().enumerate() {
            let rasterisation_failed = |detail: String| Doc2MdError::RasterisationFailed {
                page: idx + 1,
                detail,
            };

            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| rasterisation_failed(format!("{:?}", e)))?;
            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );

            let png = encode::encode_png(&image)
                .map_err(|e| rasterisation_failed(format!("PNG encoding failed: {}", e)))?;
            images.push(PageImage::png(png));
        }

        Ok(images)
    }
}

/// Bind to pdfium: an explicit path first, then the working directory, then
/// the system library search path.
pub fn bind_pdfium(library_path: Option<&Path>) -> Result<Pdfium, Doc2MdError> {
    let bindings = match library_path {
        Some(path) if path.is_dir() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(path))
        }
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| Doc2MdError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

fn classify_load_error(err: PdfiumError, had_password: bool) -> Doc2MdError {
    let detail = format!("{:?}", err);
    if detail.contains("Password") || detail.contains("password") {
        if had_password {
            Doc2MdError::CorruptDocument {
                detail: "wrong password".to_string(),
            }
        } else {
            Doc2MdError::PasswordRequired
        }
    } else {
        Doc2MdError::CorruptDocument { detail }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renderer_takes_zoom_and_cap_from_config() {
        let config = PipelineConfig::builder()
            .zoom(3.0)
            .max_rendered_pixels(2000)
            .build()
            .unwrap();
        let renderer = PdfiumRenderer::new(&config).with_library_path("/opt/pdfium");
        assert_eq!(renderer.zoom, 3.0);
        assert_eq!(renderer.max_pixels, 2000);
        assert_eq!(renderer.library_path.as_deref(), Some(Path::new("/opt/pdfium")));
    }

    #[test]
    fn password_errors_are_classified() {
        let err = PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError);
        assert!(matches!(
            classify_load_error(err, false),
            Doc2MdError::PasswordRequired
        ));

        let err = PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::FormatError);
        assert!(matches!(
            classify_load_error(err, false),
            Doc2MdError::CorruptDocument { .. }
        ));
    }
}

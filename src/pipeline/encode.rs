//! Image encoding for rendered pages and model requests.
//!
//! Rendered pages are stored as PNG: lossless compression keeps text edges
//! crisp, and JPEG artefacts on rendered text degrade OCR accuracy. The
//! same bytes are embedded in the caller-facing data URL and sent to the
//! model, so what the caller sees is exactly what the model read.

use crate::page::PageImage;
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// PNG-encode a rasterised page.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded page image → {} bytes PNG", buf.len());
    Ok(buf)
}

/// Wrap a page image for a multimodal chat message.
///
/// `detail: "high"` lets GPT-4-class models tile the image at full
/// resolution; with `low` fine print and small tables are lost.
pub fn to_image_data(image: &PageImage) -> ImageData {
    ImageData::new(image.to_base64(), image.mime_type()).with_detail("high")
}

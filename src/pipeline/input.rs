//! Input validation and loading.
//!
//! Uploads arrive as bytes plus a declared content type; [`validate_upload`]
//! checks both before any job work starts. The CLI instead hands us a path
//! or an HTTP(S) URL; [`load_document`] reads or downloads it and infers the
//! type from the file extension, falling back to the magic bytes.

use crate::error::Doc2MdError;
use crate::page::DocumentKind;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// A document read into memory, ready to become a job.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub kind: DocumentKind,
    pub bytes: Vec<u8>,
    pub file_name: String,
}

/// Check an upload against the allow-list and its own bytes.
///
/// Order: declared type, then emptiness, then magic bytes. A declared PDF must
/// carry `%PDF` within its first 1024 bytes; a declared image must sniff as
/// that image format.
pub fn validate_upload(content_type: &str, bytes: &[u8]) -> Result<DocumentKind, Doc2MdError> {
    let kind =
        DocumentKind::from_mime(content_type).ok_or_else(|| Doc2MdError::UnsupportedMediaType {
            content_type: content_type.to_string(),
        })?;

    if bytes.is_empty() {
        return Err(Doc2MdError::EmptyUpload);
    }

    if DocumentKind::sniff(bytes) != Some(kind) {
        return Err(Doc2MdError::ContentMismatch {
            expected: kind.mime_type().to_string(),
            magic: bytes.iter().take(8).copied().collect(),
        });
    }

    Ok(kind)
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Read a local file or download a URL.
pub async fn load_document(input: &str, timeout_secs: u64) -> Result<LoadedDocument, Doc2MdError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Doc2MdError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(Path::new(input)).await
    }
}

async fn read_local(path: &Path) -> Result<LoadedDocument, Doc2MdError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => Doc2MdError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => Doc2MdError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let kind = infer_kind(&file_name, &bytes)?;

    debug!("Read local {:?} ({} bytes): {}", kind, bytes.len(), path.display());
    Ok(LoadedDocument {
        kind,
        bytes,
        file_name,
    })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<LoadedDocument, Doc2MdError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Doc2MdError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let to_error = |e: reqwest::Error| {
        if e.is_timeout() {
            Doc2MdError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Doc2MdError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(to_error)?;
    if !response.status().is_success() {
        return Err(Doc2MdError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let declared = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(DocumentKind::from_mime);
    let file_name = extract_filename(url);
    let bytes = response.bytes().await.map_err(to_error)?.to_vec();

    let kind = match declared {
        Some(kind) => kind,
        None => infer_kind(&file_name, &bytes)?,
    };

    info!("Downloaded {} bytes ({:?})", bytes.len(), kind);
    Ok(LoadedDocument {
        kind,
        bytes,
        file_name,
    })
}

/// Extension first, then magic bytes.
fn infer_kind(file_name: &str, bytes: &[u8]) -> Result<DocumentKind, Doc2MdError> {
    if bytes.is_empty() {
        return Err(Doc2MdError::EmptyUpload);
    }
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .and_then(DocumentKind::from_extension)
        .or_else(|| DocumentKind::sniff(bytes))
        .ok_or_else(|| Doc2MdError::InvalidInput {
            input: file_name.to_string(),
        })
}

/// Last path segment of the URL, if it looks like a file name.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded".to_string()
}

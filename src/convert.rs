//! Whole-document entry points built on the streaming driver.
//!
//! The HTTP `POST /file/` route and the CLI both need "run the job, give me
//! every page" rather than a live event stream. They run the same
//! [`PipelineDriver`] with a detached [`EventEmitter`], so both paths read
//! pages through the same adapter and produce identical content.

use crate::config::PageSeparator;
use crate::driver::{DocumentJob, JobOutput, PipelineDriver};
use crate::error::Doc2MdError;
use crate::event::{EventEmitter, ParsedPage};
use crate::pipeline::input;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Run a job to completion and return every page in order.
///
/// # Example
/// ```rust,no_run
/// use doc2md::{convert_document, DocumentJob, PipelineConfig, PipelineDriver};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let driver = PipelineDriver::new(PipelineConfig::default());
/// let bytes = std::fs::read("scan.png")?;
/// let output = convert_document(&driver, DocumentJob::new("image/png", bytes)).await?;
/// println!("{}", output.pages[0].content);
/// # Ok(())
/// # }
/// ```
pub async fn convert_document(
    driver: &PipelineDriver,
    job: DocumentJob,
) -> Result<JobOutput, Doc2MdError> {
    let mut emitter = EventEmitter::detached();
    driver.run(job, &mut emitter).await
}

/// Build a job from a local path or HTTP(S) URL.
pub async fn load_job(
    input_str: &str,
    model: &str,
    download_timeout_secs: u64,
) -> Result<DocumentJob, Doc2MdError> {
    let doc = input::load_document(input_str, download_timeout_secs).await?;
    info!("Loaded {} ({} bytes)", doc.file_name, doc.bytes.len());
    Ok(DocumentJob::new(doc.kind.mime_type(), doc.bytes)
        .with_model(model)
        .with_file_name(doc.file_name))
}

/// Join page texts into one document, in page order.
pub fn assemble_text(pages: &[ParsedPage], separator: &PageSeparator) -> String {
    let mut out = String::new();
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            out.push_str(&separator.render(i + 1));
        }
        out.push_str(page.content.trim_end());
    }
    out.push('\n');
    out
}

/// Write `text` to `path` atomically (temp file in the same directory, then
/// rename), so readers never see a partial file.
pub fn write_output(path: &Path, text: &str) -> Result<(), Doc2MdError> {
    let write_failed = |source: std::io::Error| Doc2MdError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(write_failed)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_failed)?;
    tmp.write_all(text.as_bytes()).map_err(write_failed)?;
    tmp.persist(path).map_err(|e| write_failed(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(content: &str) -> ParsedPage {
        ParsedPage {
            image: String::new(),
            content: content.to_string(),
        }
    }

    #[test]
    fn assemble_joins_in_order() {
        let pages = vec![page("one\n"), page("two"), page("three")];
        assert_eq!(
            assemble_text(&pages, &PageSeparator::None),
            "one\n\ntwo\n\nthree\n"
        );
        assert_eq!(
            assemble_text(&pages[..2], &PageSeparator::Comment),
            "one\n\n<!-- page 2 -->\n\ntwo\n"
        );
    }

    #[test]
    fn assemble_keeps_failure_markers() {
        let pages = vec![page("ok"), page("<error>Failed to process page: x</error>")];
        let text = assemble_text(&pages, &PageSeparator::HorizontalRule);
        assert!(text.contains("---"));
        assert!(text.contains("<error>Failed to process page: x</error>"));
    }

    #[test]
    fn write_output_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.md");
        write_output(&path, "hello\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }

    #[tokio::test]
    async fn load_job_reads_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]).unwrap();

        let job = load_job(path.to_str().unwrap(), "m", 5).await.unwrap();
        assert_eq!(job.content_type, "image/png");
        assert_eq!(job.model, "m");
        assert_eq!(job.file_name.as_deref(), Some("scan.png"));
    }
}

//! End-to-end tests against a real pdfium library and a live vision model.
//!
//! Gated behind `E2E_ENABLED` so they never run in CI by accident. Inputs are
//! read from `./test_cases/`; a missing file skips the test.
//!
//! Run with:
//!   E2E_ENABLED=1 PDFIUM_LIB_PATH=. cargo test --test e2e -- --nocapture

use doc2md::page::is_failure_marker;
use doc2md::{
    assemble_text, convert_document, load_job, Doc2MdError, DocumentJob, EventEmitter,
    PageSeparator, PipelineConfig, PipelineDriver, StreamEvent, StreamFrame,
};
use std::path::PathBuf;
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

/// Skip this test if E2E_ENABLED is not set *or* no input file at `path`.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP: test file not found: {}", p.display());
            return;
        }
        p
    }};
}

fn e2e_driver() -> PipelineDriver {
    let config = PipelineConfig::builder()
        .concurrency(4)
        .max_retries(2)
        .build()
        .expect("valid config");
    PipelineDriver::new(config)
}

/// Basic sanity on extracted text.
fn assert_text_quality(text: &str, context: &str) {
    assert!(!text.trim().is_empty(), "[{context}] text is empty");
    assert!(
        !text.lines().next().unwrap_or("").starts_with("```"),
        "[{context}] output must not start with a code fence"
    );
    assert!(
        !text.contains("\n\n\n\n"),
        "[{context}] output has more than 3 consecutive newlines"
    );
    for ch in ['\u{200B}', '\u{FEFF}', '\u{2060}'] {
        assert!(
            !text.contains(ch),
            "[{context}] output contains invisible char U+{:04X}",
            ch as u32
        );
    }
    println!("[{context}] ✓  {} bytes", text.len());
}

// ── Rendering only (no model calls) ──────────────────────────────────────────

#[tokio::test]
async fn corrupt_pdf_is_a_job_error() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP");
        return;
    }

    let job = DocumentJob::new("application/pdf", b"%PDF-1.7\nthis is not a pdf".to_vec());
    let err = convert_document(&e2e_driver(), job).await.unwrap_err();
    assert!(
        matches!(
            err,
            Doc2MdError::CorruptDocument { .. }
                | Doc2MdError::ProviderNotConfigured { .. }
                | Doc2MdError::PdfiumBindingFailed(_)
        ),
        "unexpected error: {err}"
    );
}

// ── Live conversions ─────────────────────────────────────────────────────────

#[tokio::test]
async fn streams_multi_page_pdf_in_order() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("irs_form_1040.pdf"));

    let job = load_job(path.to_str().unwrap(), "", 60)
        .await
        .expect("load should succeed");
    let driver = e2e_driver();
    let (mut emitter, mut rx) = EventEmitter::channel(Duration::from_millis(10));
    let run = tokio::spawn(async move { driver.run(job, &mut emitter).await });

    let mut pages_seen = Vec::new();
    let mut completed = false;
    let mut ended = false;
    while let Some(frame) = rx.recv().await {
        match frame {
            StreamFrame::Event(StreamEvent::Progress { current_page, .. }) => {
                assert!(!completed);
                pages_seen.push(current_page)
            }
            StreamFrame::Event(StreamEvent::Complete { .. }) => completed = true,
            StreamFrame::Event(StreamEvent::Error { message, .. }) => panic!("job failed: {message}"),
            StreamFrame::End => ended = true,
        }
    }

    let output = run.await.unwrap().expect("job should succeed");
    assert!(completed && ended);
    assert_eq!(pages_seen, (1..=output.pages.len()).collect::<Vec<_>>());
    assert_eq!(output.stats.failed_pages, 0);

    let text = assemble_text(&output.pages, &PageSeparator::HorizontalRule);
    assert_text_quality(&text, "irs_form_1040");
}

#[tokio::test]
async fn converts_single_png() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("receipt.png"));

    let job = load_job(path.to_str().unwrap(), "", 60)
        .await
        .expect("load should succeed");
    let output = convert_document(&e2e_driver(), job)
        .await
        .expect("conversion should succeed");

    assert_eq!(output.pages.len(), 1);
    assert!(!is_failure_marker(&output.pages[0].content));
    assert!(output.pages[0].image.starts_with("data:image/png;base64,"));
    assert_text_quality(&output.pages[0].content, "receipt.png");
}

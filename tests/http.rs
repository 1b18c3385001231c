//! HTTP routes driven in-process through `tower::ServiceExt::oneshot`.
#![cfg(feature = "server")]

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use doc2md::server::{create_router, AppState, ErrorBody, HealthResponse};
use doc2md::{
    Doc2MdError, DocumentRenderer, Inference, InferenceAdapter, InferenceRequest, PageError,
    PageImage, ParseResult, PipelineConfig, PipelineDriver, ServerConfig, StreamEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const BOUNDARY: &str = "doc2md-test-boundary";
const PDF_BYTES: &[u8] = b"%PDF-1.7\n%fake\n";

struct Echo;

#[async_trait]
impl InferenceAdapter for Echo {
    async fn infer(&self, req: InferenceRequest<'_>) -> Result<Inference, PageError> {
        // Reverse finish order to exercise sequencing through the transport.
        tokio::time::sleep(Duration::from_millis(30 - 10 * req.page_num as u64)).await;
        Ok(Inference::text(format!("page {} read by {}", req.page_num, req.model)))
    }
}

struct ThreePages;

impl DocumentRenderer for ThreePages {
    fn render_pdf(&self, _bytes: &[u8]) -> Result<Vec<PageImage>, Doc2MdError> {
        Ok((0..3).map(|i| PageImage::png(vec![i])).collect())
    }
}

/// Panics while checking the provider, outside any page's call.
struct BrokenSetup;

#[async_trait]
impl InferenceAdapter for BrokenSetup {
    async fn infer(&self, _req: InferenceRequest<'_>) -> Result<Inference, PageError> {
        Ok(Inference::text("unreachable"))
    }

    async fn prepare(&self, _model: &str) -> Result<(), Doc2MdError> {
        panic!("provider registry corrupted");
    }
}

fn app() -> Router {
    app_with(Arc::new(Echo))
}

fn app_with(adapter: Arc<dyn InferenceAdapter>) -> Router {
    let config = PipelineConfig::builder()
        .concurrency(3)
        .finish_grace_ms(0)
        .build()
        .unwrap();
    let driver = PipelineDriver::with_components(config, adapter, Arc::new(ThreePages));
    let server_config = ServerConfig::default();
    create_router(AppState::new(driver, &server_config), &server_config)
}

enum Part<'a> {
    File {
        content_type: &'a str,
        bytes: &'a [u8],
    },
    Text {
        name: &'a str,
        value: &'a str,
    },
}

fn multipart(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::File {
                content_type,
                bytes,
            } => {
                body.extend_from_slice(
                    b"Content-Disposition: form-data; name=\"file\"; filename=\"upload\"\r\n",
                );
                body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
                body.extend_from_slice(bytes);
            }
            Part::Text { name, value } => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart(parts)))
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// `data:` payloads of an SSE body, in order. Keep-alive comments are skipped.
fn sse_data(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.trim_start().to_string())
        .collect()
}

#[tokio::test]
async fn health_reports_ok() {
    let response = app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health: HealthResponse = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(health.status, "ok");
}

#[tokio::test]
async fn stream_emits_ordered_progress_complete_and_done() {
    let request = upload(
        "/file/stream",
        &[
            Part::File {
                content_type: "application/pdf",
                bytes: PDF_BYTES,
            },
            Part::Text {
                name: "model",
                value: "gpt-4.1-mini",
            },
        ],
    );
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

    let data = sse_data(&body_string(response).await);
    assert_eq!(data.len(), 5, "got {data:?}");
    assert_eq!(data[4], "[DONE]");

    let events: Vec<StreamEvent> = data[..4]
        .iter()
        .map(|d| serde_json::from_str(d).unwrap())
        .collect();
    for (i, event) in events[..3].iter().enumerate() {
        match event {
            StreamEvent::Progress {
                total_pages,
                current_page,
                current_content,
                ..
            } => {
                assert_eq!(*total_pages, 3);
                assert_eq!(*current_page, i + 1);
                assert_eq!(
                    current_content,
                    &format!("page {} read by gpt-4.1-mini", i + 1)
                );
            }
            other => panic!("expected progress, got {other:?}"),
        }
    }
    match &events[3] {
        StreamEvent::Complete { images } => assert_eq!(images.len(), 3),
        other => panic!("expected complete, got {other:?}"),
    }

    // Wire field names are camelCase with a lowercase type tag.
    assert!(data[0].contains(r#""type":"progress""#));
    assert!(data[0].contains(r#""totalPages":3"#));
    assert!(data[0].contains(r#""currentImage":"data:image/png;base64,"#));
}

#[tokio::test]
async fn stream_reports_empty_upload_in_band() {
    let request = upload(
        "/file/stream",
        &[Part::File {
            content_type: "application/pdf",
            bytes: b"",
        }],
    );
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let data = sse_data(&body_string(response).await);
    assert_eq!(data.len(), 2, "got {data:?}");
    let event: StreamEvent = serde_json::from_str(&data[0]).unwrap();
    match event {
        StreamEvent::Error { message, details } => {
            assert!(message.contains("empty"), "got {message}");
            assert_eq!(details.as_deref(), Some("EmptyUpload"));
        }
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(data[1], "[DONE]");
}

#[tokio::test]
async fn parse_returns_every_page() {
    let request = upload(
        "/file/",
        &[Part::File {
            content_type: "application/pdf",
            bytes: PDF_BYTES,
        }],
    );
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let result: ParseResult = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(result.images.len(), 3);
    assert_eq!(result.images[0].content, "page 1 read by gpt-4.1-nano");
    assert_eq!(result.images[2].content, "page 3 read by gpt-4.1-nano");
}

#[tokio::test]
async fn parse_rejects_unsupported_type_with_400() {
    let request = upload(
        "/file/",
        &[Part::File {
            content_type: "image/gif",
            bytes: b"GIF89a....",
        }],
    );
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: ErrorBody = serde_json::from_str(&body_string(response).await).unwrap();
    assert!(body.message.contains("image/gif"));
    assert_eq!(body.details.as_deref(), Some("UnsupportedMediaType"));
}

#[tokio::test]
async fn missing_file_field_is_400() {
    for uri in ["/file/", "/file/stream"] {
        let request = upload(
            uri,
            &[Part::Text {
                name: "model",
                value: "gpt-4.1-mini",
            }],
        );
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        let body: ErrorBody = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body.message, "No file uploaded");
    }
}

#[tokio::test]
async fn stream_still_terminates_when_the_job_panics() {
    let request = upload(
        "/file/stream",
        &[Part::File {
            content_type: "application/pdf",
            bytes: PDF_BYTES,
        }],
    );
    let response = app_with(Arc::new(BrokenSetup)).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let data = sse_data(&body_string(response).await);
    assert_eq!(data.len(), 2, "got {data:?}");
    let event: StreamEvent = serde_json::from_str(&data[0]).unwrap();
    match event {
        StreamEvent::Error { details, .. } => assert_eq!(details.as_deref(), Some("Internal")),
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(data[1], "[DONE]");
}

#[tokio::test]
async fn parse_answers_500_when_the_job_panics() {
    let request = upload(
        "/file/",
        &[Part::File {
            content_type: "application/pdf",
            bytes: PDF_BYTES,
        }],
    );
    let response = app_with(Arc::new(BrokenSetup)).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: ErrorBody = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body.details.as_deref(), Some("Internal"));
}

use std::convert::Infallible;
use std::panic::AssertUnwindSafe;

use axum::extract::{Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::StreamExt;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;

use super::AppState;
use crate::convert::convert_document;
use crate::driver::{DocumentJob, PipelineDriver};
use crate::error::Doc2MdError;
use crate::event::{EventEmitter, ParseResult};

/// Error body of the non-streaming route; same fields as an `error` event.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub details: Option<String>,
}

impl From<&Doc2MdError> for ErrorBody {
    fn from(err: &Doc2MdError) -> Self {
        Self {
            message: err.to_string(),
            details: Some(err.kind().to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

pub async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
        }),
    )
}

/// The multipart fields we care about.
struct Upload {
    content_type: String,
    file_name: Option<String>,
    bytes: Vec<u8>,
    model: String,
}

impl Upload {
    fn into_job(self) -> DocumentJob {
        let mut job = DocumentJob::new(self.content_type, self.bytes).with_model(self.model);
        job.file_name = self.file_name;
        job
    }
}

fn bad_request(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            message,
            details: None,
        }),
    )
        .into_response()
}

/// Read `file` and `model` from the form. Unknown fields are skipped.
async fn read_upload(mut multipart: Multipart) -> Result<Upload, Response> {
    let mut file: Option<(String, Option<String>, Vec<u8>)> = None;
    let mut model = String::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read multipart");
                return Err(bad_request(format!("Failed to read multipart: {}", e)));
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let file_name = field.file_name().map(str::to_string);
                let bytes = field.bytes().await.map_err(|e| {
                    tracing::warn!(error = %e, "Failed to read file bytes");
                    bad_request(format!("Failed to read file: {}", e))
                })?;
                file = Some((content_type, file_name, bytes.to_vec()));
            }
            "model" => {
                model = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("Failed to read model field: {}", e)))?;
            }
            _ => {}
        }
    }

    let Some((content_type, file_name, bytes)) = file else {
        tracing::warn!("Upload request with no file");
        return Err(bad_request("No file uploaded".to_string()));
    };

    tracing::debug!(
        content_type = %content_type,
        bytes = bytes.len(),
        model = %model,
        "Upload received"
    );

    Ok(Upload {
        content_type,
        file_name,
        bytes,
        model,
    })
}

fn panicked_job() -> Doc2MdError {
    Doc2MdError::Internal("job aborted unexpectedly".to_string())
}

/// Drive one streaming job. A panic inside the driver still ends the stream
/// with an `error` event and the end marker.
async fn run_streaming(driver: PipelineDriver, job: DocumentJob, mut emitter: EventEmitter) {
    let run = AssertUnwindSafe(driver.run(job, &mut emitter))
        .catch_unwind()
        .await;
    match run {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "Streaming job ended with an error"),
        Err(_) => {
            tracing::error!("Streaming job panicked");
            if !emitter.is_terminated() {
                if let Err(e) = emitter.error(&panicked_job()).await {
                    tracing::debug!(error = %e, "Could not deliver error event");
                }
            }
        }
    }
}

/// `POST /file/stream`
pub async fn stream_handler(State(state): State<AppState>, multipart: Multipart) -> Response {
    let upload = match read_upload(multipart).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let (emitter, rx) = EventEmitter::channel(state.driver.config().finish_grace());
    tokio::spawn(run_streaming(state.driver.clone(), upload.into_job(), emitter));

    let stream = ReceiverStream::new(rx)
        .map(|frame| Ok::<_, Infallible>(Event::default().data(frame.data())));

    (
        [(header::CACHE_CONTROL, "no-cache")],
        Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keep_alive)),
    )
        .into_response()
}

/// `POST /file/`
pub async fn parse_handler(State(state): State<AppState>, multipart: Multipart) -> Response {
    let upload = match read_upload(multipart).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let run = AssertUnwindSafe(convert_document(&state.driver, upload.into_job()))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            tracing::error!("Job panicked");
            Err(panicked_job())
        });

    match run {
        Ok(output) => Json(ParseResult {
            images: output.pages,
        })
        .into_response(),
        Err(e) => {
            let status =
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(ErrorBody::from(&e))).into_response()
        }
    }
}

//! Caller-facing event protocol.
//!
//! A job talks to its caller through a one-way, ordered channel of
//! [`StreamFrame`]s: zero or more `progress` events, then exactly one terminal
//! event (`complete` or `error`), then the [`END_OF_STREAM`] marker. The
//! [`EventEmitter`] enforces that shape; once it has sent a terminal event it
//! refuses everything else.
//!
//! ## Wire format
//!
//! ```text
//! data: {"type":"progress","totalPages":3,"currentPage":1,"currentImage":"data:image/png;base64,…","currentContent":"…"}
//! data: {"type":"complete","images":[{"image":"data:image/png;base64,…","content":"…"}, …]}
//! data: {"type":"error","message":"Uploaded file is empty","details":"EmptyUpload"}
//! data: [DONE]
//! ```

use crate::error::Doc2MdError;
use crate::page::PageResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Sentinel payload that closes a stream. Never valid JSON, so it cannot be
/// confused with an event.
pub const END_OF_STREAM: &str = "[DONE]";

/// Frames buffered between the emitter and a slow transport.
const CHANNEL_CAPACITY: usize = 16;

/// One page's image and text, as listed in `complete` and in the
/// non-streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedPage {
    pub image: String,
    pub content: String,
}

impl ParsedPage {
    pub fn from_result(result: &PageResult) -> Self {
        Self {
            image: result.image.to_data_url(),
            content: result.outcome.content(),
        }
    }
}

/// Body of the non-streaming response; identical to the `complete` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub images: Vec<ParsedPage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// One page finished; emitted in ascending page order.
    #[serde(rename_all = "camelCase")]
    Progress {
        total_pages: usize,
        /// 1-based.
        current_page: usize,
        current_image: String,
        current_content: String,
    },
    /// Every page, in order. Emitted once, after the last `progress`.
    Complete { images: Vec<ParsedPage> },
    /// Job-level failure. Nothing but the end marker follows.
    Error {
        message: String,
        details: Option<String>,
    },
}

impl StreamEvent {
    pub fn progress(total_pages: usize, page: &ParsedPage, page_num: usize) -> Self {
        StreamEvent::Progress {
            total_pages,
            current_page: page_num,
            current_image: page.image.clone(),
            current_content: page.content.clone(),
        }
    }

    pub fn error(err: &Doc2MdError) -> Self {
        StreamEvent::Error {
            message: err.to_string(),
            details: Some(err.kind().to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Progress { .. })
    }
}

/// What actually travels over the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Event(StreamEvent),
    End,
}

impl StreamFrame {
    /// Payload of the frame: event JSON, or [`END_OF_STREAM`].
    pub fn data(&self) -> String {
        match self {
            StreamFrame::Event(event) => serde_json::to_string(event).unwrap_or_else(|e| {
                // Serialising these plain structs cannot fail; keep the
                // stream well-formed regardless.
                format!(
                    r#"{{"type":"error","message":"failed to encode event: {}","details":null}}"#,
                    e
                )
            }),
            StreamFrame::End => END_OF_STREAM.to_string(),
        }
    }

    /// The frame as one SSE message (`data: …` plus blank line).
    pub fn to_sse_message(&self) -> String {
        format!("data: {}\n\n", self.data())
    }

    pub fn is_end(&self) -> bool {
        matches!(self, StreamFrame::End)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmitError {
    #[error("the receiving side of the event stream is gone")]
    Disconnected,

    #[error("the event stream already terminated")]
    AlreadyTerminated,
}

impl From<EmitError> for Doc2MdError {
    fn from(e: EmitError) -> Self {
        match e {
            EmitError::Disconnected => Doc2MdError::ClientDisconnected,
            EmitError::AlreadyTerminated => Doc2MdError::Internal(e.to_string()),
        }
    }
}

/// Ordered, single-consumer event sink for one job.
pub struct EventEmitter {
    tx: Option<mpsc::Sender<StreamFrame>>,
    grace: Duration,
    terminated: bool,
}

impl EventEmitter {
    /// An emitter plus the receiver the transport reads frames from.
    ///
    /// `grace` is slept after the end marker, before the sender is dropped.
    pub fn channel(grace: Duration) -> (Self, mpsc::Receiver<StreamFrame>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self {
                tx: Some(tx),
                grace,
                terminated: false,
            },
            rx,
        )
    }

    /// An emitter with no listener. Used by the non-streaming path, which
    /// only needs the job's return value.
    pub fn detached() -> Self {
        Self {
            tx: None,
            grace: Duration::ZERO,
            terminated: false,
        }
    }

    /// True once the receiver is gone. A detached emitter is never closed.
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.is_closed())
    }

    /// Resolves once the receiver is dropped. Never resolves for a detached
    /// or already finished emitter.
    pub async fn closed(&self) {
        match &self.tx {
            Some(tx) => tx.closed().await,
            None => std::future::pending().await,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub async fn progress(
        &mut self,
        total_pages: usize,
        page_num: usize,
        page: &ParsedPage,
    ) -> Result<(), EmitError> {
        self.send(StreamEvent::progress(total_pages, page, page_num))
            .await
    }

    /// Send `complete`, the end marker, and close.
    pub async fn complete(&mut self, images: Vec<ParsedPage>) -> Result<(), EmitError> {
        self.send(StreamEvent::Complete { images }).await?;
        self.finish().await
    }

    /// Send `error`, the end marker, and close.
    pub async fn error(&mut self, err: &Doc2MdError) -> Result<(), EmitError> {
        self.send(StreamEvent::error(err)).await?;
        self.finish().await
    }

    async fn send(&mut self, event: StreamEvent) -> Result<(), EmitError> {
        if self.terminated {
            return Err(EmitError::AlreadyTerminated);
        }
        if event.is_terminal() {
            self.terminated = true;
        }
        self.push(StreamFrame::Event(event)).await
    }

    async fn finish(&mut self) -> Result<(), EmitError> {
        self.push(StreamFrame::End).await?;
        if !self.grace.is_zero() {
            tokio::time::sleep(self.grace).await;
        }
        self.tx = None;
        debug!("Event stream closed");
        Ok(())
    }

    async fn push(&mut self, frame: StreamFrame) -> Result<(), EmitError> {
        match &self.tx {
            Some(tx) => tx.send(frame).await.map_err(|_| EmitError::Disconnected),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: usize) -> ParsedPage {
        ParsedPage {
            image: format!("data:image/png;base64,{n}"),
            content: format!("text {n}"),
        }
    }

    #[test]
    fn progress_serialises_with_camel_case_fields() {
        let event = StreamEvent::progress(3, &page(1), 1);
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["totalPages"], 3);
        assert_eq!(json["currentPage"], 1);
        assert_eq!(json["currentImage"], "data:image/png;base64,1");
        assert_eq!(json["currentContent"], "text 1");
    }

    #[test]
    fn complete_and_error_shapes() {
        let complete = StreamEvent::Complete {
            images: vec![page(1)],
        };
        let json = serde_json::to_value(&complete).unwrap();
        assert_eq!(json["type"], "complete");
        assert_eq!(json["images"][0]["content"], "text 1");

        let error = StreamEvent::error(&Doc2MdError::EmptyUpload);
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "Uploaded file is empty");
        assert_eq!(json["details"], "EmptyUpload");
    }

    #[test]
    fn error_without_details_serialises_null() {
        let event = StreamEvent::Error {
            message: "x".into(),
            details: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json["details"].is_null());
    }

    #[test]
    fn end_frame_is_the_done_sentinel() {
        assert_eq!(StreamFrame::End.data(), "[DONE]");
        assert_eq!(StreamFrame::End.to_sse_message(), "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn emitter_refuses_events_after_termination() {
        let (mut emitter, mut rx) = EventEmitter::channel(Duration::ZERO);
        emitter.progress(1, 1, &page(1)).await.unwrap();
        emitter.complete(vec![page(1)]).await.unwrap();
        assert!(emitter.is_terminated());
        assert_eq!(
            emitter.progress(1, 1, &page(1)).await,
            Err(EmitError::AlreadyTerminated)
        );
        assert_eq!(
            emitter.error(&Doc2MdError::EmptyUpload).await,
            Err(EmitError::AlreadyTerminated)
        );

        let mut frames = Vec::new();
        while let Some(f) = rx.recv().await {
            frames.push(f);
        }
        assert_eq!(frames.len(), 3);
        assert!(frames[2].is_end());
    }

    #[tokio::test(start_paused = true)]
    async fn channel_stays_open_for_the_grace_period_after_done() {
        let grace = Duration::from_millis(100);
        let start = tokio::time::Instant::now();
        let (mut emitter, mut rx) = EventEmitter::channel(grace);
        let task = tokio::spawn(async move {
            emitter.complete(vec![page(1)]).await.unwrap();
            emitter
        });

        assert!(matches!(
            rx.recv().await,
            Some(StreamFrame::Event(StreamEvent::Complete { .. }))
        ));
        assert_eq!(rx.recv().await, Some(StreamFrame::End));

        // Half way through the grace period the sender is still held.
        let early = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(early.is_err(), "channel closed before the grace period ended");

        assert_eq!(rx.recv().await, None);
        assert!(start.elapsed() >= grace);

        // Closing comes from the emitter itself, not from it being dropped.
        let emitter = task.await.unwrap();
        assert!(emitter.is_terminated());
    }

    #[tokio::test]
    async fn emitter_reports_disconnect() {
        let (mut emitter, rx) = EventEmitter::channel(Duration::ZERO);
        drop(rx);
        assert!(emitter.is_closed());
        assert_eq!(
            emitter.progress(1, 1, &page(1)).await,
            Err(EmitError::Disconnected)
        );
    }

    #[tokio::test]
    async fn detached_emitter_accepts_everything_once() {
        let mut emitter = EventEmitter::detached();
        assert!(!emitter.is_closed());
        emitter.progress(1, 1, &page(1)).await.unwrap();
        emitter.complete(vec![page(1)]).await.unwrap();
        assert_eq!(
            emitter.complete(vec![]).await,
            Err(EmitError::AlreadyTerminated)
        );
    }
}

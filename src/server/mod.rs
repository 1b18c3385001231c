//! HTTP service: upload a document, get its pages back.
//!
//! * `POST /file/stream`: multipart `file` + `model`, answered with a
//!   `text/event-stream` of `progress`/`complete`/`error` events and a final
//!   `[DONE]`.
//! * `POST /file/`: same input, one JSON body once every page is done.
//! * `GET /health`: liveness.

mod handlers;
mod routes;

pub use handlers::{ErrorBody, HealthResponse};
pub use routes::create_router;

use crate::config::ServerConfig;
use crate::driver::PipelineDriver;
use std::time::Duration;
use tracing::info;

/// Shared state for the web server. Each request runs its own job.
#[derive(Clone)]
pub struct AppState {
    pub driver: PipelineDriver,
    pub keep_alive: Duration,
}

impl AppState {
    pub fn new(driver: PipelineDriver, config: &ServerConfig) -> Self {
        Self {
            driver,
            keep_alive: Duration::from_secs(config.keep_alive_secs.max(1)),
        }
    }
}

/// Bind and serve until Ctrl-C.
pub async fn serve(driver: PipelineDriver, config: &ServerConfig) -> std::io::Result<()> {
    let app = create_router(AppState::new(driver, config), config);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Starting server at http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

//! HTTP surface: one endpoint that accepts capture parameters and responds
//! with the PNG bytes or a descriptive error.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};

use crate::request::CaptureRequest;
use crate::service::{Capture, ScreenshotService};
use crate::Result;

pub fn router(service: Arc<dyn Capture>) -> Router {
    Router::new()
        .route("/screenshot", post(screenshot))
        .with_state(service)
}

async fn screenshot(
    State(service): State<Arc<dyn Capture>>,
    Json(request): Json<CaptureRequest>,
) -> Response {
    tracing::info!(
        dashboard = %request.dashboard_id,
        width = request.width,
        height = request.height,
        "capture requested"
    );

    match service.take_screenshot(request).await {
        Ok(image) => (
            [
                (header::CONTENT_TYPE, "image/png"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            image.bytes,
        )
            .into_response(),
        Err(err) => {
            tracing::warn!(%err, "capture request failed");
            let status = err.status();
            let body = if status == StatusCode::BAD_REQUEST {
                err.to_string()
            } else {
                format!("Failed to take screenshot: {err}")
            };
            (status, body).into_response()
        }
    }
}

/// Binds and serves until a shutdown signal arrives, then tears the engine
/// down before returning.
pub async fn serve(addr: SocketAddr, service: Arc<ScreenshotService>) -> Result<()> {
    let app = router(service.clone() as Arc<dyn Capture>);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

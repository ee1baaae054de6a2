//! Embedshot
//!
//! An HTTP service that renders embedded Power BI dashboards in headless
//! Chromium and returns rasterized PNG captures. The embed SDK loads
//! asynchronously via a postMessage handshake, so each capture drives a
//! small state machine: blank navigation → iframe injection → handshake →
//! settle wait → clipped screenshot.
//!
//! # Module Overview
//!
//! - [`queue`] - FIFO admission queue bounding concurrent captures
//! - [`engine`] - Lifecycle of the shared headless-browser helper process
//! - [`session`] - Per-capture render session and load-sync protocol
//! - [`protocol`] - JSON wire types spoken over the helper's stdio
//! - [`service`] - Queue + engine + session behind one capture call
//! - [`server`] - Axum HTTP surface
//! - [`request`] - Capture parameters and validation
//! - [`config`] - TOML configuration
//!
//! # Example
//!
//! ```no_run
//! use embedshot_lib::{CaptureRequest, EngineOptions, ScreenshotService, SessionOptions};
//!
//! # async fn example() -> embedshot_lib::Result<()> {
//! let service = ScreenshotService::new(EngineOptions::default(), SessionOptions::default(), 3);
//! let request = CaptureRequest {
//!     access_token: "token".into(),
//!     embed_url: "https://app.powerbi.com/dashboardEmbed".into(),
//!     dashboard_id: "dashboard".into(),
//!     workspace_id: "workspace".into(),
//!     width: 800,
//!     height: 600,
//! };
//! let image = service.capture(&request).await?;
//! println!("captured {} bytes at {}x{}", image.bytes.len(), image.width, image.height);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod request;
pub mod server;
pub mod service;
pub mod session;

pub use config::{CaptureConfig, Config, EngineConfig, ServerConfig};
pub use engine::{Engine, EngineHandle, EngineOptions, DEFAULT_STARTUP_TIMEOUT};
pub use error::{Result, ShotError};
pub use protocol::{EngineCommand, EngineEvent};
pub use queue::AdmissionQueue;
pub use request::{CaptureImage, CaptureRequest, CAPTURE_SCALE, MAX_CAPTURE_DIMENSION};
pub use server::{router, serve};
pub use service::{Capture, ScreenshotService};
pub use session::{
    run_capture, SessionOptions, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_SETTLE_DELAY,
    DEFAULT_TOKEN_RESEND_DELAY,
};

//! Screenshot service: ties the admission queue, the engine lifecycle and
//! render sessions together behind one call.

use async_trait::async_trait;

use crate::engine::{Engine, EngineOptions};
use crate::queue::AdmissionQueue;
use crate::request::{CaptureImage, CaptureRequest};
use crate::session::{self, SessionOptions};
use crate::Result;

/// Capture seam consumed by the HTTP layer; lets handlers be tested without
/// a browser behind them.
#[async_trait]
pub trait Capture: Send + Sync {
    async fn take_screenshot(&self, request: CaptureRequest) -> Result<CaptureImage>;
}

pub struct ScreenshotService {
    engine: Engine,
    queue: AdmissionQueue,
    session_options: SessionOptions,
}

impl ScreenshotService {
    pub fn new(
        engine_options: EngineOptions,
        session_options: SessionOptions,
        concurrency: usize,
    ) -> Self {
        Self {
            engine: Engine::new(engine_options),
            queue: AdmissionQueue::new(concurrency),
            session_options,
        }
    }

    /// Validates, queues, and runs one capture. Validation failures surface
    /// immediately without touching the queue or the engine; everything else
    /// settles through the job's own outcome. No retries happen here.
    pub async fn capture(&self, request: &CaptureRequest) -> Result<CaptureImage> {
        request.validate()?;

        self.queue
            .submit(async {
                let handle = self.engine.handle().await?;
                session::run_capture(&handle, request, &self.session_options).await
            })
            .await
    }

    pub fn concurrency(&self) -> usize {
        self.queue.limit()
    }

    /// Tears the engine down; must run before process exit.
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }
}

#[async_trait]
impl Capture for ScreenshotService {
    async fn take_screenshot(&self, request: CaptureRequest) -> Result<CaptureImage> {
        self.capture(&request).await
    }
}

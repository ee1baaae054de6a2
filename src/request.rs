use serde::Deserialize;
use url::Url;

use crate::{Result, ShotError};

/// Device-pixel-ratio multiplier applied to every capture.
///
/// The embed SDK renders at CSS pixel resolution; doubling the viewport and
/// compensating with a matching zoom on the injected iframe is equivalent to
/// rendering on a high-DPI display.
pub const CAPTURE_SCALE: u32 = 2;

/// Upper bound on each requested dimension. Chromium cannot rasterize a
/// surface past this edge length once the scale factor is applied.
pub const MAX_CAPTURE_DIMENSION: u32 = 16_384;

/// Caller-supplied parameters for one capture, immutable for its duration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    pub access_token: String,
    pub embed_url: String,
    pub dashboard_id: String,
    pub workspace_id: String,
    pub width: u32,
    pub height: u32,
}

impl CaptureRequest {
    /// Rejects incomplete or oversized requests before they touch the queue
    /// or the engine.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("accessToken", &self.access_token),
            ("embedUrl", &self.embed_url),
            ("dashboardId", &self.dashboard_id),
            ("workspaceId", &self.workspace_id),
        ] {
            if value.trim().is_empty() {
                return Err(ShotError::validation(format!(
                    "Missing required parameter: {name}"
                )));
            }
        }

        if self.width == 0 || self.height == 0 {
            return Err(ShotError::validation(
                "width and height must be positive".to_string(),
            ));
        }
        if self.width > MAX_CAPTURE_DIMENSION || self.height > MAX_CAPTURE_DIMENSION {
            return Err(ShotError::validation(format!(
                "width and height must not exceed {MAX_CAPTURE_DIMENSION}"
            )));
        }

        Url::parse(&self.embed_url)
            .map_err(|e| ShotError::validation(format!("embedUrl is not a valid URL: {e}")))?;

        Ok(())
    }

    /// Viewport and clip width after DPI scaling.
    pub fn scaled_width(&self) -> u32 {
        self.width * CAPTURE_SCALE
    }

    /// Viewport and clip height after DPI scaling.
    pub fn scaled_height(&self) -> u32 {
        self.height * CAPTURE_SCALE
    }
}

/// A finished capture: raw PNG bytes plus decoded pixel dimensions.
#[derive(Debug, Clone)]
pub struct CaptureImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

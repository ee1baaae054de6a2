//! Render session: drives one page through blank navigation, iframe
//! injection, the SDK handshake, the settle wait, and the clipped capture.
//!
//! Every exit path releases the page (`dispose`) and tears down the event
//! listener (the session channel deregisters on drop), so nothing leaks
//! across captures.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::time::{sleep, timeout};

use crate::engine::{EngineHandle, SessionChannel};
use crate::protocol::{EngineCommand, EngineEvent};
use crate::request::{CaptureImage, CaptureRequest, CAPTURE_SCALE};
use crate::{Result, ShotError};

/// Default bound on the SDK handshake (loaded or error signal).
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default post-load delay before capture. The SDK's loaded event fires
/// before all visual elements have finished drawing, and it exposes no
/// finer-grained rendering-complete signal.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(30);

/// Default delay before the unconditional access-token re-send.
pub const DEFAULT_TOKEN_RESEND_DELAY: Duration = Duration::from_secs(1);

/// Default bound on page provisioning.
pub const DEFAULT_PROVISION_TIMEOUT: Duration = Duration::from_secs(15);

/// Default bound on the screenshot round-trip.
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub handshake_timeout: Duration,
    pub settle_delay: Duration,
    pub token_resend_delay: Duration,
    pub provision_timeout: Duration,
    pub capture_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            token_resend_delay: DEFAULT_TOKEN_RESEND_DELAY,
            provision_timeout: DEFAULT_PROVISION_TIMEOUT,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
        }
    }
}

/// Runs one capture against a fresh page.
pub async fn run_capture(
    handle: &Arc<EngineHandle>,
    request: &CaptureRequest,
    options: &SessionOptions,
) -> Result<CaptureImage> {
    let mut session = handle.open_session();
    let started = Instant::now();

    let result = drive(handle, &mut session, request, options).await;

    // Release the page whatever the outcome; best effort if the engine died.
    let _ = handle
        .send(&EngineCommand::Dispose { id: session.id() })
        .await;

    match &result {
        Ok(image) => tracing::info!(
            session = session.id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            bytes = image.bytes.len(),
            "capture finished"
        ),
        Err(err) => tracing::warn!(session = session.id(), %err, "capture failed"),
    }

    result
}

async fn drive(
    handle: &EngineHandle,
    session: &mut SessionChannel,
    request: &CaptureRequest,
    options: &SessionOptions,
) -> Result<CaptureImage> {
    let id = session.id();

    // Provisioning: fresh page, scaled viewport, blank navigation.
    handle
        .send(&EngineCommand::Prepare {
            id,
            width: request.width,
            height: request.height,
            scale: CAPTURE_SCALE,
        })
        .await?;
    match next_event(session, options.provision_timeout).await? {
        Some(EngineEvent::Ready { .. }) => {}
        Some(EngineEvent::Error { message, .. }) => {
            return Err(ShotError::engine(
                message.unwrap_or_else(|| "page provisioning failed".to_string()),
            ))
        }
        Some(other) => {
            return Err(ShotError::protocol(format!(
                "unexpected event while provisioning: {other:?}"
            )))
        }
        None => {
            return Err(ShotError::engine(format!(
                "page provisioning did not complete within {:?}",
                options.provision_timeout
            )))
        }
    }

    // Injection: the in-page script registers the message listener, builds
    // the iframe and starts the handshake.
    handle
        .send(&EngineCommand::Inject {
            id,
            embed_url: request.embed_url.clone(),
            access_token: request.access_token.clone(),
            dashboard_id: request.dashboard_id.clone(),
            workspace_id: request.workspace_id.clone(),
            width: request.width,
            height: request.height,
            scale: CAPTURE_SCALE,
            token_resend_ms: options.token_resend_delay.as_millis() as u64,
        })
        .await?;

    // Awaiting signal: loaded, error, or nothing within the bound.
    match next_event(session, options.handshake_timeout).await? {
        Some(EngineEvent::Loaded { .. }) => {}
        Some(EngineEvent::Error { message, .. }) => {
            return Err(ShotError::handshake(
                message.unwrap_or_else(|| "Unknown Power BI error".to_string()),
            ))
        }
        Some(other) => {
            return Err(ShotError::protocol(format!(
                "unexpected event during handshake: {other:?}"
            )))
        }
        None => return Err(ShotError::HandshakeTimeout(options.handshake_timeout)),
    }

    // Settling: give asynchronous chart rendering time to finish painting.
    sleep(options.settle_delay).await;

    handle
        .send(&EngineCommand::Capture {
            id,
            width: request.scaled_width(),
            height: request.scaled_height(),
        })
        .await?;
    match next_event(session, options.capture_timeout).await? {
        Some(EngineEvent::Captured { image, .. }) => decode_capture(&image, request),
        Some(EngineEvent::Error { message, .. }) => Err(ShotError::engine(
            message.unwrap_or_else(|| "screenshot failed".to_string()),
        )),
        Some(other) => Err(ShotError::protocol(format!(
            "unexpected event during capture: {other:?}"
        ))),
        None => Err(ShotError::engine(format!(
            "screenshot did not complete within {:?}",
            options.capture_timeout
        ))),
    }
}

/// Next event for the session, or `Ok(None)` when the bound expires. A
/// closed channel means the engine went away mid-session; that is engine
/// loss, not an SDK error signal, and surfaces as such.
async fn next_event(
    session: &mut SessionChannel,
    bound: Duration,
) -> Result<Option<EngineEvent>> {
    match timeout(bound, session.recv()).await {
        Ok(Some(event)) => Ok(Some(event)),
        Ok(None) => Err(ShotError::engine(
            "engine exited before the session completed",
        )),
        Err(_) => Ok(None),
    }
}

fn decode_capture(encoded: &str, request: &CaptureRequest) -> Result<CaptureImage> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|err| ShotError::protocol(format!("invalid base64 image payload: {err}")))?;
    let decoded = image::load_from_memory(&bytes)?;
    let (width, height) = (decoded.width(), decoded.height());

    if width != request.scaled_width() || height != request.scaled_height() {
        return Err(ShotError::protocol(format!(
            "capture is {width}x{height}, expected {}x{}",
            request.scaled_width(),
            request.scaled_height()
        )));
    }

    Ok(CaptureImage {
        bytes,
        width,
        height,
    })
}

use axum::http::StatusCode;
use std::time::Duration;
use thiserror::Error;
use url::ParseError;

#[derive(Debug, Error)]
pub enum ShotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] ParseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Engine unavailable: {0}")]
    Engine(String),

    #[error("Dashboard handshake failed: {0}")]
    Handshake(String),

    #[error("Dashboard handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Engine protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ShotError {
    pub fn validation(message: impl Into<String>) -> Self {
        ShotError::Validation(message.into())
    }

    pub fn engine(message: impl Into<String>) -> Self {
        ShotError::Engine(message.into())
    }

    pub fn handshake(message: impl Into<String>) -> Self {
        ShotError::Handshake(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        ShotError::Protocol(message.into())
    }

    /// HTTP status the error maps to at the service boundary.
    ///
    /// Validation failures are the caller's fault; a handshake that never
    /// signalled is a gateway timeout; everything else is a server-side
    /// capture failure.
    pub fn status(&self) -> StatusCode {
        match self {
            ShotError::Validation(_) => StatusCode::BAD_REQUEST,
            ShotError::HandshakeTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, ShotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        let err = ShotError::validation("workspaceId must not be empty");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn handshake_timeout_maps_to_gateway_timeout() {
        let err = ShotError::HandshakeTimeout(Duration::from_secs(60));
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn engine_and_handshake_map_to_internal_error() {
        assert_eq!(
            ShotError::engine("chromium failed to launch").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ShotError::handshake("TokenExpired").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn handshake_display_carries_sdk_message() {
        let err = ShotError::handshake("Unknown Power BI error");
        assert_eq!(
            format!("{}", err),
            "Dashboard handshake failed: Unknown Power BI error"
        );
    }

    #[test]
    fn timeout_display_includes_bound() {
        let err = ShotError::HandshakeTimeout(Duration::from_secs(60));
        assert!(format!("{}", err).contains("60s"));
    }
}

//! Wire types for the stdio protocol between the service and the helper
//! process: commands go to the helper's stdin as one JSON object per line,
//! events come back on its stdout the same way.

use serde::{Deserialize, Serialize};

/// Command sent to the helper process. `id` identifies the render session
/// the command belongs to.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum EngineCommand {
    /// Open a fresh page, size its viewport, navigate to about:blank.
    #[serde(rename_all = "camelCase")]
    Prepare {
        id: u64,
        width: u32,
        height: u32,
        scale: u32,
    },
    /// Inject the embed iframe and start the SDK handshake.
    #[serde(rename_all = "camelCase")]
    Inject {
        id: u64,
        embed_url: String,
        access_token: String,
        dashboard_id: String,
        workspace_id: String,
        width: u32,
        height: u32,
        scale: u32,
        token_resend_ms: u64,
    },
    /// Screenshot the page clipped to (0, 0, width, height), PNG.
    #[serde(rename_all = "camelCase")]
    Capture { id: u64, width: u32, height: u32 },
    /// Close the session's page.
    #[serde(rename_all = "camelCase")]
    Dispose { id: u64 },
}

/// Event emitted by the helper process.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EngineEvent {
    /// Browser launched, helper is accepting commands.
    EngineReady,
    /// Page provisioned for the session.
    #[serde(rename_all = "camelCase")]
    Ready { id: u64 },
    /// The SDK reported the dashboard-loaded event.
    #[serde(rename_all = "camelCase")]
    Loaded { id: u64 },
    /// The SDK reported an error event, or the helper failed the command.
    #[serde(rename_all = "camelCase")]
    Error { id: u64, message: Option<String> },
    /// Clipped screenshot, base64-encoded PNG.
    #[serde(rename_all = "camelCase")]
    Captured { id: u64, image: String },
    /// The session's page was closed.
    #[serde(rename_all = "camelCase")]
    Disposed { id: u64 },
    /// The helper could not parse a command line; not tied to a session.
    #[serde(rename_all = "camelCase")]
    ProtocolError { message: String },
}

impl EngineEvent {
    /// The render session this event belongs to, if any.
    pub fn session_id(&self) -> Option<u64> {
        match self {
            EngineEvent::Ready { id }
            | EngineEvent::Loaded { id }
            | EngineEvent::Error { id, .. }
            | EngineEvent::Captured { id, .. }
            | EngineEvent::Disposed { id } => Some(*id),
            EngineEvent::EngineReady | EngineEvent::ProtocolError { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_serializes_with_cmd_tag() {
        let cmd = EngineCommand::Prepare {
            id: 7,
            width: 800,
            height: 600,
            scale: 2,
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["cmd"], "prepare");
        assert_eq!(json["id"], 7);
        assert_eq!(json["scale"], 2);
    }

    #[test]
    fn inject_uses_camel_case_fields() {
        let cmd = EngineCommand::Inject {
            id: 1,
            embed_url: "https://example.com/embed".to_string(),
            access_token: "t".to_string(),
            dashboard_id: "d".to_string(),
            workspace_id: "w".to_string(),
            width: 800,
            height: 600,
            scale: 2,
            token_resend_ms: 1000,
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["cmd"], "inject");
        assert_eq!(json["embedUrl"], "https://example.com/embed");
        assert_eq!(json["dashboardId"], "d");
        assert_eq!(json["workspaceId"], "w");
        assert_eq!(json["tokenResendMs"], 1000);
    }

    #[test]
    fn loaded_event_deserializes() {
        let event: EngineEvent = serde_json::from_str(r#"{"event":"loaded","id":3}"#).unwrap();
        assert!(matches!(event, EngineEvent::Loaded { id: 3 }));
        assert_eq!(event.session_id(), Some(3));
    }

    #[test]
    fn error_event_message_is_optional() {
        let event: EngineEvent =
            serde_json::from_str(r#"{"event":"error","id":4,"message":"TokenExpired"}"#).unwrap();
        match event {
            EngineEvent::Error { id, message } => {
                assert_eq!(id, 4);
                assert_eq!(message.as_deref(), Some("TokenExpired"));
            }
            other => panic!("expected error event, got {other:?}"),
        }

        let event: EngineEvent = serde_json::from_str(r#"{"event":"error","id":4}"#).unwrap();
        assert!(matches!(event, EngineEvent::Error { message: None, .. }));
    }

    #[test]
    fn engine_ready_has_no_session() {
        let event: EngineEvent = serde_json::from_str(r#"{"event":"engineReady"}"#).unwrap();
        assert_eq!(event.session_id(), None);
    }

    #[test]
    fn captured_event_carries_payload() {
        let event: EngineEvent =
            serde_json::from_str(r#"{"event":"captured","id":9,"image":"aGVsbG8="}"#).unwrap();
        match event {
            EngineEvent::Captured { id, image } => {
                assert_eq!(id, 9);
                assert_eq!(image, "aGVsbG8=");
            }
            other => panic!("expected captured event, got {other:?}"),
        }
    }

    #[test]
    fn unknown_event_fails_to_parse() {
        let result = serde_json::from_str::<EngineEvent>(r#"{"event":"telemetry","id":1}"#);
        assert!(result.is_err());
    }
}

use serde::{Deserialize, Serialize};

/// Wire envelope for the WebSocket fan-out hub. Deliberately flatter than
/// the teacher's `GatewayFrame` (no `seq`/`stateVersion` on the wire): the
/// hub keeps its own monotonic sequence counter internally for logging,
/// but clients here are presence/event subscribers, not session replicas,
/// so there is nothing for them to resynchronize against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Subscribes the connection to presence/event updates for one org.
    /// Required before any events are delivered; the auth token carried
    /// on the connection already scopes which `org_id` values are legal.
    Subscribe { org_id: String },
    /// Toggles the connected user's availability. Going `away: true`
    /// triggers the agent transfer manager's away-mode requeue for every
    /// transfer currently assigned to this user.
    SetAvailability { away: bool },
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Event {
        event: String,
        payload: serde_json::Value,
    },
    Error {
        code: String,
        message: String,
    },
    Pong,
}

impl ServerFrame {
    #[must_use]
    pub fn event(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::Event {
            event: event.into(),
            payload,
        }
    }

    #[must_use]
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_subscribe_roundtrips() {
        let json = r#"{"type":"subscribe","org_id":"abc"}"#;
        let frame: ClientFrame = serde_json::from_str(json).expect("parses");
        assert!(matches!(frame, ClientFrame::Subscribe { org_id } if org_id == "abc"));
    }

    #[test]
    fn server_event_tags_with_type() {
        let frame = ServerFrame::event("contact_presence_changed", serde_json::json!({"online": true}));
        let value = serde_json::to_value(&frame).expect("serializes");
        assert_eq!(value["type"], "event");
        assert_eq!(value["event"], "contact_presence_changed");
    }
}

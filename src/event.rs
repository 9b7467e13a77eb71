use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// CallEvent is one webhook notification delivered by the call platform,
/// already stripped of its transport envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallEvent {
    pub call_connection_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_call_id: Option<String>,
    /// Opaque tag chosen by the caller when issuing the originating
    /// operation. Used only for correlation, never interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_context: Option<String>,
    #[serde(flatten)]
    pub detail: EventDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum EventDetail {
    Connected,
    Disconnected,
    RecognizeSucceeded {
        #[serde(default)]
        tones: Vec<String>,
    },
    RecognizeFailed {
        #[serde(default)]
        result_code: Option<u16>,
        #[serde(default)]
        message: Option<String>,
    },
    PlaySucceeded,
    PlayFailed {
        #[serde(default)]
        result_code: Option<u16>,
        #[serde(default)]
        message: Option<String>,
    },
    AddParticipantSucceeded {
        #[serde(default)]
        participant: Option<String>,
    },
    AddParticipantFailed {
        #[serde(default)]
        result_code: Option<u16>,
        #[serde(default)]
        message: Option<String>,
    },
    TransferSucceeded,
    TransferFailed {
        #[serde(default)]
        result_code: Option<u16>,
        #[serde(default)]
        message: Option<String>,
    },
    RecordingStatusChanged {
        state: RecordingState,
        #[serde(default)]
        recording_id: Option<String>,
        #[serde(default)]
        content_location: Option<String>,
    },
    ToneReceived {
        tone: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    Active,
    Paused,
    Stopped,
    Failed,
}

/// Discriminant of a CallEvent, used as half of a subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Connected,
    Disconnected,
    RecognizeSucceeded,
    RecognizeFailed,
    PlaySucceeded,
    PlayFailed,
    AddParticipantSucceeded,
    AddParticipantFailed,
    TransferSucceeded,
    TransferFailed,
    RecordingStatusChanged,
    ToneReceived,
}

impl EventDetail {
    pub fn kind(&self) -> EventKind {
        match self {
            EventDetail::Connected => EventKind::Connected,
            EventDetail::Disconnected => EventKind::Disconnected,
            EventDetail::RecognizeSucceeded { .. } => EventKind::RecognizeSucceeded,
            EventDetail::RecognizeFailed { .. } => EventKind::RecognizeFailed,
            EventDetail::PlaySucceeded => EventKind::PlaySucceeded,
            EventDetail::PlayFailed { .. } => EventKind::PlayFailed,
            EventDetail::AddParticipantSucceeded { .. } => EventKind::AddParticipantSucceeded,
            EventDetail::AddParticipantFailed { .. } => EventKind::AddParticipantFailed,
            EventDetail::TransferSucceeded => EventKind::TransferSucceeded,
            EventDetail::TransferFailed { .. } => EventKind::TransferFailed,
            EventDetail::RecordingStatusChanged { .. } => EventKind::RecordingStatusChanged,
            EventDetail::ToneReceived { .. } => EventKind::ToneReceived,
        }
    }
}

impl CallEvent {
    pub fn kind(&self) -> EventKind {
        self.detail.kind()
    }

    /// Kind-specific correlation rule: lifecycle and tone events key off the
    /// call connection id, operation results key off the operation context.
    /// An operation result without a context cannot be correlated.
    pub fn correlation_key(&self) -> Option<&str> {
        match self.kind() {
            EventKind::Connected
            | EventKind::Disconnected
            | EventKind::ToneReceived
            | EventKind::RecordingStatusChanged => Some(self.call_connection_id.as_str()),
            _ => self.operation_context.as_deref(),
        }
    }
}

/// Parses a webhook body (a JSON array of events, or a single event) into
/// typed events. Malformed entries and unknown event types are logged and
/// skipped so a bad payload can never take the webhook endpoint down.
pub fn parse_notification(raw: &str) -> Vec<CallEvent> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            debug!("dropping unparseable notification: {}", e);
            return Vec::new();
        }
    };
    let entries = match value {
        Value::Array(items) => items,
        other => vec![other],
    };
    let mut events = Vec::new();
    for entry in entries {
        match serde_json::from_value::<CallEvent>(entry) {
            Ok(event) => events.push(event),
            Err(e) => debug!("skipping unrecognized event: {}", e),
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_unknown_and_malformed_entries() {
        let raw = r#"[
            {"type": "Connected", "callConnectionId": "call-1"},
            {"type": "SomethingNew", "callConnectionId": "call-1"},
            {"bogus": true},
            {"type": "RecognizeSucceeded", "callConnectionId": "call-1",
             "operationContext": "op-1", "tones": ["1", "5"]}
        ]"#;
        let events = parse_notification(raw);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), EventKind::Connected);
        assert_eq!(
            events[1].detail,
            EventDetail::RecognizeSucceeded {
                tones: vec!["1".to_string(), "5".to_string()]
            }
        );
    }

    #[test]
    fn parse_accepts_a_single_event_object() {
        let raw = r#"{"type": "Disconnected", "callConnectionId": "call-9"}"#;
        let events = parse_notification(raw);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), EventKind::Disconnected);
    }

    #[test]
    fn parse_garbage_yields_nothing() {
        assert!(parse_notification("not json at all").is_empty());
        assert!(parse_notification("").is_empty());
    }

    #[test]
    fn recording_and_tone_events_key_off_the_call_id() {
        let raw = r#"[
            {"type": "RecordingStatusChanged", "callConnectionId": "call-3",
             "serverCallId": "server-3", "state": "stopped",
             "recordingId": "rec-9",
             "contentLocation": "https://media.example.com/rec-9"},
            {"type": "ToneReceived", "callConnectionId": "call-3", "tone": "5"}
        ]"#;
        let events = parse_notification(raw);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].detail,
            EventDetail::RecordingStatusChanged {
                state: RecordingState::Stopped,
                recording_id: Some("rec-9".to_string()),
                content_location: Some("https://media.example.com/rec-9".to_string()),
            }
        );
        assert_eq!(events[0].correlation_key(), Some("call-3"));
        assert_eq!(events[1].kind(), EventKind::ToneReceived);
        assert_eq!(events[1].correlation_key(), Some("call-3"));
    }

    #[test]
    fn correlation_key_follows_kind_rule() {
        let connected = CallEvent {
            call_connection_id: "call-1".to_string(),
            server_call_id: None,
            operation_context: Some("op-1".to_string()),
            detail: EventDetail::Connected,
        };
        // lifecycle events key off the call id even when a context is present
        assert_eq!(connected.correlation_key(), Some("call-1"));

        let play = CallEvent {
            call_connection_id: "call-1".to_string(),
            server_call_id: None,
            operation_context: Some("op-1".to_string()),
            detail: EventDetail::PlaySucceeded,
        };
        assert_eq!(play.correlation_key(), Some("op-1"));

        let orphan = CallEvent {
            call_connection_id: "call-1".to_string(),
            server_call_id: None,
            operation_context: None,
            detail: EventDetail::PlaySucceeded,
        };
        assert_eq!(orphan.correlation_key(), None);
    }
}

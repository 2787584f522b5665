// ── Wire payload types ──
//
// Commands carry an optional `params` object; statuses carry an event tag,
// a timestamp, and whatever else the device chooses to include. Devices
// are free to add fields -- `#[serde(flatten)]` keeps them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ── CommandPayload ───────────────────────────────────────────────────

/// Body of a command dispatch message.
///
/// No-arg commands go out as an empty object; keyword arguments travel
/// under `params`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CommandPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl CommandPayload {
    pub fn new(params: Option<Value>) -> Self {
        Self { params }
    }

    pub fn empty() -> Self {
        Self { params: None }
    }
}

// ── StatusPayload ────────────────────────────────────────────────────

/// A status value as delivered by a device.
///
/// Always carries the trigger event name and a timestamp; everything else
/// is device-defined and preserved in `extra` so nothing a device sends is
/// silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusPayload {
    /// Name of the event that triggered this publish, e.g. `"reading_ready"`.
    pub event: String,

    /// When the device produced the value.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    /// All remaining fields the device included.
    #[serde(flatten)]
    pub extra: Value,
}

impl StatusPayload {
    pub fn new(event: impl Into<String>, extra: Value) -> Self {
        Self {
            event: event.into(),
            timestamp: Some(Utc::now()),
            extra,
        }
    }
}

// ── Heartbeat payloads ───────────────────────────────────────────────

/// Liveness probe published on `{namespace}/heartbeat/request`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatPing {
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl HeartbeatPing {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        }
    }
}

impl Default for HeartbeatPing {
    fn default() -> Self {
        Self::new()
    }
}

/// Liveness reply published on `{namespace}/heartbeat/response`.
///
/// Devices echo the request id when they have it, but replies without one
/// are accepted -- the whole namespace shares the response channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatReply {
    pub status: String,

    #[serde(default)]
    pub request_id: Option<Uuid>,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: Value,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn empty_command_serializes_to_empty_object() {
        let body = serde_json::to_value(CommandPayload::empty()).unwrap();
        assert_eq!(body, json!({}));
    }

    #[test]
    fn command_params_round_trip() {
        let payload = CommandPayload::new(Some(json!({"temperature": 21.5})));
        let body = serde_json::to_value(&payload).unwrap();
        assert_eq!(body, json!({"params": {"temperature": 21.5}}));

        let back: CommandPayload = serde_json::from_value(body).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn status_payload_keeps_extra_fields() {
        let raw = json!({
            "event": "reading_ready",
            "value": 42,
            "unit": "C"
        });

        let payload: StatusPayload = serde_json::from_value(raw).unwrap();
        assert_eq!(payload.event, "reading_ready");
        assert_eq!(payload.extra["value"], json!(42));
        assert_eq!(payload.extra["unit"], json!("C"));
    }

    #[test]
    fn heartbeat_reply_without_request_id_parses() {
        let raw = json!({"status": "alive", "uptime_secs": 1234});
        let reply: HeartbeatReply = serde_json::from_value(raw).unwrap();
        assert_eq!(reply.status, "alive");
        assert!(reply.request_id.is_none());
        assert_eq!(reply.extra["uptime_secs"], json!(1234));
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::EventType;

/// Server → observer broadcast envelope.
/// Wire: `{ "version": "1.0", "seq": 42, "timestamp": 1754058000.5,
///          "type": "llm_token", "data": {...} }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub version: String,
    pub seq: u64,
    /// Seconds since the Unix epoch, monotone across one server lifetime.
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: Value,
}

impl EventFrame {
    pub fn new(seq: u64, timestamp: f64, event_type: EventType, data: Value) -> Self {
        Self {
            version: coda_core::config::PROTOCOL_VERSION.to_string(),
            seq,
            timestamp,
            event_type,
            data,
        }
    }
}

/// First message a newly connected observer receives: the high-priority
/// backlog, oldest first, before any live event.
/// Wire: `{ "type": "replay", "events": [ <EventFrame>, ... ] }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub events: Vec<EventFrame>,
}

impl ReplayFrame {
    pub fn new(events: Vec<EventFrame>) -> Self {
        Self {
            frame_type: "replay".to_string(),
            events,
        }
    }
}

/// Observer → server message. Re-emitted downstream as a `client_message`
/// event; `user_input` and `tts_stop` types are additionally routed to the
/// orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub data: Value,
}

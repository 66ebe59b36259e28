//! Wire protocol between the pool and its execution units
//!
//! Every message is a JSON value. A unit first sends the string `"ready"`,
//! then answers each `{operation, input, index}` with either
//! `{output, index}` or `{error, index}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel a unit sends once after loading, before it may receive tasks
pub const READY_SENTINEL: &str = "ready";

/// Orchestrator -> unit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub operation: String,
    pub input: Value,
    pub index: usize,
}

/// Unit -> orchestrator, after the ready handshake
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplyMessage {
    Failed { error: String, index: usize },
    Done { output: Value, index: usize },
}

impl ReplyMessage {
    pub fn index(&self) -> usize {
        match self {
            Self::Failed { index, .. } | Self::Done { index, .. } => *index,
        }
    }
}

/// The ready frame as it travels on the wire
pub fn ready_frame() -> Value {
    Value::String(READY_SENTINEL.to_string())
}

pub fn is_ready_frame(frame: &Value) -> bool {
    frame.as_str() == Some(READY_SENTINEL)
}

/// What a runtime reports about one unit
#[derive(Clone, Debug, PartialEq)]
pub enum UnitEvent {
    /// A protocol frame emitted by the unit
    Frame(Value),
    /// The unit's transport closed; nothing more will arrive from it
    Exited,
}

/// A unit event tagged with the id of the unit that produced it
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub unit: usize,
    pub event: UnitEvent,
}

impl Envelope {
    pub fn frame(unit: usize, frame: Value) -> Self {
        Self {
            unit,
            event: UnitEvent::Frame(frame),
        }
    }

    pub fn exited(unit: usize) -> Self {
        Self {
            unit,
            event: UnitEvent::Exited,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dispatch_wire_shape() {
        let msg = DispatchMessage {
            operation: "square".to_string(),
            input: json!(3),
            index: 2,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"operation": "square", "input": 3, "index": 2})
        );
    }

    #[test]
    fn test_reply_decoding() {
        let done: ReplyMessage = serde_json::from_value(json!({"output": 9, "index": 2})).unwrap();
        assert_eq!(
            done,
            ReplyMessage::Done {
                output: json!(9),
                index: 2
            }
        );

        let failed: ReplyMessage =
            serde_json::from_value(json!({"error": "boom", "index": 4})).unwrap();
        assert_eq!(failed.index(), 4);
        assert!(matches!(failed, ReplyMessage::Failed { .. }));

        // object outputs still decode as results
        let nested: ReplyMessage =
            serde_json::from_value(json!({"output": {"error": "not mine"}, "index": 0})).unwrap();
        assert!(matches!(nested, ReplyMessage::Done { .. }));

        assert!(serde_json::from_value::<ReplyMessage>(json!("ready")).is_err());
        assert!(serde_json::from_value::<ReplyMessage>(json!({"index": 1})).is_err());
    }

    #[test]
    fn test_ready_frame() {
        assert!(is_ready_frame(&ready_frame()));
        assert!(!is_ready_frame(&json!("Ready")));
        assert!(!is_ready_frame(&json!({"status": "ready"})));
    }
}

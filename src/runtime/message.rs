use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::runtime::world::EntityId;

/// Messages with a delay at or below this are delivered within the same tick.
pub const DELIVERY_EPSILON: f32 = 1e-5;

/// Script-to-script message. The wire shape is load-bearing for persistence
/// and replication; field names must not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptMessage {
    /// Message name, matched against inbox nodes.
    pub type_id: String,
    /// Script id the message is addressed to on the receiving entity.
    pub script_target: String,
    #[serde(default)]
    pub delay: f32,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl ScriptMessage {
    pub fn new(type_id: impl Into<String>, script_target: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            script_target: script_target.into(),
            delay: 0.0,
            params: Vec::new(),
        }
    }
}

/// Broadcast to a named external system handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    pub system: String,
    pub message: String,
    pub args: Value,
}

/// Delivered through the generic entity-message bridge outside the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMessage {
    pub target: EntityId,
    pub message: String,
    pub args: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Start,
    Stop,
    StopTag,
}

/// Start/stop request raised by a node update or an external caller,
/// consumed once by the driver. Stops are always fulfilled before starts.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub kind: RequestKind,
    pub target: EntityId,
    /// Script id for Start/Stop, tag for StopTag.
    pub value: String,
    pub tags: Vec<String>,
    pub params: Vec<Value>,
}

impl ExecutionRequest {
    pub fn start(target: EntityId, script: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Start,
            target,
            value: script.into(),
            tags: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn stop(target: EntityId, script: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Stop,
            target,
            value: script.into(),
            tags: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn stop_tag(target: EntityId, tag: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::StopTag,
            target,
            value: tag.into(),
            tags: Vec::new(),
            params: Vec::new(),
        }
    }
}

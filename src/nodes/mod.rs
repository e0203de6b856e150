pub mod data;
pub mod flow;
pub mod messaging;

use std::collections::HashMap;

use serde_json::Value;

use crate::graph::{GraphNode, Pin};
use crate::runtime::environment::Env;
use crate::runtime::message::ScriptMessage;
use crate::runtime::result::{ExecutionResult, OutputPins};

/// Descriptive grouping of node behaviors. Metadata only; the interpreter
/// never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClassification {
    FlowControl,
    State,
    Action,
    Variable,
    Expression,
    Terminator,
    Function,
}

/// Declared setting of a node type, surfaced for editors and config tooling.
#[derive(Debug, Clone)]
pub struct SettingType {
    pub name: &'static str,
    pub ty: &'static str,
    pub default: Value,
}

impl SettingType {
    pub fn new(name: &'static str, ty: &'static str, default: Value) -> Self {
        Self { name, ty, default }
    }
}

/// Behavior of one node type. Pure logic; all per-instance state lives in the
/// node's private data `Value` owned by the execution state.
pub trait NodeType: Send + Sync {
    fn id(&self) -> &'static str;

    fn classification(&self) -> NodeClassification;

    /// Pin layout for a configured node. Deterministic and side-effect free;
    /// may depend on settings (message nodes grow pins with parameter arity).
    fn pin_configuration(&self, node: &GraphNode) -> Vec<Pin>;

    fn setting_types(&self) -> Vec<SettingType> {
        Vec::new()
    }

    /// Fresh private data for a node instance.
    fn init_data(&self, _node: &GraphNode) -> Value {
        Value::Null
    }

    fn update(
        &self,
        _env: &mut Env<'_>,
        _dt: f32,
        _node: &GraphNode,
        _data: &mut Value,
    ) -> ExecutionResult {
        ExecutionResult::Done(OutputPins::first())
    }

    fn get_data(
        &self,
        _env: &mut Env<'_>,
        _node: &GraphNode,
        _pin: usize,
        _data: &mut Value,
    ) -> Value {
        Value::Null
    }

    fn set_data(
        &self,
        _env: &mut Env<'_>,
        _node: &GraphNode,
        _pin: usize,
        _value: Value,
        _data: &mut Value,
    ) {
    }

    /// Invoked when the owning strand or execution state is torn down.
    fn destruct(&self, _node: &GraphNode, _data: &mut Value) {}

    fn is_message_inbox(&self) -> bool {
        false
    }

    fn can_receive_message(
        &self,
        _node: &GraphNode,
        _message: &str,
        _requires_spawning_script: bool,
    ) -> bool {
        false
    }

    /// Accept a delivered message into private data. Returns false when the
    /// inbox is busy (back-pressure; the message is dropped by the caller).
    fn try_receive_message(
        &self,
        _node: &GraphNode,
        _data: &mut Value,
        _msg: &mut ScriptMessage,
    ) -> bool {
        false
    }
}

/// Registry mapping type ids to behaviors.
pub struct NodeTypeRegistry {
    types: HashMap<&'static str, Box<dyn NodeType>>,
}

impl NodeTypeRegistry {
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// Registry preloaded with every built-in node type.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        flow::register(&mut registry);
        data::register(&mut registry);
        messaging::register(&mut registry);
        registry
    }

    pub fn register(&mut self, node_type: Box<dyn NodeType>) {
        self.types.insert(node_type.id(), node_type);
    }

    pub fn get(&self, type_id: &str) -> Option<&dyn NodeType> {
        self.types.get(type_id).map(|t| t.as_ref())
    }
}

impl Default for NodeTypeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

//! Messaging node types: the script message bus, system/entity bridges and
//! remote execution requests.

use serde_json::{Map, Value, json};

use crate::graph::{GraphNode, Pin};
use crate::nodes::{NodeClassification, NodeType, NodeTypeRegistry, SettingType};
use crate::runtime::environment::Env;
use crate::runtime::message::{ExecutionRequest, ScriptMessage, SystemMessage};
use crate::runtime::result::{ExecutionResult, OutputPins};

/// Parameter cap for system and entity messages.
const MAX_MSG_PARAMS: usize = 5;
/// Parameter cap for script-to-script messages.
const MAX_SCRIPT_PARAMS: usize = 4;

pub fn register(registry: &mut NodeTypeRegistry) {
    registry.register(Box::new(SendMessage));
    registry.register(Box::new(ReceiveMessage));
    registry.register(Box::new(SendSystemMessage));
    registry.register(Box::new(SendEntityMessage));
    registry.register(Box::new(StartScript));
    registry.register(Box::new(StopScript));
    registry.register(Box::new(StopScriptsWithTag));
}

fn script_message_setting(node: &GraphNode) -> (String, String, usize) {
    let msg = node.settings.get("message");
    let script = msg
        .and_then(|m| m.get("script"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_owned();
    let name = msg
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_owned();
    let n_params = msg
        .and_then(|m| m.get("nParams"))
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize;
    (script, name, n_params.min(MAX_SCRIPT_PARAMS))
}

fn members_setting(node: &GraphNode) -> Vec<String> {
    node.settings
        .get("members")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .take(MAX_MSG_PARAMS)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// Sends a script message to a target entity, with an optional delay read
/// from a data pin. Parameter pin arity follows the message setting.
pub struct SendMessage;

impl NodeType for SendMessage {
    fn id(&self) -> &'static str {
        "sendMessage"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::Action
    }

    fn pin_configuration(&self, node: &GraphNode) -> Vec<Pin> {
        let (_, _, n_params) = script_message_setting(node);
        let mut pins = vec![
            Pin::flow_in(),
            Pin::flow_out(),
            Pin::target_in(),
            Pin::read_in(),
        ];
        pins.extend(std::iter::repeat_n(Pin::read_in(), n_params));
        pins
    }

    fn setting_types(&self) -> Vec<SettingType> {
        vec![SettingType::new(
            "message",
            "ScriptMessageType",
            json!({ "script": "", "name": "", "nParams": 0 }),
        )]
    }

    fn update(
        &self,
        env: &mut Env<'_>,
        _dt: f32,
        node: &GraphNode,
        _data: &mut Value,
    ) -> ExecutionResult {
        let (script, name, n_params) = script_message_setting(node);
        let mut msg = ScriptMessage::new(name, script);
        msg.delay = env.read_f32(node, 3, 0.0);
        for i in 0..n_params {
            let param = env.read_data_pin(node, 4 + i);
            msg.params.push(param);
        }
        if let Some(target) = env.resolve_target(node, 2) {
            env.send_script_message(target, msg);
        }
        ExecutionResult::Done(OutputPins::first())
    }
}

/// Message inbox. Holds at most one message at a time; delivery spawns a
/// strand on this node, and the strand's teardown clears the held message.
pub struct ReceiveMessage;

impl NodeType for ReceiveMessage {
    fn id(&self) -> &'static str {
        "receiveMessage"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::FlowControl
    }

    fn pin_configuration(&self, node: &GraphNode) -> Vec<Pin> {
        let n_params = node.setting_usize("nParams", 0).min(MAX_SCRIPT_PARAMS);
        let mut pins = vec![Pin::flow_out()];
        pins.extend(std::iter::repeat_n(Pin::read_out(), n_params));
        pins
    }

    fn setting_types(&self) -> Vec<SettingType> {
        vec![
            SettingType::new("message", "String", json!("")),
            SettingType::new("nParams", "usize", json!(0)),
            SettingType::new("allowSpawning", "bool", json!(false)),
        ]
    }

    fn init_data(&self, _node: &GraphNode) -> Value {
        json!({ "hasMessageActive": false, "curArgs": [] })
    }

    fn get_data(
        &self,
        _env: &mut Env<'_>,
        _node: &GraphNode,
        pin: usize,
        data: &mut Value,
    ) -> Value {
        if !data
            .get("hasMessageActive")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return Value::Null;
        }
        pin.checked_sub(1)
            .and_then(|arg| data.get("curArgs").and_then(Value::as_array)?.get(arg))
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn destruct(&self, _node: &GraphNode, data: &mut Value) {
        *data = json!({ "hasMessageActive": false, "curArgs": [] });
    }

    fn is_message_inbox(&self) -> bool {
        true
    }

    fn can_receive_message(
        &self,
        node: &GraphNode,
        message: &str,
        requires_spawning_script: bool,
    ) -> bool {
        if message != node.setting_str("message").unwrap_or("") {
            return false;
        }
        if requires_spawning_script && !node.setting_bool("allowSpawning", false) {
            return false;
        }
        true
    }

    fn try_receive_message(
        &self,
        node: &GraphNode,
        data: &mut Value,
        msg: &mut ScriptMessage,
    ) -> bool {
        debug_assert_eq!(msg.type_id, node.setting_str("message").unwrap_or(""));
        if data
            .get("hasMessageActive")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return false;
        }
        *data = json!({
            "hasMessageActive": true,
            "curArgs": std::mem::take(&mut msg.params),
        });
        true
    }
}

/// Sends a named message to an external system handler, with one data pin per
/// declared member.
pub struct SendSystemMessage;

impl NodeType for SendSystemMessage {
    fn id(&self) -> &'static str {
        "sendSystemMessage"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::Action
    }

    fn pin_configuration(&self, node: &GraphNode) -> Vec<Pin> {
        let members = members_setting(node);
        let mut pins = vec![Pin::flow_in(), Pin::flow_out()];
        pins.extend(std::iter::repeat_n(Pin::read_in(), members.len()));
        pins
    }

    fn setting_types(&self) -> Vec<SettingType> {
        vec![
            SettingType::new("system", "String", json!("")),
            SettingType::new("message", "String", json!("")),
            SettingType::new("members", "Vec<String>", json!([])),
        ]
    }

    fn update(
        &self,
        env: &mut Env<'_>,
        _dt: f32,
        node: &GraphNode,
        _data: &mut Value,
    ) -> ExecutionResult {
        let members = members_setting(node);
        let mut args = Map::new();
        for (i, member) in members.into_iter().enumerate() {
            let value = env.read_data_pin(node, 2 + i);
            args.insert(member, value);
        }
        env.send_system_message(SystemMessage {
            system: node.setting_str("system").unwrap_or("").to_owned(),
            message: node.setting_str("message").unwrap_or("").to_owned(),
            args: Value::Object(args),
        });
        ExecutionResult::Done(OutputPins::first())
    }
}

/// Sends a message to an entity through the bridge outside the engine.
pub struct SendEntityMessage;

impl NodeType for SendEntityMessage {
    fn id(&self) -> &'static str {
        "sendEntityMessage"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::Action
    }

    fn pin_configuration(&self, node: &GraphNode) -> Vec<Pin> {
        let members = members_setting(node);
        let mut pins = vec![Pin::flow_in(), Pin::flow_out(), Pin::target_in()];
        pins.extend(std::iter::repeat_n(Pin::read_in(), members.len()));
        pins
    }

    fn setting_types(&self) -> Vec<SettingType> {
        vec![
            SettingType::new("message", "String", json!("")),
            SettingType::new("members", "Vec<String>", json!([])),
        ]
    }

    fn update(
        &self,
        env: &mut Env<'_>,
        _dt: f32,
        node: &GraphNode,
        _data: &mut Value,
    ) -> ExecutionResult {
        let members = members_setting(node);
        let mut args = Map::new();
        for (i, member) in members.into_iter().enumerate() {
            let value = env.read_data_pin(node, 3 + i);
            args.insert(member, value);
        }
        if let Some(target) = env.resolve_target(node, 2) {
            env.send_entity_message(crate::runtime::message::EntityMessage {
                target,
                message: node.setting_str("message").unwrap_or("").to_owned(),
                args: Value::Object(args),
            });
        }
        ExecutionResult::Done(OutputPins::first())
    }
}

/// Requests a named graph to be started on the target entity.
pub struct StartScript;

impl NodeType for StartScript {
    fn id(&self) -> &'static str {
        "startScript"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::Action
    }

    fn pin_configuration(&self, node: &GraphNode) -> Vec<Pin> {
        let n_params = node.setting_usize("nParams", 0).min(MAX_SCRIPT_PARAMS);
        let mut pins = vec![Pin::flow_in(), Pin::flow_out(), Pin::target_in()];
        pins.extend(std::iter::repeat_n(Pin::read_in(), n_params));
        pins
    }

    fn setting_types(&self) -> Vec<SettingType> {
        vec![
            SettingType::new("script", "String", json!("")),
            SettingType::new("tags", "Vec<String>", json!([])),
            SettingType::new("nParams", "usize", json!(0)),
        ]
    }

    fn update(
        &self,
        env: &mut Env<'_>,
        _dt: f32,
        node: &GraphNode,
        _data: &mut Value,
    ) -> ExecutionResult {
        if let Some(target) = env.resolve_target(node, 2) {
            let script = node.setting_str("script").unwrap_or("").to_owned();
            let mut req = ExecutionRequest::start(target, script);
            req.tags = node
                .settings
                .get("tags")
                .and_then(Value::as_array)
                .map(|t| t.iter().filter_map(Value::as_str).map(str::to_owned).collect())
                .unwrap_or_default();
            let n_params = node.setting_usize("nParams", 0).min(MAX_SCRIPT_PARAMS);
            for i in 0..n_params {
                let param = env.read_data_pin(node, 3 + i);
                req.params.push(param);
            }
            env.request(req);
        }
        ExecutionResult::Done(OutputPins::first())
    }
}

/// Requests a named graph to be stopped on the target entity.
pub struct StopScript;

impl NodeType for StopScript {
    fn id(&self) -> &'static str {
        "stopScript"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::Action
    }

    fn pin_configuration(&self, _node: &GraphNode) -> Vec<Pin> {
        vec![Pin::flow_in(), Pin::flow_out(), Pin::target_in()]
    }

    fn setting_types(&self) -> Vec<SettingType> {
        vec![SettingType::new("script", "String", json!(""))]
    }

    fn update(
        &self,
        env: &mut Env<'_>,
        _dt: f32,
        node: &GraphNode,
        _data: &mut Value,
    ) -> ExecutionResult {
        if let Some(target) = env.resolve_target(node, 2) {
            let script = node.setting_str("script").unwrap_or("").to_owned();
            env.request(ExecutionRequest::stop(target, script));
        }
        ExecutionResult::Done(OutputPins::first())
    }
}

/// Requests every script carrying a tag to be stopped on the target entity.
pub struct StopScriptsWithTag;

impl NodeType for StopScriptsWithTag {
    fn id(&self) -> &'static str {
        "stopScriptsWithTag"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::Action
    }

    fn pin_configuration(&self, _node: &GraphNode) -> Vec<Pin> {
        vec![Pin::flow_in(), Pin::flow_out(), Pin::target_in()]
    }

    fn setting_types(&self) -> Vec<SettingType> {
        vec![SettingType::new("tag", "String", json!(""))]
    }

    fn update(
        &self,
        env: &mut Env<'_>,
        _dt: f32,
        node: &GraphNode,
        _data: &mut Value,
    ) -> ExecutionResult {
        if let Some(target) = env.resolve_target(node, 2) {
            let tag = node.setting_str("tag").unwrap_or("").to_owned();
            env.request(ExecutionRequest::stop_tag(target, tag));
        }
        ExecutionResult::Done(OutputPins::first())
    }
}

//! Flow-control and state node types: roots, waits, gates, fork/merge and
//! sub-graph calls.

use serde_json::{Value, json};
use tracing::warn;

use crate::graph::{GraphNode, Pin};
use crate::nodes::{NodeClassification, NodeType, NodeTypeRegistry, SettingType};
use crate::runtime::environment::{Env, truthy};
use crate::runtime::result::{ExecutionResult, OutputPins};

pub fn register(registry: &mut NodeTypeRegistry) {
    registry.register(Box::new(Start));
    registry.register(Box::new(Wait));
    registry.register(Box::new(FlowGate));
    registry.register(Box::new(FlowOnce));
    registry.register(Box::new(Fence));
    registry.register(Box::new(Breaker));
    registry.register(Box::new(Signal));
    registry.register(Box::new(LineReset));
    registry.register(Box::new(Fork));
    registry.register(Box::new(Merge));
    registry.register(Box::new(Watch));
    registry.register(Box::new(Restart));
    registry.register(Box::new(Stop));
    registry.register(Box::new(Call));
    registry.register(Box::new(FunctionStart));
    registry.register(Box::new(Return));
}

fn signal_flag(data: &mut Value) {
    match data.as_object_mut() {
        Some(obj) => {
            obj.insert("signaled".into(), json!(true));
        }
        None => *data = json!({ "signaled": true }),
    }
}

fn flag(data: &Value, key: &str) -> bool {
    data.get(key).is_some_and(truthy)
}

/// Entry point; each start node gets a root strand when the instance is
/// attached. The data output pins expose the start parameters.
pub struct Start;

impl NodeType for Start {
    fn id(&self) -> &'static str {
        "start"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::FlowControl
    }

    fn pin_configuration(&self, _node: &GraphNode) -> Vec<Pin> {
        vec![
            Pin::flow_out(),
            Pin::read_out(),
            Pin::read_out(),
            Pin::read_out(),
            Pin::read_out(),
        ]
    }

    fn get_data(
        &self,
        env: &mut Env<'_>,
        _node: &GraphNode,
        pin: usize,
        _data: &mut Value,
    ) -> Value {
        pin.checked_sub(1)
            .and_then(|i| env.start_params().get(i))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

/// Counts down a configured number of seconds, then completes. Private data
/// is cleared on completion so a loop re-entering the node waits again.
pub struct Wait;

impl NodeType for Wait {
    fn id(&self) -> &'static str {
        "wait"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::State
    }

    fn pin_configuration(&self, _node: &GraphNode) -> Vec<Pin> {
        vec![Pin::flow_in(), Pin::flow_out()]
    }

    fn setting_types(&self) -> Vec<SettingType> {
        vec![SettingType::new("time", "f32", json!(0.0))]
    }

    fn update(
        &self,
        _env: &mut Env<'_>,
        dt: f32,
        node: &GraphNode,
        data: &mut Value,
    ) -> ExecutionResult {
        let time_left = match data.get("timeLeft").and_then(Value::as_f64) {
            Some(t) => t as f32,
            None => node.setting_f32("time", 0.0),
        };
        let time_left = time_left - dt;
        if time_left <= 0.0 {
            *data = Value::Null;
            ExecutionResult::Done(OutputPins::first())
        } else {
            *data = json!({ "timeLeft": time_left });
            ExecutionResult::Executing
        }
    }
}

/// Holds a branch open while a boolean condition holds. Forks the matching
/// branch and watches the condition; a change aborts the branch and re-arms.
pub struct FlowGate;

impl NodeType for FlowGate {
    fn id(&self) -> &'static str {
        "flowGate"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::State
    }

    fn pin_configuration(&self, _node: &GraphNode) -> Vec<Pin> {
        vec![
            Pin::flow_in(),
            Pin::read_in(),
            Pin::flow_out(),
            Pin::flow_out(),
        ]
    }

    fn update(
        &self,
        env: &mut Env<'_>,
        _dt: f32,
        node: &GraphNode,
        data: &mut Value,
    ) -> ExecutionResult {
        let should_flow = env.read_bool(node, 1);
        match data.get("flowing").and_then(Value::as_bool) {
            Some(flowing) if flowing == should_flow => ExecutionResult::Executing,
            Some(_) => ExecutionResult::Restart,
            None => {
                *data = json!({ "flowing": should_flow });
                let branch = if should_flow { 0 } else { 1 };
                ExecutionResult::ForkAndConvertToWatcher(OutputPins::nth(branch))
            }
        }
    }
}

/// Flows through the first output once, then takes the second output on every
/// later visit. A data write re-arms it.
pub struct FlowOnce;

impl NodeType for FlowOnce {
    fn id(&self) -> &'static str {
        "flowOnce"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::FlowControl
    }

    fn pin_configuration(&self, _node: &GraphNode) -> Vec<Pin> {
        vec![
            Pin::flow_in(),
            Pin::write_in(),
            Pin::flow_out(),
            Pin::flow_out(),
        ]
    }

    fn update(
        &self,
        _env: &mut Env<'_>,
        _dt: f32,
        _node: &GraphNode,
        data: &mut Value,
    ) -> ExecutionResult {
        if flag(data, "fired") {
            ExecutionResult::Done(OutputPins::nth(1))
        } else {
            *data = json!({ "fired": true });
            ExecutionResult::Done(OutputPins::nth(0))
        }
    }

    fn set_data(
        &self,
        _env: &mut Env<'_>,
        _node: &GraphNode,
        _pin: usize,
        _value: Value,
        data: &mut Value,
    ) {
        *data = json!({ "fired": false });
    }
}

/// Blocks the strand until signaled through its data input, then passes one
/// strand through and closes again.
pub struct Fence;

impl NodeType for Fence {
    fn id(&self) -> &'static str {
        "fence"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::FlowControl
    }

    fn pin_configuration(&self, _node: &GraphNode) -> Vec<Pin> {
        vec![Pin::flow_in(), Pin::write_in(), Pin::flow_out()]
    }

    fn update(
        &self,
        _env: &mut Env<'_>,
        _dt: f32,
        _node: &GraphNode,
        data: &mut Value,
    ) -> ExecutionResult {
        if flag(data, "signaled") {
            *data = json!({ "signaled": false });
            ExecutionResult::Done(OutputPins::first())
        } else {
            ExecutionResult::Executing
        }
    }

    fn set_data(
        &self,
        _env: &mut Env<'_>,
        _node: &GraphNode,
        _pin: usize,
        value: Value,
        data: &mut Value,
    ) {
        if truthy(&value) {
            signal_flag(data);
        }
    }
}

/// Runs its first branch as a watched side line; when signaled, aborts the
/// branch and continues through the second output.
pub struct Breaker;

impl NodeType for Breaker {
    fn id(&self) -> &'static str {
        "breaker"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::State
    }

    fn pin_configuration(&self, _node: &GraphNode) -> Vec<Pin> {
        vec![
            Pin::flow_in(),
            Pin::write_in(),
            Pin::flow_out(),
            Pin::flow_out(),
        ]
    }

    fn update(
        &self,
        _env: &mut Env<'_>,
        _dt: f32,
        _node: &GraphNode,
        data: &mut Value,
    ) -> ExecutionResult {
        if !flag(data, "active") {
            // a signal raised before the strand arrived is kept
            match data.as_object_mut() {
                Some(obj) => {
                    obj.insert("active".into(), json!(true));
                }
                None => *data = json!({ "active": true }),
            }
            ExecutionResult::ForkAndConvertToWatcher(OutputPins::nth(0))
        } else if flag(data, "signaled") {
            *data = json!({ "active": false, "signaled": false });
            ExecutionResult::Done(OutputPins::nth(1))
        } else {
            ExecutionResult::Executing
        }
    }

    fn set_data(
        &self,
        _env: &mut Env<'_>,
        _node: &GraphNode,
        _pin: usize,
        value: Value,
        data: &mut Value,
    ) {
        if truthy(&value) {
            signal_flag(data);
        }
    }
}

/// Writes `true` through its data output, signaling a connected fence,
/// breaker or line reset.
pub struct Signal;

impl NodeType for Signal {
    fn id(&self) -> &'static str {
        "signal"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::Action
    }

    fn pin_configuration(&self, _node: &GraphNode) -> Vec<Pin> {
        vec![Pin::flow_in(), Pin::flow_out(), Pin::write_out()]
    }

    fn update(
        &self,
        env: &mut Env<'_>,
        _dt: f32,
        node: &GraphNode,
        _data: &mut Value,
    ) -> ExecutionResult {
        env.write_data_pin(node, 2, json!(true));
        ExecutionResult::Done(OutputPins::first())
    }
}

/// Watches a monitored value (and a signal input) while its continuation
/// runs; any change aborts the continuation and re-runs it from here.
pub struct LineReset;

impl NodeType for LineReset {
    fn id(&self) -> &'static str {
        "lineReset"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::State
    }

    fn pin_configuration(&self, _node: &GraphNode) -> Vec<Pin> {
        vec![
            Pin::flow_in(),
            Pin::write_in(),
            Pin::read_in(),
            Pin::flow_out(),
        ]
    }

    fn update(
        &self,
        env: &mut Env<'_>,
        _dt: f32,
        node: &GraphNode,
        data: &mut Value,
    ) -> ExecutionResult {
        if !flag(data, "active") {
            let monitor = env.read_data_pin(node, 2);
            *data = json!({ "active": true, "signaled": false, "monitor": monitor });
            ExecutionResult::ForkAndConvertToWatcher(OutputPins::first())
        } else {
            let monitor = env.read_data_pin(node, 2);
            if flag(data, "signaled") || data.get("monitor") != Some(&monitor) {
                ExecutionResult::Restart
            } else {
                ExecutionResult::Executing
            }
        }
    }

    fn set_data(
        &self,
        _env: &mut Env<'_>,
        _node: &GraphNode,
        _pin: usize,
        value: Value,
        data: &mut Value,
    ) {
        if truthy(&value) {
            signal_flag(data);
        }
    }
}

/// Splits the strand into one sibling per connected output.
pub struct Fork;

impl NodeType for Fork {
    fn id(&self) -> &'static str {
        "fork"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::FlowControl
    }

    fn pin_configuration(&self, node: &GraphNode) -> Vec<Pin> {
        let branches = node.setting_usize("branches", 2).clamp(1, 8);
        let mut pins = vec![Pin::flow_in()];
        pins.extend(std::iter::repeat_n(Pin::flow_out(), branches));
        pins
    }

    fn setting_types(&self) -> Vec<SettingType> {
        vec![SettingType::new("branches", "usize", json!(2))]
    }

    fn update(
        &self,
        _env: &mut Env<'_>,
        _dt: f32,
        node: &GraphNode,
        _data: &mut Value,
    ) -> ExecutionResult {
        ExecutionResult::Fork(OutputPins::all(node.output_flow_pins().len()))
    }
}

/// Rendezvous point for a fork group. With `wait` (the default) it holds
/// until every sibling arrives; otherwise strands pass through and drop out
/// of the group's accounting.
pub struct Merge;

impl NodeType for Merge {
    fn id(&self) -> &'static str {
        "merge"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::FlowControl
    }

    fn pin_configuration(&self, _node: &GraphNode) -> Vec<Pin> {
        vec![Pin::flow_in(), Pin::flow_out()]
    }

    fn setting_types(&self) -> Vec<SettingType> {
        vec![SettingType::new("wait", "bool", json!(true))]
    }

    fn update(
        &self,
        _env: &mut Env<'_>,
        _dt: f32,
        node: &GraphNode,
        _data: &mut Value,
    ) -> ExecutionResult {
        if node.setting_bool("wait", true) {
            ExecutionResult::MergeAndWait
        } else {
            ExecutionResult::MergeAndContinue
        }
    }
}

/// Spawns its branches as detached side lines and parks as a watcher; the
/// branches never count toward an enclosing merge.
pub struct Watch;

impl NodeType for Watch {
    fn id(&self) -> &'static str {
        "watch"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::State
    }

    fn pin_configuration(&self, node: &GraphNode) -> Vec<Pin> {
        let branches = node.setting_usize("branches", 1).clamp(1, 8);
        let mut pins = vec![Pin::flow_in()];
        pins.extend(std::iter::repeat_n(Pin::flow_out(), branches));
        pins
    }

    fn setting_types(&self) -> Vec<SettingType> {
        vec![SettingType::new("branches", "usize", json!(1))]
    }

    fn update(
        &self,
        _env: &mut Env<'_>,
        _dt: f32,
        node: &GraphNode,
        data: &mut Value,
    ) -> ExecutionResult {
        if flag(data, "armed") {
            ExecutionResult::Executing
        } else {
            *data = json!({ "armed": true });
            ExecutionResult::ForkAndConvertToWatcher(OutputPins::all(
                node.output_flow_pins().len(),
            ))
        }
    }
}

/// Re-enters its own node fresh every tick, discarding private data.
pub struct Restart;

impl NodeType for Restart {
    fn id(&self) -> &'static str {
        "restart"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::Terminator
    }

    fn pin_configuration(&self, _node: &GraphNode) -> Vec<Pin> {
        vec![Pin::flow_in()]
    }

    fn update(
        &self,
        _env: &mut Env<'_>,
        _dt: f32,
        _node: &GraphNode,
        _data: &mut Value,
    ) -> ExecutionResult {
        ExecutionResult::Restart
    }
}

/// Ends the strand. The last strand ends the execution state.
pub struct Stop;

impl NodeType for Stop {
    fn id(&self) -> &'static str {
        "stop"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::Terminator
    }

    fn pin_configuration(&self, _node: &GraphNode) -> Vec<Pin> {
        vec![Pin::flow_in()]
    }

    fn update(
        &self,
        _env: &mut Env<'_>,
        _dt: f32,
        _node: &GraphNode,
        _data: &mut Value,
    ) -> ExecutionResult {
        ExecutionResult::Terminate
    }
}

/// Jumps to a named function-start node, pushing a return address.
pub struct Call;

impl NodeType for Call {
    fn id(&self) -> &'static str {
        "call"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::Function
    }

    fn pin_configuration(&self, _node: &GraphNode) -> Vec<Pin> {
        vec![Pin::flow_in(), Pin::flow_out()]
    }

    fn setting_types(&self) -> Vec<SettingType> {
        vec![SettingType::new("function", "String", json!(""))]
    }

    fn update(
        &self,
        env: &mut Env<'_>,
        _dt: f32,
        node: &GraphNode,
        _data: &mut Value,
    ) -> ExecutionResult {
        match node
            .setting_str("function")
            .and_then(|name| env.find_node(name))
        {
            Some(target) => ExecutionResult::Call(target),
            None => {
                warn!(node = %node.name, "call target not found");
                ExecutionResult::Terminate
            }
        }
    }
}

/// Entry of a callable sub-graph; reached only through a call node.
pub struct FunctionStart;

impl NodeType for FunctionStart {
    fn id(&self) -> &'static str {
        "functionStart"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::Function
    }

    fn pin_configuration(&self, _node: &GraphNode) -> Vec<Pin> {
        vec![Pin::flow_out()]
    }
}

/// Pops the call stack and resumes after the calling node.
pub struct Return;

impl NodeType for Return {
    fn id(&self) -> &'static str {
        "return"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::Function
    }

    fn pin_configuration(&self, _node: &GraphNode) -> Vec<Pin> {
        vec![Pin::flow_in()]
    }

    fn update(
        &self,
        _env: &mut Env<'_>,
        _dt: f32,
        _node: &GraphNode,
        _data: &mut Value,
    ) -> ExecutionResult {
        ExecutionResult::Return
    }
}

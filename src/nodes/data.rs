//! Data plumbing node types: constants, variables, latches, expressions and
//! conditional branching.

use evalexpr::{
    ContextWithMutableVariables, DefaultNumericTypes, HashMapContext, build_operator_tree,
};
use serde_json::{Number, Value, json};
use tracing::warn;

use crate::graph::{GraphNode, Pin};
use crate::nodes::{NodeClassification, NodeType, NodeTypeRegistry, SettingType};
use crate::runtime::environment::{Env, VarScope};
use crate::runtime::result::{ExecutionResult, OutputPins};

pub fn register(registry: &mut NodeTypeRegistry) {
    registry.register(Box::new(Constant));
    registry.register(Box::new(GetVariable));
    registry.register(Box::new(SetVariable));
    registry.register(Box::new(Latch));
    registry.register(Box::new(Expression));
    registry.register(Box::new(Branch));
}

fn to_eval(value: &Value) -> Option<evalexpr::Value<DefaultNumericTypes>> {
    match value {
        Value::String(s) => Some(evalexpr::Value::String(s.clone())),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(evalexpr::Value::Int(i))
            } else {
                n.as_f64().map(evalexpr::Value::Float)
            }
        }
        Value::Bool(b) => Some(evalexpr::Value::Boolean(*b)),
        _ => None,
    }
}

fn from_eval(value: evalexpr::Value<DefaultNumericTypes>) -> Value {
    match value {
        evalexpr::Value::Boolean(b) => Value::Bool(b),
        evalexpr::Value::Int(i) => Value::Number(i.into()),
        evalexpr::Value::Float(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        evalexpr::Value::String(s) => Value::String(s),
        evalexpr::Value::Tuple(items) => Value::Array(items.into_iter().map(from_eval).collect()),
        evalexpr::Value::Empty => Value::Null,
    }
}

/// Produces a fixed value from its settings.
pub struct Constant;

impl NodeType for Constant {
    fn id(&self) -> &'static str {
        "constant"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::Variable
    }

    fn pin_configuration(&self, _node: &GraphNode) -> Vec<Pin> {
        vec![Pin::read_out()]
    }

    fn setting_types(&self) -> Vec<SettingType> {
        vec![SettingType::new("value", "json", Value::Null)]
    }

    fn get_data(
        &self,
        _env: &mut Env<'_>,
        node: &GraphNode,
        _pin: usize,
        _data: &mut Value,
    ) -> Value {
        node.settings.get("value").cloned().unwrap_or(Value::Null)
    }
}

/// Reads a named variable from the configured scope.
pub struct GetVariable;

impl NodeType for GetVariable {
    fn id(&self) -> &'static str {
        "getVariable"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::Variable
    }

    fn pin_configuration(&self, _node: &GraphNode) -> Vec<Pin> {
        vec![Pin::read_out()]
    }

    fn setting_types(&self) -> Vec<SettingType> {
        vec![
            SettingType::new("scope", "String", json!("local")),
            SettingType::new("name", "String", json!("")),
        ]
    }

    fn get_data(
        &self,
        env: &mut Env<'_>,
        node: &GraphNode,
        _pin: usize,
        _data: &mut Value,
    ) -> Value {
        let scope = VarScope::parse(node.setting_str("scope").unwrap_or("local"));
        match node.setting_str("name") {
            Some(name) => env.variable(scope, name),
            None => Value::Null,
        }
    }
}

/// Writes the value pin into a named variable of the configured scope.
pub struct SetVariable;

impl NodeType for SetVariable {
    fn id(&self) -> &'static str {
        "setVariable"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::Variable
    }

    fn pin_configuration(&self, _node: &GraphNode) -> Vec<Pin> {
        vec![Pin::flow_in(), Pin::flow_out(), Pin::read_in()]
    }

    fn setting_types(&self) -> Vec<SettingType> {
        vec![
            SettingType::new("scope", "String", json!("local")),
            SettingType::new("name", "String", json!("")),
        ]
    }

    fn update(
        &self,
        env: &mut Env<'_>,
        _dt: f32,
        node: &GraphNode,
        _data: &mut Value,
    ) -> ExecutionResult {
        let scope = VarScope::parse(node.setting_str("scope").unwrap_or("local"));
        if let Some(name) = node.setting_str("name") {
            let name = name.to_owned();
            let value = env.read_data_pin(node, 2);
            env.set_variable(scope, &name, value);
        }
        ExecutionResult::Done(OutputPins::first())
    }
}

/// Passes its input through until latched; while latched it keeps serving the
/// value captured at the moment of latching.
pub struct Latch;

impl NodeType for Latch {
    fn id(&self) -> &'static str {
        "latch"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::Expression
    }

    fn pin_configuration(&self, _node: &GraphNode) -> Vec<Pin> {
        vec![Pin::read_in(), Pin::write_in(), Pin::read_out()]
    }

    fn get_data(&self, env: &mut Env<'_>, node: &GraphNode, _pin: usize, data: &mut Value) -> Value {
        if data.get("latched").and_then(Value::as_bool).unwrap_or(false) {
            data.get("value").cloned().unwrap_or(Value::Null)
        } else {
            env.read_data_pin(node, 0)
        }
    }

    fn set_data(
        &self,
        env: &mut Env<'_>,
        node: &GraphNode,
        _pin: usize,
        value: Value,
        data: &mut Value,
    ) {
        let latched = data.get("latched").and_then(Value::as_bool).unwrap_or(false);
        let engage = crate::runtime::environment::truthy(&value);
        if engage && !latched {
            let captured = env.read_data_pin(node, 0);
            *data = json!({ "latched": true, "value": captured });
        } else if !engage && latched {
            *data = json!({ "latched": false });
        }
    }
}

/// Evaluates an expression over the visible variable scopes, read-only.
pub struct Expression;

impl NodeType for Expression {
    fn id(&self) -> &'static str {
        "expression"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::Expression
    }

    fn pin_configuration(&self, _node: &GraphNode) -> Vec<Pin> {
        vec![Pin::read_out()]
    }

    fn setting_types(&self) -> Vec<SettingType> {
        vec![SettingType::new("expression", "String", json!(""))]
    }

    fn get_data(
        &self,
        env: &mut Env<'_>,
        node: &GraphNode,
        _pin: usize,
        _data: &mut Value,
    ) -> Value {
        let Some(expr) = node.setting_str("expression") else {
            return Value::Null;
        };
        let tree = match build_operator_tree::<DefaultNumericTypes>(expr) {
            Ok(tree) => tree,
            Err(e) => {
                warn!(node = %node.name, error = %e, "failed to parse expression");
                return Value::Null;
            }
        };
        let mut ctx = HashMapContext::<DefaultNumericTypes>::new();
        env.each_variable(|name, value| {
            if let Some(ev) = to_eval(value) {
                let _ = ctx.set_value(name.to_owned(), ev);
            }
        });
        match tree.eval_with_context(&ctx) {
            Ok(value) => from_eval(value),
            Err(e) => {
                warn!(node = %node.name, error = %e, "expression evaluation failed");
                Value::Null
            }
        }
    }
}

/// Routes the strand along the first or second output based on a boolean pin.
pub struct Branch;

impl NodeType for Branch {
    fn id(&self) -> &'static str {
        "branch"
    }

    fn classification(&self) -> NodeClassification {
        NodeClassification::FlowControl
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
        _data: &mut Value,
    ) -> ExecutionResult {
        let branch = if env.read_bool(node, 1) { 0 } else { 1 };
        ExecutionResult::Done(OutputPins::nth(branch))
    }
}

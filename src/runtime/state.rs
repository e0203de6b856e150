use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::graph::{GraphDefinition, NodeId};
use crate::nodes::NodeTypeRegistry;
use crate::runtime::message::ScriptMessage;
use crate::runtime::strand::{GroupTable, Strand};

/// A named bag of script variables.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableScope {
    values: HashMap<String, Value>,
}

impl VariableScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

/// Mutable per-instance data for one running graph: the strand arena, fork
/// groups, per-node private data and variable scopes. Owned exclusively by
/// the scriptable it is attached to.
pub struct ExecutionState {
    graph: Arc<GraphDefinition>,
    /// Unique per run instance, for diagnostics.
    pub instance_id: Uuid,
    pub(crate) strands: Vec<Strand>,
    pub(crate) groups: GroupTable,
    /// Private data per node; `None` until first touched.
    pub(crate) node_data: Vec<Option<Value>>,
    /// Nodes that already advanced during the current environment update.
    pub(crate) node_ran: Vec<bool>,
    pub local: VariableScope,
    pub shared: VariableScope,
    tags: Vec<String>,
    pub(crate) start_params: Vec<Value>,
    /// Set once the state has been stepped this tick.
    pub(crate) frame_flag: bool,
    started: bool,
    dead: bool,
    destroyed: bool,
}

impl ExecutionState {
    pub fn new(graph: Arc<GraphDefinition>) -> Self {
        let n = graph.len();
        Self {
            graph,
            instance_id: Uuid::new_v4(),
            strands: Vec::new(),
            groups: GroupTable::default(),
            node_data: vec![None; n],
            node_ran: vec![false; n],
            local: VariableScope::new(),
            shared: VariableScope::new(),
            tags: Vec::new(),
            start_params: Vec::new(),
            frame_flag: false,
            started: false,
            dead: false,
            destroyed: false,
        }
    }

    pub fn graph(&self) -> &Arc<GraphDefinition> {
        &self.graph
    }

    pub fn script_id(&self) -> &str {
        &self.graph.name
    }

    pub fn set_tags(&mut self, tags: Vec<String>) {
        self.tags = tags;
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn set_start_params(&mut self, params: Vec<Value>) {
        self.start_params = params;
    }

    pub fn frame_flag(&self) -> bool {
        self.frame_flag
    }

    pub fn set_frame_flag(&mut self, flag: bool) {
        self.frame_flag = flag;
    }

    /// Spawns the root strands on the first update.
    pub(crate) fn ensure_started(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        for &root in &self.graph.roots {
            self.strands.push(Strand::new(root));
        }
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub(crate) fn mark_dead(&mut self) {
        self.dead = true;
    }

    /// Strand count, watchers included.
    pub fn strand_count(&self) -> usize {
        self.strands.iter().filter(|s| !s.dead).count()
    }

    pub fn node_data(&self, id: NodeId) -> Option<&Value> {
        self.node_data.get(id).and_then(|d| d.as_ref())
    }

    /// Offer a message to this state's inbox nodes. The first node whose
    /// configured name matches decides the outcome: a free inbox takes the
    /// message and gets a strand spawned on it, a busy one drops it
    /// (back-pressure, first-come-first-served).
    pub fn receive_message(
        &mut self,
        registry: &NodeTypeRegistry,
        mut msg: ScriptMessage,
        requires_spawning_script: bool,
    ) -> bool {
        for id in 0..self.graph.len() {
            let node = self.graph.node(id);
            let Some(node_type) = registry.get(&node.type_id) else {
                continue;
            };
            if !node_type.can_receive_message(node, &msg.type_id, requires_spawning_script) {
                continue;
            }
            let mut data = match self.node_data[id].take() {
                Some(d) => d,
                None => node_type.init_data(node),
            };
            let accepted = node_type.try_receive_message(node, &mut data, &mut msg);
            self.node_data[id] = Some(data);
            if accepted {
                self.started = true;
                let mut strand = Strand::new(id);
                strand.inbox = Some(id);
                self.strands.push(strand);
            } else {
                debug!(
                    script = %self.graph.name,
                    message = %msg.type_id,
                    "inbox busy, message dropped"
                );
            }
            return accepted;
        }
        false
    }

    /// Whether any inbox node of the graph can take this message.
    pub fn can_receive_message(
        registry: &NodeTypeRegistry,
        graph: &GraphDefinition,
        message: &str,
        requires_spawning_script: bool,
    ) -> bool {
        graph.nodes.iter().any(|node| {
            registry
                .get(&node.type_id)
                .is_some_and(|t| t.can_receive_message(node, message, requires_spawning_script))
        })
    }

    /// Runs the destructor of every node holding private data and drops all
    /// strands. Idempotent.
    pub fn destroy(&mut self, registry: &NodeTypeRegistry) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.dead = true;
        self.strands.clear();
        for id in 0..self.graph.len() {
            if let Some(mut data) = self.node_data[id].take() {
                let node = self.graph.node(id);
                if let Some(node_type) = registry.get(&node.type_id) {
                    node_type.destruct(node, &mut data);
                }
                self.node_data[id] = Some(data);
            }
        }
    }
}

pub mod builder;
pub mod loader;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

pub type NodeId = usize;

/// What a pin carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinKind {
    /// Execution flow between nodes.
    Flow,
    /// Lazily-pulled data, resolved by walking to the producing node.
    ReadData,
    /// Pushed data, written into the receiving node's private state.
    WriteData,
    /// Reference to an entity (resolved through the target index).
    Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinDir {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pin {
    pub kind: PinKind,
    pub dir: PinDir,
}

impl Pin {
    pub const fn new(kind: PinKind, dir: PinDir) -> Self {
        Self { kind, dir }
    }

    pub const fn flow_in() -> Self {
        Self::new(PinKind::Flow, PinDir::Input)
    }

    pub const fn flow_out() -> Self {
        Self::new(PinKind::Flow, PinDir::Output)
    }

    pub const fn read_in() -> Self {
        Self::new(PinKind::ReadData, PinDir::Input)
    }

    pub const fn read_out() -> Self {
        Self::new(PinKind::ReadData, PinDir::Output)
    }

    pub const fn write_in() -> Self {
        Self::new(PinKind::WriteData, PinDir::Input)
    }

    pub const fn write_out() -> Self {
        Self::new(PinKind::WriteData, PinDir::Output)
    }

    pub const fn target_in() -> Self {
        Self::new(PinKind::Target, PinDir::Input)
    }
}

/// A connection stored on the initiating end of a pin pair: flow and
/// write-data connections live on the source node, read-data and target
/// connections live on the consuming node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinConnection {
    pub node: NodeId,
    pub pin: usize,
}

/// One node of a built graph. Immutable once the definition exists.
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// Author-facing id, kept for diagnostics.
    pub name: String,
    pub type_id: String,
    pub settings: Value,
    /// Pin layout, computed once from the node type at build time.
    pub pins: Vec<Pin>,
    /// One slot per pin.
    pub connections: Vec<Option<PinConnection>>,
}

impl GraphNode {
    pub fn connection(&self, pin: usize) -> Option<PinConnection> {
        self.connections.get(pin).copied().flatten()
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(|v| v.as_str())
    }

    pub fn setting_f32(&self, key: &str, default: f32) -> f32 {
        self.settings
            .get(key)
            .and_then(|v| v.as_f64())
            .map(|v| v as f32)
            .unwrap_or(default)
    }

    pub fn setting_bool(&self, key: &str, default: bool) -> bool {
        self.settings
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }

    pub fn setting_usize(&self, key: &str, default: usize) -> usize {
        self.settings
            .get(key)
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(default)
    }

    /// Absolute pin indices of the output flow pins, in declaration order.
    pub fn output_flow_pins(&self) -> Vec<usize> {
        self.pins
            .iter()
            .enumerate()
            .filter(|(_, p)| p.kind == PinKind::Flow && p.dir == PinDir::Output)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn has_flow_input(&self) -> bool {
        self.pins
            .iter()
            .any(|p| p.kind == PinKind::Flow && p.dir == PinDir::Input)
    }
}

/// The immutable "program": nodes, pins and connections, shared by every
/// running instance through an `Arc`. The content hash detects structural
/// changes across an asset reload.
#[derive(Debug)]
pub struct GraphDefinition {
    pub name: String,
    pub nodes: Vec<GraphNode>,
    /// Nodes that receive a strand when an instance starts.
    pub roots: Vec<NodeId>,
    pub hash: u64,
    /// Persistent graphs keep their strands when the owning entity is removed.
    pub persistent: bool,
    /// Suppresses the duplicate-attachment warning for this graph.
    pub quiet_duplicates: bool,
    index: HashMap<String, NodeId>,
}

impl GraphDefinition {
    pub(crate) fn new(
        name: String,
        nodes: Vec<GraphNode>,
        roots: Vec<NodeId>,
        hash: u64,
        persistent: bool,
        quiet_duplicates: bool,
    ) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name.clone(), i))
            .collect();
        Self {
            name,
            nodes,
            roots,
            hash,
            persistent,
            quiet_duplicates,
            index,
        }
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Graph assets available to the driver, keyed by name. Stands in for the
/// surrounding resource system.
#[derive(Default)]
pub struct GraphLibrary {
    graphs: HashMap<String, Arc<GraphDefinition>>,
}

impl GraphLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, graph: Arc<GraphDefinition>) {
        self.graphs.insert(graph.name.clone(), graph);
    }

    pub fn get(&self, name: &str) -> Option<Arc<GraphDefinition>> {
        self.graphs.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.graphs.contains_key(name)
    }
}

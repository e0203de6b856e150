//! Fluent construction and validation of graph definitions.

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};

use ahash::RandomState;
use serde_json::Value;

use crate::error::GraphError;
use crate::graph::{GraphDefinition, GraphNode, NodeId, PinConnection, PinDir, PinKind};
use crate::nodes::NodeTypeRegistry;

struct PendingNode {
    name: String,
    type_id: String,
    settings: Value,
}

/// Builds and validates a [`GraphDefinition`]. Nodes are declared first, then
/// flow and data connections between them; `build` resolves pin layouts
/// against the registry and checks every connection.
pub struct GraphBuilder {
    name: String,
    nodes: Vec<PendingNode>,
    flows: Vec<(String, usize, String)>,
    wires: Vec<(String, usize, String, usize)>,
    persistent: bool,
    quiet_duplicates: bool,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            flows: Vec::new(),
            wires: Vec::new(),
            persistent: false,
            quiet_duplicates: false,
        }
    }

    pub fn node(self, name: impl Into<String>, type_id: impl Into<String>) -> Self {
        self.node_with(name, type_id, Value::Null)
    }

    pub fn node_with(
        mut self,
        name: impl Into<String>,
        type_id: impl Into<String>,
        settings: Value,
    ) -> Self {
        self.nodes.push(PendingNode {
            name: name.into(),
            type_id: type_id.into(),
            settings,
        });
        self
    }

    /// Connects the `out_index`-th output flow pin of `from` to the flow
    /// input of `to`. The index counts output flow pins only.
    pub fn flow(mut self, from: impl Into<String>, out_index: usize, to: impl Into<String>) -> Self {
        self.flows.push((from.into(), out_index, to.into()));
        self
    }

    /// Connects a data pin pair, producer first. Pin indices are absolute.
    pub fn wire(
        mut self,
        from: impl Into<String>,
        from_pin: usize,
        to: impl Into<String>,
        to_pin: usize,
    ) -> Self {
        self.wires.push((from.into(), from_pin, to.into(), to_pin));
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn quiet_duplicates(mut self, quiet: bool) -> Self {
        self.quiet_duplicates = quiet;
        self
    }

    pub fn build(self, registry: &NodeTypeRegistry) -> Result<GraphDefinition, GraphError> {
        let mut index: HashMap<String, NodeId> = HashMap::new();
        let mut nodes: Vec<GraphNode> = Vec::with_capacity(self.nodes.len());

        for pending in self.nodes {
            if index.contains_key(&pending.name) {
                return Err(GraphError::DuplicateNode(pending.name));
            }
            let Some(node_type) = registry.get(&pending.type_id) else {
                return Err(GraphError::UnknownNodeType {
                    kind: pending.type_id,
                    node: pending.name,
                });
            };
            let mut node = GraphNode {
                name: pending.name,
                type_id: pending.type_id,
                settings: pending.settings,
                pins: Vec::new(),
                connections: Vec::new(),
            };
            node.pins = node_type.pin_configuration(&node);
            node.connections = vec![None; node.pins.len()];
            index.insert(node.name.clone(), nodes.len());
            nodes.push(node);
        }

        for (from, out_index, to) in self.flows {
            let from_id = *index
                .get(&from)
                .ok_or_else(|| GraphError::UnknownNode(from.clone()))?;
            let to_id = *index
                .get(&to)
                .ok_or_else(|| GraphError::UnknownNode(to.clone()))?;

            let out_pins = nodes[from_id].output_flow_pins();
            let &from_pin = out_pins.get(out_index).ok_or(GraphError::PinOutOfRange {
                node: from.clone(),
                pin: out_index,
                count: out_pins.len(),
            })?;
            let to_pin = nodes[to_id]
                .pins
                .iter()
                .position(|p| p.kind == PinKind::Flow && p.dir == PinDir::Input)
                .ok_or_else(|| GraphError::IncompatiblePins {
                    from: from.clone(),
                    from_pin,
                    to: to.clone(),
                    to_pin: 0,
                })?;

            connect(&mut nodes, from_id, from_pin, to_id, to_pin, &from)?;
        }

        for (from, from_pin, to, to_pin) in self.wires {
            let from_id = *index
                .get(&from)
                .ok_or_else(|| GraphError::UnknownNode(from.clone()))?;
            let to_id = *index
                .get(&to)
                .ok_or_else(|| GraphError::UnknownNode(to.clone()))?;

            let from_kind = pin_at(&nodes[from_id], from_pin, &from)?;
            let to_kind = pin_at(&nodes[to_id], to_pin, &to)?;
            let compatible = matches!(
                (from_kind, to_kind),
                (
                    (PinKind::ReadData, PinDir::Output),
                    (PinKind::ReadData, PinDir::Input)
                ) | (
                    (PinKind::ReadData, PinDir::Output),
                    (PinKind::Target, PinDir::Input)
                ) | (
                    (PinKind::WriteData, PinDir::Output),
                    (PinKind::WriteData, PinDir::Input)
                )
            );
            if !compatible {
                return Err(GraphError::IncompatiblePins {
                    from,
                    from_pin,
                    to,
                    to_pin,
                });
            }

            // read and target connections are stored on the consumer, write
            // connections on the producer
            match from_kind.0 {
                PinKind::WriteData => {
                    connect(&mut nodes, from_id, from_pin, to_id, to_pin, &from)?;
                }
                _ => {
                    connect(&mut nodes, to_id, to_pin, from_id, from_pin, &to)?;
                }
            }
        }

        check_data_cycles(&nodes)?;

        let roots: Vec<NodeId> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.type_id == "start")
            .map(|(i, _)| i)
            .collect();
        let has_inbox = nodes.iter().any(|n| {
            registry
                .get(&n.type_id)
                .is_some_and(|t| t.is_message_inbox())
        });
        if roots.is_empty() && !has_inbox {
            return Err(GraphError::NoEntryPoint(self.name));
        }

        let hash = content_hash(&self.name, &nodes);
        Ok(GraphDefinition::new(
            self.name,
            nodes,
            roots,
            hash,
            self.persistent,
            self.quiet_duplicates,
        ))
    }
}

fn pin_at<'a>(
    node: &'a GraphNode,
    pin: usize,
    name: &str,
) -> Result<(PinKind, PinDir), GraphError> {
    node.pins
        .get(pin)
        .map(|p| (p.kind, p.dir))
        .ok_or(GraphError::PinOutOfRange {
            node: name.to_owned(),
            pin,
            count: node.pins.len(),
        })
}

fn connect(
    nodes: &mut [GraphNode],
    owner: NodeId,
    owner_pin: usize,
    other: NodeId,
    other_pin: usize,
    owner_name: &str,
) -> Result<(), GraphError> {
    let slot = &mut nodes[owner].connections[owner_pin];
    if slot.is_some() {
        return Err(GraphError::PinInUse {
            from: owner_name.to_owned(),
            from_pin: owner_pin,
        });
    }
    *slot = Some(PinConnection {
        node: other,
        pin: other_pin,
    });
    Ok(())
}

/// Rejects cycles over lazily-pulled data edges; the interpreter's pin walk
/// relies on them terminating.
fn check_data_cycles(nodes: &[GraphNode]) -> Result<(), GraphError> {
    // consumer -> producer edges over read and target pins
    let edges: Vec<Vec<NodeId>> = nodes
        .iter()
        .map(|node| {
            node.pins
                .iter()
                .enumerate()
                .filter(|(_, p)| {
                    p.dir == PinDir::Input
                        && matches!(p.kind, PinKind::ReadData | PinKind::Target)
                })
                .filter_map(|(i, _)| node.connection(i))
                .map(|conn| conn.node)
                .collect()
        })
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit(
        id: NodeId,
        edges: &[Vec<NodeId>],
        marks: &mut [Mark],
        nodes: &[GraphNode],
    ) -> Result<(), GraphError> {
        match marks[id] {
            Mark::Done => return Ok(()),
            Mark::InProgress => return Err(GraphError::DataCycle(nodes[id].name.clone())),
            Mark::Unvisited => {}
        }
        marks[id] = Mark::InProgress;
        for &next in &edges[id] {
            visit(next, edges, marks, nodes)?;
        }
        marks[id] = Mark::Done;
        Ok(())
    }

    let mut marks = vec![Mark::Unvisited; nodes.len()];
    for id in 0..nodes.len() {
        visit(id, &edges, &mut marks, nodes)?;
    }
    Ok(())
}

/// Structural content hash, stable across runs (fixed seeds). Detects graph
/// changes across an asset reload.
fn content_hash(name: &str, nodes: &[GraphNode]) -> u64 {
    let state = RandomState::with_seeds(0x51ab, 0x7e11, 0x90d3, 0x2f64);
    let mut hasher = state.build_hasher();
    name.hash(&mut hasher);
    for node in nodes {
        node.name.hash(&mut hasher);
        node.type_id.hash(&mut hasher);
        node.settings.to_string().hash(&mut hasher);
        for conn in &node.connections {
            match conn {
                Some(c) => (1u8, c.node, c.pin).hash(&mut hasher),
                None => 0u8.hash(&mut hasher),
            }
        }
    }
    hasher.finish()
}

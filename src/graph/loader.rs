//! YAML graph assets.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::graph::builder::GraphBuilder;
use crate::graph::{GraphDefinition, GraphLibrary};
use crate::nodes::NodeTypeRegistry;

#[derive(Debug, Deserialize)]
struct GraphFile {
    name: String,
    #[serde(default)]
    persistent: bool,
    #[serde(default, rename = "quietDuplicates")]
    quiet_duplicates: bool,
    nodes: Vec<NodeEntry>,
    #[serde(default)]
    flows: Vec<(String, usize, String)>,
    #[serde(default)]
    wires: Vec<(String, usize, String, usize)>,
}

#[derive(Debug, Deserialize)]
struct NodeEntry {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    settings: Value,
}

/// Parses a YAML graph document into a validated definition.
pub fn parse_graph(yaml: &str, registry: &NodeTypeRegistry) -> Result<GraphDefinition> {
    let file: GraphFile =
        serde_yaml::from_str(yaml).context("failed to deserialize graph document")?;

    let mut builder = GraphBuilder::new(&file.name)
        .persistent(file.persistent)
        .quiet_duplicates(file.quiet_duplicates);
    for node in file.nodes {
        builder = builder.node_with(node.id, node.kind, node.settings);
    }
    for (from, out_index, to) in file.flows {
        builder = builder.flow(from, out_index, to);
    }
    for (from, from_pin, to, to_pin) in file.wires {
        builder = builder.wire(from, from_pin, to, to_pin);
    }
    builder
        .build(registry)
        .with_context(|| format!("invalid graph `{}`", file.name))
}

pub fn load_graph(path: &Path, registry: &NodeTypeRegistry) -> Result<GraphDefinition> {
    let yaml = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read graph file {}", path.display()))?;
    parse_graph(&yaml, registry)
        .with_context(|| format!("failed to load graph from {}", path.display()))
}

/// Loads every `.yaml` graph in a directory into a library.
pub fn load_library(dir: &Path, registry: &NodeTypeRegistry) -> Result<GraphLibrary> {
    let mut library = GraphLibrary::new();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read graph directory {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "yaml" || ext == "yml") {
            let graph = load_graph(&path, registry)?;
            info!(graph = %graph.name, file = %path.display(), "loaded graph");
            library.insert(Arc::new(graph));
        }
    }
    Ok(library)
}

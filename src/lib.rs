//! skein: a per-tick visual-scripting execution engine.
//!
//! Graphs of typed nodes are attached to simulation entities and stepped
//! cooperatively once per tick. Control flow runs as strands that fork,
//! merge, call into sub-graphs and watch conditions; scripts talk to each
//! other over a message bus with delayed delivery.

pub mod error;
pub mod graph;
pub mod nodes;
pub mod runtime;

pub use error::GraphError;
pub use graph::builder::GraphBuilder;
pub use graph::{GraphDefinition, GraphLibrary};
pub use nodes::NodeTypeRegistry;
pub use runtime::driver::ScriptDriver;
pub use runtime::message::{ExecutionRequest, ScriptMessage};
pub use runtime::world::{EntityId, ScriptWorld};

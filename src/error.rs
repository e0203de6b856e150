use thiserror::Error;

/// Errors raised while building or validating a graph definition.
/// Runtime stepping never returns these; a graph that passed validation
/// is assumed well-formed by the interpreter.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("duplicate node id `{0}`")]
    DuplicateNode(String),

    #[error("unknown node id `{0}`")]
    UnknownNode(String),

    #[error("unknown node type `{kind}` on node `{node}`")]
    UnknownNodeType { kind: String, node: String },

    #[error("node `{node}` pin {pin} out of range ({count} pins)")]
    PinOutOfRange {
        node: String,
        pin: usize,
        count: usize,
    },

    #[error("incompatible connection {from}:{from_pin} -> {to}:{to_pin}")]
    IncompatiblePins {
        from: String,
        from_pin: usize,
        to: String,
        to_pin: usize,
    },

    #[error("pin {from}:{from_pin} is already connected")]
    PinInUse { from: String, from_pin: usize },

    #[error("cyclic data dependency through node `{0}`")]
    DataCycle(String),

    #[error("graph `{0}` has no start node and no message inbox")]
    NoEntryPoint(String),
}

use crate::graph::NodeId;

/// Bitmask of active output flow pins, counted in declaration order of a
/// node's output flow pins (not absolute pin indices).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputPins(u8);

impl OutputPins {
    pub const fn none() -> Self {
        Self(0)
    }

    /// Only the first output flow pin.
    pub const fn first() -> Self {
        Self(1)
    }

    pub const fn nth(n: usize) -> Self {
        Self(1 << n)
    }

    /// The first `n` output flow pins.
    pub fn all(n: usize) -> Self {
        debug_assert!(n <= 8);
        Self(if n >= 8 { u8::MAX } else { (1u8 << n) - 1 })
    }

    pub fn contains(self, n: usize) -> bool {
        n < 8 && self.0 & (1 << n) != 0
    }

    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..8).filter(move |&n| self.contains(n))
    }
}

/// Control-flow signal returned by a node's update and consumed exhaustively
/// by the environment's step loop. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Advance along the active output flow pin(s); no connection means the
    /// strand completes naturally.
    Done(OutputPins),
    /// Stay parked at this node and re-evaluate next tick.
    Executing,
    /// Split into sibling strands, one per active connected output.
    Fork(OutputPins),
    /// Fork, but this strand stays behind as a passive watcher that does not
    /// count toward merge completion.
    ForkAndConvertToWatcher(OutputPins),
    /// Halt until every sibling of the fork group has arrived, then release
    /// exactly one continuing strand.
    MergeAndWait,
    /// Pass through immediately; drops out of merge accounting.
    MergeAndContinue,
    /// Push a return address and jump to the target node.
    Call(NodeId),
    /// Pop the call stack; with an empty stack behaves as `Done`.
    Return,
    /// Discard this node's private data and accumulated local time and
    /// re-enter it fresh.
    Restart,
    /// Remove the strand; the last strand destroys the execution state.
    Terminate,
}

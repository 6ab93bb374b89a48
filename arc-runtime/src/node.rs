use arc_types::errors::BoxedError;

use crate::state::SharedState;

/// One vertex implementation of the dataflow graph.
///
/// A node is invoked synchronously on the tick thread, never concurrently
/// with itself or any other node. It reads its refreshed input snapshots and
/// writes its outputs through [`crate::state::State`]; an error fails this
/// invocation only, never the tick.
pub trait Node: Send {
    fn run(&mut self, state: &SharedState) -> Result<(), BoxedError>;
}

/// A node backed by a plain closure, the workhorse of the test graphs.
pub struct FnNode<F>(pub F);

impl<F> Node for FnNode<F>
where
    F: FnMut(&SharedState) -> Result<(), BoxedError> + Send,
{
    fn run(&mut self, state: &SharedState) -> Result<(), BoxedError> {
        (self.0)(state)
    }
}

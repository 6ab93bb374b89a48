//! The execution core of the Arc industrial control runtime.
//!
//! A compiled dataflow program is driven to a fixed point on every tick:
//! frames are drained from the input queue into [`state::State`], the
//! [`scheduler::Scheduler`] walks the graph in topological order firing nodes
//! whose input watermarks advanced, and the resulting channel writes are
//! flushed onto the output queue. [`tick`] decides when ticks happen,
//! [`queue`] is the concurrency boundary to the outside world, and [`wasm`]
//! is the host surface sandboxed node bodies call back into.

pub mod breaker;
pub mod error_manager;
pub mod errors;
pub mod graph;
pub mod module;
pub mod node;
pub mod notify;
pub mod queue;
pub mod runtime;
pub mod scheduler;
pub mod state;
pub mod tick;
pub mod wasm;

#[cfg(test)]
mod testutil;
#[cfg(test)]
mod tests;

pub use module::Module;
pub use runtime::{Runtime, RuntimeConfig};

//! The host surface sandboxed node bodies call back into.
//!
//! [`Bindings`] is the callable API: typed sample-array allocation over a
//! per-tick handle arena, elementwise arithmetic and comparison, channel
//! access, per-node persistent state, strings, and the panic hook.
//! [`Sandbox`] embeds it into a wasmtime instance and [`WasmNode`] adapts
//! one export into the scheduler's node contract.

pub(crate) mod arena;
mod bindings;
mod linker;

pub use bindings::Bindings;
pub use linker::{Sandbox, WasmNode};

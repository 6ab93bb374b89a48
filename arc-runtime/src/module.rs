use arc_types::ir::Ir;
use arc_types::serde::{Deserialize, Serialize};

/// A compiled dataflow program the runtime executes: the graph description
/// plus the sandboxed code for its node bodies.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(crate = "arc_types::serde")]
pub struct Module {
    pub ir: Ir,
    /// Compiled WebAssembly for the module's node bodies, one export per
    /// node key. `None` for graphs whose nodes are provided natively.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wasm: Option<Vec<u8>>,
}

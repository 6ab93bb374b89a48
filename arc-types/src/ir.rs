//! The compiled-program description the runtime executes.
//!
//! An Arc module arrives as a directed dataflow graph over named nodes; the
//! types here are the graph's wire-facing shape. Building the executable
//! graph from them is the runtime's job.

use serde::{Deserialize, Serialize};

use crate::telem::{ChannelKey, DataType, SampleValue};

/// An input or output slot of a node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub data_type: DataType,
    /// Default value installed into an unconnected input, consumed once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<SampleValue>,
}

impl Param {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            value: None,
        }
    }

    pub fn with_value(mut self, value: SampleValue) -> Self {
        self.value = Some(value);
        self
    }
}

/// One vertex of the dataflow graph.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique key of the node across the module.
    pub key: String,
    /// The node's type tag, naming which implementation runs it.
    #[serde(rename = "type", default)]
    pub type_tag: String,
    #[serde(default)]
    pub inputs: Vec<Param>,
    #[serde(default)]
    pub outputs: Vec<Param>,
}

/// Addresses any input or output slot as `(node_key, param_name)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    pub node: String,
    pub param: String,
}

impl Handle {
    pub fn new(node: impl Into<String>, param: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            param: param.into(),
        }
    }
}

/// A directed data connection from a producer output to a consumer input.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: Handle,
    pub target: Handle,
}

impl Edge {
    pub fn new(source: Handle, target: Handle) -> Self {
        Self { source, target }
    }
}

/// The full graph description of one Arc module.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Ir {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Ir {
    pub fn node(&self, key: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.key == key)
    }
}

/// What the cluster knows about a channel: its element type and the key of
/// its index (timestamp) channel, `0` when the channel has none.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest {
    pub key: ChannelKey,
    pub data_type: DataType,
    pub index: ChannelKey,
}

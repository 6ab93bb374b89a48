//! The executable view of a module's dataflow graph.

use std::collections::HashMap;

use arc_types::ir::Ir;
use daggy::petgraph::algo::toposort;
use daggy::{Dag, NodeIndex, Walker};

use crate::errors::RuntimeError;

/// A DAG over node keys with its topological order precomputed.
///
/// Cycles and duplicate node keys are rejected at construction; the core
/// assumes an acyclic graph from then on.
#[derive(Debug)]
pub struct Graph {
    dag: Dag<String, ()>,
    lookup: HashMap<String, NodeIndex>,
    order: Vec<String>,
}

impl Graph {
    pub fn new(ir: &Ir) -> Result<Self, RuntimeError> {
        let mut dag = Dag::new();
        let mut lookup = HashMap::new();
        for node in &ir.nodes {
            let index = dag.add_node(node.key.clone());
            if lookup.insert(node.key.clone(), index).is_some() {
                return Err(RuntimeError::DuplicateNodeKey(node.key.clone()));
            }
        }
        for edge in &ir.edges {
            let source = *lookup
                .get(&edge.source.node)
                .ok_or_else(|| RuntimeError::UnknownNodeKey(edge.source.node.clone()))?;
            let target = *lookup
                .get(&edge.target.node)
                .ok_or_else(|| RuntimeError::UnknownNodeKey(edge.target.node.clone()))?;
            dag.add_edge(source, target, ())?;
        }
        let order = toposort(dag.graph(), None)
            .map_err(|_| RuntimeError::WouldCycle)?
            .into_iter()
            .map(|index| dag[index].clone())
            .collect();
        Ok(Self { dag, lookup, order })
    }

    /// Node keys, producers before consumers.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lookup.contains_key(key)
    }

    /// Keys of nodes directly downstream of `key`.
    pub fn children(&self, key: &str) -> Vec<&str> {
        let Some(&index) = self.lookup.get(key) else {
            return Vec::new();
        };
        self.dag
            .children(index)
            .iter(&self.dag)
            .map(|(_, n)| self.dag[n].as_str())
            .collect()
    }
}

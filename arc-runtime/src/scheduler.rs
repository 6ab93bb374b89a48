//! Drives the graph to a fixed point within a tick.

use std::collections::HashMap;

use arc_types::ir::Ir;

use crate::error_manager::ErrorManager;
use crate::errors::RuntimeError;
use crate::graph::Graph;
use crate::node::Node;
use crate::state::SharedState;

#[derive(Clone, Debug)]
pub struct Options {
    /// Bounded number of fixed-point passes per tick. One pass suffices for
    /// a DAG walked in topological order.
    pub max_passes: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self { max_passes: 1 }
    }
}

/// Walks nodes in topological order, refreshing inputs and invoking each
/// node whose watermarks advanced. Keeps no data of its own beyond the
/// ordering; all node state lives in [`crate::state::State`].
pub struct Scheduler {
    graph: Graph,
    impls: HashMap<String, Box<dyn Node>>,
    first_tick: HashMap<String, bool>,
    options: Options,
}

impl Scheduler {
    pub fn new(ir: &Ir, impls: HashMap<String, Box<dyn Node>>) -> Result<Self, RuntimeError> {
        Self::with_options(ir, impls, Options::default())
    }

    pub fn with_options(
        ir: &Ir,
        impls: HashMap<String, Box<dyn Node>>,
        options: Options,
    ) -> Result<Self, RuntimeError> {
        let graph = Graph::new(ir)?;
        let first_tick = graph
            .order()
            .iter()
            .map(|key| (key.clone(), true))
            .collect();
        Ok(Self {
            graph,
            impls,
            first_tick,
            options,
        })
    }

    /// Runs one tick. Node failures are reported and the tick continues;
    /// a tick is never unwound for a single node's failure.
    pub fn tick(&mut self, state: &SharedState, errors: &ErrorManager) {
        for _ in 0..self.options.max_passes.max(1) {
            let mut fired = false;
            for key in self.graph.order() {
                let triggered = {
                    let mut st = state.lock();
                    st.set_current_node(key);
                    st.refresh_inputs(key)
                };
                let first = self
                    .first_tick
                    .get_mut(key)
                    .map(std::mem::take)
                    .unwrap_or(false);
                if !(triggered || first) {
                    continue;
                }
                fired = true;
                if let Some(node) = self.impls.get_mut(key) {
                    if let Err(source) = node.run(state) {
                        errors.report(&RuntimeError::Node {
                            node: key.clone(),
                            source,
                        });
                    }
                }
            }
            if !fired {
                break;
            }
        }
        state.lock().set_current_node("");
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::node::FnNode;
    use crate::state::{Config as StateConfig, State};
    use arc_types::errors::BoxedError;
    use arc_types::ir::{Edge, Handle, Node as IrNode, Param};
    use arc_types::telem::{DataType, Series, TimeStamp};

    fn two_node_ir() -> Ir {
        let mut producer = IrNode {
            key: "producer".into(),
            ..Default::default()
        };
        producer.outputs.push(Param::new("output", DataType::F64));
        let mut consumer = IrNode {
            key: "consumer".into(),
            ..Default::default()
        };
        consumer.inputs.push(Param::new("input", DataType::F64));
        Ir {
            nodes: vec![producer, consumer],
            edges: vec![Edge::new(
                Handle::new("producer", "output"),
                Handle::new("consumer", "input"),
            )],
        }
    }

    #[test]
    fn nodes_fire_once_on_first_tick_then_only_on_new_data() {
        let ir = two_node_ir();
        let state = State::shared(StateConfig {
            ir: ir.clone(),
            channels: vec![],
        })
        .unwrap();

        let produced = Arc::new(AtomicUsize::new(0));
        let consumed = Arc::new(AtomicUsize::new(0));
        let produced_in_node = produced.clone();
        let consumed_in_node = consumed.clone();

        let mut impls: HashMap<String, Box<dyn Node>> = HashMap::new();
        impls.insert(
            "producer".into(),
            Box::new(FnNode(move |state: &SharedState| -> Result<(), BoxedError> {
                produced_in_node.fetch_add(1, Ordering::SeqCst);
                let mut st = state.lock();
                st.set_output(
                    "producer",
                    0,
                    Series::from_vec(vec![1.0f64]),
                    Series::from_vec(vec![TimeStamp(1)]),
                );
                Ok(())
            })),
        );
        impls.insert(
            "consumer".into(),
            Box::new(FnNode(move |_: &SharedState| -> Result<(), BoxedError> {
                consumed_in_node.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        );

        let mut scheduler = Scheduler::new(&ir, impls).unwrap();
        let errors = ErrorManager::new(crate::errors::noop_handler());

        // First tick: producer fires unconditionally, consumer sees its
        // output on the same pass order but only fires when refreshed.
        scheduler.tick(&state, &errors);
        assert_eq!(produced.load(Ordering::SeqCst), 1);
        assert_eq!(consumed.load(Ordering::SeqCst), 1);

        // Second tick: nothing changed upstream, so the consumer stays
        // quiet.
        scheduler.tick(&state, &errors);
        assert_eq!(produced.load(Ordering::SeqCst), 1);
        assert_eq!(consumed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn node_failure_does_not_abort_the_tick() {
        let ir = two_node_ir();
        let state = State::shared(StateConfig {
            ir: ir.clone(),
            channels: vec![],
        })
        .unwrap();

        let consumed = Arc::new(AtomicUsize::new(0));
        let consumed_in_node = consumed.clone();
        let mut impls: HashMap<String, Box<dyn Node>> = HashMap::new();
        impls.insert(
            "producer".into(),
            Box::new(FnNode(|state: &SharedState| -> Result<(), BoxedError> {
                let mut st = state.lock();
                st.set_output(
                    "producer",
                    0,
                    Series::from_vec(vec![2.0f64]),
                    Series::from_vec(vec![TimeStamp(1)]),
                );
                Err("boom".into())
            })),
        );
        impls.insert(
            "consumer".into(),
            Box::new(FnNode(move |_: &SharedState| -> Result<(), BoxedError> {
                consumed_in_node.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        );

        let mut scheduler = Scheduler::new(&ir, impls).unwrap();
        let errors = ErrorManager::new(crate::errors::noop_handler());
        scheduler.tick(&state, &errors);

        assert_eq!(errors.count(), 1);
        assert_eq!(consumed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cyclic_ir_is_rejected_at_construction() {
        let mut ir = two_node_ir();
        ir.nodes[1].outputs.push(Param::new("output", DataType::F64));
        ir.nodes[0].inputs.push(Param::new("input", DataType::F64));
        ir.edges.push(Edge::new(
            Handle::new("consumer", "output"),
            Handle::new("producer", "input"),
        ));
        assert!(matches!(
            Scheduler::new(&ir, HashMap::new()),
            Err(RuntimeError::WouldCycle)
        ));
    }
}

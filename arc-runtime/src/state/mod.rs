//! The single source of truth for all per-tick data.
//!
//! State holds the ring of recent incoming channel values, the pending
//! outgoing writes, every node's handle-addressed I/O buffers, the per-node
//! persistent stores, and the transient arena the sandbox bindings allocate
//! from. All mutation happens on the tick thread; the queues serialize the
//! outside world against it.

mod store;

pub use store::PersistentStore;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arc_types::ir;
use arc_types::log::debug;
use arc_types::parking_lot::Mutex;
use arc_types::telem::{
    ChannelKey, DataType, Frame, MultiSeries, SampleValue, Series, TimeStamp,
};

use crate::errors::RuntimeError;
use crate::wasm::arena::Arena;

/// State as shared between the tick thread, the bindings and node bodies.
pub type SharedState = Arc<Mutex<State>>;

#[derive(Clone, Debug, Default)]
pub struct Config {
    pub ir: ir::Ir,
    pub channels: Vec<ir::Digest>,
}

/// A producer-owned output: the sample series plus its parallel timestamps.
/// `ident` names this buffer instance; it changes only when the node is
/// re-registered, so consumers can tell a graph reset from new data.
#[derive(Debug)]
struct OutputBuf {
    data: Series,
    time: Series,
    ident: u64,
}

/// A consumer-owned snapshot of the upstream output at the last refresh.
#[derive(Debug)]
struct InputSlot {
    data: Series,
    time: Series,
    /// Producer `(node, output index)` when connected.
    source: Option<(String, usize)>,
    default: Option<SampleValue>,
    /// `(upstream size, producer identity)` at the last copy.
    watermark: Option<(usize, u64)>,
    default_consumed: bool,
}

#[derive(Debug, Default)]
struct NodeIo {
    inputs: Vec<InputSlot>,
    outputs: Vec<OutputBuf>,
}

pub struct State {
    channels: HashMap<ChannelKey, DataType>,
    indexes: HashMap<ChannelKey, ChannelKey>,
    reads: HashMap<ChannelKey, MultiSeries>,
    // BTreeMap keeps the flush order deterministic between runs.
    writes: BTreeMap<ChannelKey, Series>,
    meta: HashMap<String, ir::Node>,
    io: HashMap<String, NodeIo>,
    current_node: String,
    ident_counter: u64,
    pub(crate) arena: Arena,
    pub(crate) store: PersistentStore,
}

impl State {
    pub fn new(config: Config) -> Result<Self, RuntimeError> {
        let mut state = Self {
            channels: HashMap::new(),
            indexes: HashMap::new(),
            reads: HashMap::new(),
            writes: BTreeMap::new(),
            meta: HashMap::new(),
            io: HashMap::new(),
            current_node: String::new(),
            ident_counter: 0,
            arena: Arena::default(),
            store: PersistentStore::default(),
        };
        for digest in &config.channels {
            state.register_digest(digest);
        }
        for node in &config.ir.nodes {
            state.register_node(node.clone());
        }
        for edge in &config.ir.edges {
            state.add_edge(edge.clone())?;
        }
        Ok(state)
    }

    pub fn shared(config: Config) -> Result<SharedState, RuntimeError> {
        Ok(Arc::new(Mutex::new(Self::new(config)?)))
    }

    /// Declares a channel of the given type. Idempotent overwrite on
    /// re-register.
    pub fn register_channel(&mut self, key: ChannelKey, data_type: DataType) {
        self.channels.insert(key, data_type);
    }

    /// Registers a channel digest: its type plus its index channel, if any.
    pub fn register_digest(&mut self, digest: &ir::Digest) {
        self.register_channel(digest.key, digest.data_type);
        if digest.index != 0 {
            self.indexes.insert(digest.key, digest.index);
            self.register_channel(digest.index, DataType::TimeStamp);
        }
    }

    /// Declares a node and pre-allocates its output buffers. Re-registering
    /// replaces the node's I/O with fresh buffer identities.
    pub fn register_node(&mut self, meta: ir::Node) {
        let mut io = NodeIo::default();
        for param in &meta.inputs {
            io.inputs.push(InputSlot {
                data: Series::new(param.data_type),
                time: Series::new(DataType::TimeStamp),
                source: None,
                default: param.value.clone(),
                watermark: None,
                default_consumed: false,
            });
        }
        for param in &meta.outputs {
            self.ident_counter += 1;
            io.outputs.push(OutputBuf {
                data: Series::new(param.data_type),
                time: Series::new(DataType::TimeStamp),
                ident: self.ident_counter,
            });
        }
        self.io.insert(meta.key.clone(), io);
        self.meta.insert(meta.key.clone(), meta);
    }

    /// Declares a producer→consumer edge, binding the consumer's input slot
    /// to the producer's output buffer.
    pub fn add_edge(&mut self, edge: ir::Edge) -> Result<(), RuntimeError> {
        let source_meta = self
            .meta
            .get(&edge.source.node)
            .ok_or_else(|| RuntimeError::UnknownNodeKey(edge.source.node.clone()))?;
        let output_index = source_meta
            .outputs
            .iter()
            .position(|p| p.name == edge.source.param)
            .ok_or_else(|| RuntimeError::UnknownParam {
                node: edge.source.node.clone(),
                param: edge.source.param.clone(),
            })?;
        let target_meta = self
            .meta
            .get(&edge.target.node)
            .ok_or_else(|| RuntimeError::UnknownNodeKey(edge.target.node.clone()))?;
        let input_index = target_meta
            .inputs
            .iter()
            .position(|p| p.name == edge.target.param)
            .ok_or_else(|| RuntimeError::UnknownParam {
                node: edge.target.node.clone(),
                param: edge.target.param.clone(),
            })?;
        let io = self
            .io
            .get_mut(&edge.target.node)
            .expect("io allocated with meta");
        io.inputs[input_index].source = Some((edge.source.node.clone(), output_index));
        Ok(())
    }

    pub fn has_node(&self, key: &str) -> bool {
        self.meta.contains_key(key)
    }

    /// Appends each series in the frame to the corresponding channel's
    /// accumulation. Series for unregistered channels are silently dropped.
    pub fn ingest(&mut self, frame: Frame) {
        for (key, series) in frame {
            if self.channels.contains_key(&key) {
                self.reads.entry(key).or_default().series.push(series);
            } else {
                debug!("dropping ingested series for unregistered channel {key}");
            }
        }
    }

    /// A deep copy of the channel's unconsumed series.
    pub fn read_channel(&self, key: ChannelKey) -> Result<MultiSeries, RuntimeError> {
        if !self.channels.contains_key(&key) {
            return Err(RuntimeError::ChannelNotFound(key));
        }
        match self.reads.get(&key) {
            Some(ms) if !ms.is_empty() => Ok(ms.deep_copy()),
            _ => Err(RuntimeError::NoData(key)),
        }
    }

    /// The most recent sample on a channel, if any. Used by the bindings'
    /// default-on-absence reads.
    pub fn latest_value(&self, key: ChannelKey) -> Option<SampleValue> {
        self.reads.get(&key)?.latest()
    }

    /// Enqueues an outgoing write; the channel's index channel, when known,
    /// receives the parallel timestamp series.
    pub fn write_channel(&mut self, key: ChannelKey, data: Series, time: Series) {
        if let Some(&index) = self.indexes.get(&key) {
            if index != 0 {
                self.writes.insert(index, time);
            }
        }
        self.writes.insert(key, data);
    }

    /// Routes persistent-state calls from the bindings to the node currently
    /// executing.
    pub fn set_current_node(&mut self, key: &str) {
        self.current_node.clear();
        self.current_node.push_str(key);
    }

    pub fn current_node(&self) -> &str {
        &self.current_node
    }

    /// Refreshes `node`'s input snapshots from its producers.
    ///
    /// Every connected input must have a non-empty upstream output before
    /// anything is copied; inputs whose `(size, identity)` watermark
    /// advanced are deep-copied in, and an unconnected input installs its
    /// default exactly once. Returns whether any input triggered.
    pub fn refresh_inputs(&mut self, node: &str) -> bool {
        let Some(io) = self.io.get(node) else {
            return false;
        };
        let slots: Vec<(Option<(String, usize)>, bool)> = io
            .inputs
            .iter()
            .map(|slot| (slot.source.clone(), slot.default_consumed))
            .collect();

        // AND-readiness: a node with a disconnected producer is not ready.
        for (source, _) in &slots {
            if let Some((src, output_index)) = source {
                let ready = self
                    .io
                    .get(src)
                    .and_then(|n| n.outputs.get(*output_index))
                    .is_some_and(|out| !out.data.is_empty());
                if !ready {
                    return false;
                }
            }
        }

        let mut triggered = false;
        for (i, (source, default_consumed)) in slots.iter().enumerate() {
            match source {
                Some((src, output_index)) => {
                    let upstream = &self.io[src].outputs[*output_index];
                    let mark = (upstream.data.len(), upstream.ident);
                    if self.io[node].inputs[i].watermark == Some(mark) {
                        continue;
                    }
                    let (data, time) = (upstream.data.deep_copy(), upstream.time.deep_copy());
                    let slot = &mut self.io.get_mut(node).expect("checked above").inputs[i];
                    slot.data = data;
                    slot.time = time;
                    slot.watermark = Some(mark);
                    triggered = true;
                }
                None => {
                    if *default_consumed {
                        continue;
                    }
                    let slot = &mut self.io.get_mut(node).expect("checked above").inputs[i];
                    let Some(default) = slot.default.clone() else {
                        continue;
                    };
                    slot.data = Series::from_sample(&default);
                    slot.time = Series::from_vec(vec![TimeStamp::now()]);
                    slot.default_consumed = true;
                    triggered = true;
                }
            }
        }
        triggered
    }

    /// The consumer-side snapshot of an input.
    pub fn input(&self, node: &str, index: usize) -> Option<&Series> {
        self.io.get(node)?.inputs.get(index).map(|s| &s.data)
    }

    pub fn input_time(&self, node: &str, index: usize) -> Option<&Series> {
        self.io.get(node)?.inputs.get(index).map(|s| &s.time)
    }

    /// The producer-owned output buffer. Content is replaced each tick the
    /// node fires; output and time series must be kept the same length.
    pub fn output_mut(&mut self, node: &str, index: usize) -> Option<&mut Series> {
        self.io
            .get_mut(node)?
            .outputs
            .get_mut(index)
            .map(|o| &mut o.data)
    }

    pub fn output_time_mut(&mut self, node: &str, index: usize) -> Option<&mut Series> {
        self.io
            .get_mut(node)?
            .outputs
            .get_mut(index)
            .map(|o| &mut o.time)
    }

    /// Replaces a node's output and time series in one call, keeping the
    /// equal-length invariant checked.
    pub fn set_output(&mut self, node: &str, index: usize, data: Series, time: Series) -> bool {
        if data.len() != time.len() {
            return false;
        }
        let Some(out) = self.io.get_mut(node).and_then(|n| n.outputs.get_mut(index)) else {
            return false;
        };
        out.data = data;
        out.time = time;
        true
    }

    /// Ends the tick: returns the pending writes, trims every channel's
    /// accumulation to its most recent series so the next tick still sees
    /// the latest sample, promotes staged persistent values, and reclaims
    /// every transient handle.
    pub fn flush(&mut self) -> Vec<(ChannelKey, Series)> {
        for ms in self.reads.values_mut() {
            if ms.series.len() > 1 {
                let last = ms.series.pop().expect("len checked");
                ms.series.clear();
                ms.series.push(last);
            }
        }
        let writes = std::mem::take(&mut self.writes).into_iter().collect();
        self.store.promote(&self.arena);
        self.arena.reset();
        writes
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("channels", &self.channels.len())
            .field("nodes", &self.meta.len())
            .field("current_node", &self.current_node)
            .finish()
    }
}

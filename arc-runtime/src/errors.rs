use std::sync::Arc;

use arc_types::errors::{BoxedError, ErrorKind};
use arc_types::telem::ChannelKey;
use arc_types::thiserror::Error;

/// Every error the execution core can produce.
///
/// The non-fatal variants map onto [`ErrorKind`]s and flow through the
/// runtime's error handler; the rest are construction or startup failures
/// that prevent the runtime from reaching its running state.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("input queue full")]
    QueueFullInput,
    #[error("output queue full")]
    QueueFullOutput,
    #[error("runtime closed")]
    RuntimeClosed,
    #[error("channel {0} not found")]
    ChannelNotFound(ChannelKey),
    #[error("no data for channel {0}")]
    NoData(ChannelKey),
    #[error("wasm panic: {0}")]
    WasmPanic(String),
    #[error("temporary hardware error: {0}")]
    TemporaryHardware(String),
    #[error("critical hardware error: {0}")]
    CriticalHardware(String),

    #[error("adding this edge would have created a cycle")]
    WouldCycle,
    #[error("duplicate node key: {0}")]
    DuplicateNodeKey(String),
    #[error("edge references unknown node: {0}")]
    UnknownNodeKey(String),
    #[error("edge references unknown param {param} on node {node}")]
    UnknownParam { node: String, param: String },
    #[error("series length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("failed to load wasm module: {0}")]
    ModuleLoad(#[source] BoxedError),
    #[error("missing wasm export for node {0}")]
    MissingExport(String),
    #[error("failed to retrieve channel digests: {0}")]
    RetrieveChannels(#[source] BoxedError),
    #[error("node {node} failed: {source}")]
    Node {
        node: String,
        #[source]
        source: BoxedError,
    },
    #[error("cannot spawn worker thread: {0}")]
    CannotSpawnWorkerThread(#[from] std::io::Error),
}

impl RuntimeError {
    /// The non-fatal kind this error reports as, if any.
    pub fn kind(&self) -> Option<ErrorKind> {
        Some(match self {
            RuntimeError::QueueFullInput => ErrorKind::QueueFullInput,
            RuntimeError::QueueFullOutput => ErrorKind::QueueFullOutput,
            RuntimeError::RuntimeClosed => ErrorKind::RuntimeClosed,
            RuntimeError::ChannelNotFound(_) => ErrorKind::ChannelNotFound,
            RuntimeError::NoData(_) => ErrorKind::NoData,
            RuntimeError::WasmPanic(_) => ErrorKind::WasmPanic,
            RuntimeError::TemporaryHardware(_) => ErrorKind::TemporaryHardware,
            RuntimeError::CriticalHardware(_) => ErrorKind::CriticalHardware,
            _ => return None,
        })
    }
}

impl<T> From<daggy::WouldCycle<T>> for RuntimeError {
    fn from(_: daggy::WouldCycle<T>) -> Self {
        RuntimeError::WouldCycle
    }
}

/// The host's callback for every non-fatal condition. Deduplication is the
/// host's problem.
pub type Handler = Arc<dyn Fn(&RuntimeError) + Send + Sync>;

/// A handler that drops every error, for hosts that do not care.
pub fn noop_handler() -> Handler {
    Arc::new(|_| {})
}

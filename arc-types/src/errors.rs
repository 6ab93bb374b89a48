//! The workspace-wide error taxonomy.

use thiserror::Error;

/// A type-erased error, the lingua franca between node implementations and
/// the runtime's error handler.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Non-fatal error kinds the runtime reports through its error handler.
///
/// Kinds, not types: the queue layer produces the first three, state the next
/// two, and the sandbox / hardware integrations the rest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
    #[error("input queue full")]
    QueueFullInput,
    #[error("output queue full")]
    QueueFullOutput,
    #[error("runtime closed")]
    RuntimeClosed,
    #[error("channel not found")]
    ChannelNotFound,
    #[error("no data")]
    NoData,
    #[error("wasm panic")]
    WasmPanic,
    #[error("temporary hardware error")]
    TemporaryHardware,
    #[error("critical hardware error")]
    CriticalHardware,
}

/// Failure while decoding the wire layout of a series or frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("buffer ended mid-value")]
    Truncated,
    #[error("unknown data type {0:?}")]
    UnknownDataType(String),
    #[error("byte length is not a multiple of the sample density")]
    Misaligned,
}

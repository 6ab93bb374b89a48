//! Shared data model for the Arc execution core.
//!
//! Everything that crosses a crate boundary lives here: the telemetry
//! primitives ([`telem`]), the compiled-program description ([`ir`]) and the
//! error taxonomy ([`errors`]). Downstream crates also pull their ambient
//! dependencies through the re-exports below so the whole workspace tracks a
//! single version of each.

pub mod errors;
pub mod ir;
pub mod telem;

// Ambient re-exports.
pub use bytes;
pub use chrono;
pub use log;
pub use parking_lot;
pub use serde;
pub use thiserror;
pub use tracing;

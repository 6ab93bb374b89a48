use std::sync::atomic::{AtomicU32, Ordering};

use arc_types::log::error;

use crate::errors::{Handler, RuntimeError};

/// Records non-fatal errors, forwards them to the host's handler and counts
/// them.
///
/// It panics when an error threshold is set and reached.
pub struct ErrorManager {
    handler: Handler,
    threshold: Option<u32>,
    count: AtomicU32,
}

impl ErrorManager {
    pub fn new(handler: Handler) -> Self {
        Self {
            handler,
            threshold: None,
            count: AtomicU32::new(0),
        }
    }

    pub fn with_threshold(handler: Handler, threshold: u32) -> Self {
        Self {
            handler,
            threshold: Some(threshold),
            count: AtomicU32::new(0),
        }
    }

    pub fn report(&self, err: &RuntimeError) {
        error!("{}", err);
        (self.handler)(err);
        let count = self.count.fetch_add(1, Ordering::SeqCst);
        if let Some(threshold) = self.threshold {
            if count >= threshold {
                panic!("Error threshold reached: {}", threshold);
            }
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ErrorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorManager")
            .field("threshold", &self.threshold)
            .field("count", &self.count)
            .finish()
    }
}

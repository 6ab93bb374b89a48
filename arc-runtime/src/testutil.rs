//! Shared doubles for the integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_types::errors::ErrorKind;
use arc_types::ir::{Node as IrNode, Param};
use arc_types::parking_lot::Mutex;
use arc_types::telem::DataType;

use crate::breaker::Breaker;
use crate::errors::{Handler, RuntimeError};
use crate::notify::{Event, Notifier};
use crate::tick::Loop;

/// A loop whose behavior is fully observable: counts every call and blocks
/// `wait` for at most ten milliseconds.
pub struct MockLoop {
    pub start_count: AtomicUsize,
    pub wake_count: AtomicUsize,
    pub wait_count: AtomicUsize,
    pub watch_count: AtomicUsize,
    event: Arc<Event>,
}

impl MockLoop {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_count: AtomicUsize::new(0),
            wake_count: AtomicUsize::new(0),
            wait_count: AtomicUsize::new(0),
            watch_count: AtomicUsize::new(0),
            event: Event::new(),
        })
    }
}

impl Loop for MockLoop {
    fn start(&self) -> Result<(), RuntimeError> {
        self.start_count.fetch_add(1, Ordering::SeqCst);
        self.event.take();
        Ok(())
    }

    fn wait(&self, breaker: &Breaker) {
        self.wait_count.fetch_add(1, Ordering::SeqCst);
        if breaker.running() {
            self.event.wait_timeout(Duration::from_millis(10));
        }
    }

    fn wake(&self) {
        self.wake_count.fetch_add(1, Ordering::SeqCst);
        self.event.set();
    }

    fn watch(&self, notifier: &Notifier) -> bool {
        self.watch_count.fetch_add(1, Ordering::SeqCst);
        notifier.subscribe(self.event.clone());
        true
    }
}

/// Everything the error handler saw, by kind and message.
#[derive(Debug, Default)]
pub struct ErrorLog {
    entries: Mutex<Vec<(Option<ErrorKind>, String)>>,
}

impl ErrorLog {
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn kinds(&self) -> Vec<Option<ErrorKind>> {
        self.entries.lock().iter().map(|(k, _)| *k).collect()
    }

    pub fn count_of(&self, kind: ErrorKind) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|(k, _)| *k == Some(kind))
            .count()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries.lock().iter().map(|(_, m)| m.clone()).collect()
    }
}

/// A handler that records every reported error.
pub fn error_log() -> (Handler, Arc<ErrorLog>) {
    let log = Arc::new(ErrorLog::default());
    let sink = log.clone();
    let handler: Handler = Arc::new(move |err: &RuntimeError| {
        sink.entries.lock().push((err.kind(), err.to_string()));
    });
    (handler, log)
}

/// An IR node with float inputs/outputs named per the given lists.
pub fn ir_node(key: &str, inputs: &[&str], outputs: &[&str]) -> IrNode {
    IrNode {
        key: key.to_string(),
        type_tag: key.to_string(),
        inputs: inputs
            .iter()
            .map(|name| Param::new(*name, DataType::F32))
            .collect(),
        outputs: outputs
            .iter()
            .map(|name| Param::new(*name, DataType::F32))
            .collect(),
    }
}

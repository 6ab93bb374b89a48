//! Wake-up plumbing between the queues and the tick loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_types::parking_lot::{Condvar, Mutex};

/// A one-shot, re-armable wake flag. Loops block on it; producers set it.
#[derive(Debug, Default)]
pub struct Event {
    fired: Mutex<bool>,
    cv: Condvar,
}

impl Event {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fires the event, waking any waiter.
    pub fn set(&self) {
        *self.fired.lock() = true;
        self.cv.notify_all();
    }

    /// Clears the event, returning whether it was fired.
    pub fn take(&self) -> bool {
        std::mem::take(&mut *self.fired.lock())
    }

    /// Blocks until the event fires or `timeout` elapses. Clears the flag
    /// and returns whether it fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut fired = self.fired.lock();
        if !*fired {
            self.cv.wait_for(&mut fired, timeout);
        }
        std::mem::take(&mut *fired)
    }

    /// Blocks until the event fires or `deadline` passes.
    pub fn wait_deadline(&self, deadline: Instant) -> bool {
        let mut fired = self.fired.lock();
        while !*fired {
            if self.cv.wait_until(&mut fired, deadline).timed_out() {
                break;
            }
        }
        std::mem::take(&mut *fired)
    }
}

/// An edge-triggered notification source with a monotonic generation
/// counter.
///
/// Waiters either poll [`Notifier::wait_newer`] against a generation they
/// have seen, or subscribe an [`Event`] to be fired on every notification.
#[derive(Debug, Default)]
pub struct Notifier {
    generation: Mutex<u64>,
    cv: Condvar,
    watchers: Mutex<Vec<Arc<Event>>>,
}

impl Notifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notify(&self) {
        *self.generation.lock() += 1;
        self.cv.notify_all();
        for watcher in self.watchers.lock().iter() {
            watcher.set();
        }
    }

    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Blocks until the generation moves past `seen` or `timeout` elapses;
    /// returns the current generation either way.
    pub fn wait_newer(&self, seen: u64, timeout: Duration) -> u64 {
        let mut generation = self.generation.lock();
        if *generation == seen {
            self.cv.wait_for(&mut generation, timeout);
        }
        *generation
    }

    /// Registers an event to be fired on every notification.
    pub fn subscribe(&self, event: Arc<Event>) {
        self.watchers.lock().push(event);
    }
}

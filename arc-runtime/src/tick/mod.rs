//! Decides when a tick starts and on what thread terms.
//!
//! The runtime calls [`Loop::start`] from the tick thread itself, so modes
//! that adjust scheduling policy bind it to the right thread. `wait`
//! suspends until the next tick moment, a wake, or the breaker tripping;
//! `wake` is idempotent with respect to a pending wait; `watch` registers an
//! additional event source the loop fires a tick on.

mod os;

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_types::parking_lot::Mutex;
use arc_types::serde::{Deserialize, Serialize};

use crate::breaker::Breaker;
use crate::errors::RuntimeError;
use crate::notify::{Event, Notifier};

/// How the loop paces ticks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(crate = "arc_types::serde")]
pub enum Mode {
    /// Tight loop, no sleep. Maximum throughput, maximum CPU.
    BusyWait,
    /// Periodic at the configured interval using a precise sleep.
    #[default]
    HighRate,
    /// Realtime-priority thread with pinned CPU affinity, waiting on an
    /// event.
    RtEvent,
    /// Periodic until an event arrives, reacting to it early.
    Hybrid,
    /// Pure event-driven; runs only on a wake or a watched notifier.
    EventDriven,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(crate = "arc_types::serde")]
pub struct Config {
    pub mode: Mode,
    /// Tick period for the periodic modes.
    pub interval: Duration,
    /// `SCHED_FIFO` priority; applies to `RtEvent` and `Hybrid` only.
    pub rt_priority: i32,
    /// CPU to pin the tick thread to; `-1` means unpinned.
    pub cpu_affinity: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            interval: Duration::from_millis(10),
            rt_priority: 47,
            cpu_affinity: -1,
        }
    }
}

/// The tick driver contract. Implementations use interior synchronization;
/// `wake` and `watch` may be called from any thread while `wait` blocks.
pub trait Loop: Send + Sync {
    /// One-time per-run setup on the tick thread. Non-fatal on failure; the
    /// runtime reports the error and continues degraded.
    fn start(&self) -> Result<(), RuntimeError>;

    /// Suspends until the next tick moment, a wake signal, or the breaker
    /// tripping.
    fn wait(&self, breaker: &Breaker);

    /// Forces the pending (or next) wait to return.
    fn wake(&self);

    /// Offers an extra event source. Returns whether the loop accepted it;
    /// a loop that did fires a tick whenever the notifier does.
    fn watch(&self, notifier: &Notifier) -> bool;
}

/// Builds the loop for a config.
pub fn create(config: &Config) -> Arc<dyn Loop> {
    match config.mode {
        Mode::BusyWait => Arc::new(BusyWaitLoop::new()),
        Mode::HighRate => Arc::new(HighRateLoop::new(config.interval)),
        Mode::RtEvent => Arc::new(RtEventLoop::new(config.rt_priority, config.cpu_affinity)),
        Mode::Hybrid => Arc::new(HybridLoop::new(
            config.interval,
            config.rt_priority,
            config.cpu_affinity,
        )),
        Mode::EventDriven => Arc::new(EventDrivenLoop::new()),
    }
}

/// Interval below which the periodic modes stop sleeping and spin.
const SPIN_MARGIN: Duration = Duration::from_micros(200);

/// Granularity at which blocked waits re-check the breaker.
const BREAKER_POLL: Duration = Duration::from_millis(50);

fn next_deadline(previous: Option<Instant>, interval: Duration) -> Instant {
    let now = Instant::now();
    match previous {
        // Catch up rather than burst when a tick overran.
        Some(prev) if prev + interval > now => prev + interval,
        _ => now + interval,
    }
}

pub struct BusyWaitLoop {
    event: Arc<Event>,
}

impl BusyWaitLoop {
    pub fn new() -> Self {
        Self { event: Event::new() }
    }
}

impl Default for BusyWaitLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Loop for BusyWaitLoop {
    fn start(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn wait(&self, _breaker: &Breaker) {
        self.event.take();
        std::hint::spin_loop();
    }

    fn wake(&self) {
        self.event.set();
    }

    fn watch(&self, _notifier: &Notifier) -> bool {
        false
    }
}

pub struct HighRateLoop {
    interval: Duration,
    event: Arc<Event>,
    deadline: Mutex<Option<Instant>>,
}

impl HighRateLoop {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            event: Event::new(),
            deadline: Mutex::new(None),
        }
    }
}

impl Loop for HighRateLoop {
    fn start(&self) -> Result<(), RuntimeError> {
        *self.deadline.lock() = None;
        self.event.take();
        Ok(())
    }

    fn wait(&self, breaker: &Breaker) {
        let deadline = next_deadline(*self.deadline.lock(), self.interval);
        loop {
            if !breaker.running() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let remaining = deadline - now;
            if remaining > SPIN_MARGIN {
                let coarse = deadline - SPIN_MARGIN;
                if self.event.wait_deadline(coarse.min(now + BREAKER_POLL)) {
                    return;
                }
            } else {
                // Final stretch: spin for precision.
                while Instant::now() < deadline && breaker.running() {
                    if self.event.take() {
                        return;
                    }
                    std::hint::spin_loop();
                }
                break;
            }
        }
        *self.deadline.lock() = Some(deadline);
    }

    fn wake(&self) {
        self.event.set();
    }

    fn watch(&self, _notifier: &Notifier) -> bool {
        false
    }
}

pub struct EventDrivenLoop {
    event: Arc<Event>,
}

impl EventDrivenLoop {
    pub fn new() -> Self {
        Self { event: Event::new() }
    }
}

impl Default for EventDrivenLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Loop for EventDrivenLoop {
    fn start(&self) -> Result<(), RuntimeError> {
        self.event.take();
        Ok(())
    }

    fn wait(&self, breaker: &Breaker) {
        while breaker.running() {
            if self.event.wait_timeout(BREAKER_POLL) {
                return;
            }
        }
    }

    fn wake(&self) {
        self.event.set();
    }

    fn watch(&self, notifier: &Notifier) -> bool {
        notifier.subscribe(self.event.clone());
        true
    }
}

pub struct RtEventLoop {
    inner: EventDrivenLoop,
    priority: i32,
    affinity: i32,
}

impl RtEventLoop {
    pub fn new(priority: i32, affinity: i32) -> Self {
        Self {
            inner: EventDrivenLoop::new(),
            priority,
            affinity,
        }
    }
}

impl Loop for RtEventLoop {
    fn start(&self) -> Result<(), RuntimeError> {
        os::set_realtime_priority(self.priority);
        os::set_cpu_affinity(self.affinity);
        self.inner.start()
    }

    fn wait(&self, breaker: &Breaker) {
        self.inner.wait(breaker);
    }

    fn wake(&self) {
        self.inner.wake();
    }

    fn watch(&self, notifier: &Notifier) -> bool {
        self.inner.watch(notifier)
    }
}

pub struct HybridLoop {
    interval: Duration,
    event: Arc<Event>,
    deadline: Mutex<Option<Instant>>,
    priority: i32,
    affinity: i32,
}

impl HybridLoop {
    pub fn new(interval: Duration, priority: i32, affinity: i32) -> Self {
        Self {
            interval,
            event: Event::new(),
            deadline: Mutex::new(None),
            priority,
            affinity,
        }
    }
}

impl Loop for HybridLoop {
    fn start(&self) -> Result<(), RuntimeError> {
        os::set_realtime_priority(self.priority);
        os::set_cpu_affinity(self.affinity);
        *self.deadline.lock() = None;
        self.event.take();
        Ok(())
    }

    fn wait(&self, breaker: &Breaker) {
        let deadline = next_deadline(*self.deadline.lock(), self.interval);
        while breaker.running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            // Event arrival cuts the period short.
            if self.event.wait_deadline(deadline.min(now + BREAKER_POLL)) {
                return;
            }
        }
        *self.deadline.lock() = Some(deadline);
    }

    fn wake(&self) {
        self.event.set();
    }

    fn watch(&self, notifier: &Notifier) -> bool {
        notifier.subscribe(self.event.clone());
        true
    }
}

//! The runtime lifecycle: two long-lived threads, two queues, one breaker.
//!
//! After `start()` the tick thread drives ingest → schedule → flush and the
//! notify thread bridges queue arrivals to the loop for modes that do not
//! watch notifiers themselves. External producers `write` into the input
//! queue and consumers `read` from the output queue, each single-threaded on
//! their side of the boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};
use std::time::Duration;

use arc_types::errors::BoxedError;
use arc_types::ir::Digest;
use arc_types::log::{debug, error};
use arc_types::parking_lot::Mutex;
use arc_types::telem::{ChannelKey, Frame};

use crate::breaker::{self, Breaker};
use crate::error_manager::ErrorManager;
use crate::errors::{Handler, RuntimeError};
use crate::module::Module;
use crate::node::Node;
use crate::notify::Notifier;
use crate::queue::{frame_queue, FrameReceiver, FrameSender, QueueCloser, QueueSide};
use crate::scheduler::Scheduler;
use crate::state::{Config as StateConfig, SharedState, State};
use crate::tick::{self, Loop};
use crate::wasm::{Bindings, Sandbox, WasmNode};

/// The callback the core uses at startup to learn channel types and index
/// channels from the cluster.
pub type RetrieveChannels =
    Arc<dyn Fn(&[ChannelKey]) -> Result<Vec<Digest>, BoxedError> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub input_queue_capacity: usize,
    pub output_queue_capacity: usize,
    /// Retry schedule for startup reconnections; not part of the tick path.
    pub breaker: breaker::Config,
    pub tick: tick::Config,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            input_queue_capacity: 256,
            output_queue_capacity: 256,
            breaker: breaker::Config::default(),
            tick: tick::Config::default(),
        }
    }
}

/// The core-side halves of the queue boundary, parked here until a run's
/// tick thread consumes them.
struct PendingQueues {
    input_rx: FrameReceiver,
    output_tx: FrameSender,
    input_closer: QueueCloser,
    output_closer: QueueCloser,
    input_notifier: Arc<Notifier>,
}

struct RunHandles {
    tick_thread: JoinHandle<Scheduler>,
    notify_thread: JoinHandle<()>,
    input_closer: QueueCloser,
    output_closer: QueueCloser,
    input_notifier: Arc<Notifier>,
}

pub struct Runtime {
    config: RuntimeConfig,
    module: Option<Module>,
    retrieve_channels: Option<RetrieveChannels>,
    state: SharedState,
    /// The scheduler parks here between runs; the tick thread owns it while
    /// running.
    scheduler_slot: Mutex<Option<Scheduler>>,
    looper: Arc<dyn Loop>,
    read_keys: Vec<ChannelKey>,
    write_keys: Vec<ChannelKey>,
    errors: Arc<ErrorManager>,
    breaker: Arc<Breaker>,
    run: Mutex<Option<RunHandles>>,
    pending: Mutex<Option<PendingQueues>>,
    input: Mutex<Option<FrameSender>>,
    output: Mutex<Option<FrameReceiver>>,
}

impl Runtime {
    /// Builds a runtime. `state`, `scheduler` and `looper` are injectable;
    /// when absent they are derived from `module` and `config`. The queue
    /// boundary exists from construction, so producers may write ahead of
    /// the first `start()`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RuntimeConfig,
        module: Option<Module>,
        retrieve_channels: Option<RetrieveChannels>,
        state: Option<SharedState>,
        scheduler: Option<Scheduler>,
        looper: Option<Arc<dyn Loop>>,
        read_keys: Vec<ChannelKey>,
        write_keys: Vec<ChannelKey>,
        on_error: Handler,
    ) -> Result<Self, RuntimeError> {
        let state = match state {
            Some(state) => state,
            None => State::shared(StateConfig {
                ir: module.as_ref().map(|m| m.ir.clone()).unwrap_or_default(),
                channels: Vec::new(),
            })?,
        };
        let looper = looper.unwrap_or_else(|| tick::create(&config.tick));
        let breaker = Arc::new(Breaker::new(config.breaker.clone()));
        let runtime = Self {
            config,
            module,
            retrieve_channels,
            state,
            scheduler_slot: Mutex::new(scheduler),
            looper,
            read_keys,
            write_keys,
            errors: Arc::new(ErrorManager::new(on_error)),
            breaker,
            run: Mutex::new(None),
            pending: Mutex::new(None),
            input: Mutex::new(None),
            output: Mutex::new(None),
        };
        runtime.open_queues();
        Ok(runtime)
    }

    /// Creates a fresh queue pair, replacing the external halves.
    fn open_queues(&self) {
        let (input_tx, input_rx, input_closer, input_notifier) =
            frame_queue(QueueSide::Input, self.config.input_queue_capacity);
        let (output_tx, output_rx, output_closer, _) =
            frame_queue(QueueSide::Output, self.config.output_queue_capacity);
        *self.input.lock() = Some(input_tx);
        *self.output.lock() = Some(output_rx);
        *self.pending.lock() = Some(PendingQueues {
            input_rx,
            output_tx,
            input_closer,
            output_closer,
            input_notifier,
        });
    }

    /// Brings the runtime to its running state. Returns true only on the
    /// first call after construction or after a completed `stop()`.
    pub fn start(&self) -> bool {
        let mut run = self.run.lock();
        if run.is_some() {
            return false;
        }
        self.breaker.start();
        self.breaker.reset();

        if !self.retrieve_digests() {
            self.breaker.stop();
            return false;
        }

        let scheduler = match self.scheduler_slot.lock().take() {
            Some(scheduler) => scheduler,
            None => match self.build_scheduler() {
                Ok(scheduler) => scheduler,
                Err(e) => {
                    self.errors.report(&e);
                    self.breaker.stop();
                    return false;
                }
            },
        };

        // A previous run consumed (and closed) its queues; open fresh ones.
        if self.pending.lock().is_none() {
            self.open_queues();
        }
        let queues = self.pending.lock().take().expect("queues just opened");

        let tick_state = self.state.clone();
        let tick_loop = self.looper.clone();
        let tick_breaker = self.breaker.clone();
        let tick_errors = self.errors.clone();
        let tick_notifier = queues.input_notifier.clone();
        let input_rx = queues.input_rx;
        let output_tx = queues.output_tx;
        let tick_thread = Builder::new().name("arc-tick".into()).spawn(move || {
            run_tick_loop(
                scheduler,
                tick_state,
                tick_loop,
                tick_breaker,
                tick_errors,
                input_rx,
                output_tx,
                tick_notifier,
            )
        });
        let tick_thread = match tick_thread {
            Ok(handle) => handle,
            Err(e) => {
                self.errors.report(&RuntimeError::CannotSpawnWorkerThread(e));
                self.breaker.stop();
                return false;
            }
        };

        let notify_loop = self.looper.clone();
        let notify_breaker = self.breaker.clone();
        let notify_notifier = queues.input_notifier.clone();
        let notify_thread = Builder::new().name("arc-notify".into()).spawn(move || {
            let mut seen = notify_notifier.generation();
            while notify_breaker.running() {
                let current = notify_notifier.wait_newer(seen, Duration::from_millis(100));
                if !notify_breaker.running() {
                    break;
                }
                if current != seen {
                    seen = current;
                    notify_loop.wake();
                }
            }
        });
        let notify_thread = match notify_thread {
            Ok(handle) => handle,
            Err(e) => {
                self.errors.report(&RuntimeError::CannotSpawnWorkerThread(e));
                self.breaker.stop();
                self.looper.wake();
                if let Ok(scheduler) = tick_thread.join() {
                    *self.scheduler_slot.lock() = Some(scheduler);
                }
                return false;
            }
        };

        *run = Some(RunHandles {
            tick_thread,
            notify_thread,
            input_closer: queues.input_closer,
            output_closer: queues.output_closer,
            input_notifier: queues.input_notifier,
        });
        debug!("runtime started");
        true
    }

    /// Tears the running state down. Returns true only on the first call
    /// after a completed `start()`.
    pub fn stop(&self) -> bool {
        let mut run = self.run.lock();
        let Some(handles) = run.take() else {
            return false;
        };
        // Close the output queue before joining the tick thread so a blocked
        // reader wakes instead of deadlocking the join.
        handles.output_closer.close();
        handles.input_closer.close();
        self.breaker.stop();
        self.looper.wake();
        handles.input_notifier.notify();
        match handles.tick_thread.join() {
            Ok(scheduler) => *self.scheduler_slot.lock() = Some(scheduler),
            Err(_) => error!("tick thread panicked during shutdown"),
        }
        if handles.notify_thread.join().is_err() {
            error!("notify thread panicked during shutdown");
        }
        // Writes now fail with the closed error until the next start.
        *self.input.lock() = None;
        debug!("runtime stopped");
        true
    }

    /// Pushes a frame onto the input queue. Every failure is reported
    /// through the error handler as well as returned.
    pub fn write(&self, frame: Frame) -> Result<(), RuntimeError> {
        let input = self.input.lock();
        let Some(sender) = input.as_ref() else {
            let err = RuntimeError::RuntimeClosed;
            self.errors.report(&err);
            return Err(err);
        };
        match sender.push(frame) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.errors.report(&err);
                Err(err)
            }
        }
    }

    /// Pops a frame from the output queue, blocking until data arrives or
    /// the queue closes. Returns false when closed and drained.
    pub fn read(&self, out: &mut Frame) -> bool {
        let output = self.output.lock();
        let Some(receiver) = output.as_ref() else {
            return false;
        };
        match receiver.pop() {
            Some(frame) => {
                *out = frame;
                true
            }
            None => false,
        }
    }

    /// Closes the output queue early to unblock consumers during shutdown.
    pub fn close_outputs(&self) {
        if let Some(handles) = self.run.lock().as_ref() {
            handles.output_closer.close();
        }
    }

    fn retrieve_digests(&self) -> bool {
        let Some(retrieve) = &self.retrieve_channels else {
            return true;
        };
        let mut keys = self.read_keys.clone();
        keys.extend_from_slice(&self.write_keys);
        loop {
            match retrieve(&keys) {
                Ok(digests) => {
                    let mut state = self.state.lock();
                    for digest in &digests {
                        state.register_digest(digest);
                    }
                    self.breaker.reset();
                    return true;
                }
                Err(source) => {
                    self.errors.report(&RuntimeError::RetrieveChannels(source));
                    if !self.breaker.wait("retrieve channel digests") {
                        return false;
                    }
                }
            }
        }
    }

    /// Builds the scheduler from the module: the graph from its IR and one
    /// sandboxed node per graph node when the module carries wasm.
    ///
    /// With neither a module nor an injected scheduler the runtime runs an
    /// empty graph: ticks drain the input queue and flush nothing. That is
    /// the intended shape for hosts that only exercise the queue boundary.
    fn build_scheduler(&self) -> Result<Scheduler, RuntimeError> {
        let Some(module) = &self.module else {
            return Scheduler::new(&Default::default(), HashMap::new());
        };
        let mut impls: HashMap<String, Box<dyn Node>> = HashMap::new();
        if let Some(wasm) = &module.wasm {
            let bindings = Bindings::new(Some(self.state.clone()), self.errors.clone());
            let sandbox = Arc::new(Mutex::new(Sandbox::load(wasm, bindings)?));
            for node in &module.ir.nodes {
                impls.insert(
                    node.key.clone(),
                    Box::new(WasmNode::new(sandbox.clone(), node.key.clone())),
                );
            }
        }
        Scheduler::new(&module.ir, impls)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.stop();
    }
}

#[allow(clippy::too_many_arguments)]
fn run_tick_loop(
    mut scheduler: Scheduler,
    state: SharedState,
    looper: Arc<dyn Loop>,
    breaker: Arc<Breaker>,
    errors: Arc<ErrorManager>,
    input: FrameReceiver,
    output: FrameSender,
    input_notifier: Arc<Notifier>,
) -> Scheduler {
    // start() runs on this thread so scheduling policy binds to it.
    if let Err(e) = looper.start() {
        errors.report(&e);
    }
    looper.watch(&input_notifier);

    while breaker.running() {
        looper.wait(&breaker);
        if !breaker.running() {
            break;
        }

        {
            let mut st = state.lock();
            while let Some(frame) = input.try_pop() {
                st.ingest(frame);
            }
        }

        scheduler.tick(&state, &errors);

        let writes = state.lock().flush();
        if !writes.is_empty() {
            let mut frame = Frame::with_capacity(writes.len());
            for (key, series) in writes {
                frame.push(key, series);
            }
            if let Err(e) = output.push(frame) {
                errors.report(&e);
            }
        }
    }
    scheduler
}

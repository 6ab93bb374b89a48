//! The bounded SPSC frame queues forming the runtime's concurrency boundary.
//!
//! The input queue is the only point at which external data crosses into the
//! core; the output queue is the only point at which internal data leaves.
//! Once closed, a queue stays closed; the runtime's start cycle creates
//! fresh ones.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_types::parking_lot::Mutex;
use arc_types::telem::Frame;
use crossbeam::channel::{bounded, Receiver, Select, Sender, TrySendError};

use crate::errors::RuntimeError;
use crate::notify::Notifier;

/// Which boundary a queue sits on; decides the error kind a full push
/// reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueSide {
    Input,
    Output,
}

impl QueueSide {
    fn full_error(self) -> RuntimeError {
        match self {
            QueueSide::Input => RuntimeError::QueueFullInput,
            QueueSide::Output => RuntimeError::QueueFullOutput,
        }
    }
}

#[derive(Debug)]
struct Shared {
    side: QueueSide,
    closed: AtomicBool,
}

/// Producer half. Single producer: not `Clone`.
pub struct FrameSender {
    tx: Sender<Frame>,
    shared: Arc<Shared>,
    notifier: Arc<Notifier>,
}

impl FrameSender {
    /// Moves a frame into the queue. Fails fast with the side's full error
    /// when at capacity, or with `RuntimeClosed` when the queue was closed.
    pub fn push(&self, frame: Frame) -> Result<(), RuntimeError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(RuntimeError::RuntimeClosed);
        }
        let was_empty = self.tx.is_empty();
        match self.tx.try_send(frame) {
            Ok(()) => {
                if was_empty {
                    self.notifier.notify();
                }
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(self.shared.side.full_error()),
            Err(TrySendError::Disconnected(_)) => Err(RuntimeError::RuntimeClosed),
        }
    }
}

/// Consumer half. Single consumer: not `Clone`.
pub struct FrameReceiver {
    rx: Receiver<Frame>,
    close_rx: Receiver<()>,
    shared: Arc<Shared>,
}

impl FrameReceiver {
    /// Blocks until a frame is available, the queue closes, or the producer
    /// side is dropped. Returns `None` only when the queue is closed and
    /// drained.
    pub fn pop(&self) -> Option<Frame> {
        if self.shared.closed.load(Ordering::Acquire) {
            return self.rx.try_recv().ok();
        }
        let mut sel = Select::new();
        let data = sel.recv(&self.rx);
        let close = sel.recv(&self.close_rx);
        loop {
            let op = sel.select();
            match op.index() {
                i if i == data => return op.recv(&self.rx).ok(),
                i if i == close => {
                    let _ = op.recv(&self.close_rx);
                    return self.rx.try_recv().ok();
                }
                _ => unreachable!(),
            }
        }
    }

    /// Non-blocking pop, used by the tick thread's start-of-tick drain.
    pub fn try_pop(&self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }
}

/// Closes a queue from outside either half.
pub struct QueueCloser {
    shared: Arc<Shared>,
    close_tx: Mutex<Option<Sender<()>>>,
}

impl QueueCloser {
    /// Permanently closes the queue for this run: pending pops wake, further
    /// pushes fail with `RuntimeClosed`.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.close_tx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

/// Creates a bounded SPSC frame queue. The returned notifier fires whenever
/// a push transitions the queue from empty to non-empty.
pub fn frame_queue(
    side: QueueSide,
    capacity: usize,
) -> (FrameSender, FrameReceiver, QueueCloser, Arc<Notifier>) {
    let (tx, rx) = bounded(capacity);
    let (close_tx, close_rx) = bounded(0);
    let shared = Arc::new(Shared {
        side,
        closed: AtomicBool::new(false),
    });
    let notifier = Notifier::new();
    (
        FrameSender {
            tx,
            shared: shared.clone(),
            notifier: notifier.clone(),
        },
        FrameReceiver {
            rx,
            close_rx,
            shared: shared.clone(),
        },
        QueueCloser {
            shared,
            close_tx: Mutex::new(Some(close_tx)),
        },
        notifier,
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use arc_types::telem::Series;

    fn frame(value: f32) -> Frame {
        Frame::single(1, Series::from_vec(vec![value]))
    }

    #[test]
    fn push_fails_fast_when_full() {
        let (tx, _rx, _closer, _n) = frame_queue(QueueSide::Input, 1);
        tx.push(frame(1.0)).unwrap();
        assert!(matches!(
            tx.push(frame(2.0)),
            Err(RuntimeError::QueueFullInput)
        ));
    }

    #[test]
    fn output_side_reports_output_kind() {
        let (tx, _rx, _closer, _n) = frame_queue(QueueSide::Output, 1);
        tx.push(frame(1.0)).unwrap();
        assert!(matches!(
            tx.push(frame(2.0)),
            Err(RuntimeError::QueueFullOutput)
        ));
    }

    #[test]
    fn frames_arrive_in_order() {
        let (tx, rx, _closer, _n) = frame_queue(QueueSide::Input, 4);
        tx.push(frame(1.0)).unwrap();
        tx.push(frame(2.0)).unwrap();
        assert_eq!(rx.pop().unwrap().get(1).unwrap().at::<f32>(0), Some(1.0));
        assert_eq!(rx.pop().unwrap().get(1).unwrap().at::<f32>(0), Some(2.0));
        assert!(rx.try_pop().is_none());
    }

    #[test]
    fn close_unblocks_pending_pop() {
        let (_tx, rx, closer, _n) = frame_queue(QueueSide::Output, 1);
        let handle = std::thread::spawn(move || rx.pop());
        std::thread::sleep(Duration::from_millis(20));
        closer.close();
        assert!(handle.join().unwrap().is_none());
    }

    #[test]
    fn close_drains_remaining_frames_before_ending() {
        let (tx, rx, closer, _n) = frame_queue(QueueSide::Output, 2);
        tx.push(frame(1.0)).unwrap();
        tx.push(frame(2.0)).unwrap();
        closer.close();
        assert!(rx.pop().is_some());
        assert!(rx.pop().is_some());
        assert!(rx.pop().is_none());
        assert!(matches!(tx.push(frame(3.0)), Err(RuntimeError::RuntimeClosed)));
    }

    #[test]
    fn dropped_producer_ends_pop() {
        let (tx, rx, _closer, _n) = frame_queue(QueueSide::Output, 1);
        tx.push(frame(1.0)).unwrap();
        drop(tx);
        assert!(rx.pop().is_some());
        assert!(rx.pop().is_none());
    }

    #[test]
    fn notifier_fires_on_empty_to_non_empty() {
        let (tx, rx, _closer, notifier) = frame_queue(QueueSide::Input, 4);
        let g0 = notifier.generation();
        tx.push(frame(1.0)).unwrap();
        assert_eq!(notifier.generation(), g0 + 1);
        // Second push onto a non-empty queue stays quiet.
        tx.push(frame(2.0)).unwrap();
        assert_eq!(notifier.generation(), g0 + 1);
        rx.pop().unwrap();
        rx.pop().unwrap();
        tx.push(frame(3.0)).unwrap();
        assert_eq!(notifier.generation(), g0 + 2);
    }
}

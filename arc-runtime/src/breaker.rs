//! A general purpose circuit breaker: scaled-interval retry plus the
//! runtime's single cancellation primitive.
//!
//! `stop()` trips the breaker; every blocking primitive in the core observes
//! it and returns promptly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_types::log::{error, info};
use arc_types::parking_lot::{Condvar, Mutex};

/// Tells the breaker to retry infinitely.
pub const RETRY_INFINITELY: i32 = -1;

#[derive(Clone, Debug)]
pub struct Config {
    /// Name used in log lines.
    pub name: String,
    /// The interval used on the first trigger, scaled on each successive
    /// retry by `scale`.
    pub base_interval: Duration,
    /// Maximum retries before `wait` returns false; [`RETRY_INFINITELY`]
    /// never gives up.
    pub max_retries: i32,
    /// Rate at which the interval grows per retry. Values below 1 are not
    /// recommended.
    pub scale: f32,
    /// Upper bound on the retry interval.
    pub max_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "breaker".to_string(),
            base_interval: Duration::from_secs(1),
            max_retries: 50,
            scale: 1.1,
            max_interval: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn child(&self, name: &str) -> Config {
        Config {
            name: format!("{}.{}", self.name, name),
            ..self.clone()
        }
    }
}

#[derive(Debug)]
struct Retry {
    interval: Duration,
    count: usize,
}

#[derive(Debug)]
pub struct Breaker {
    config: Config,
    retry: Mutex<Retry>,
    running: AtomicBool,
    mu: Mutex<()>,
    shutdown_cv: Condvar,
}

impl Breaker {
    pub fn new(config: Config) -> Self {
        let interval = config.base_interval;
        Self {
            config,
            retry: Mutex::new(Retry { interval, count: 0 }),
            running: AtomicBool::new(false),
            mu: Mutex::new(()),
            shutdown_cv: Condvar::new(),
        }
    }

    /// Starts the breaker, using it as the signaling mechanism for a thread
    /// to operate. Returns true if the breaker was not already started.
    pub fn start(&self) -> bool {
        !self.running.swap(true, Ordering::SeqCst)
    }

    /// Trips the breaker, preventing further retries and waking any waiter.
    /// Returns true if the breaker was running.
    pub fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        let _guard = self.mu.lock();
        self.shutdown_cv.notify_all();
        true
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Triggers the breaker. If the maximum retry count is exceeded, returns
    /// false immediately; otherwise sleeps for the current interval (or until
    /// the breaker is stopped) and returns true.
    pub fn wait(&self, message: &str) -> bool {
        if !self.running() {
            error!("[{}] breaker not started. Exiting.", self.config.name);
            return false;
        }
        let interval = {
            let mut retry = self.retry.lock();
            retry.count += 1;
            if self.config.max_retries != RETRY_INFINITELY
                && retry.count > self.config.max_retries as usize
            {
                error!(
                    "[{}] exceeded the maximum retry count of {}. Exiting. Error: {}.",
                    self.config.name, self.config.max_retries, message
                );
                retry.count = 0;
                retry.interval = self.config.base_interval;
                return false;
            }
            let attempts = if self.config.max_retries == RETRY_INFINITELY {
                format!("{}/∞", retry.count)
            } else {
                format!("{}/{}", retry.count, self.config.max_retries)
            };
            error!(
                "[{}] failed {} times. Retrying in {:.1} seconds. Error: {}",
                self.config.name,
                attempts,
                retry.interval.as_secs_f64(),
                message
            );
            retry.interval
        };

        let mut guard = self.mu.lock();
        self.shutdown_cv.wait_for(&mut guard, interval);
        drop(guard);

        if !self.running() {
            info!("[{}] is shutting down. Exiting.", self.config.name);
            self.reset();
            return false;
        }
        let mut retry = self.retry.lock();
        retry.interval = Duration::from_secs_f64(
            (retry.interval.as_secs_f64() * self.config.scale as f64)
                .min(self.config.max_interval.as_secs_f64()),
        );
        true
    }

    /// Sleeps for the given duration, returning early when the breaker is
    /// stopped.
    pub fn wait_for(&self, duration: Duration) {
        if !self.running() {
            return;
        }
        let mut guard = self.mu.lock();
        self.shutdown_cv.wait_for(&mut guard, duration);
    }

    /// Number of times `wait` has triggered since the last reset. A rough
    /// estimate, not synchronized with in-flight waits.
    pub fn retry_count(&self) -> usize {
        self.retry.lock().count
    }

    /// Resets the retry count and interval, typically after a request
    /// finally succeeded.
    pub fn reset(&self) {
        let mut retry = self.retry.lock();
        retry.count = 0;
        retry.interval = self.config.base_interval;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;

    fn fast_config(max_retries: i32) -> Config {
        Config {
            name: "test".into(),
            base_interval: Duration::from_millis(1),
            max_retries,
            scale: 2.0,
            max_interval: Duration::from_millis(4),
        }
    }

    #[test]
    fn start_stop_idempotency() {
        let b = Breaker::new(fast_config(3));
        assert!(b.start());
        assert!(!b.start());
        assert!(b.stop());
        assert!(!b.stop());
    }

    #[test]
    fn wait_gives_up_past_max_retries() {
        let b = Breaker::new(fast_config(2));
        b.start();
        assert!(b.wait("boom"));
        assert!(b.wait("boom"));
        assert!(!b.wait("boom"));
        b.stop();
    }

    #[test]
    fn wait_returns_false_when_not_started() {
        let b = Breaker::new(fast_config(2));
        assert!(!b.wait("boom"));
    }

    #[test]
    fn stop_interrupts_wait_for() {
        let b = Arc::new(Breaker::new(Config {
            base_interval: Duration::from_secs(30),
            ..fast_config(2)
        }));
        b.start();
        let waiter = b.clone();
        let start = Instant::now();
        let handle = std::thread::spawn(move || waiter.wait_for(Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(20));
        b.stop();
        handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn reset_restores_interval_and_count() {
        let b = Breaker::new(fast_config(10));
        b.start();
        b.wait("x");
        b.wait("x");
        assert_eq!(b.retry_count(), 2);
        b.reset();
        assert_eq!(b.retry_count(), 0);
        b.stop();
    }
}

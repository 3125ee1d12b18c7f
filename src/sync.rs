//! Wait primitives shared by the pipeline threads
//!
//! [`Event`] is a latched auto-reset signal: a `signal()` that happens
//! before anyone waits is kept until the next waiter consumes it, so
//! producers and consumers can signal without coordinating.
//!
//! [`Shutdown`] is the process-wide quit flag. Triggering it also
//! force-signals every registered event so threads parked in a wait
//! notice the flag immediately instead of at their next timeout.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Auto-reset event
#[derive(Default)]
pub struct Event {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the event and wake one waiter.
    pub fn signal(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.notify_one();
    }

    /// Drop a pending signal without waiting.
    pub fn clear(&self) {
        *self.signaled.lock() = false;
    }

    /// Block until signaled. Consumes the signal.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.cond.wait(&mut signaled);
        }
        *signaled = false;
    }

    /// Block until signaled or `timeout` elapses.
    ///
    /// Returns `true` if the event was signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                break;
            }
        }
        let was_signaled = *signaled;
        *signaled = false;
        was_signaled
    }
}

/// Global quit flag
#[derive(Default)]
pub struct Shutdown {
    quit: AtomicBool,
    sleeper: Event,
    waiters: Mutex<Vec<Arc<Event>>>,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an event that must be woken when shutdown is triggered.
    pub fn register(&self, event: Arc<Event>) {
        self.waiters.lock().push(event);
    }

    pub fn is_triggered(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }

    /// Set the quit flag and wake every registered waiter.
    pub fn trigger(&self) {
        if self.quit.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("Shutdown triggered");
        self.sleeper.signal();
        for event in self.waiters.lock().iter() {
            event.signal();
        }
    }

    /// Sleep for `duration` unless shutdown is triggered first.
    ///
    /// Returns `false` if the sleep was cut short by shutdown.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_triggered() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            if self.sleeper.wait_timeout(deadline - now) {
                // Re-latch so concurrent sleepers also wake.
                if self.is_triggered() {
                    self.sleeper.signal();
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_signal_before_wait_is_latched() {
        let event = Event::new();
        event.signal();
        assert!(event.wait_timeout(Duration::from_millis(1)));
        // Auto-reset: the second wait times out
        assert!(!event.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn test_wait_wakes_from_other_thread() {
        let event = Arc::new(Event::new());
        let signaler = event.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            signaler.signal();
        });
        assert!(event.wait_timeout(Duration::from_secs(5)));
        handle.join().unwrap();
    }

    #[test]
    fn test_trigger_signals_registered_events() {
        let shutdown = Shutdown::new();
        let event = Arc::new(Event::new());
        shutdown.register(event.clone());

        let waiter = {
            let event = event.clone();
            thread::spawn(move || {
                let start = Instant::now();
                event.wait_timeout(Duration::from_secs(10));
                start.elapsed()
            })
        };

        thread::sleep(Duration::from_millis(20));
        shutdown.trigger();
        let waited = waiter.join().unwrap();
        assert!(waited < Duration::from_secs(5));
        assert!(shutdown.is_triggered());
    }

    #[test]
    fn test_sleep_is_interrupted() {
        let shutdown = Shutdown::new();
        let remote = shutdown.clone();
        let handle = thread::spawn(move || remote.sleep(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        shutdown.trigger();
        assert!(!handle.join().unwrap());
        assert!(!shutdown.sleep(Duration::from_millis(1)));
    }

    #[test]
    fn test_sleep_completes_without_trigger() {
        let shutdown = Shutdown::new();
        assert!(shutdown.sleep(Duration::from_millis(5)));
    }
}

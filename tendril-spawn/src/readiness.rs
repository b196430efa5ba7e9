use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// One-shot readiness gate completed by the external hooking subsystem.
///
/// Once signalled it stays signalled; waiters are bounded by a timeout.
#[derive(Debug, Default)]
pub struct Readiness {
    ready: Mutex<bool>,
    signal: Condvar,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the gate as ready and wakes every waiter.
    pub fn signal(&self) {
        let mut ready = self.ready.lock();

        if !*ready {
            *ready = true;
            self.signal.notify_all();
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.lock()
    }

    /// Blocks until the gate is signalled or `timeout` elapses.
    /// Returns `true` if the gate was signalled.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut ready = self.ready.lock();

        while !*ready {
            if self.signal.wait_until(&mut ready, deadline).timed_out() {
                return *ready;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_times_out_without_signal() {
        let readiness = Readiness::new();
        let started = Instant::now();

        assert!(!readiness.wait_for(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(!readiness.is_ready());
    }

    #[test]
    fn test_signal_before_wait() {
        let readiness = Readiness::new();
        readiness.signal();

        assert!(readiness.is_ready());
        assert!(readiness.wait_for(Duration::ZERO));
    }

    #[test]
    fn test_signal_wakes_waiter() {
        let readiness = Readiness::new();

        std::thread::scope(|scope| {
            let waiter = scope.spawn(|| readiness.wait_for(Duration::from_secs(10)));

            std::thread::sleep(Duration::from_millis(10));
            readiness.signal();

            assert!(waiter.join().unwrap());
        });
    }

    #[test]
    fn test_signal_is_idempotent() {
        let readiness = Readiness::new();
        readiness.signal();
        readiness.signal();
        assert!(readiness.wait_for(Duration::from_millis(1)));
    }
}

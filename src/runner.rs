//! Periodic background task runner.
//!
//! [`Service`] owns at most one worker thread that invokes a tick closure
//! approximately every `freq`. `start` and `stop` are idempotent and
//! report whether they changed state; `stop` blocks until the worker has
//! observed cancellation and exited, so no tick is in flight once it
//! returns. Cancellation uses a condvar rather than a sleeping loop so
//! `stop` never waits out a full period.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub(crate) struct Service {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    stop: Mutex<bool>,
    cond: Condvar,
}

impl Service {
    pub(crate) fn new() -> Self {
        Service {
            shared: Arc::new(Shared {
                stop: Mutex::new(false),
                cond: Condvar::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the worker. Returns false (and does nothing) when already
    /// running.
    pub(crate) fn start<F>(&self, freq: Duration, mut tick: F) -> bool
    where
        F: FnMut() + Send + 'static,
    {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return false;
        }
        *self.shared.stop.lock() = false;
        let shared = Arc::clone(&self.shared);
        let worker = thread::Builder::new()
            .name("ttl-cache-sweep".into())
            .spawn(move || {
                let mut stop = shared.stop.lock();
                loop {
                    if *stop {
                        return;
                    }
                    let timed_out = shared.cond.wait_for(&mut stop, freq).timed_out();
                    if *stop {
                        return;
                    }
                    if timed_out {
                        // Tick without holding the cancellation lock so
                        // stop() can be requested mid-tick.
                        drop(stop);
                        tick();
                        stop = shared.stop.lock();
                    }
                }
            })
            .expect("failed to spawn sweeper thread");
        *handle = Some(worker);
        true
    }

    /// Cancel the worker and join it. Returns false when not running.
    pub(crate) fn stop(&self) -> bool {
        let worker = self.handle.lock().take();
        match worker {
            Some(worker) => {
                *self.shared.stop.lock() = true;
                self.shared.cond.notify_all();
                let _ = worker.join();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn start_and_stop_report_state_changes() {
        let svc = Service::new();
        assert!(!svc.is_running());
        assert!(svc.start(Duration::from_millis(50), || {}));
        assert!(svc.is_running());
        assert!(!svc.start(Duration::from_millis(50), || {}));
        assert!(svc.stop());
        assert!(!svc.is_running());
        assert!(!svc.stop());
    }

    #[test]
    fn ticks_fire_until_stopped() {
        let svc = Service::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        svc.start(Duration::from_millis(20), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(150));
        svc.stop();
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected at least 2 ticks, saw {seen}");
        thread::sleep(Duration::from_millis(60));
        assert_eq!(ticks.load(Ordering::SeqCst), seen, "tick fired after stop");
    }

    #[test]
    fn restart_after_stop() {
        let svc = Service::new();
        assert!(svc.start(Duration::from_millis(20), || {}));
        assert!(svc.stop());
        assert!(svc.start(Duration::from_millis(20), || {}));
        assert!(svc.stop());
    }
}

//! Host scheduler for unit tests
//!
//! Maps host threads onto [`ThreadId`]s and implements suspend/wake with
//! `std::thread::park`, whose unpark token gives exactly the wake-before-
//! suspend behavior the object manager relies on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use super::scheduler::Scheduler;
use super::thread::{ThreadId, WakeReason};
use crate::ob::WAIT_TIME_INDEFINITE;

#[derive(Default)]
struct Registry {
    by_host: HashMap<thread::ThreadId, ThreadId>,
    threads: HashMap<ThreadId, Thread>,
}

/// Scheduler backed by host threads
pub struct HostScheduler {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    epoch: Instant,
}

impl HostScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(Registry::default()),
            next_id: AtomicU64::new(1),
            epoch: Instant::now(),
        })
    }
}

impl Scheduler for HostScheduler {
    fn current_thread(&self) -> ThreadId {
        let current = thread::current();
        let mut registry = self.registry.lock().unwrap();
        if let Some(id) = registry.by_host.get(&current.id()) {
            return *id;
        }

        let id = ThreadId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        registry.by_host.insert(current.id(), id);
        registry.threads.insert(id, current);
        id
    }

    fn suspend_current_thread(&self, timeout_ms: u32) -> WakeReason {
        if timeout_ms == WAIT_TIME_INDEFINITE {
            thread::park();
            return WakeReason::Woken;
        }

        let timeout = Duration::from_millis(timeout_ms as u64);
        let start = Instant::now();
        thread::park_timeout(timeout);
        if start.elapsed() >= timeout {
            WakeReason::TimedOut
        } else {
            WakeReason::Woken
        }
    }

    fn wake_thread(&self, thread: ThreadId) -> bool {
        let registry = self.registry.lock().unwrap();
        match registry.threads.get(&thread) {
            Some(handle) => {
                handle.unpark();
                true
            }
            None => false,
        }
    }

    fn uptime_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// Spin (politely) until `condition` holds, failing the test after 5 seconds
pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

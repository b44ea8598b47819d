//! Scheduler collaborator
//!
//! The object manager blocks and unblocks threads exclusively through this
//! trait. Every wait queue operation is short and lock protected; the only
//! place the object manager gives up the processor is
//! [`Scheduler::suspend_current_thread`].

use super::thread::{ThreadId, WakeReason};

/// Thread suspend/wake services consumed by the object manager
///
/// # Contract
/// - `wake_thread` must never block and must not call back into the object
///   manager (it is invoked with a wait queue lock held).
/// - A wake that arrives before the target suspends must be remembered, so
///   the next `suspend_current_thread` returns at once.
/// - `suspend_current_thread` may return spuriously; the object manager
///   re-checks the wait condition every time it resumes.
/// - The [`WakeReason`] returned by `suspend_current_thread` is advisory.
///   Whether a wait was satisfied, timed out or interrupted is decided by
///   the wait block's completion and the `uptime_ms` deadline alone.
pub trait Scheduler: Send + Sync {
    /// Identify the calling thread
    fn current_thread(&self) -> ThreadId;

    /// Suspend the calling thread until it is woken or `timeout_ms` elapses
    ///
    /// `timeout_ms` is never zero. `WAIT_TIME_INDEFINITE` means the thread
    /// only resumes when woken.
    fn suspend_current_thread(&self, timeout_ms: u32) -> WakeReason;

    /// Make a suspended thread runnable again
    ///
    /// Returns false if the scheduler does not know the thread.
    fn wake_thread(&self, thread: ThreadId) -> bool;

    /// Monotonic time in milliseconds, used for wait deadlines
    fn uptime_ms(&self) -> u64;
}

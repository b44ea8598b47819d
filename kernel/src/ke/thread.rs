//! Thread identity as seen by the object manager
//!
//! The scheduler owns the thread objects themselves. The object manager
//! only records which thread is blocked in a wait block so it can hand the
//! thread back to the scheduler when the wait is satisfied.

use core::fmt;

/// Identifier of a schedulable thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Create a thread ID from its raw value
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread#{}", self.0)
    }
}

/// Reason a suspended thread resumed execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WakeReason {
    /// Another thread made this thread ready (or the wake was spurious)
    Woken = 0,
    /// The suspend timeout elapsed
    TimedOut = 1,
}

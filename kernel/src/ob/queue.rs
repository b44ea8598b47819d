//! Wait Queue Implementation
//!
//! A wait queue is the signalable primitive embedded in every object
//! header: a signal state plus a FIFO of blocked waiters, both guarded by
//! the queue's spinlock.
//!
//! # Signal States
//! ```text
//!                    SignalOne (no waiters)
//!   NotSignaled  ------------------------------>  SignaledForOne
//!     |    ^                                            |
//!     |    | last waiter leaves / Unsignal              | next waiter
//!     v    |                                            v consumes it
//!   NotSignaledWithWaiters                          NotSignaled
//!
//!   any state --SignalAll--> Signaled --Unsignal--> NotSignaled
//! ```
//!
//! # Waiter Ordering
//! Waiters are keyed by a per-queue sequence number taken when they
//! register, so the waiter map iterates in the order the waits began. A
//! waiter removes itself by key in O(log n), whether it was woken by this
//! queue, by another queue of a multi-wait, by a timeout or by an
//! interruption.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::fmt;
use core::mem;

use super::wait_block::WaitBlockShared;

/// Signal state of a wait queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SignalState {
    /// Not signaled, nobody waiting
    NotSignaled = 0,
    /// Not signaled, at least one waiter blocked
    NotSignaledWithWaiters = 1,
    /// Signaled until exactly one waiter is satisfied
    SignaledForOne = 2,
    /// Signaled until explicitly unsignaled
    Signaled = 3,
}

impl SignalState {
    /// Check if a wait begun in this state is satisfied immediately
    #[inline]
    pub fn is_signaled(self) -> bool {
        matches!(self, SignalState::Signaled | SignalState::SignaledForOne)
    }
}

/// Ways to signal a wait queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SignalOption {
    /// Signal persistently and release every waiter
    SignalAll = 0,
    /// Release exactly one waiter, or arm the queue for the next one
    SignalOne = 1,
    /// Release every current waiter without changing the state
    Pulse = 2,
    /// Clear the signal, releasing nobody
    Unsignal = 3,
}

/// One registration of a wait block on a queue
pub(crate) struct Waiter {
    /// The registered wait block
    pub block: Arc<WaitBlockShared>,
    /// Position of this queue in the waiter's queue array
    pub index: usize,
}

/// Outcome of registering a wait block on a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Registration {
    /// The queue was signaled; no waiter entry was left behind
    Satisfied,
    /// A waiter entry was queued under this key
    Queued(u64),
    /// The wait block already completed; nothing was done
    Completed,
}

struct WaitQueueInner {
    state: SignalState,
    waiters: BTreeMap<u64, Waiter>,
    next_sequence: u64,
}

impl WaitQueueInner {
    /// Satisfy every registered waiter, in arrival order
    fn release_all(&mut self) {
        let waiters = mem::take(&mut self.waiters);
        for waiter in waiters.into_values() {
            waiter.block.satisfy(waiter.index);
        }
    }

    /// Release waiters until one of them consumes the signal
    fn release_one(&mut self) -> bool {
        while let Some((_, waiter)) = self.waiters.pop_first() {
            if waiter.block.satisfy(waiter.index) {
                return true;
            }
        }

        false
    }

    /// Recompute the unsignaled state from the waiter list
    #[inline]
    fn unsignaled_state(&self) -> SignalState {
        if self.waiters.is_empty() {
            SignalState::NotSignaled
        } else {
            SignalState::NotSignaledWithWaiters
        }
    }
}

/// Wait queue
///
/// Embedded in every object header; may also be used standalone by
/// subsystems that want a signalable primitive without an object.
pub struct WaitQueue {
    inner: spin::Mutex<WaitQueueInner>,
}

impl WaitQueue {
    /// Create a wait queue in the given state with no waiters
    pub const fn new(state: SignalState) -> Self {
        Self {
            inner: spin::Mutex::new(WaitQueueInner {
                state,
                waiters: BTreeMap::new(),
                next_sequence: 0,
            }),
        }
    }

    /// Reset the queue's state
    ///
    /// The queue must not have waiters.
    pub fn initialize(&self, state: SignalState) {
        let mut inner = self.inner.lock();
        debug_assert!(inner.waiters.is_empty(), "wait queue reinitialized with waiters");
        inner.state = state;
    }

    /// Current signal state
    pub fn state(&self) -> SignalState {
        self.inner.lock().state
    }

    /// Check if a wait started now would be satisfied immediately
    pub fn is_signaled(&self) -> bool {
        self.state().is_signaled()
    }

    /// Number of wait blocks currently registered on the queue
    pub fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Signal (or unsignal) the queue
    ///
    /// Released waiters are handed back to the scheduler before this
    /// returns. Never blocks.
    pub fn signal(&self, option: SignalOption) {
        let mut inner = self.inner.lock();
        match option {
            SignalOption::SignalAll => {
                inner.state = SignalState::Signaled;
                inner.release_all();
            }

            SignalOption::Pulse => {
                inner.release_all();
                if inner.state == SignalState::NotSignaledWithWaiters {
                    inner.state = SignalState::NotSignaled;
                }
            }

            SignalOption::SignalOne => match inner.state {
                // Signals do not stack.
                SignalState::Signaled | SignalState::SignaledForOne => {}
                SignalState::NotSignaled => inner.state = SignalState::SignaledForOne,
                SignalState::NotSignaledWithWaiters => {
                    let consumed = inner.release_one();
                    inner.state = if !consumed {
                        SignalState::SignaledForOne
                    } else {
                        inner.unsignaled_state()
                    };
                }
            },

            SignalOption::Unsignal => {
                inner.state = inner.unsignaled_state();
            }
        }
    }

    /// Register a wait block on the queue, or satisfy it on the spot
    ///
    /// Lock order is queue, then wait block; signaling takes the locks in
    /// the same order.
    pub(crate) fn register(&self, block: &Arc<WaitBlockShared>, index: usize) -> Registration {
        let mut inner = self.inner.lock();
        let mut state = block.state.lock();
        if state.is_complete() {
            return Registration::Completed;
        }

        match inner.state {
            SignalState::Signaled => {}
            SignalState::SignaledForOne => inner.state = SignalState::NotSignaled,
            SignalState::NotSignaled | SignalState::NotSignaledWithWaiters => {
                let key = inner.next_sequence;
                inner.next_sequence += 1;
                inner.waiters.insert(key, Waiter { block: block.clone(), index });
                inner.state = SignalState::NotSignaledWithWaiters;
                block.note_registered(&mut state);
                return Registration::Queued(key);
            }
        }

        block.note_satisfied(&mut state, index);
        Registration::Satisfied
    }

    /// Remove a waiter entry, if a signal has not already removed it
    pub(crate) fn unregister(&self, key: u64) {
        let mut inner = self.inner.lock();
        inner.waiters.remove(&key);
        if inner.state == SignalState::NotSignaledWithWaiters && inner.waiters.is_empty() {
            inner.state = SignalState::NotSignaled;
        }
    }
}

impl Drop for WaitQueue {
    fn drop(&mut self) {
        debug_assert!(
            self.inner.get_mut().waiters.is_empty(),
            "wait queue destroyed with waiters"
        );
    }
}

impl fmt::Debug for WaitQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("WaitQueue")
            .field("state", &inner.state)
            .field("waiters", &inner.waiters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ke::testing::HostScheduler;
    use crate::ke::ThreadId;
    use crate::ob::wait_block::WaitBlock;
    use crate::ob::{WaitFlags, WaitStatus};

    /// Start a wait on `queue` and leave it queued there
    fn queued_block(queue: &WaitQueue, flags: WaitFlags) -> WaitBlock {
        let block = WaitBlock::new(HostScheduler::new(), 1).unwrap();
        block.shared.begin(flags);
        match queue.register(&block.shared, 0) {
            Registration::Queued(_) => {}
            other => panic!("wait was not queued: {:?}", other),
        }

        block
    }

    #[test]
    fn test_signal_one_does_not_stack() {
        let queue = WaitQueue::new(SignalState::NotSignaled);
        queue.signal(SignalOption::SignalOne);
        assert_eq!(queue.state(), SignalState::SignaledForOne);

        queue.signal(SignalOption::SignalOne);
        assert_eq!(queue.state(), SignalState::SignaledForOne);

        queue.signal(SignalOption::Unsignal);
        assert_eq!(queue.state(), SignalState::NotSignaled);
    }

    #[test]
    fn test_signal_all_and_unsignal() {
        let queue = WaitQueue::new(SignalState::NotSignaled);
        queue.signal(SignalOption::SignalAll);
        assert_eq!(queue.state(), SignalState::Signaled);
        assert!(queue.is_signaled());

        // Signaling for one on a persistently signaled queue changes nothing
        queue.signal(SignalOption::SignalOne);
        assert_eq!(queue.state(), SignalState::Signaled);

        queue.signal(SignalOption::Unsignal);
        assert_eq!(queue.state(), SignalState::NotSignaled);
        assert!(!queue.is_signaled());
    }

    #[test]
    fn test_pulse_without_waiters_keeps_state() {
        let queue = WaitQueue::new(SignalState::NotSignaled);
        queue.signal(SignalOption::Pulse);
        assert_eq!(queue.state(), SignalState::NotSignaled);

        queue.signal(SignalOption::SignalAll);
        queue.signal(SignalOption::Pulse);
        assert_eq!(queue.state(), SignalState::Signaled);
    }

    #[test]
    fn test_initialize_resets_state() {
        let queue = WaitQueue::new(SignalState::Signaled);
        queue.initialize(SignalState::SignaledForOne);
        assert_eq!(queue.state(), SignalState::SignaledForOne);
        assert_eq!(queue.waiter_count(), 0);
    }

    #[test]
    fn test_signal_one_skips_timed_out_waiter() {
        let queue = WaitQueue::new(SignalState::NotSignaled);
        let first = queued_block(&queue, WaitFlags::empty());
        let second = queued_block(&queue, WaitFlags::empty());
        assert_eq!(queue.waiter_count(), 2);

        // The first wait timed out but has not taken itself off the queue
        first.shared.expire();
        queue.signal(SignalOption::SignalOne);

        assert_eq!(queue.waiter_count(), 0);
        assert_eq!(queue.state(), SignalState::NotSignaled);
        assert_eq!(first.shared.finish(), WaitStatus::Timeout);
        assert_eq!(second.shared.finish(), WaitStatus::Satisfied { index: 0 });
    }

    #[test]
    fn test_signal_one_arms_queue_when_only_waiter_is_gone() {
        let queue = WaitQueue::new(SignalState::NotSignaled);
        let block = queued_block(&queue, WaitFlags::INTERRUPTIBLE);
        assert!(block.shared.interrupt());

        queue.signal(SignalOption::SignalOne);

        assert_eq!(queue.waiter_count(), 0);
        assert_eq!(queue.state(), SignalState::SignaledForOne);
        assert_eq!(block.shared.finish(), WaitStatus::Interrupted);
    }

    #[test]
    fn test_signal_one_not_consumed_by_partial_wait_all() {
        let first = WaitQueue::new(SignalState::NotSignaled);
        let second = WaitQueue::new(SignalState::NotSignaled);
        let block = WaitBlock::new(HostScheduler::new(), 2).unwrap();
        block.shared.begin(WaitFlags::ALL);
        assert!(matches!(first.register(&block.shared, 0), Registration::Queued(_)));
        assert!(matches!(second.register(&block.shared, 1), Registration::Queued(_)));
        assert!(block.shared.arm(ThreadId::new(1), false, None));

        first.signal(SignalOption::SignalOne);
        assert_eq!(first.waiter_count(), 0);
        assert_eq!(first.state(), SignalState::SignaledForOne);
        assert!(!block.shared.is_complete());

        // The last queue completes the wait and does consume its signal
        second.signal(SignalOption::SignalOne);
        assert_eq!(second.state(), SignalState::NotSignaled);
        assert_eq!(block.shared.finish(), WaitStatus::Satisfied { index: 1 });
        assert_eq!(first.state(), SignalState::SignaledForOne);
    }
}

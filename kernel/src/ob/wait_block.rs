//! Wait Blocks
//!
//! A wait block binds one thread to the set of wait queues it is blocked
//! on. The block is split in two:
//!
//! - [`WaitBlock`] is owned by the waiter. It holds the per-wait entry
//!   array (which queue, which key) and is borrowed mutably for the whole
//!   wait, so it cannot be destroyed or reused while registered.
//! - `WaitBlockShared` is reference counted and is what the queues hold.
//!   Its spinlock guards the completion state that signalers, timeouts and
//!   interruptions race to set; the first one to set it wins.
//!
//! Callers that wait frequently create a block once with
//! [`ObjectManager::create_wait_block`](super::ObjectManager::create_wait_block)
//! and pass it to every wait; everyone else gets a block per wait.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use super::status::{ObError, ObResult};
use super::wait::{WaitFlags, WaitStatus};
use crate::ke::{Scheduler, ThreadId};

/// Number of queues a thread's built-in wait block covers
pub const BUILTIN_WAIT_BLOCK_ENTRY_COUNT: usize = 8;

/// Largest number of queues a single wait block may cover
pub const WAIT_BLOCK_MAX_CAPACITY: usize = u16::MAX as usize;

/// Per-queue entry of an in-progress wait
#[derive(Debug, Clone, Copy)]
pub(crate) struct WaitEntry {
    /// Position of the queue in the caller's array
    pub index: usize,
    /// Key of the waiter entry on that queue, if one was queued
    pub key: Option<u64>,
}

/// Wait state shared between the waiter and the queues it is registered on
pub(crate) struct WaitBlockState {
    flags: WaitFlags,
    /// Thread to wake once the wait completes. Only set after setup.
    thread: Option<ThreadId>,
    /// Setup finished registering on every queue
    armed: bool,
    /// Queues a wait-all still needs a signal from
    unsignaled: usize,
    /// Most recent queue to satisfy an entry
    signaling: usize,
    /// Address of the first queue the thread blocked on, while blocked
    blocking_queue: Option<usize>,
    completion: Option<WaitStatus>,
    active: bool,
}

impl WaitBlockState {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.completion.is_some()
    }
}

pub(crate) struct WaitBlockShared {
    scheduler: Arc<dyn Scheduler>,
    pub state: spin::Mutex<WaitBlockState>,
}

impl WaitBlockShared {
    /// Record the outcome and release the thread, if it is blocked
    fn complete(&self, state: &mut WaitBlockState, status: WaitStatus) {
        debug_assert!(state.completion.is_none());
        state.completion = Some(status);
        state.blocking_queue = None;
        if let Some(thread) = state.thread.take() {
            self.scheduler.wake_thread(thread);
        }
    }

    /// A queue released this block's entry for the queue at `index`
    ///
    /// Called with the queue's lock held. Returns true only if this signal
    /// completed the wait. A wait-all that still needs other queues counts
    /// the queue as signaled but does not consume the signal.
    pub fn satisfy(&self, index: usize) -> bool {
        let mut state = self.state.lock();
        if state.is_complete() {
            return false;
        }

        state.signaling = index;
        if state.flags.contains(WaitFlags::ALL) {
            debug_assert!(state.unsignaled != 0);
            state.unsignaled -= 1;
            if !state.armed || state.unsignaled != 0 {
                return false;
            }
        }

        self.complete(&mut state, WaitStatus::Satisfied { index });
        true
    }

    /// A waiter entry was queued during setup
    pub fn note_registered(&self, state: &mut WaitBlockState) {
        if state.flags.contains(WaitFlags::ALL) {
            state.unsignaled += 1;
        }
    }

    /// A queue was already signaled during setup and was consumed
    pub fn note_satisfied(&self, state: &mut WaitBlockState, index: usize) {
        state.signaling = index;
        if !state.flags.contains(WaitFlags::ALL) {
            self.complete(state, WaitStatus::Satisfied { index });
        }
    }

    /// Start a new wait
    pub fn begin(&self, flags: WaitFlags) {
        let mut state = self.state.lock();
        debug_assert!(!state.active, "wait block reused while active");
        state.flags = flags;
        state.thread = None;
        state.armed = false;
        state.unsignaled = 0;
        state.signaling = 0;
        state.blocking_queue = None;
        state.completion = None;
        state.active = true;
    }

    /// Finish setup; returns true if the thread has to block
    ///
    /// `blocking_queue` is the address of the first queue the block is
    /// still registered on.
    pub fn arm(&self, thread: ThreadId, poll: bool, blocking_queue: Option<usize>) -> bool {
        let mut state = self.state.lock();
        state.armed = true;
        if !state.is_complete()
            && state.flags.contains(WaitFlags::ALL)
            && state.unsignaled == 0
        {
            let index = state.signaling;
            self.complete(&mut state, WaitStatus::Satisfied { index });
        }

        if state.is_complete() {
            return false;
        }

        if poll {
            self.complete(&mut state, WaitStatus::Timeout);
            return false;
        }

        state.thread = Some(thread);
        state.blocking_queue = blocking_queue;
        true
    }

    /// Complete the wait as timed out unless something beat the timer
    pub fn expire(&self) {
        let mut state = self.state.lock();
        if !state.is_complete() {
            state.thread = None;
            self.complete(&mut state, WaitStatus::Timeout);
        }
    }

    /// Complete an interruptible wait as interrupted
    pub fn interrupt(&self) -> bool {
        let mut state = self.state.lock();
        if !state.active
            || state.is_complete()
            || !state.flags.contains(WaitFlags::INTERRUPTIBLE)
        {
            return false;
        }

        self.complete(&mut state, WaitStatus::Interrupted);
        true
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().is_complete()
    }

    /// Address of a queue the blocked thread is waiting on
    pub fn blocking_queue(&self) -> Option<usize> {
        self.state.lock().blocking_queue
    }

    /// End the wait and collect its outcome
    pub fn finish(&self) -> WaitStatus {
        let mut state = self.state.lock();
        state.active = false;
        state.armed = false;
        state.thread = None;
        state.blocking_queue = None;
        debug_assert!(state.is_complete(), "wait finished without an outcome");
        match state.completion.take() {
            Some(status) => status,
            None => panic!("wait finished without an outcome"),
        }
    }
}

/// Reusable wait descriptor
///
/// Dropping the block destroys it. A block cannot be dropped while it is
/// registered on a queue: the wait routines borrow it for the entire wait
/// and remove it from every queue before returning.
pub struct WaitBlock {
    pub(crate) shared: Arc<WaitBlockShared>,
    pub(crate) entries: Vec<WaitEntry>,
    capacity: usize,
}

impl WaitBlock {
    /// Allocate a wait block able to cover `capacity` queues
    pub(crate) fn new(scheduler: Arc<dyn Scheduler>, capacity: usize) -> ObResult<Self> {
        if capacity == 0 || capacity > WAIT_BLOCK_MAX_CAPACITY {
            log::warn!("[OB] rejected wait block capacity {}", capacity);
            return Err(ObError::InvalidParameter);
        }

        let mut entries = Vec::new();
        entries
            .try_reserve_exact(capacity)
            .map_err(|_| ObError::InsufficientResources)?;

        let shared = Arc::new(WaitBlockShared {
            scheduler,
            state: spin::Mutex::new(WaitBlockState {
                flags: WaitFlags::empty(),
                thread: None,
                armed: false,
                unsignaled: 0,
                signaling: 0,
                blocking_queue: None,
                completion: None,
                active: false,
            }),
        });

        Ok(Self {
            shared,
            entries,
            capacity,
        })
    }

    /// Number of queues this block can wait on at once
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check if the block is in the middle of a wait
    pub fn is_active(&self) -> bool {
        self.shared.state.lock().active
    }

    /// Lay out the entries for a wait on `count` queues in address order
    ///
    /// Fails if the same queue appears twice.
    pub(crate) fn prepare(
        &mut self,
        count: usize,
        address_of: impl Fn(usize) -> usize,
    ) -> ObResult<()> {
        if count == 0 || count > self.capacity {
            log::warn!(
                "[OB] wait on {} queues rejected (capacity {})",
                count,
                self.capacity
            );
            return Err(ObError::InvalidParameter);
        }

        self.entries.clear();
        self.entries
            .extend((0..count).map(|index| WaitEntry { index, key: None }));
        self.entries.sort_unstable_by_key(|entry| address_of(entry.index));
        let duplicate = self
            .entries
            .windows(2)
            .any(|pair| address_of(pair[0].index) == address_of(pair[1].index));

        if duplicate {
            self.entries.clear();
            log::warn!("[OB] wait rejected: queue listed more than once");
            return Err(ObError::InvalidParameter);
        }

        Ok(())
    }
}

impl Drop for WaitBlock {
    fn drop(&mut self) {
        debug_assert!(
            !self.shared.state.lock().active,
            "wait block destroyed while registered"
        );
    }
}

impl fmt::Debug for WaitBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitBlock")
            .field("capacity", &self.capacity)
            .field("active", &self.is_active())
            .finish()
    }
}

//! Blocking Waits
//!
//! The only blocking entry points of the object manager. A wait:
//!
//! 1. lays out a wait block over the requested queues, sorted by queue
//!    address (so concurrent multi-waits always lock queues in the same
//!    order) and rejecting duplicates,
//! 2. registers the block on each queue in turn, one queue lock at a time,
//!    stopping early once the wait is already satisfied,
//! 3. suspends the thread through the scheduler until a signal, the
//!    timeout or an interruption completes the block,
//! 4. removes the block from every queue it is still registered on before
//!    returning, whatever completed it.
//!
//! # Wait-All
//! A wait-all completes once every queue has satisfied the block once; the
//! queues do not need to be signaled at the same time. A `SignalOne` is
//! only consumed by the signal that completes the wait. One that reaches a
//! wait-all still missing other queues counts for that queue and then
//! moves on to the next waiter, or leaves the queue `SignaledForOne`. A
//! queue that is already `SignaledForOne` when the wait registers on it is
//! consumed at that point. The index reported for a wait-all is the queue
//! that satisfied it last.

use alloc::sync::Arc;

use bitflags::bitflags;

use super::header::ObjectRef;
use super::queue::{Registration, WaitQueue};
use super::status::ObResult;
use super::wait_block::{WaitBlock, WaitBlockShared, BUILTIN_WAIT_BLOCK_ENTRY_COUNT};
use super::ObjectManager;
use crate::ke::ThreadId;

/// Timeout value meaning "never time out"
pub const WAIT_TIME_INDEFINITE: u32 = u32::MAX;

bitflags! {
    /// Wait options
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WaitFlags: u32 {
        /// The wait may be cut short by `interrupt_blocked_thread`
        const INTERRUPTIBLE = 0x0000_0001;
        /// Complete only when every queue has satisfied the wait
        const ALL = 0x0000_0002;
    }
}

/// Outcome of a wait that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The queue (or object) at `index` in the caller's array satisfied
    /// the wait
    Satisfied { index: usize },
    /// The timeout elapsed first
    Timeout,
    /// The wait was interruptible and the thread was interrupted
    Interrupted,
}

impl WaitStatus {
    #[inline]
    pub fn is_satisfied(self) -> bool {
        matches!(self, WaitStatus::Satisfied { .. })
    }

    /// Index of the satisfying queue, if the wait was satisfied
    #[inline]
    pub fn index(self) -> Option<usize> {
        match self {
            WaitStatus::Satisfied { index } => Some(index),
            _ => None,
        }
    }
}

impl ObjectManager {
    /// Create a wait block for callers that wait often
    ///
    /// The block can be handed to any number of successive waits on up to
    /// `capacity` queues. It is destroyed by dropping it.
    pub fn create_wait_block(&self, capacity: usize) -> ObResult<WaitBlock> {
        WaitBlock::new(self.scheduler.clone(), capacity)
    }

    /// Wait for a single queue to be signaled
    pub fn wait_on_queue(
        &self,
        queue: &WaitQueue,
        flags: WaitFlags,
        timeout_ms: u32,
    ) -> ObResult<WaitStatus> {
        self.wait_with(None, 1, |_| queue, flags, timeout_ms)
    }

    /// Wait on several queues at once
    ///
    /// Without [`WaitFlags::ALL`] the first queue to satisfy the wait
    /// completes it. Each queue may appear only once; duplicates fail with
    /// `InvalidParameter` before anything is registered.
    pub fn wait_on_queues(
        &self,
        queues: &[&WaitQueue],
        flags: WaitFlags,
        timeout_ms: u32,
        block: Option<&mut WaitBlock>,
    ) -> ObResult<WaitStatus> {
        self.wait_with(block, queues.len(), |index| queues[index], flags, timeout_ms)
    }

    /// Wait on the queues embedded in several objects
    ///
    /// The satisfying object is `objects[index]`.
    pub fn wait_on_objects(
        &self,
        objects: &[&ObjectRef],
        flags: WaitFlags,
        timeout_ms: u32,
        block: Option<&mut WaitBlock>,
    ) -> ObResult<WaitStatus> {
        self.wait_with(
            block,
            objects.len(),
            |index| objects[index].wait_queue(),
            flags,
            timeout_ms,
        )
    }

    /// Cut short the interruptible wait a thread is blocked in
    ///
    /// Returns false if the thread is not waiting, its wait is not
    /// interruptible or the wait already completed.
    pub fn interrupt_blocked_thread(&self, thread: ThreadId) -> bool {
        let block = self.blocked.lock().get(&thread).cloned();
        let interrupted = block.map_or(false, |block| block.interrupt());
        if interrupted {
            log::debug!("[OB] interrupted wait of {}", thread);
        }

        interrupted
    }

    /// Get a queue the thread is currently blocked on
    ///
    /// With several queues this is the first one in address order that
    /// the wait is still registered on. Nothing keeps the queue alive, so
    /// the pointer identifies it (for profiling, say) and must not be
    /// dereferenced. Returns `None` unless the thread is blocked.
    pub fn blocking_queue(&self, thread: ThreadId) -> Option<*const WaitQueue> {
        let block = self.blocked.lock().get(&thread).cloned()?;
        block
            .blocking_queue()
            .map(|address| address as *const WaitQueue)
    }

    fn wait_with<'q, F>(
        &self,
        block: Option<&mut WaitBlock>,
        count: usize,
        queue_at: F,
        flags: WaitFlags,
        timeout_ms: u32,
    ) -> ObResult<WaitStatus>
    where
        F: Fn(usize) -> &'q WaitQueue,
    {
        match block {
            Some(block) => self.execute_wait(block, count, queue_at, flags, timeout_ms),
            None => {
                let mut block =
                    self.create_wait_block(count.max(BUILTIN_WAIT_BLOCK_ENTRY_COUNT))?;

                self.execute_wait(&mut block, count, queue_at, flags, timeout_ms)
            }
        }
    }

    fn execute_wait<'q, F>(
        &self,
        block: &mut WaitBlock,
        count: usize,
        queue_at: F,
        flags: WaitFlags,
        timeout_ms: u32,
    ) -> ObResult<WaitStatus>
    where
        F: Fn(usize) -> &'q WaitQueue,
    {
        block.prepare(count, |index| queue_at(index) as *const WaitQueue as usize)?;

        let start = self.scheduler.uptime_ms();
        let thread = self.scheduler.current_thread();
        let shared = block.shared.clone();
        shared.begin(flags);
        self.blocked.lock().insert(thread, shared.clone());

        let wait_any = !flags.contains(WaitFlags::ALL);
        for entry in block.entries.iter_mut() {
            match queue_at(entry.index).register(&shared, entry.index) {
                Registration::Queued(key) => entry.key = Some(key),
                Registration::Satisfied if wait_any => break,
                Registration::Satisfied => {}
                Registration::Completed => break,
            }
        }

        let blocking_queue = block
            .entries
            .iter()
            .find(|entry| entry.key.is_some())
            .map(|entry| queue_at(entry.index) as *const WaitQueue as usize);

        if shared.arm(thread, timeout_ms == 0, blocking_queue) {
            log::debug!(
                "[OB] {} blocking on {} queue(s), timeout {}",
                thread,
                count,
                timeout_ms
            );

            let deadline = if timeout_ms == WAIT_TIME_INDEFINITE {
                None
            } else {
                Some(start + timeout_ms as u64)
            };

            self.block_until(&shared, deadline);
        }

        // Pull the block off every queue, not just the one that woke it.
        for entry in block.entries.iter_mut() {
            if let Some(key) = entry.key.take() {
                queue_at(entry.index).unregister(key);
            }
        }

        block.entries.clear();
        self.blocked.lock().remove(&thread);
        Ok(shared.finish())
    }

    /// Suspend until the block completes or the deadline passes
    fn block_until(&self, shared: &Arc<WaitBlockShared>, deadline: Option<u64>) {
        loop {
            let timeout = match deadline {
                None => WAIT_TIME_INDEFINITE,
                Some(deadline) => {
                    let now = self.scheduler.uptime_ms();
                    if now >= deadline {
                        shared.expire();
                        return;
                    }

                    (deadline - now).min((WAIT_TIME_INDEFINITE - 1) as u64) as u32
                }
            };

            // The wake reason is advisory. Completion and the deadline are
            // re-checked against the block and uptime on every pass.
            let _ = self.scheduler.suspend_current_thread(timeout);
            if shared.is_complete() {
                return;
            }
        }
    }
}

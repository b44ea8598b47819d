//! Kernel Executive interface (ke)
//!
//! The object manager does not own the thread state machine. It only needs
//! to know who is running, to put that thread to sleep, and to make a
//! sleeping thread runnable again. This module describes that narrow
//! contract:
//!
//! - **ThreadId**: Stable identity of a schedulable thread
//! - **Scheduler**: Suspend/wake/clock entry points supplied by the kernel
//! - **WakeReason**: Why a suspended thread resumed
//!
//! # Wake Before Suspend
//!
//! A waiter publishes itself on its wait queues before it suspends, so a
//! signaler can wake it in the window between the two. Implementations of
//! [`Scheduler`] must remember such a wake and return from the next
//! `suspend_current_thread` immediately.

pub mod scheduler;
pub mod thread;

#[cfg(test)]
pub mod testing;

pub use scheduler::Scheduler;
pub use thread::{ThreadId, WakeReason};

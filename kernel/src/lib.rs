//! Minoca Object Manager
//!
//! The object manager gives every blockable kernel entity (locks, events,
//! processes, threads, pipes, devices, timers, ...) a uniform lifecycle, a
//! uniform wait/signal protocol and a uniform handle-based naming scheme.
//!
//! # Subsystems
//!
//! - **ke** - The narrow slice of the scheduler the object manager consumes:
//!   thread identity, suspend and wake.
//! - **ob** - Wait queues, wait blocks, multi-object waits, the object tree
//!   and handle tables.
//!
//! # Blocking
//!
//! Only the wait routines (`wait_on_queue`, `wait_on_queues`,
//! `wait_on_objects`) ever suspend the caller. Signaling, reference
//! counting and handle table operations never block and may be used from
//! any context that can take a spinlock.

#![cfg_attr(not(test), no_std)]
#![allow(clippy::new_without_default)]

extern crate alloc;

pub mod ke;
pub mod ob;

pub use ke::{Scheduler, ThreadId, WakeReason};
pub use ob::{
    ObError, ObResult, ObjectManager, ObjectRef, ObjectType, SignalOption, SignalState,
    WaitFlags, WaitQueue, WaitStatus, WAIT_TIME_INDEFINITE,
};

//! Object Manager (ob)
//!
//! The object manager provides a unified object model for all kernel resources:
//!
//! - **Wait Queues**: Signal state plus FIFO waiters, embedded in every object
//! - **Waiting**: Single and multi-queue waits with wait-any / wait-all,
//!   timeouts and interruption
//! - **Namespace**: Hierarchical tree of named objects
//! - **Reference Counting**: Object lifetime, cascading up the tree
//! - **Handle Tables**: Per-process handle-to-object mapping
//!
//! # Object Structure
//!
//! Every kernel object has:
//! - Object header: type, name, parent, children, flags, wait queue
//! - Object body: type-specific data
//!
//! # Key Structures
//!
//! - [`ObjectManager`]: Root of one object tree plus its scheduler
//! - [`WaitQueue`]: Signalable primitive
//! - [`WaitBlock`]: Reusable descriptor for a thread's wait
//! - [`ObjectRef`]: Counted reference to an object
//! - [`HandleTable`]: Per-process handle table
//!
//! # Lock Ordering
//!
//! 1. Wait queue lock
//! 2. Wait block lock
//!
//! Queue locks are taken one at a time. An object's child list lock is
//! never held while a reference is dropped.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::fmt;

// Submodules
pub mod directory;
pub mod handle;
pub mod header;
pub mod object_type;
pub mod queue;
pub mod status;
pub mod wait;
pub mod wait_block;

// Re-exports for convenience
pub use directory::{NameSource, OBJECT_PATH_SEPARATOR};
pub use handle::{
    Handle, HandleFlags, HandleTable, LocalHandleTable, LookupRoutine, INVALID_HANDLE,
    MAX_HANDLES,
};
pub use header::{
    DestroyRoutine, Object, ObjectBody, ObjectFlags, ObjectHeader, ObjectRef, WeakObjectRef,
};
pub use object_type::ObjectType;
pub use queue::{SignalOption, SignalState, WaitQueue};
pub use status::{ObError, ObResult};
pub use wait::{WaitFlags, WaitStatus, WAIT_TIME_INDEFINITE};
pub use wait_block::{WaitBlock, BUILTIN_WAIT_BLOCK_ENTRY_COUNT, WAIT_BLOCK_MAX_CAPACITY};

use crate::ke::{Scheduler, ThreadId};
use wait_block::WaitBlockShared;

/// Pool tag for object manager allocations ("Obje")
pub const OBJECT_MANAGER_POOL_TAG: u32 = 0x656A_624F;

/// Object manager instance
///
/// Owns the root of one object tree and the scheduler its waits block
/// through. A kernel creates one at boot; tests create as many as they
/// like.
pub struct ObjectManager {
    /// Scheduler used to suspend and wake waiting threads
    pub(crate) scheduler: Arc<dyn Scheduler>,
    /// Root directory object
    pub(crate) root: ObjectRef,
    /// Wait blocks of blocked threads, for interruption
    pub(crate) blocked: spin::Mutex<BTreeMap<ThreadId, Arc<WaitBlockShared>>>,
}

impl ObjectManager {
    /// Initialize an object manager and create its root directory
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        log::info!("[OB] Initializing Object Manager...");
        let root = ObjectRef::allocate(
            ObjectType::Directory,
            None,
            Some(alloc::borrow::Cow::Borrowed("")),
            ObjectFlags::USE_NAME_DIRECTLY,
            (),
            None,
            OBJECT_MANAGER_POOL_TAG,
        );

        Self {
            scheduler,
            root,
            blocked: spin::Mutex::new(BTreeMap::new()),
        }
    }

    /// Get the root object
    #[inline]
    pub fn root(&self) -> &ObjectRef {
        &self.root
    }

    /// Get the scheduler waits block through
    #[inline]
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }
}

impl fmt::Debug for ObjectManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectManager")
            .field("root", &self.root)
            .field("blocked", &self.blocked.lock().len())
            .finish()
    }
}

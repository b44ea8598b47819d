//! Object Header Implementation
//!
//! Every kernel object is a header followed by its type-specific body,
//! allocated together as one reference-counted block.
//!
//! # Memory Layout
//! ```text
//! +-------------------+
//! | Reference counts  |  <- strong (references) / weak (child list slots)
//! +-------------------+
//! | ObjectHeader      |  <- type, name, parent, children, wait queue
//! +-------------------+
//! | Object Body       |  <- caller data (event state, pipe buffer, ...)
//! +-------------------+
//! ```
//!
//! # Ownership
//! A child holds a reference on its parent for as long as the child
//! exists. A parent's child list only records the children; it keeps
//! none of them alive. Releasing the last reference to an object runs its
//! destroy routine, removes it from its parent's child list and then drops
//! the parent reference, which may in turn destroy the parent. That cascade
//! walks up the tree in a loop, so its stack use does not grow with depth.

use alloc::borrow::Cow;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;
use core::ops::Deref;
use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

use super::object_type::ObjectType;
use super::queue::{SignalOption, SignalState, WaitQueue};

bitflags! {
    /// Object header flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObjectFlags: u32 {
        /// The name is a static string used in place, not a pool copy
        const USE_NAME_DIRECTLY = 0x0000_0001;
        /// The object is on its parent's child list
        const LINKED = 0x0000_0002;
    }
}

/// Type-specific teardown, run once when the last reference is released
///
/// Receives the header and the object body. Must not block.
pub type DestroyRoutine = fn(&ObjectHeader, &dyn Any);

/// Data stored after an object header
pub trait ObjectBody: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync> ObjectBody for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Object header
pub struct ObjectHeader {
    /// Object type
    object_type: ObjectType,
    /// Name relative to the parent, set at most once
    pub(super) name: spin::Mutex<Option<Cow<'static, str>>>,
    /// Parent object; the root has none
    pub(super) parent: Option<ObjectRef>,
    /// Non-owning list of children
    pub(super) children: spin::Mutex<Vec<Weak<Object>>>,
    /// Object flags (ObjectFlags)
    pub(super) flags: AtomicU32,
    /// Queue signaled when the object's state changes
    wait_queue: WaitQueue,
    /// Type-specific teardown
    destroy: Option<DestroyRoutine>,
    /// Pool tag recorded at creation
    tag: u32,
}

impl ObjectHeader {
    /// Get the object type
    #[inline]
    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// Get the object flags
    #[inline]
    pub fn flags(&self) -> ObjectFlags {
        ObjectFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Get the pool tag the object was created with
    #[inline]
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Get the parent object, if any
    #[inline]
    pub fn parent(&self) -> Option<&ObjectRef> {
        self.parent.as_ref()
    }

    /// Get the object's wait queue
    #[inline]
    pub fn wait_queue(&self) -> &WaitQueue {
        &self.wait_queue
    }

    /// Signal the object's wait queue
    #[inline]
    pub fn signal(&self, option: SignalOption) {
        self.wait_queue.signal(option);
    }

    /// Get a copy of the object's name
    ///
    /// Names used directly are returned without copying.
    pub fn name(&self) -> Option<Cow<'static, str>> {
        self.name.lock().clone()
    }

    /// Check if the object is named `name`
    pub(super) fn has_name(&self, name: &str) -> bool {
        self.name.lock().as_deref() == Some(name)
    }

    /// Number of live objects on the child list
    pub fn child_count(&self) -> usize {
        self.children
            .lock()
            .iter()
            .filter(|child| child.strong_count() != 0)
            .count()
    }

    /// Take references on every live child
    ///
    /// Children whose last reference is already gone are skipped. The
    /// references must be dropped after the child list lock is released,
    /// since dropping the last one unlinks the child.
    pub fn children(&self) -> Vec<ObjectRef> {
        let children = self.children.lock();
        children
            .iter()
            .filter_map(|child| child.upgrade().map(ObjectRef))
            .collect()
    }

    fn set_flags(&self, flags: ObjectFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    /// Clear flags, returning the flags that were set before
    pub(super) fn clear_flags(&self, flags: ObjectFlags) -> ObjectFlags {
        ObjectFlags::from_bits_truncate(self.flags.fetch_and(!flags.bits(), Ordering::AcqRel))
    }

    pub(super) fn mark_name_direct(&self, direct: bool) {
        if direct {
            self.set_flags(ObjectFlags::USE_NAME_DIRECTLY);
        } else {
            self.clear_flags(ObjectFlags::USE_NAME_DIRECTLY);
        }
    }
}

impl fmt::Debug for ObjectHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHeader")
            .field("type", &self.object_type)
            .field("name", &*self.name.lock())
            .field("flags", &self.flags())
            .field("wait_queue", &self.wait_queue)
            .finish()
    }
}

/// A header and its body in one allocation
pub struct Object<T: ?Sized + ObjectBody = dyn ObjectBody> {
    header: ObjectHeader,
    body: T,
}

impl<T: ?Sized + ObjectBody> Drop for Object<T> {
    fn drop(&mut self) {
        let this = self as *const Self as *const u8;
        let header = &self.header;
        log::trace!(
            "[OB] destroying {} object {:?}",
            header.object_type,
            header.name.lock().as_deref()
        );

        if let Some(destroy) = header.destroy {
            destroy(header, self.body.as_any());
        }

        if header.flags().contains(ObjectFlags::LINKED) {
            if let Some(parent) = &header.parent {
                parent
                    .children
                    .lock()
                    .retain(|child| child.as_ptr() as *const u8 != this);
            }
        }

        // Hold the next ancestor while releasing a parent that is about to
        // die, so the parent's own drop stops there instead of recursing.
        let mut next = self.header.parent.take();
        while let Some(parent) = next.take() {
            if Arc::strong_count(&parent.0) == 1 {
                next = parent.header().parent.clone();
            }

            drop(parent);
        }
    }
}

/// Counted reference to an object
///
/// Cloning adds a reference and dropping releases it. The object is
/// destroyed when the last reference goes away.
#[derive(Clone)]
pub struct ObjectRef(pub(super) Arc<Object>);

impl ObjectRef {
    /// Allocate an object holding `body`
    #[allow(clippy::too_many_arguments)]
    pub(super) fn allocate<T: ObjectBody>(
        object_type: ObjectType,
        parent: Option<ObjectRef>,
        name: Option<Cow<'static, str>>,
        flags: ObjectFlags,
        body: T,
        destroy: Option<DestroyRoutine>,
        tag: u32,
    ) -> Self {
        let object: Arc<Object> = Arc::new(Object {
            header: ObjectHeader {
                object_type,
                name: spin::Mutex::new(name),
                parent,
                children: spin::Mutex::new(Vec::new()),
                flags: AtomicU32::new(flags.bits()),
                wait_queue: WaitQueue::new(SignalState::NotSignaled),
                destroy,
                tag,
            },
            body,
        });

        log::trace!("[OB] created {} object", object_type);
        ObjectRef(object)
    }

    /// Get the object header
    #[inline]
    pub fn header(&self) -> &ObjectHeader {
        &self.0.header
    }

    /// Get the object body as `T`, if that is what it holds
    pub fn body<T: Any>(&self) -> Option<&T> {
        self.0.body.as_any().downcast_ref::<T>()
    }

    /// Take another reference on the object
    #[inline]
    pub fn add_reference(&self) -> ObjectRef {
        self.clone()
    }

    /// Release this reference, destroying the object if it was the last
    #[inline]
    pub fn release_reference(self) {
        drop(self);
    }

    /// Current number of references
    #[inline]
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Get a reference that does not keep the object alive
    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef(Arc::downgrade(&self.0))
    }

    /// Address identifying the object
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        Arc::as_ptr(&self.0) as *const u8
    }
}

impl Deref for ObjectRef {
    type Target = ObjectHeader;

    #[inline]
    fn deref(&self) -> &ObjectHeader {
        &self.0.header
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.as_ptr() == other.as_ptr()
    }
}

impl Eq for ObjectRef {}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("address", &self.as_ptr())
            .field("references", &self.reference_count())
            .field("header", self.header())
            .finish()
    }
}

/// Reference that does not keep an object alive
#[derive(Clone)]
pub struct WeakObjectRef(Weak<Object>);

impl WeakObjectRef {
    /// Take a reference on the object if it still exists
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }
}

impl fmt::Debug for WeakObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakObjectRef({:p})", self.0.as_ptr() as *const u8)
    }
}

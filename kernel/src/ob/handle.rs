//! Handle Table Implementation
//!
//! Each process has a handle table that maps handles (small integers)
//! to kernel objects. This provides:
//! - A trust boundary: user mode only ever sees the integers
//! - Per-handle flags (close-on-execute, inherit, protect-from-close)
//! - An optional lookup routine run on every successful lookup
//!
//! # Handle Format
//! A handle is the index of its entry, starting at 0. New handles take the
//! lowest free index at or above the caller's hint, so a freed handle is
//! the first to be handed out again.
//!
//! # Ownership
//! Tables store associations, not references: destroying or replacing a
//! handle gives the stored value back to the caller, who decides whether
//! to release it.
//!
//! # Locking
//! [`HandleTable`] guards the entries with a spinlock and may be shared.
//! [`LocalHandleTable`] is the single-owner form without a lock.

use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;

use super::header::{ObjectRef, WeakObjectRef};
use super::status::{ObError, ObResult};

/// Handle type
pub type Handle = u32;

/// Invalid handle value
pub const INVALID_HANDLE: Handle = u32::MAX;

/// Maximum handles per table
pub const MAX_HANDLES: usize = 1024;

bitflags! {
    /// Handle flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HandleFlags: u32 {
        /// Close the handle when the process executes a new image
        const CLOSE_ON_EXECUTE = 0x0000_0001;
        /// Copy the handle into child processes
        const INHERIT = 0x0000_0002;
        /// Refuse to close the handle
        const PROTECT_CLOSE = 0x0000_0004;
    }
}

/// Routine run with the table locked each time a handle is looked up
pub type LookupRoutine<V> = fn(Handle, &V);

/// Handle table entry
#[derive(Debug, Clone)]
struct HandleTableEntry<V> {
    /// Stored value
    value: V,
    /// Handle flags
    flags: HandleFlags,
}

/// Handle table without a lock, for tables with a single owner
pub struct LocalHandleTable<V> {
    /// Table entries, grown on demand up to `capacity`
    entries: Vec<Option<HandleTableEntry<V>>>,
    /// Number of handles in use
    handle_count: usize,
    /// Largest number of entries the table may grow to
    capacity: usize,
    /// Owning object (usually the process)
    owner: Option<WeakObjectRef>,
    lookup: Option<LookupRoutine<V>>,
}

impl<V> LocalHandleTable<V> {
    /// Create an empty table allowing up to `MAX_HANDLES` handles
    pub fn new(owner: Option<&ObjectRef>, lookup: Option<LookupRoutine<V>>) -> Self {
        Self {
            entries: Vec::new(),
            handle_count: 0,
            capacity: MAX_HANDLES,
            owner: owner.map(ObjectRef::downgrade),
            lookup,
        }
    }

    /// Create an empty table with a smaller handle limit
    pub fn with_capacity(
        owner: Option<&ObjectRef>,
        lookup: Option<LookupRoutine<V>>,
        capacity: usize,
    ) -> ObResult<Self> {
        if capacity == 0 || capacity > MAX_HANDLES {
            log::warn!("[OB] rejected handle table capacity {}", capacity);
            return Err(ObError::InvalidParameter);
        }

        let mut table = Self::new(owner, lookup);
        table.capacity = capacity;
        Ok(table)
    }

    /// Get the owning object, if it still exists
    pub fn owner(&self) -> Option<ObjectRef> {
        self.owner.as_ref().and_then(WeakObjectRef::upgrade)
    }

    /// Largest number of handles the table can hold
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of handles in use
    #[inline]
    pub fn handle_count(&self) -> usize {
        self.handle_count
    }

    #[inline]
    fn entry(&self, handle: Handle) -> Option<&HandleTableEntry<V>> {
        self.entries.get(handle as usize).and_then(Option::as_ref)
    }

    /// Make sure the entry for `index` exists
    fn grow_to(&mut self, index: usize) -> ObResult<()> {
        if index < self.entries.len() {
            return Ok(());
        }

        let additional = index + 1 - self.entries.len();
        self.entries
            .try_reserve(additional)
            .map_err(|_| ObError::NoMemory)?;

        self.entries.resize_with(index + 1, || None);
        Ok(())
    }

    /// Allocate a handle for `value`
    ///
    /// Takes the lowest free handle at or above `hint` (0 if `None`).
    /// Flags outside the public set are dropped. Fails with
    /// `InsufficientResources` once no handle below the capacity is free.
    pub fn create_handle(
        &mut self,
        value: V,
        flags: HandleFlags,
        hint: Option<Handle>,
    ) -> ObResult<Handle> {
        let start = hint.map_or(0, |hint| hint as usize);
        let index = self
            .entries
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, entry)| entry.is_none())
            .map_or(self.entries.len().max(start), |(index, _)| index);

        if index >= self.capacity {
            log::warn!("[OB] handle table full ({} handles)", self.handle_count);
            return Err(ObError::InsufficientResources);
        }

        self.grow_to(index)?;
        self.entries[index] = Some(HandleTableEntry {
            value,
            flags: HandleFlags::from_bits_truncate(flags.bits()),
        });

        self.handle_count += 1;
        log::trace!("[OB] created handle {}", index);
        Ok(index as Handle)
    }

    /// Look up a handle, running the lookup routine if there is one
    pub fn get_handle_value(&self, handle: Handle) -> Option<(&V, HandleFlags)> {
        let entry = self.entry(handle)?;
        if let Some(lookup) = self.lookup {
            lookup(handle, &entry.value);
        }

        Some((&entry.value, entry.flags))
    }

    /// Store `value` under a specific handle
    ///
    /// Creates the handle if it is free. Returns the value and flags that
    /// were replaced. Fails with `TooManyHandles` if the handle is beyond
    /// the table's capacity.
    pub fn replace_handle_value(
        &mut self,
        handle: Handle,
        value: V,
        flags: HandleFlags,
    ) -> ObResult<Option<(V, HandleFlags)>> {
        let index = handle as usize;
        if index >= self.capacity {
            return Err(ObError::TooManyHandles);
        }

        self.grow_to(index)?;
        let previous = self.entries[index].replace(HandleTableEntry {
            value,
            flags: HandleFlags::from_bits_truncate(flags.bits()),
        });

        match previous {
            Some(entry) => Ok(Some((entry.value, entry.flags))),
            None => {
                self.handle_count += 1;
                Ok(None)
            }
        }
    }

    /// Replace a handle's flags, returning the previous ones
    pub fn set_handle_flags(&mut self, handle: Handle, flags: HandleFlags) -> ObResult<HandleFlags> {
        let entry = self
            .entries
            .get_mut(handle as usize)
            .and_then(Option::as_mut)
            .ok_or(ObError::InvalidHandle)?;

        let previous = entry.flags;
        entry.flags = HandleFlags::from_bits_truncate(flags.bits());
        Ok(previous)
    }

    /// Remove a handle, handing back its value
    pub fn destroy_handle(&mut self, handle: Handle) -> Option<V> {
        let entry = self.entries.get_mut(handle as usize)?.take()?;
        self.handle_count -= 1;

        // Keep the entry vector no longer than the highest handle.
        while let Some(None) = self.entries.last() {
            self.entries.pop();
        }

        log::trace!("[OB] destroyed handle {}", handle);
        Some(entry.value)
    }

    /// Highest handle in use
    pub fn get_highest_handle(&self) -> Option<Handle> {
        self.entries
            .iter()
            .rposition(Option::is_some)
            .map(|index| index as Handle)
    }

    /// Call `routine` for every handle in ascending order
    pub fn iterate(&self, mut routine: impl FnMut(Handle, &V, HandleFlags)) {
        for (index, entry) in self.entries.iter().enumerate() {
            if let Some(entry) = entry {
                routine(index as Handle, &entry.value, entry.flags);
            }
        }
    }

    /// Remove every handle, handing each value to `routine`
    ///
    /// Used when the owner is torn down.
    pub fn close_all(&mut self, mut routine: impl FnMut(Handle, V)) {
        let entries = core::mem::take(&mut self.entries);
        self.handle_count = 0;
        for (index, entry) in entries.into_iter().enumerate() {
            if let Some(entry) = entry {
                routine(index as Handle, entry.value);
            }
        }
    }
}

impl<V> fmt::Debug for LocalHandleTable<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalHandleTable")
            .field("handle_count", &self.handle_count)
            .field("capacity", &self.capacity)
            .field("owner", &self.owner)
            .finish()
    }
}

/// Handle table with its own lock
///
/// The lookup routine and iteration callbacks run with the lock held and
/// must not call back into the table.
pub struct HandleTable<V> {
    inner: spin::Mutex<LocalHandleTable<V>>,
}

impl<V> HandleTable<V> {
    /// Create an empty table allowing up to `MAX_HANDLES` handles
    pub fn new(owner: Option<&ObjectRef>, lookup: Option<LookupRoutine<V>>) -> Self {
        Self {
            inner: spin::Mutex::new(LocalHandleTable::new(owner, lookup)),
        }
    }

    /// Create an empty table with a smaller handle limit
    pub fn with_capacity(
        owner: Option<&ObjectRef>,
        lookup: Option<LookupRoutine<V>>,
        capacity: usize,
    ) -> ObResult<Self> {
        Ok(Self {
            inner: spin::Mutex::new(LocalHandleTable::with_capacity(owner, lookup, capacity)?),
        })
    }

    pub fn owner(&self) -> Option<ObjectRef> {
        self.inner.lock().owner()
    }

    pub fn handle_count(&self) -> usize {
        self.inner.lock().handle_count()
    }

    /// See [`LocalHandleTable::create_handle`]
    pub fn create_handle(
        &self,
        value: V,
        flags: HandleFlags,
        hint: Option<Handle>,
    ) -> ObResult<Handle> {
        self.inner.lock().create_handle(value, flags, hint)
    }

    /// Look up a handle and take a copy of its value
    pub fn get_handle_value(&self, handle: Handle) -> Option<(V, HandleFlags)>
    where
        V: Clone,
    {
        let table = self.inner.lock();
        table
            .get_handle_value(handle)
            .map(|(value, flags)| (value.clone(), flags))
    }

    /// See [`LocalHandleTable::replace_handle_value`]
    pub fn replace_handle_value(
        &self,
        handle: Handle,
        value: V,
        flags: HandleFlags,
    ) -> ObResult<Option<(V, HandleFlags)>> {
        self.inner.lock().replace_handle_value(handle, value, flags)
    }

    pub fn set_handle_flags(&self, handle: Handle, flags: HandleFlags) -> ObResult<HandleFlags> {
        self.inner.lock().set_handle_flags(handle, flags)
    }

    /// See [`LocalHandleTable::destroy_handle`]
    ///
    /// The value is dropped by the caller, after the table lock is
    /// released.
    pub fn destroy_handle(&self, handle: Handle) -> Option<V> {
        self.inner.lock().destroy_handle(handle)
    }

    pub fn get_highest_handle(&self) -> Option<Handle> {
        self.inner.lock().get_highest_handle()
    }

    /// Call `routine` for every handle with the table locked
    pub fn iterate(&self, routine: impl FnMut(Handle, &V, HandleFlags)) {
        self.inner.lock().iterate(routine);
    }

    /// Remove every handle
    ///
    /// The entries are detached under the lock; `routine` runs after it is
    /// released and may drop the values.
    pub fn close_all(&self, mut routine: impl FnMut(Handle, V)) {
        let entries = {
            let mut table = self.inner.lock();
            table.handle_count = 0;
            core::mem::take(&mut table.entries)
        };

        for (index, entry) in entries.into_iter().enumerate() {
            if let Some(entry) = entry {
                routine(index as Handle, entry.value);
            }
        }
    }
}

impl<V> fmt::Debug for HandleTable<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandleTable").field(&*self.inner.lock()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ke::testing::HostScheduler;
    use crate::ob::{ObjectManager, ObjectType};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_handles_are_unique() {
        let mut table = LocalHandleTable::new(None, None);
        let handles: Vec<Handle> = (0..16u32)
            .map(|value| table.create_handle(value, HandleFlags::empty(), None).unwrap())
            .collect();

        let unique: HashSet<_> = handles.iter().copied().collect();
        assert_eq!(unique.len(), 16);
        assert_eq!(table.handle_count(), 16);

        // A freed handle may come back, but never collides with a live one
        assert_eq!(table.destroy_handle(handles[5]), Some(5));
        let reused = table.create_handle(100, HandleFlags::empty(), None).unwrap();
        assert_eq!(reused, handles[5]);
        for &handle in handles.iter().filter(|&&handle| handle != reused) {
            assert_ne!(table.get_handle_value(handle).map(|(value, _)| *value), Some(100));
        }
    }

    #[test]
    fn test_hint_and_capacity() {
        let mut table = LocalHandleTable::with_capacity(None, None, 4).unwrap();
        assert_eq!(table.create_handle('a', HandleFlags::empty(), Some(2)), Ok(2));
        assert_eq!(table.create_handle('b', HandleFlags::empty(), Some(2)), Ok(3));
        assert_eq!(table.create_handle('c', HandleFlags::empty(), None), Ok(0));
        assert_eq!(
            table.create_handle('d', HandleFlags::empty(), Some(2)),
            Err(ObError::InsufficientResources)
        );
        assert_eq!(table.create_handle('e', HandleFlags::empty(), None), Ok(1));
        assert_eq!(
            table.create_handle('f', HandleFlags::empty(), None),
            Err(ObError::InsufficientResources)
        );
        assert_eq!(table.get_highest_handle(), Some(3));

        assert!(LocalHandleTable::<u8>::with_capacity(None, None, 0).is_err());
        assert!(LocalHandleTable::<u8>::with_capacity(None, None, MAX_HANDLES + 1).is_err());
    }

    #[test]
    fn test_flags_are_masked() {
        let mut table = LocalHandleTable::new(None, None);
        let flags = HandleFlags::from_bits_retain(0xF000_0000) | HandleFlags::CLOSE_ON_EXECUTE;
        let handle = table.create_handle((), flags, None).unwrap();
        assert_eq!(table.get_handle_value(handle).unwrap().1, HandleFlags::CLOSE_ON_EXECUTE);

        let previous = table.set_handle_flags(handle, HandleFlags::INHERIT).unwrap();
        assert_eq!(previous, HandleFlags::CLOSE_ON_EXECUTE);
        assert_eq!(table.get_handle_value(handle).unwrap().1, HandleFlags::INHERIT);
        assert_eq!(table.set_handle_flags(7, HandleFlags::empty()), Err(ObError::InvalidHandle));
    }

    #[test]
    fn test_replace_handle_value() {
        let mut table = LocalHandleTable::with_capacity(None, None, 8).unwrap();
        assert_eq!(table.replace_handle_value(5, "first", HandleFlags::empty()), Ok(None));
        assert_eq!(table.handle_count(), 1);
        assert_eq!(table.get_highest_handle(), Some(5));

        let old = table.replace_handle_value(5, "second", HandleFlags::INHERIT).unwrap();
        assert_eq!(old, Some(("first", HandleFlags::empty())));
        assert_eq!(table.handle_count(), 1);
        assert_eq!(table.get_handle_value(5), Some((&"second", HandleFlags::INHERIT)));

        assert_eq!(
            table.replace_handle_value(8, "third", HandleFlags::empty()),
            Err(ObError::TooManyHandles)
        );

        // Lower handles stay free
        assert_eq!(table.create_handle("fourth", HandleFlags::empty(), None), Ok(0));
    }

    #[test]
    fn test_destroy_handle() {
        let mut table = LocalHandleTable::new(None, None);
        let low = table.create_handle(1u8, HandleFlags::empty(), None).unwrap();
        let high = table.create_handle(2u8, HandleFlags::empty(), None).unwrap();

        assert_eq!(table.destroy_handle(high), Some(2));
        assert_eq!(table.destroy_handle(high), None);
        assert_eq!(table.get_handle_value(high), None);
        assert_eq!(table.get_highest_handle(), Some(low));
        assert_eq!(table.destroy_handle(INVALID_HANDLE), None);

        assert_eq!(table.destroy_handle(low), Some(1));
        assert_eq!(table.get_highest_handle(), None);
        assert_eq!(table.handle_count(), 0);
    }

    static LOOKUPS: AtomicUsize = AtomicUsize::new(0);

    fn count_lookup(_handle: Handle, _value: &u64) {
        LOOKUPS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_lookup_routine() {
        let table = HandleTable::new(None, Some(count_lookup as LookupRoutine<u64>));
        let handle = table.create_handle(42, HandleFlags::empty(), None).unwrap();
        let before = LOOKUPS.load(Ordering::SeqCst);

        assert_eq!(table.get_handle_value(handle), Some((42, HandleFlags::empty())));
        assert_eq!(LOOKUPS.load(Ordering::SeqCst), before + 1);

        // Misses do not run the routine
        assert_eq!(table.get_handle_value(handle + 1), None);
        assert_eq!(LOOKUPS.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn test_iterate_in_order() {
        let table = HandleTable::new(None, None);
        for value in [10u32, 20, 30] {
            table.create_handle(value, HandleFlags::empty(), None).unwrap();
        }

        table.destroy_handle(1);
        let mut seen = Vec::new();
        table.iterate(|handle, value, _| seen.push((handle, *value)));
        assert_eq!(seen, vec![(0, 10), (2, 30)]);
    }

    #[test]
    fn test_object_handles() {
        let om = ObjectManager::new(HostScheduler::new());
        let process = om
            .create_object(ObjectType::Process, None, None, (), None, 0)
            .unwrap();
        let event = om
            .create_object(ObjectType::Event, None, None, (), None, 0)
            .unwrap();

        let table = HandleTable::new(Some(&process), None);
        assert_eq!(table.owner(), Some(process.clone()));

        // The table stores whatever reference the caller hands it
        let handle = table
            .create_handle(event.add_reference(), HandleFlags::CLOSE_ON_EXECUTE, None)
            .unwrap();
        assert_eq!(event.reference_count(), 2);

        let (found, flags) = table.get_handle_value(handle).unwrap();
        assert_eq!(found, event);
        assert_eq!(flags, HandleFlags::CLOSE_ON_EXECUTE);
        drop(found);

        let mut closed = 0;
        table.close_all(|_, object| {
            object.release_reference();
            closed += 1;
        });
        assert_eq!(closed, 1);
        assert_eq!(table.handle_count(), 0);
        assert_eq!(event.reference_count(), 1);

        drop(process);
        assert!(table.owner().is_none());
    }

    #[test]
    fn test_concurrent_handle_creation() {
        let table = HandleTable::new(None, None);
        std::thread::scope(|s| {
            for thread in 0..4u32 {
                let table = &table;
                s.spawn(move || {
                    for value in 0..50u32 {
                        table
                            .create_handle(thread * 100 + value, HandleFlags::empty(), None)
                            .unwrap();
                    }
                });
            }
        });

        assert_eq!(table.handle_count(), 200);
        assert_eq!(table.get_highest_handle(), Some(199));
        let mut values = HashSet::new();
        table.iterate(|_, value, _| {
            values.insert(*value);
        });
        assert_eq!(values.len(), 200);
    }
}

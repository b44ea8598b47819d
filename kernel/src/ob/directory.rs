//! Object Namespace
//!
//! Objects form one tree per object manager, rooted at an unnamed
//! directory. A name is only meaningful relative to the parent; paths are
//! formed by joining the names of every ancestor below the root:
//!
//! ```text
//! /                      root directory
//! /Device                child of the root named "Device"
//! /Device/Null           child of /Device named "Null"
//! ```
//!
//! # Operations
//! - Create: allocate an object and link it under its parent
//! - Name: give an unnamed object its (only) name
//! - Find: resolve a path from the root or from a starting object
//! - Full path: rebuild an object's absolute path
//! - Unlink: take an object off its parent's child list

use alloc::borrow::Cow;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use super::header::{DestroyRoutine, ObjectBody, ObjectFlags, ObjectHeader, ObjectRef};
use super::object_type::ObjectType;
use super::status::{ObError, ObResult};
use super::ObjectManager;

/// Separator between path components
pub const OBJECT_PATH_SEPARATOR: char = '/';

/// Where an object's name comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameSource<'a> {
    /// Copy the name into pool memory owned by the object
    Copy(&'a str),
    /// Use a static name in place
    Direct(&'static str),
}

impl NameSource<'_> {
    /// Produce the stored form of the name and whether it is used directly
    fn into_name(self) -> ObResult<(Cow<'static, str>, bool)> {
        let name = match self {
            NameSource::Copy(name) | NameSource::Direct(name) => name,
        };

        if name.contains(OBJECT_PATH_SEPARATOR) {
            log::warn!("[OB] rejected object name {:?}", name);
            return Err(ObError::InvalidParameter);
        }

        match self {
            NameSource::Direct(name) => Ok((Cow::Borrowed(name), true)),
            NameSource::Copy(name) => {
                let mut copy = String::new();
                copy.try_reserve_exact(name.len())
                    .map_err(|_| ObError::NoMemory)?;

                copy.push_str(name);
                Ok((Cow::Owned(copy), false))
            }
        }
    }
}

impl ObjectManager {
    /// Create an object and link it under `parent` (the root if `None`)
    ///
    /// The object's wait queue starts out not signaled. The returned
    /// reference is the creation reference; the new object also holds a
    /// reference on its parent until it is destroyed.
    pub fn create_object<T: ObjectBody>(
        &self,
        object_type: ObjectType,
        parent: Option<&ObjectRef>,
        name: Option<NameSource<'_>>,
        body: T,
        destroy: Option<DestroyRoutine>,
        tag: u32,
    ) -> ObResult<ObjectRef> {
        let parent = parent.unwrap_or(&self.root);
        let mut flags = ObjectFlags::LINKED;
        let name = match name {
            Some(source) => {
                let (name, direct) = source.into_name()?;
                if direct {
                    flags |= ObjectFlags::USE_NAME_DIRECTLY;
                }

                Some(name)
            }

            None => None,
        };

        let mut children = parent.children.lock();
        if children.try_reserve(1).is_err() {
            drop(children);
            return Err(ObError::NoMemory);
        }

        let object = ObjectRef::allocate(
            object_type,
            Some(parent.clone()),
            name,
            flags,
            body,
            destroy,
            tag,
        );

        children.push(Arc::downgrade(&object.0));
        drop(children);
        Ok(object)
    }

    /// Look up an object by path
    ///
    /// Paths starting with the separator are resolved from the root;
    /// anything else is resolved from `start`, or the root if there is no
    /// starting object. Matching is case sensitive, empty components are
    /// skipped and `"/"` names the root itself. The returned reference
    /// belongs to the caller.
    pub fn find_object(&self, path: &str, start: Option<&ObjectRef>) -> ObResult<ObjectRef> {
        if path.is_empty() {
            return Err(ObError::InvalidParameter);
        }

        let (mut current, relative) = match path.strip_prefix(OBJECT_PATH_SEPARATOR) {
            Some(relative) => (self.root.clone(), relative),
            None => (start.unwrap_or(&self.root).clone(), path),
        };

        for component in relative
            .split(OBJECT_PATH_SEPARATOR)
            .filter(|component| !component.is_empty())
        {
            current = current.find_child(component).ok_or(ObError::NotFound)?;
        }

        Ok(current)
    }
}

impl ObjectHeader {
    /// Find a live child by name
    fn find_child(&self, name: &str) -> Option<ObjectRef> {
        // Snapshot first so no reference is dropped under the list lock.
        self.children()
            .into_iter()
            .find(|child| child.has_name(name))
    }

    /// Name an unnamed object
    ///
    /// Fails with `TooLate` if the object already has a name.
    pub fn name_object(&self, name: NameSource<'_>) -> ObResult<()> {
        let (name, direct) = name.into_name()?;
        let mut slot = self.name.lock();
        if slot.is_some() {
            return Err(ObError::TooLate);
        }

        *slot = Some(name);
        self.mark_name_direct(direct);
        Ok(())
    }

    /// Build the absolute path of the object
    ///
    /// Fails with `NotFound` if the object or any ancestor below the root
    /// has no name.
    pub fn get_full_path(&self) -> ObResult<String> {
        let mut chain: Vec<&ObjectHeader> = Vec::new();
        let mut length = 0;
        let mut current = self;
        while let Some(parent) = current.parent() {
            match current.name.lock().as_deref() {
                Some(name) if !name.is_empty() => length += name.len() + 1,
                _ => return Err(ObError::NotFound),
            }

            chain.try_reserve(1).map_err(|_| ObError::NoMemory)?;
            chain.push(current);
            current = parent.header();
        }

        let mut path = String::new();
        path.try_reserve_exact(length.max(1))
            .map_err(|_| ObError::NoMemory)?;

        if chain.is_empty() {
            path.push(OBJECT_PATH_SEPARATOR);
        }

        // Names never change once set, so the lengths above still hold.
        for header in chain.iter().rev() {
            path.push(OBJECT_PATH_SEPARATOR);
            if let Some(name) = header.name.lock().as_deref() {
                path.push_str(name);
            }
        }

        Ok(path)
    }
}

impl ObjectRef {
    /// Remove the object from its parent's child list
    ///
    /// The object stays alive for as long as it is referenced but can no
    /// longer be found by name. Fails with `NotFound` if the object is not
    /// linked.
    pub fn unlink(&self) -> ObResult<()> {
        let parent = match self.parent() {
            Some(parent) => parent,
            None => return Err(ObError::NotFound),
        };

        let previous = self.clear_flags(ObjectFlags::LINKED);
        if !previous.contains(ObjectFlags::LINKED) {
            return Err(ObError::NotFound);
        }

        let this = self.as_ptr();
        parent
            .children
            .lock()
            .retain(|child| child.as_ptr() as *const u8 != this);

        log::trace!("[OB] unlinked {} object {:?}", self.object_type(), self.name());
        Ok(())
    }
}

//! Process-wide namespace of named kernel objects.
//!
//! Names map to [`Weak`] references so the namespace never keeps an object alive by itself.
//! An entry is retired when the last handle to its object closes. A create racing with that
//! close finds an object whose handle count already dropped to zero and replaces the entry
//! with a fresh object instead of reviving the dying one.

use std::sync::{Arc, Weak};

use dashmap::{mapref::entry::Entry, DashMap};

use crate::{
    object::{ObjectKind, SyncObject},
    Error, Result,
};

/// Name to object registry.
#[derive(Debug, Default)]
pub(crate) struct Namespace {
    names: DashMap<String, Weak<SyncObject>>,
}

/// Outcome of a lookup under the entry lock, acted upon after the lock is dropped.
enum Lookup {
    Existing(Arc<SyncObject>),
    Created(Arc<SyncObject>),
    WrongKind(Arc<SyncObject>),
}

impl Namespace {
    /// Returns the live object named `name` with a new handle reference, or creates one with
    /// `make`.
    ///
    /// # Returns
    ///
    /// The object and `true` if it existed before the call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if the name belongs to an object of another kind, or
    /// whatever `make` fails with.
    pub(crate) fn create_or_open(
        &self,
        name: &str,
        kind: ObjectKind,
        make: impl FnOnce() -> Result<SyncObject>,
    ) -> Result<(Arc<SyncObject>, bool)> {
        let lookup = match self.names.entry(name.to_string()) {
            Entry::Occupied(mut entry) => match acquire_live(entry.get()) {
                Some(object) if object.kind() == kind => Lookup::Existing(object),
                Some(object) => Lookup::WrongKind(object),
                None => {
                    let object = Arc::new(make()?);
                    object.add_handle_ref();
                    entry.insert(Arc::downgrade(&object));
                    Lookup::Created(object)
                }
            },
            Entry::Vacant(entry) => {
                let object = Arc::new(make()?);
                object.add_handle_ref();
                entry.insert(Arc::downgrade(&object));
                Lookup::Created(object)
            }
        };

        match lookup {
            Lookup::Existing(object) => Ok((object, true)),
            Lookup::Created(object) => Ok((object, false)),
            Lookup::WrongKind(object) => {
                self.release(&object);
                Err(Error::InvalidHandle)
            }
        }
    }

    /// Returns the live object named `name` with a new handle reference.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if no live object carries the name
    /// - [`Error::InvalidHandle`] if the object is of another kind
    pub(crate) fn open(&self, name: &str, kind: ObjectKind) -> Result<Arc<SyncObject>> {
        let object = self
            .names
            .get(name)
            .and_then(|weak| acquire_live(weak.value()))
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        if object.kind() != kind {
            self.release(&object);
            return Err(Error::InvalidHandle);
        }
        Ok(object)
    }

    /// Drops a handle reference taken by a lookup, retiring the name if it was the last.
    pub(crate) fn release(&self, object: &SyncObject) {
        if object.release_handle_ref() {
            self.retire(object);
        }
    }

    /// Removes the name of `object` unless it was already rebound to another object.
    pub(crate) fn retire(&self, object: &SyncObject) {
        if let Some(name) = object.name() {
            self.names
                .remove_if(name, |_, weak| std::ptr::eq(weak.as_ptr(), object));
        }
    }

    /// Number of bound names.
    pub(crate) fn len(&self) -> usize {
        self.names.len()
    }
}

fn acquire_live(weak: &Weak<SyncObject>) -> Option<Arc<SyncObject>> {
    weak.upgrade()
        .filter(|object| object.try_acquire_handle_ref())
}

//! Handle table.
//!
//! Maps opaque [`Handle`] values to shared [`SyncObject`]s. Every handle holds one handle
//! reference on its object; in-flight waits hold the object through their own `Arc`, so an
//! object outlives its last handle for exactly as long as some wait still needs it.
//!
//! Handle values come from a monotonically increasing counter stepping by 4, like Win32
//! handle values, and are never reused. The map itself is a [`DashMap`] so lookups on the
//! hot path only touch one shard lock.

mod namespace;

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use bitflags::bitflags;
use dashmap::DashMap;

use namespace::Namespace;

use crate::{
    object::{ObjectKind, ObjectState, SyncObject},
    win32::constants::{DUPLICATE_CLOSE_SOURCE, DUPLICATE_SAME_ACCESS},
    Error, Result,
};

/// Opaque handle to a kernel object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u64);

impl Handle {
    /// The null handle, never issued.
    pub const NULL: Handle = Handle(0);

    /// Pseudo handle denoting the calling thread, as returned by `GetCurrentThread`.
    ///
    /// It is resolved per thread, closing it is a no-op and duplicating it yields a real
    /// handle.
    pub const CURRENT_THREAD: Handle = Handle(u64::MAX - 1);

    /// Returns the raw handle value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns `true` for the null handle.
    #[must_use]
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.0)
    }
}

bitflags! {
    /// Options of `DuplicateHandle`.
    ///
    /// Access masks are not modeled, so [`SAME_ACCESS`](Self::SAME_ACCESS) is accepted and
    /// has no further effect.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DuplicateOptions: u32 {
        /// Close the source handle after a successful duplication.
        const CLOSE_SOURCE = DUPLICATE_CLOSE_SOURCE;
        /// Give the duplicate the access of the source handle.
        const SAME_ACCESS = DUPLICATE_SAME_ACCESS;
    }
}

/// A handle issued by [`HandleTable::create`], together with its object.
pub(crate) struct Created {
    pub(crate) handle: Handle,
    pub(crate) object: Arc<SyncObject>,
    /// A named object of the same kind already existed.
    pub(crate) existed: bool,
}

/// Process-wide registry of open handles.
#[derive(Debug)]
pub struct HandleTable {
    entries: DashMap<Handle, Arc<SyncObject>>,
    namespace: Namespace,
    capacity: usize,
    open: AtomicUsize,
    next_handle: AtomicU64,
    next_object_id: AtomicU64,
}

impl HandleTable {
    /// Creates an empty table holding at most `capacity` handles.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            namespace: Namespace::default(),
            capacity,
            open: AtomicUsize::new(0),
            next_handle: AtomicU64::new(4),
            next_object_id: AtomicU64::new(1),
        }
    }

    /// Number of open handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }

    /// Returns `true` if no handle is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of names bound in the object namespace.
    #[must_use]
    pub fn named_count(&self) -> usize {
        self.namespace.len()
    }

    /// Allocates a process-unique object id.
    pub(crate) fn next_object_id(&self) -> u64 {
        self.next_object_id.fetch_add(1, Ordering::Relaxed)
    }

    fn reserve_slot(&self) -> Result<()> {
        self.open
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| {
                (open < self.capacity).then_some(open + 1)
            })
            .map(|_| ())
            .map_err(|_| {
                Error::ResourceExhausted(format!("handle table full ({} handles)", self.capacity))
            })
    }

    fn unreserve_slot(&self) {
        self.open.fetch_sub(1, Ordering::AcqRel);
    }

    fn issue(&self, object: Arc<SyncObject>) -> Handle {
        let handle = Handle(self.next_handle.fetch_add(4, Ordering::Relaxed));
        self.entries.insert(handle, object);
        handle
    }

    /// Creates an object, or opens the existing one if `name` is already bound to an object
    /// of the same kind. The `init` closure is only invoked when a new object is created.
    ///
    /// # Errors
    ///
    /// - [`Error::ResourceExhausted`] if the table is full
    /// - [`Error::InvalidHandle`] if `name` is bound to an object of another kind
    /// - whatever `init` fails with
    pub(crate) fn create(
        &self,
        kind: ObjectKind,
        name: Option<&str>,
        init: impl FnOnce() -> Result<ObjectState>,
    ) -> Result<Created> {
        self.reserve_slot()?;

        let make = || -> Result<SyncObject> {
            let state = init()?;
            debug_assert_eq!(state.kind(), kind);
            Ok(SyncObject::new(
                self.next_object_id(),
                name.map(str::to_string),
                state,
            ))
        };

        let created = match name {
            Some(name) => self.namespace.create_or_open(name, kind, make),
            None => make().map(|object| {
                let object = Arc::new(object);
                object.add_handle_ref();
                (object, false)
            }),
        };

        match created {
            Ok((object, existed)) => Ok(Created {
                handle: self.issue(Arc::clone(&object)),
                object,
                existed,
            }),
            Err(e) => {
                self.unreserve_slot();
                Err(e)
            }
        }
    }

    /// Opens a new handle to the object bound to `name`.
    ///
    /// # Errors
    ///
    /// - [`Error::ResourceExhausted`] if the table is full
    /// - [`Error::NotFound`] if the name is not bound
    /// - [`Error::InvalidHandle`] if it is bound to an object of another kind
    pub(crate) fn open(&self, kind: ObjectKind, name: &str) -> Result<Handle> {
        self.reserve_slot()?;
        match self.namespace.open(name, kind) {
            Ok(object) => Ok(self.issue(object)),
            Err(e) => {
                self.unreserve_slot();
                Err(e)
            }
        }
    }

    /// Issues an additional handle to `object`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceExhausted`] if the table is full.
    pub(crate) fn insert(&self, object: &Arc<SyncObject>) -> Result<Handle> {
        self.reserve_slot()?;
        object.add_handle_ref();
        Ok(self.issue(Arc::clone(object)))
    }

    /// Resolves `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] for unknown, closed or pseudo handles.
    pub fn get(&self, handle: Handle) -> Result<Arc<SyncObject>> {
        self.entries
            .get(&handle)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(Error::InvalidHandle)
    }

    /// Resolves `handle`, requiring an object of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if the handle is unknown or of another kind.
    pub fn get_kind(&self, handle: Handle, kind: ObjectKind) -> Result<Arc<SyncObject>> {
        let object = self.get(handle)?;
        if object.kind() != kind {
            return Err(Error::InvalidHandle);
        }
        Ok(object)
    }

    /// Issues a second handle to the object behind `handle`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidHandle`] if `handle` is not open
    /// - [`Error::ResourceExhausted`] if the table is full
    pub fn duplicate(&self, handle: Handle) -> Result<Handle> {
        let object = self.get(handle)?;
        self.insert(&object)
    }

    /// Closes `handle`.
    ///
    /// The object's name is released with its last handle. The object itself is freed once
    /// no wait references it any more.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if `handle` is not open. Nothing changes in that case.
    pub fn close(&self, handle: Handle) -> Result<()> {
        let (_, object) = self.entries.remove(&handle).ok_or(Error::InvalidHandle)?;
        self.unreserve_slot();
        self.namespace.release(&object);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{EventState, MutexState, SemaphoreState};

    fn create_event(table: &HandleTable, name: Option<&str>) -> Result<Created> {
        table.create(ObjectKind::Event, name, || {
            Ok(ObjectState::Event(EventState::new(true, false)))
        })
    }

    #[test]
    fn test_handle_values() {
        let table = HandleTable::new(8);
        let a = create_event(&table, None).unwrap().handle;
        let b = create_event(&table, None).unwrap().handle;
        assert!(!a.is_null());
        assert_eq!(b.value(), a.value() + 4);

        table.close(a).unwrap();
        let c = create_event(&table, None).unwrap().handle;
        assert_ne!(a, c);
        assert_eq!(Handle(4).to_string(), "Handle(0x4)");
    }

    #[test]
    fn test_close_twice_fails() {
        let table = HandleTable::new(8);
        let handle = create_event(&table, None).unwrap().handle;
        table.close(handle).unwrap();
        assert!(matches!(table.close(handle), Err(Error::InvalidHandle)));
        assert!(matches!(table.get(handle), Err(Error::InvalidHandle)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_shares_object() {
        let table = HandleTable::new(8);
        let created = create_event(&table, None).unwrap();
        let dup = table.duplicate(created.handle).unwrap();
        assert!(Arc::ptr_eq(&table.get(dup).unwrap(), &created.object));
        assert_eq!(created.object.handle_count(), 2);

        table.close(created.handle).unwrap();
        assert!(table.get(dup).is_ok());
        assert_eq!(created.object.handle_count(), 1);
    }

    #[test]
    fn test_capacity() {
        let table = HandleTable::new(2);
        let first = create_event(&table, None).unwrap().handle;
        table.duplicate(first).unwrap();
        assert!(matches!(
            create_event(&table, None),
            Err(Error::ResourceExhausted(_))
        ));
        assert!(matches!(
            table.duplicate(first),
            Err(Error::ResourceExhausted(_))
        ));
        table.close(first).unwrap();
        assert!(create_event(&table, None).is_ok());
    }

    #[test]
    fn test_failed_init_releases_slot() {
        let table = HandleTable::new(1);
        let result = table.create(ObjectKind::Semaphore, None, || {
            Ok(ObjectState::Semaphore(SemaphoreState::new(2, 1)?))
        });
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(table.is_empty());
        assert!(create_event(&table, None).is_ok());
    }

    #[test]
    fn test_named_lifecycle() {
        let table = HandleTable::new(8);
        let first = create_event(&table, Some("go")).unwrap();
        let second = create_event(&table, Some("go")).unwrap();
        assert!(!first.existed);
        assert!(second.existed);
        assert_ne!(first.handle, second.handle);

        let opened = table.open(ObjectKind::Event, "go").unwrap();
        assert!(matches!(
            table.open(ObjectKind::Mutex, "go"),
            Err(Error::InvalidHandle)
        ));
        assert!(matches!(
            table.create(ObjectKind::Mutex, Some("go"), || {
                Ok(ObjectState::Mutex(MutexState::new(None)))
            }),
            Err(Error::InvalidHandle)
        ));
        assert_eq!(table.len(), 3);

        for handle in [first.handle, second.handle, opened] {
            table.close(handle).unwrap();
        }
        assert_eq!(table.named_count(), 0);
        assert!(matches!(
            table.open(ObjectKind::Event, "go"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_get_kind() {
        let table = HandleTable::new(8);
        let handle = create_event(&table, None).unwrap().handle;
        assert!(table.get_kind(handle, ObjectKind::Event).is_ok());
        assert!(matches!(
            table.get_kind(handle, ObjectKind::Mutex),
            Err(Error::InvalidHandle)
        ));
        assert!(matches!(
            table.get(Handle::CURRENT_THREAD),
            Err(Error::InvalidHandle)
        ));
    }
}

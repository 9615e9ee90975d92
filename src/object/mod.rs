//! Waitable kernel objects.
//!
//! Every handle-based object is a [`SyncObject`]: an identity (id, kind, optional name), an
//! open-handle count and a lock-protected core holding the kind-specific [`ObjectState`] plus
//! the FIFO list of wait blocks registered on it.
//!
//! # Signal Contract
//!
//! All kinds share one contract, dispatched on the closed [`ObjectState`] union:
//!
//! - `is_satisfiable(thread)` - can `thread` complete a wait on the object right now
//! - `consume(thread)` - take the object on behalf of `thread` (decrement a semaphore, reset an
//!   auto-reset event, take mutex ownership)
//!
//! Any operation that makes an object more available finishes with a sweep over its waiter
//! list, still under the object lock, handing the object directly to queued waiters in
//! registration order. Later fast-path callers therefore cannot barge in front of them.
//!
//! # Supported Kinds
//!
//! - Mutexes with recursion and abandonment ([`mutex`])
//! - Counting semaphores ([`semaphore`])
//! - Manual and auto reset events ([`event`])
//! - Threads, signaled once on exit ([`thread`])

mod event;
mod mutex;
mod semaphore;
mod thread;

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, TryLockError, Weak,
    },
};

use strum::Display;

pub(crate) use event::EventState;
pub(crate) use mutex::MutexState;
pub(crate) use semaphore::SemaphoreState;
pub(crate) use thread::ThreadObjectState;

use crate::{
    thread::{ThreadControlBlock, ThreadId},
    utils::lock,
    wait::WaitBlock,
    Error, Result,
};

/// The kind of a waitable object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum ObjectKind {
    /// Recursive, owner-tracked mutex.
    Mutex,
    /// Counting semaphore.
    Semaphore,
    /// Manual or auto reset event.
    Event,
    /// A thread, signaled when it exits.
    Thread,
}

/// Kind-specific object state.
#[derive(Debug)]
pub(crate) enum ObjectState {
    Mutex(MutexState),
    Semaphore(SemaphoreState),
    Event(EventState),
    Thread(ThreadObjectState),
}

impl ObjectState {
    pub(crate) fn kind(&self) -> ObjectKind {
        match self {
            ObjectState::Mutex(_) => ObjectKind::Mutex,
            ObjectState::Semaphore(_) => ObjectKind::Semaphore,
            ObjectState::Event(_) => ObjectKind::Event,
            ObjectState::Thread(_) => ObjectKind::Thread,
        }
    }

    /// Returns `true` if a wait by `thread` could complete on this object right now.
    pub(crate) fn is_satisfiable(&self, thread: ThreadId) -> bool {
        match self {
            ObjectState::Mutex(mutex) => mutex.is_available_to(thread),
            ObjectState::Semaphore(sem) => sem.is_available(),
            ObjectState::Event(event) => event.signaled,
            ObjectState::Thread(target) => target.is_exited(),
        }
    }

    /// Checks limits that would make consuming the object fail for `thread`.
    pub(crate) fn check_consume(&self, thread: ThreadId) -> Result<()> {
        match self {
            ObjectState::Mutex(mutex) => mutex.check_acquire(thread),
            _ => Ok(()),
        }
    }

    /// Consumes the object for `thread`. It must be [satisfiable](Self::is_satisfiable) and
    /// pass [`check_consume`](Self::check_consume).
    ///
    /// Returns `true` if the wait must be reported as abandoned.
    pub(crate) fn consume(&mut self, thread: ThreadId) -> bool {
        match self {
            ObjectState::Mutex(mutex) => mutex.acquire(thread),
            ObjectState::Semaphore(sem) => {
                sem.acquire();
                false
            }
            ObjectState::Event(event) => {
                event.acquire();
                false
            }
            ObjectState::Thread(_) => false,
        }
    }

    /// Reverts one [`consume`](Self::consume) by `thread`. `abandoned` is what that call
    /// returned.
    pub(crate) fn restore(&mut self, thread: ThreadId, abandoned: bool) {
        match self {
            ObjectState::Mutex(mutex) => mutex.unacquire(thread, abandoned),
            ObjectState::Semaphore(sem) => sem.give_back(),
            ObjectState::Event(event) => event.give_back(),
            ObjectState::Thread(_) => {}
        }
    }
}

/// Lock-protected part of a [`SyncObject`].
#[derive(Debug)]
pub(crate) struct ObjectCore {
    pub(crate) state: ObjectState,
    /// Registered wait blocks in registration order.
    pub(crate) waiters: VecDeque<Weak<WaitBlock>>,
}

/// A reference-counted kernel object.
///
/// Handles and in-flight waits share the object through `Arc`. The open-handle count is
/// tracked separately so the handle table can retire names once the last handle closes while
/// waits still hold the object alive.
pub struct SyncObject {
    id: u64,
    kind: ObjectKind,
    name: Option<String>,
    handle_count: AtomicUsize,
    core: Mutex<ObjectCore>,
}

impl SyncObject {
    pub(crate) fn new(id: u64, name: Option<String>, state: ObjectState) -> Self {
        Self {
            id,
            kind: state.kind(),
            name,
            handle_count: AtomicUsize::new(0),
            core: Mutex::new(ObjectCore {
                state,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Returns the process-unique object id. Ids define the object lock order.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the object kind.
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Returns the namespace name of the object, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the number of open handles referring to the object.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.handle_count.load(Ordering::Acquire)
    }

    pub(crate) fn add_handle_ref(&self) {
        self.handle_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Adds a handle reference unless the object already lost its last handle.
    pub(crate) fn try_acquire_handle_ref(&self) -> bool {
        self.handle_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count > 0).then_some(count + 1)
            })
            .is_ok()
    }

    /// Drops a handle reference. Returns `true` if it was the last one.
    pub(crate) fn release_handle_ref(&self) -> bool {
        self.handle_count.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, ObjectCore>> {
        lock(&self.core, "kernel object")
    }

    /// Locks the object without blocking. `Ok(None)` if another thread holds the lock.
    pub(crate) fn try_lock(&self) -> Result<Option<MutexGuard<'_, ObjectCore>>> {
        match self.core.try_lock() {
            Ok(guard) => Ok(Some(guard)),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Poisoned(_)) => Err(os_failure!("kernel object lock is poisoned")),
        }
    }

    /// Number of wait blocks currently parked on the object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OsPrimitiveFailure`] if the object lock is poisoned.
    pub fn waiter_count(&self) -> Result<usize> {
        let core = self.lock()?;
        let mut count = 0;
        for waiter in core.waiters.iter().filter_map(Weak::upgrade) {
            if waiter.is_pending()? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Hands the object to registered waiters in FIFO order for as long as it stays
    /// satisfiable. Must be called with `core` being this object's locked core.
    pub(crate) fn sweep(&self, core: &mut ObjectCore) -> Result<()> {
        let waiters = std::mem::take(&mut core.waiters);
        let mut kept = VecDeque::with_capacity(waiters.len());
        let mut result = Ok(());
        for weak in waiters {
            let Some(block) = weak.upgrade() else {
                continue;
            };
            if result.is_ok() && core.state.is_satisfiable(block.thread()) {
                if let Err(e) = block.offer(self, &mut core.state) {
                    result = Err(e);
                }
            }
            kept.push_back(weak);
        }
        core.waiters = kept;
        result
    }

    /// Releases one level of mutex ownership held by `thread`.
    ///
    /// Returns `true` if the mutex became unowned, in which case it was offered to the
    /// waiters.
    pub(crate) fn release_mutex(&self, thread: ThreadId) -> Result<bool> {
        let mut core = self.lock()?;
        let ObjectState::Mutex(mutex) = &mut core.state else {
            return Err(Error::InvalidHandle);
        };
        let released = mutex.release(thread)?;
        if released {
            self.sweep(&mut core)?;
        }
        Ok(released)
    }

    /// Abandons the mutex if `thread` still owns it.
    pub(crate) fn abandon_mutex(&self, thread: ThreadId) -> Result<bool> {
        let mut core = self.lock()?;
        let ObjectState::Mutex(mutex) = &mut core.state else {
            return Err(Error::InvalidHandle);
        };
        if !mutex.abandon(thread) {
            return Ok(false);
        }
        log::warn!(
            "mutex {} abandoned by exiting {}",
            self.name.as_deref().unwrap_or("<unnamed>"),
            thread
        );
        self.sweep(&mut core)?;
        Ok(true)
    }

    /// Adds `release_count` to a semaphore and returns the previous count.
    pub(crate) fn release_semaphore(&self, release_count: u32) -> Result<u32> {
        let mut core = self.lock()?;
        let ObjectState::Semaphore(sem) = &mut core.state else {
            return Err(Error::InvalidHandle);
        };
        let previous = sem.release(release_count)?;
        self.sweep(&mut core)?;
        Ok(previous)
    }

    pub(crate) fn set_event(&self) -> Result<()> {
        let mut core = self.lock()?;
        let ObjectState::Event(event) = &mut core.state else {
            return Err(Error::InvalidHandle);
        };
        event.signaled = true;
        self.sweep(&mut core)
    }

    pub(crate) fn reset_event(&self) -> Result<()> {
        let mut core = self.lock()?;
        let ObjectState::Event(event) = &mut core.state else {
            return Err(Error::InvalidHandle);
        };
        event.signaled = false;
        Ok(())
    }

    /// Sets the event, releases the waiters eligible right now and resets it.
    pub(crate) fn pulse_event(&self) -> Result<()> {
        let mut core = self.lock()?;
        let ObjectState::Event(event) = &mut core.state else {
            return Err(Error::InvalidHandle);
        };
        event.signaled = true;
        let swept = self.sweep(&mut core);
        if let ObjectState::Event(event) = &mut core.state {
            event.signaled = false;
        }
        swept
    }

    /// Returns the control block of a thread object.
    pub(crate) fn thread_tcb(&self) -> Result<Arc<ThreadControlBlock>> {
        match &self.lock()?.state {
            ObjectState::Thread(target) => Ok(Arc::clone(&target.tcb)),
            _ => Err(Error::InvalidHandle),
        }
    }

    /// Returns the exit code of a thread object, `None` while it runs.
    pub(crate) fn thread_exit_code(&self) -> Result<Option<u32>> {
        match &self.lock()?.state {
            ObjectState::Thread(target) => Ok(target.exit_code),
            _ => Err(Error::InvalidHandle),
        }
    }

    /// Records the exit code of a thread object and releases every waiter.
    pub(crate) fn signal_thread_exit(&self, exit_code: u32) -> Result<()> {
        let mut core = self.lock()?;
        let ObjectState::Thread(target) = &mut core.state else {
            return Err(Error::InvalidHandle);
        };
        if target.is_exited() {
            return Ok(());
        }
        target.exit_code = Some(exit_code);
        self.sweep(&mut core)
    }
}

impl fmt::Debug for SyncObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncObject")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("handle_count", &self.handle_count())
            .finish_non_exhaustive()
    }
}

//! Per-thread bookkeeping.
//!
//! Every thread known to a [`Pal`](crate::Pal) owns exactly one [`ThreadControlBlock`]. The
//! block is shared between the thread itself, the process thread registry and every thread
//! waitable object denoting the thread, so state written through one handle is observed
//! through all of them.
//!
//! # Layout
//!
//! Fields that are read and written independently (priority, last error) are atomics. The
//! APC queue, the wait bookkeeping, the owned-mutex list and the suspension counter live
//! behind the TCB lock, which is distinct from every kernel-object lock.

use std::{
    fmt,
    sync::{
        atomic::{AtomicI32, AtomicU32, Ordering},
        Arc, Condvar, Mutex, MutexGuard, Weak,
    },
};

use strum::{Display, FromRepr};

use crate::{
    object::SyncObject,
    thread::apc::ApcQueue,
    utils::{lock, wait_on},
    wait::WaitBlock,
    win32::constants::{
        THREAD_PRIORITY_ABOVE_NORMAL, THREAD_PRIORITY_BELOW_NORMAL, THREAD_PRIORITY_HIGHEST,
        THREAD_PRIORITY_IDLE, THREAD_PRIORITY_LOWEST, THREAD_PRIORITY_NORMAL,
        THREAD_PRIORITY_TIME_CRITICAL,
    },
    Error, Result,
};

/// Unique identifier for a thread registered with a [`Pal`](crate::Pal).
///
/// Thread ids are allocated by the owning instance, start at 1 and are never reused by it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u32);

impl ThreadId {
    /// Creates a new thread ID with the given value.
    ///
    /// # Arguments
    ///
    /// * `id` - The numeric thread identifier
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw numeric ID value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread({})", self.0)
    }
}

/// Thread priority levels.
///
/// The discriminants are the Win32 `THREAD_PRIORITY_*` values. Only the relative ordering is
/// meaningful to this crate: priorities are recorded and reported, the host scheduler is not
/// reconfigured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Display, FromRepr)]
#[repr(i32)]
pub enum ThreadPriority {
    /// Idle priority.
    Idle = THREAD_PRIORITY_IDLE,
    /// Lowest scheduling priority.
    Lowest = THREAD_PRIORITY_LOWEST,
    /// Below normal scheduling priority.
    BelowNormal = THREAD_PRIORITY_BELOW_NORMAL,
    /// Normal (default) scheduling priority.
    #[default]
    Normal = THREAD_PRIORITY_NORMAL,
    /// Above normal scheduling priority.
    AboveNormal = THREAD_PRIORITY_ABOVE_NORMAL,
    /// Highest scheduling priority.
    Highest = THREAD_PRIORITY_HIGHEST,
    /// Time critical priority.
    TimeCritical = THREAD_PRIORITY_TIME_CRITICAL,
}

impl ThreadPriority {
    /// Converts a Win32 priority value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for values that are not a `THREAD_PRIORITY_*`
    /// level.
    pub fn from_win32(value: i32) -> Result<Self> {
        Self::from_repr(value)
            .ok_or_else(|| Error::InvalidArgument(format!("thread priority {}", value)))
    }

    /// Returns the Win32 `THREAD_PRIORITY_*` value.
    #[must_use]
    pub fn to_win32(self) -> i32 {
        self as i32
    }
}

/// State guarded by the TCB lock.
#[derive(Default)]
pub(crate) struct TcbState {
    /// Pending asynchronous procedure calls, in queueing order.
    pub(crate) apc_queue: ApcQueue,
    /// `true` only while the thread is blocked inside an alertable wait.
    pub(crate) alertable: bool,
    /// The wait the thread is currently blocked in.
    pub(crate) current_wait: Option<Weak<WaitBlock>>,
    /// Mutexes currently owned by the thread, abandoned on exit.
    pub(crate) owned_mutexes: Vec<Arc<SyncObject>>,
    /// Outstanding `SuspendThread` requests.
    pub(crate) suspend_count: u32,
    /// Set once the thread-exit protocol started.
    pub(crate) exited: bool,
}

/// Per-thread control block.
///
/// Holds the priority, the last-error slot, the APC queue and the bookkeeping the wait engine
/// needs to interrupt an alertable wait. See the [module documentation](self) for the locking
/// layout.
pub struct ThreadControlBlock {
    id: ThreadId,
    priority: AtomicI32,
    last_error: AtomicU32,
    state: Mutex<TcbState>,
    resumed: Condvar,
}

impl ThreadControlBlock {
    /// Creates the control block of a new thread.
    ///
    /// # Arguments
    ///
    /// * `id` - Identifier allocated by the owning instance
    /// * `priority` - Initial priority
    /// * `suspend_count` - Initial suspension count, `1` for `CREATE_SUSPENDED`
    pub(crate) fn new(id: ThreadId, priority: ThreadPriority, suspend_count: u32) -> Self {
        Self {
            id,
            priority: AtomicI32::new(priority.to_win32()),
            last_error: AtomicU32::new(0),
            state: Mutex::new(TcbState {
                suspend_count,
                ..TcbState::default()
            }),
            resumed: Condvar::new(),
        }
    }

    /// Returns the thread identifier.
    #[must_use]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Returns the current priority.
    #[must_use]
    pub fn priority(&self) -> ThreadPriority {
        ThreadPriority::from_repr(self.priority.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Sets the priority.
    pub fn set_priority(&self, priority: ThreadPriority) {
        self.priority.store(priority.to_win32(), Ordering::Release);
    }

    /// Returns the last-error slot.
    #[must_use]
    pub fn last_error(&self) -> u32 {
        self.last_error.load(Ordering::Relaxed)
    }

    /// Stores a value into the last-error slot.
    pub fn set_last_error(&self, code: u32) {
        self.last_error.store(code, Ordering::Relaxed);
    }

    /// Returns `true` once the thread-exit protocol ran.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OsPrimitiveFailure`] if the TCB lock is poisoned.
    pub fn is_exited(&self) -> Result<bool> {
        Ok(self.lock_state()?.exited)
    }

    /// Returns the current suspension count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OsPrimitiveFailure`] if the TCB lock is poisoned.
    pub fn suspend_count(&self) -> Result<u32> {
        Ok(self.lock_state()?.suspend_count)
    }

    pub(crate) fn lock_state(&self) -> Result<MutexGuard<'_, TcbState>> {
        lock(&self.state, "thread control block")
    }

    /// Publishes `block` as the wait the thread is about to block in.
    ///
    /// Returns `false` without publishing anything if the wait is alertable and APCs are
    /// already pending: those must be dispatched before any object state is looked at.
    pub(crate) fn begin_wait(&self, block: &Arc<WaitBlock>, alertable: bool) -> Result<bool> {
        let mut state = self.lock_state()?;
        if alertable && !state.apc_queue.is_empty() {
            return Ok(false);
        }
        state.alertable = alertable;
        state.current_wait = Some(Arc::downgrade(block));
        Ok(true)
    }

    /// Clears the wait published by [`begin_wait`](Self::begin_wait).
    ///
    /// Returns `true` if the wait was alertable and APCs arrived before it ended. Those
    /// APCs take priority over however else the wait was decided.
    pub(crate) fn end_wait(&self) -> Result<bool> {
        let mut state = self.lock_state()?;
        let alerted = state.alertable && !state.apc_queue.is_empty();
        state.alertable = false;
        state.current_wait = None;
        Ok(alerted)
    }

    /// Records ownership of a mutex, once per mutex regardless of recursion depth.
    pub(crate) fn note_owned(&self, mutex: &Arc<SyncObject>) -> Result<()> {
        let mut state = self.lock_state()?;
        if !state.owned_mutexes.iter().any(|m| Arc::ptr_eq(m, mutex)) {
            state.owned_mutexes.push(Arc::clone(mutex));
        }
        Ok(())
    }

    /// Drops the ownership record of a fully released mutex.
    pub(crate) fn note_released(&self, mutex: &Arc<SyncObject>) -> Result<()> {
        self.lock_state()?
            .owned_mutexes
            .retain(|m| !Arc::ptr_eq(m, mutex));
        Ok(())
    }

    /// Starts the thread-exit protocol.
    ///
    /// Marks the thread exited, discards its pending APCs and hands back the mutexes it still
    /// owns so the caller can abandon them.
    pub(crate) fn retire(&self) -> Result<Vec<Arc<SyncObject>>> {
        let mut state = self.lock_state()?;
        state.exited = true;
        state.alertable = false;
        state.current_wait = None;
        let discarded = state.apc_queue.clear();
        if discarded > 0 {
            log::debug!("{} exits with {} pending APCs discarded", self.id, discarded);
        }
        state.suspend_count = 0;
        self.resumed.notify_all();
        Ok(std::mem::take(&mut state.owned_mutexes))
    }

    /// Increments the suspension count, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] for an exited thread and
    /// [`Error::ResourceExhausted`] if the count would overflow.
    pub(crate) fn suspend(&self) -> Result<u32> {
        let mut state = self.lock_state()?;
        if state.exited {
            return Err(Error::InvalidHandle);
        }
        let previous = state.suspend_count;
        state.suspend_count = previous
            .checked_add(1)
            .ok_or_else(|| Error::ResourceExhausted("suspend count".to_string()))?;
        Ok(previous)
    }

    /// Decrements the suspension count, returning the previous value.
    ///
    /// The thread continues from its safe point once the count reaches zero.
    pub(crate) fn resume(&self) -> Result<u32> {
        let mut state = self.lock_state()?;
        let previous = state.suspend_count;
        if previous > 0 {
            state.suspend_count -= 1;
            if state.suspend_count == 0 {
                self.resumed.notify_all();
            }
        }
        Ok(previous)
    }

    /// Parks the calling thread while its suspension count is positive.
    ///
    /// Must only be called by the thread owning this TCB.
    pub(crate) fn park_while_suspended(&self) -> Result<()> {
        let mut state = self.lock_state()?;
        while state.suspend_count > 0 {
            log::trace!("{} parked at safe point", self.id);
            state = wait_on(&self.resumed, state, "thread control block")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ThreadControlBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadControlBlock")
            .field("id", &self.id)
            .field("priority", &self.priority())
            .field("last_error", &self.last_error())
            .finish_non_exhaustive()
    }
}

//! The calling thread's view of a [`Pal`].
//!
//! [`ThreadContext`] is the core API of the crate. Every operation takes the calling thread
//! implicitly through the context it is invoked on and reports failures as
//! [`Result`](crate::Result). The context is bound to its OS thread (it is neither `Send` nor
//! `Sync`) and cheap to clone; the thread-exit protocol runs when the last clone is dropped or
//! when a PAL-created thread returns from its entry point.
//!
//! # Thread Exit Protocol
//!
//! 1. Mark the TCB exited and discard pending APCs
//! 2. Abandon every mutex the thread still owns, offering each to its waiters
//! 3. Remove the TCB from the registry
//! 4. Store the exit code and signal the thread waitable

use std::{
    cell::{Cell, RefCell},
    fmt,
    panic::{self, AssertUnwindSafe},
    rc::{Rc, Weak},
    sync::Arc,
};

use crate::{
    handle::{DuplicateOptions, Handle},
    object::{EventState, MutexState, ObjectKind, ObjectState, SemaphoreState, SyncObject},
    pal::Pal,
    thread::{
        apc::{self, Apc},
        ThreadControlBlock, ThreadCreationFlags, ThreadId, ThreadPriority,
    },
    wait::{self, SleepResult, WaitResult},
    win32::constants::{ERROR_ALREADY_EXISTS, ERROR_INTERNAL_ERROR, STILL_ACTIVE},
    Error, Result,
};

thread_local! {
    static CURRENT: RefCell<Weak<ContextInner>> = const { RefCell::new(Weak::new()) };
}

/// Unwind payload used by [`ThreadContext::exit_thread`].
struct ThreadExit(u32);

struct ContextInner {
    pal: Arc<Pal>,
    tcb: Arc<ThreadControlBlock>,
    thread_object: Arc<SyncObject>,
    exit_code: Cell<u32>,
    retired: Cell<bool>,
}

impl ContextInner {
    fn retire(&self) {
        if self.retired.replace(true) {
            return;
        }
        if let Err(e) = self.run_exit_protocol() {
            log::error!("exit protocol of {} failed: {}", self.tcb.id(), e);
        }
    }

    fn run_exit_protocol(&self) -> Result<()> {
        exit_protocol(
            &self.pal,
            &self.tcb,
            &self.thread_object,
            self.exit_code.get(),
        )
    }
}

/// Runs every step of the thread-exit protocol, even after an earlier step failed.
///
/// Each failure is logged. The first one is returned.
fn exit_protocol(
    pal: &Pal,
    tcb: &ThreadControlBlock,
    thread_object: &SyncObject,
    code: u32,
) -> Result<()> {
    let id = tcb.id();
    let mut first = None;

    let owned = match tcb.retire() {
        Ok(owned) => owned,
        Err(e) => {
            note_failure(&mut first, id, "retiring the control block", e);
            Vec::new()
        }
    };
    for mutex in owned {
        if let Err(e) = mutex.abandon_mutex(id) {
            note_failure(&mut first, id, "abandoning a mutex", e);
        }
    }
    pal.unregister_thread(id);
    if let Err(e) = thread_object.signal_thread_exit(code) {
        note_failure(&mut first, id, "signaling the thread object", e);
    }

    match first {
        None => {
            log::debug!("{} exited with code {}", id, code);
            Ok(())
        }
        Some(e) => Err(e),
    }
}

fn note_failure(first: &mut Option<Error>, id: ThreadId, step: &str, error: Error) {
    log::warn!("{} exit protocol: {} failed: {}", id, step, error);
    first.get_or_insert(error);
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.retire();
    }
}

/// Handle-based synchronization API bound to the calling thread.
///
/// Obtained from [`Pal::attach_current_thread`] or passed to the entry point of a thread
/// created with [`ThreadContext::create_thread`].
#[derive(Clone)]
pub struct ThreadContext {
    inner: Rc<ContextInner>,
}

impl ThreadContext {
    /// Registers the calling thread with `pal`, or returns its live context.
    pub(crate) fn attach(pal: &Arc<Pal>) -> Result<Self> {
        if let Some(inner) = CURRENT.with(|current| current.borrow().upgrade()) {
            if !Arc::ptr_eq(&inner.pal, pal) {
                return Err(Error::InvalidArgument(
                    "thread is attached to another instance".to_string(),
                ));
            }
            return Ok(Self { inner });
        }
        let (tcb, object) = pal.register_thread(ThreadPriority::Normal, 0)?;
        Ok(Self::install(Arc::clone(pal), tcb, object))
    }

    fn install(pal: Arc<Pal>, tcb: Arc<ThreadControlBlock>, thread_object: Arc<SyncObject>) -> Self {
        let inner = Rc::new(ContextInner {
            pal,
            tcb,
            thread_object,
            exit_code: Cell::new(0),
            retired: Cell::new(false),
        });
        CURRENT.with(|current| *current.borrow_mut() = Rc::downgrade(&inner));
        Self { inner }
    }

    /// Returns the live context of the calling thread, if it is attached to any instance.
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT
            .try_with(|current| current.borrow().upgrade())
            .ok()
            .flatten()
            .filter(|inner| !inner.retired.get())
            .map(|inner| Self { inner })
    }

    /// Returns the instance the thread is attached to.
    #[must_use]
    pub fn pal(&self) -> &Arc<Pal> {
        &self.inner.pal
    }

    /// Returns the calling thread's control block.
    #[must_use]
    pub fn tcb(&self) -> &Arc<ThreadControlBlock> {
        &self.inner.tcb
    }

    /// `GetCurrentThreadId`.
    #[must_use]
    pub fn current_thread_id(&self) -> ThreadId {
        self.inner.tcb.id()
    }

    /// `GetCurrentThread`: the pseudo handle of the calling thread.
    #[must_use]
    pub fn current_thread(&self) -> Handle {
        Handle::CURRENT_THREAD
    }

    /// `GetLastError`.
    #[must_use]
    pub fn last_error(&self) -> u32 {
        self.inner.tcb.last_error()
    }

    /// `SetLastError`.
    pub fn set_last_error(&self, code: u32) {
        self.inner.tcb.set_last_error(code);
    }

    fn resolve(&self, handle: Handle) -> Result<Arc<SyncObject>> {
        if handle == Handle::CURRENT_THREAD {
            return Ok(Arc::clone(&self.inner.thread_object));
        }
        self.inner.pal.handles().get(handle)
    }

    fn resolve_kind(&self, handle: Handle, kind: ObjectKind) -> Result<Arc<SyncObject>> {
        let object = self.resolve(handle)?;
        if object.kind() != kind {
            return Err(Error::InvalidHandle);
        }
        Ok(object)
    }

    fn thread_tcb(&self, handle: Handle) -> Result<Arc<ThreadControlBlock>> {
        self.resolve_kind(handle, ObjectKind::Thread)?.thread_tcb()
    }

    /// Creates or opens an object and updates last error for named creations.
    fn create_object(
        &self,
        kind: ObjectKind,
        name: Option<&str>,
        init: impl FnOnce() -> Result<ObjectState>,
    ) -> Result<(Handle, Arc<SyncObject>, bool)> {
        let name = name.filter(|name| !name.is_empty());
        let created = self.inner.pal.handles().create(kind, name, init)?;
        if name.is_some() {
            self.set_last_error(if created.existed {
                ERROR_ALREADY_EXISTS
            } else {
                0
            });
        }
        Ok((created.handle, created.object, created.existed))
    }

    fn open_object(&self, kind: ObjectKind, name: &str) -> Result<Handle> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("empty object name".to_string()));
        }
        self.inner.pal.handles().open(kind, name)
    }

    /// `CreateMutex`.
    ///
    /// With `initial_owner` the calling thread owns the new mutex at depth 1. Opening an
    /// existing named mutex ignores `initial_owner`.
    ///
    /// # Errors
    ///
    /// - [`Error::ResourceExhausted`] if the handle table is full
    /// - [`Error::InvalidHandle`] if `name` belongs to an object of another kind
    pub fn create_mutex(&self, initial_owner: bool, name: Option<&str>) -> Result<Handle> {
        let owner = initial_owner.then(|| self.current_thread_id());
        let (handle, object, existed) = self.create_object(ObjectKind::Mutex, name, || {
            Ok(ObjectState::Mutex(MutexState::new(owner)))
        })?;
        if owner.is_some() && !existed {
            self.inner.tcb.note_owned(&object)?;
        }
        Ok(handle)
    }

    /// `OpenMutex`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no mutex carries `name`.
    pub fn open_mutex(&self, name: &str) -> Result<Handle> {
        self.open_object(ObjectKind::Mutex, name)
    }

    /// `ReleaseMutex`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOwner`] if the calling thread does not own the mutex.
    pub fn release_mutex(&self, handle: Handle) -> Result<()> {
        let mutex = self.resolve_kind(handle, ObjectKind::Mutex)?;
        if mutex.release_mutex(self.current_thread_id())? {
            self.inner.tcb.note_released(&mutex)?;
        }
        Ok(())
    }

    /// `CreateSemaphore`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `max_count` is zero or below `initial_count`.
    pub fn create_semaphore(
        &self,
        initial_count: u32,
        max_count: u32,
        name: Option<&str>,
    ) -> Result<Handle> {
        self.create_object(ObjectKind::Semaphore, name, || {
            Ok(ObjectState::Semaphore(SemaphoreState::new(
                initial_count,
                max_count,
            )?))
        })
        .map(|(handle, _, _)| handle)
    }

    /// `OpenSemaphore`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no semaphore carries `name`.
    pub fn open_semaphore(&self, name: &str) -> Result<Handle> {
        self.open_object(ObjectKind::Semaphore, name)
    }

    /// `ReleaseSemaphore`. Returns the previous count.
    ///
    /// Up to `release_count` queued waiters are woken, each consuming one unit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the count would exceed the maximum, leaving the
    /// count unchanged.
    pub fn release_semaphore(&self, handle: Handle, release_count: u32) -> Result<u32> {
        self.resolve_kind(handle, ObjectKind::Semaphore)?
            .release_semaphore(release_count)
    }

    /// `CreateEvent`.
    pub fn create_event(
        &self,
        manual_reset: bool,
        initial_state: bool,
        name: Option<&str>,
    ) -> Result<Handle> {
        self.create_object(ObjectKind::Event, name, || {
            Ok(ObjectState::Event(EventState::new(manual_reset, initial_state)))
        })
        .map(|(handle, _, _)| handle)
    }

    /// `OpenEvent`.
    pub fn open_event(&self, name: &str) -> Result<Handle> {
        self.open_object(ObjectKind::Event, name)
    }

    /// `SetEvent`.
    pub fn set_event(&self, handle: Handle) -> Result<()> {
        self.resolve_kind(handle, ObjectKind::Event)?.set_event()
    }

    /// `ResetEvent`.
    pub fn reset_event(&self, handle: Handle) -> Result<()> {
        self.resolve_kind(handle, ObjectKind::Event)?.reset_event()
    }

    /// `PulseEvent`.
    pub fn pulse_event(&self, handle: Handle) -> Result<()> {
        self.resolve_kind(handle, ObjectKind::Event)?.pulse_event()
    }

    /// `CloseHandle`. Closing the current-thread pseudo handle is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if `handle` is not open.
    pub fn close_handle(&self, handle: Handle) -> Result<()> {
        if handle == Handle::CURRENT_THREAD {
            return Ok(());
        }
        self.inner.pal.handles().close(handle)
    }

    /// `DuplicateHandle` within the process.
    ///
    /// The new handle is fully equivalent to `handle`. With
    /// [`DuplicateOptions::CLOSE_SOURCE`] the source handle is closed afterwards.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidHandle`] if `handle` is not open
    /// - [`Error::ResourceExhausted`] if the handle table is full
    pub fn duplicate_handle(&self, handle: Handle, options: DuplicateOptions) -> Result<Handle> {
        let object = self.resolve(handle)?;
        let handles = self.inner.pal.handles();
        let duplicate = handles.insert(&object)?;
        if options.contains(DuplicateOptions::CLOSE_SOURCE) && handle != Handle::CURRENT_THREAD {
            if let Err(e) = handles.close(handle) {
                handles.close(duplicate)?;
                return Err(e);
            }
        }
        Ok(duplicate)
    }

    /// `WaitForSingleObject`.
    pub fn wait_for_single_object(&self, handle: Handle, timeout_ms: u32) -> Result<WaitResult> {
        self.wait_for_single_object_ex(handle, timeout_ms, false)
    }

    /// `WaitForSingleObjectEx`.
    ///
    /// An alertable wait returns [`WaitResult::IoCompletion`] after running the APCs queued
    /// to the thread, without consuming the object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if `handle` is not open.
    pub fn wait_for_single_object_ex(
        &self,
        handle: Handle,
        timeout_ms: u32,
        alertable: bool,
    ) -> Result<WaitResult> {
        let object = self.resolve(handle)?;
        wait::wait_for_objects(&self.inner.tcb, vec![object], false, timeout_ms, alertable)
    }

    /// `WaitForMultipleObjects`.
    pub fn wait_for_multiple_objects(
        &self,
        handles: &[Handle],
        wait_all: bool,
        timeout_ms: u32,
    ) -> Result<WaitResult> {
        self.wait_for_multiple_objects_ex(handles, wait_all, timeout_ms, false)
    }

    /// `WaitForMultipleObjectsEx`.
    ///
    /// A wait-any reports the lowest index among the objects satisfiable at the time it
    /// completes. A wait-all consumes every object at once or none of them.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidHandle`] if any handle is not open
    /// - [`Error::InvalidArgument`] for an empty list, more than
    ///   [`PalConfig::max_wait_objects`](crate::PalConfig::max_wait_objects) handles, or a
    ///   wait-all naming the same object twice
    pub fn wait_for_multiple_objects_ex(
        &self,
        handles: &[Handle],
        wait_all: bool,
        timeout_ms: u32,
        alertable: bool,
    ) -> Result<WaitResult> {
        let objects = handles
            .iter()
            .map(|&handle| self.resolve(handle))
            .collect::<Result<Vec<_>>>()?;
        wait::validate(&objects, wait_all, self.inner.pal.config().max_wait_objects)?;
        wait::wait_for_objects(&self.inner.tcb, objects, wait_all, timeout_ms, alertable)
    }

    /// `Sleep`.
    pub fn sleep(&self, duration_ms: u32) -> Result<()> {
        self.sleep_ex(duration_ms, false).map(|_| ())
    }

    /// `SleepEx`.
    ///
    /// An alertable sleep ends early with [`SleepResult::IoCompletion`] once an APC is
    /// queued to the thread. A non-alertable sleep always runs its full duration.
    pub fn sleep_ex(&self, duration_ms: u32, alertable: bool) -> Result<SleepResult> {
        wait::sleep(&self.inner.tcb, duration_ms, alertable)
    }

    /// `QueueUserAPC`.
    ///
    /// The callback runs on the target thread during its next alertable wait.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if `handle` is not a thread or the thread exited.
    pub fn queue_user_apc<F>(&self, handle: Handle, callback: F, arg: usize) -> Result<()>
    where
        F: FnOnce(usize) + Send + 'static,
    {
        let tcb = self.thread_tcb(handle)?;
        log::trace!("queueing APC to {}", tcb.id());
        apc::queue(&tcb, Apc::new(Box::new(callback), arg))
    }

    /// Number of APCs pending on the thread behind `handle`.
    pub fn pending_apc_count(&self, handle: Handle) -> Result<usize> {
        let tcb = self.thread_tcb(handle)?;
        apc::pending_count(&tcb)
    }

    /// `CreateThread`.
    ///
    /// The new thread is registered before it is spawned, so the returned handle can be used
    /// right away. `entry` runs with the new thread's own context and returns its exit code.
    ///
    /// # Errors
    ///
    /// - [`Error::ResourceExhausted`] if the thread limit or the handle table is full
    /// - [`Error::OsPrimitiveFailure`] if the OS thread could not be spawned
    pub fn create_thread<F>(&self, options: ThreadOptions, entry: F) -> Result<Handle>
    where
        F: FnOnce(&ThreadContext) -> u32 + Send + 'static,
    {
        let pal = &self.inner.pal;
        let suspended = options
            .flags
            .contains(ThreadCreationFlags::CREATE_SUSPENDED);
        let (tcb, object) = pal.register_thread(options.priority, u32::from(suspended))?;
        let id = tcb.id();

        let handle = match pal.handles().insert(&object) {
            Ok(handle) => handle,
            Err(e) => {
                pal.unregister_thread(id);
                return Err(e);
            }
        };

        let name = options
            .name
            .unwrap_or_else(|| format!("{}-{}", pal.config().thread_name_prefix, id.value()));
        let mut builder = std::thread::Builder::new().name(name);
        if let Some(stack_size) = options.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let thread_pal = Arc::clone(pal);
        let thread_tcb = Arc::clone(&tcb);
        let thread_object = Arc::clone(&object);
        let spawned = builder.spawn(move || run_thread(thread_pal, thread_tcb, thread_object, entry));

        if let Err(e) = spawned {
            if let Err(cleanup) = exit_protocol(pal, &tcb, &object, ERROR_INTERNAL_ERROR) {
                log::warn!("cleanup after failed spawn of {}: {}", id, cleanup);
            }
            if let Err(cleanup) = pal.handles().close(handle) {
                log::warn!("closing handle of unspawned {}: {}", id, cleanup);
            }
            return Err(os_failure!("failed to spawn {}: {}", id, e));
        }
        Ok(handle)
    }

    /// `ExitThread`.
    ///
    /// Unwinds the calling thread up to the entry wrapper of a thread created with
    /// [`create_thread`](Self::create_thread), which then exits with `exit_code`. On an
    /// attached thread the unwind continues to the OS thread's boundary.
    pub fn exit_thread(&self, exit_code: u32) -> ! {
        self.inner.exit_code.set(exit_code);
        panic::resume_unwind(Box::new(ThreadExit(exit_code)))
    }

    /// `GetExitCodeThread`. Returns [`STILL_ACTIVE`] while the thread runs.
    pub fn get_exit_code_thread(&self, handle: Handle) -> Result<u32> {
        Ok(self
            .resolve_kind(handle, ObjectKind::Thread)?
            .thread_exit_code()?
            .unwrap_or(STILL_ACTIVE))
    }

    /// `GetThreadId`.
    pub fn get_thread_id(&self, handle: Handle) -> Result<ThreadId> {
        Ok(self.thread_tcb(handle)?.id())
    }

    /// `GetThreadPriority`.
    ///
    /// Priorities live in the TCB, so the value is the same through every handle to the
    /// thread.
    pub fn get_thread_priority(&self, handle: Handle) -> Result<ThreadPriority> {
        Ok(self.thread_tcb(handle)?.priority())
    }

    /// `SetThreadPriority`.
    pub fn set_thread_priority(&self, handle: Handle, priority: ThreadPriority) -> Result<()> {
        self.thread_tcb(handle)?.set_priority(priority);
        Ok(())
    }

    /// `SuspendThread`. Returns the previous suspension count.
    ///
    /// Suspension is cooperative: the target parks at its next safe point (thread start,
    /// wait or sleep entry). A thread suspending itself parks immediately.
    pub fn suspend_thread(&self, handle: Handle) -> Result<u32> {
        let tcb = self.thread_tcb(handle)?;
        let previous = tcb.suspend()?;
        if Arc::ptr_eq(&tcb, &self.inner.tcb) {
            tcb.park_while_suspended()?;
        }
        Ok(previous)
    }

    /// `ResumeThread`. Returns the previous suspension count.
    pub fn resume_thread(&self, handle: Handle) -> Result<u32> {
        self.thread_tcb(handle)?.resume()
    }
}

impl fmt::Debug for ThreadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadContext")
            .field("thread", &self.inner.tcb.id())
            .finish_non_exhaustive()
    }
}

/// Body of every thread spawned by [`ThreadContext::create_thread`].
fn run_thread<F>(
    pal: Arc<Pal>,
    tcb: Arc<ThreadControlBlock>,
    thread_object: Arc<SyncObject>,
    entry: F,
) where
    F: FnOnce(&ThreadContext) -> u32,
{
    let ctx = ThreadContext::install(pal, tcb, thread_object);
    if let Err(e) = ctx.inner.tcb.park_while_suspended() {
        log::error!("{} failed to park at start: {}", ctx.current_thread_id(), e);
    }
    log::debug!("{} started", ctx.current_thread_id());

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| entry(&ctx)));
    let panic = match outcome {
        Ok(code) => {
            ctx.inner.exit_code.set(code);
            None
        }
        Err(payload) => match payload.downcast::<ThreadExit>() {
            Ok(exit) => {
                ctx.inner.exit_code.set(exit.0);
                None
            }
            Err(payload) => {
                log::error!("{} panicked", ctx.current_thread_id());
                ctx.inner.exit_code.set(ERROR_INTERNAL_ERROR);
                Some(payload)
            }
        },
    };

    ctx.inner.retire();
    drop(ctx);
    if let Some(payload) = panic {
        panic::resume_unwind(payload);
    }
}

/// Creation parameters of [`ThreadContext::create_thread`].
#[derive(Clone, Debug, Default)]
pub struct ThreadOptions {
    /// OS thread name. Defaults to the configured prefix followed by the thread id.
    pub name: Option<String>,
    /// OS stack size in bytes. Defaults to the standard library's default.
    pub stack_size: Option<usize>,
    /// Initial priority.
    pub priority: ThreadPriority,
    /// Creation flags.
    pub flags: ThreadCreationFlags,
}

impl ThreadOptions {
    /// Default options: unnamed, default stack, normal priority, running.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the OS thread name.
    ///
    /// # Returns
    ///
    /// Returns `self` for method chaining.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the stack size.
    ///
    /// # Returns
    ///
    /// Returns `self` for method chaining.
    #[must_use]
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Sets the initial priority.
    ///
    /// # Returns
    ///
    /// Returns `self` for method chaining.
    #[must_use]
    pub fn with_priority(mut self, priority: ThreadPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Creates the thread suspended. It runs once [`ThreadContext::resume_thread`] brings
    /// its suspension count to zero.
    ///
    /// # Returns
    ///
    /// Returns `self` for method chaining.
    #[must_use]
    pub fn suspended(mut self) -> Self {
        self.flags |= ThreadCreationFlags::CREATE_SUSPENDED;
        self
    }
}

//! Win32-shaped facade over [`ThreadContext`].
//!
//! The functions in this module mirror the Win32 synchronization API: failures are reported
//! as sentinels (`NULL` handles, `false`, [`WAIT_FAILED`](constants::WAIT_FAILED), ...) and
//! the error code is stored in the calling thread's last-error slot. Every function carries a
//! `#[doc(alias)]` with its Win32 name.
//!
//! The calling thread's context is looked up on every call. A thread that is not attached yet
//! is attached to [`Pal::global`] on first use and stays attached until [`detach`] or thread
//! exit.
//!
//! # Example
//!
//! ```rust
//! use palsync::win32::{self, constants::{WAIT_OBJECT_0, WAIT_TIMEOUT}};
//!
//! let event = win32::create_event(false, false, None);
//! assert!(!event.is_null());
//! assert_eq!(win32::wait_for_single_object(event, 0), WAIT_TIMEOUT);
//! assert!(win32::set_event(event));
//! assert_eq!(win32::wait_for_single_object(event, 0), WAIT_OBJECT_0);
//! assert!(win32::close_handle(event));
//! win32::detach();
//! ```

pub mod constants;

use std::cell::RefCell;

use widestring::U16CStr;

use constants::{SUSPEND_FAILED, THREAD_PRIORITY_ERROR_RETURN, WAIT_FAILED};

use crate::{
    critical_section::CriticalSection,
    handle::{DuplicateOptions, Handle},
    pal::Pal,
    thread::{ThreadContext, ThreadCreationFlags, ThreadOptions, ThreadPriority},
    Error, Result,
};

thread_local! {
    static ATTACHED: RefCell<Option<ThreadContext>> = const { RefCell::new(None) };
}

/// Returns the calling thread's context, attaching it to [`Pal::global`] if needed.
///
/// # Errors
///
/// Returns [`Error::ResourceExhausted`] if the global instance reached its thread limit.
pub fn current_context() -> Result<ThreadContext> {
    if let Some(ctx) = ThreadContext::current() {
        return Ok(ctx);
    }
    let ctx = Pal::global().attach_current_thread()?;
    ATTACHED.with(|attached| *attached.borrow_mut() = Some(ctx.clone()));
    Ok(ctx)
}

/// Releases the context attached by this module.
///
/// The thread-exit protocol runs unless other clones of the context are still alive.
pub fn detach() {
    let released = ATTACHED.with(|attached| attached.borrow_mut().take());
    drop(released);
}

/// Runs `op` on the calling thread's context, translating an error into `failed` plus the
/// last-error code.
fn call<T>(failed: T, op: impl FnOnce(&ThreadContext) -> Result<T>) -> T {
    let ctx = match current_context() {
        Ok(ctx) => ctx,
        Err(e) => {
            log::error!("cannot attach calling thread: {}", e);
            return failed;
        }
    };
    match op(&ctx) {
        Ok(value) => value,
        Err(e) => {
            ctx.set_last_error(e.code());
            failed
        }
    }
}

fn wide_name(name: Option<&U16CStr>) -> Result<Option<String>> {
    name.map(|name| {
        name.to_string()
            .map_err(|_| Error::InvalidArgument("object name is not valid UTF-16".to_string()))
    })
    .transpose()
}

fn count(value: i32, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::InvalidArgument(format!("negative {}", what)))
}

/// Creates or opens a mutex. Returns [`Handle::NULL`] on failure.
#[doc(alias = "CreateMutex")]
#[doc(alias = "CreateMutexA")]
pub fn create_mutex(initial_owner: bool, name: Option<&str>) -> Handle {
    call(Handle::NULL, |ctx| ctx.create_mutex(initial_owner, name))
}

/// Wide-string variant of [`create_mutex`].
#[doc(alias = "CreateMutexW")]
pub fn create_mutex_w(initial_owner: bool, name: Option<&U16CStr>) -> Handle {
    call(Handle::NULL, |ctx| {
        ctx.create_mutex(initial_owner, wide_name(name)?.as_deref())
    })
}

/// Opens a named mutex. Returns [`Handle::NULL`] on failure.
#[doc(alias = "OpenMutex")]
#[doc(alias = "OpenMutexA")]
pub fn open_mutex(name: &str) -> Handle {
    call(Handle::NULL, |ctx| ctx.open_mutex(name))
}

/// Wide-string variant of [`open_mutex`].
#[doc(alias = "OpenMutexW")]
pub fn open_mutex_w(name: &U16CStr) -> Handle {
    call(Handle::NULL, |ctx| {
        ctx.open_mutex(&wide_name(Some(name))?.unwrap_or_default())
    })
}

/// Releases a mutex owned by the calling thread.
#[doc(alias = "ReleaseMutex")]
pub fn release_mutex(handle: Handle) -> bool {
    call(false, |ctx| ctx.release_mutex(handle).map(|()| true))
}

/// Creates or opens a semaphore. Returns [`Handle::NULL`] on failure.
#[doc(alias = "CreateSemaphore")]
#[doc(alias = "CreateSemaphoreA")]
pub fn create_semaphore(initial_count: i32, maximum_count: i32, name: Option<&str>) -> Handle {
    call(Handle::NULL, |ctx| {
        ctx.create_semaphore(
            count(initial_count, "initial count")?,
            count(maximum_count, "maximum count")?,
            name,
        )
    })
}

/// Wide-string variant of [`create_semaphore`].
#[doc(alias = "CreateSemaphoreW")]
pub fn create_semaphore_w(
    initial_count: i32,
    maximum_count: i32,
    name: Option<&U16CStr>,
) -> Handle {
    call(Handle::NULL, |ctx| {
        ctx.create_semaphore(
            count(initial_count, "initial count")?,
            count(maximum_count, "maximum count")?,
            wide_name(name)?.as_deref(),
        )
    })
}

/// Opens a named semaphore. Returns [`Handle::NULL`] on failure.
#[doc(alias = "OpenSemaphore")]
#[doc(alias = "OpenSemaphoreA")]
pub fn open_semaphore(name: &str) -> Handle {
    call(Handle::NULL, |ctx| ctx.open_semaphore(name))
}

/// Wide-string variant of [`open_semaphore`].
#[doc(alias = "OpenSemaphoreW")]
pub fn open_semaphore_w(name: &U16CStr) -> Handle {
    call(Handle::NULL, |ctx| {
        ctx.open_semaphore(&wide_name(Some(name))?.unwrap_or_default())
    })
}

/// Adds `release_count` to a semaphore, optionally reporting the previous count.
#[doc(alias = "ReleaseSemaphore")]
pub fn release_semaphore(
    handle: Handle,
    release_count: i32,
    previous_count: Option<&mut i32>,
) -> bool {
    call(false, |ctx| {
        let previous = ctx.release_semaphore(handle, count(release_count, "release count")?)?;
        if let Some(slot) = previous_count {
            *slot = i32::try_from(previous).unwrap_or(i32::MAX);
        }
        Ok(true)
    })
}

/// Creates or opens an event. Returns [`Handle::NULL`] on failure.
#[doc(alias = "CreateEvent")]
#[doc(alias = "CreateEventA")]
pub fn create_event(manual_reset: bool, initial_state: bool, name: Option<&str>) -> Handle {
    call(Handle::NULL, |ctx| {
        ctx.create_event(manual_reset, initial_state, name)
    })
}

/// Wide-string variant of [`create_event`].
#[doc(alias = "CreateEventW")]
pub fn create_event_w(manual_reset: bool, initial_state: bool, name: Option<&U16CStr>) -> Handle {
    call(Handle::NULL, |ctx| {
        ctx.create_event(manual_reset, initial_state, wide_name(name)?.as_deref())
    })
}

/// Opens a named event. Returns [`Handle::NULL`] on failure.
#[doc(alias = "OpenEvent")]
#[doc(alias = "OpenEventA")]
pub fn open_event(name: &str) -> Handle {
    call(Handle::NULL, |ctx| ctx.open_event(name))
}

/// Wide-string variant of [`open_event`].
#[doc(alias = "OpenEventW")]
pub fn open_event_w(name: &U16CStr) -> Handle {
    call(Handle::NULL, |ctx| {
        ctx.open_event(&wide_name(Some(name))?.unwrap_or_default())
    })
}

/// Signals an event.
#[doc(alias = "SetEvent")]
pub fn set_event(handle: Handle) -> bool {
    call(false, |ctx| ctx.set_event(handle).map(|()| true))
}

/// Resets an event.
#[doc(alias = "ResetEvent")]
pub fn reset_event(handle: Handle) -> bool {
    call(false, |ctx| ctx.reset_event(handle).map(|()| true))
}

/// Releases the current waiters of an event and resets it.
#[doc(alias = "PulseEvent")]
pub fn pulse_event(handle: Handle) -> bool {
    call(false, |ctx| ctx.pulse_event(handle).map(|()| true))
}

/// Closes a handle.
#[doc(alias = "CloseHandle")]
pub fn close_handle(handle: Handle) -> bool {
    call(false, |ctx| ctx.close_handle(handle).map(|()| true))
}

/// Duplicates a handle within the process.
///
/// `options` takes `DUPLICATE_CLOSE_SOURCE` and `DUPLICATE_SAME_ACCESS`.
#[doc(alias = "DuplicateHandle")]
pub fn duplicate_handle(source: Handle, target: &mut Handle, options: u32) -> bool {
    call(false, |ctx| {
        let options = DuplicateOptions::from_bits(options)
            .ok_or_else(|| Error::InvalidArgument(format!("duplicate options {:#x}", options)))?;
        *target = ctx.duplicate_handle(source, options)?;
        Ok(true)
    })
}

/// Waits on one object. Returns a `WAIT_*` code.
#[doc(alias = "WaitForSingleObject")]
pub fn wait_for_single_object(handle: Handle, timeout_ms: u32) -> u32 {
    wait_for_single_object_ex(handle, timeout_ms, false)
}

/// Waits on one object, optionally alertable. Returns a `WAIT_*` code.
#[doc(alias = "WaitForSingleObjectEx")]
pub fn wait_for_single_object_ex(handle: Handle, timeout_ms: u32, alertable: bool) -> u32 {
    call(WAIT_FAILED, |ctx| {
        ctx.wait_for_single_object_ex(handle, timeout_ms, alertable)
            .map(|result| result.code())
    })
}

/// Waits on several objects. Returns a `WAIT_*` code.
#[doc(alias = "WaitForMultipleObjects")]
pub fn wait_for_multiple_objects(handles: &[Handle], wait_all: bool, timeout_ms: u32) -> u32 {
    wait_for_multiple_objects_ex(handles, wait_all, timeout_ms, false)
}

/// Waits on several objects, optionally alertable. Returns a `WAIT_*` code.
#[doc(alias = "WaitForMultipleObjectsEx")]
pub fn wait_for_multiple_objects_ex(
    handles: &[Handle],
    wait_all: bool,
    timeout_ms: u32,
    alertable: bool,
) -> u32 {
    call(WAIT_FAILED, |ctx| {
        ctx.wait_for_multiple_objects_ex(handles, wait_all, timeout_ms, alertable)
            .map(|result| result.code())
    })
}

/// Suspends the calling thread.
#[doc(alias = "Sleep")]
pub fn sleep(duration_ms: u32) {
    sleep_ex(duration_ms, false);
}

/// Suspends the calling thread. Returns `0`, or `WAIT_IO_COMPLETION` if an APC interrupted an
/// alertable sleep.
#[doc(alias = "SleepEx")]
pub fn sleep_ex(duration_ms: u32, alertable: bool) -> u32 {
    match current_context() {
        Ok(ctx) => match ctx.sleep_ex(duration_ms, alertable) {
            Ok(result) => result.code(),
            Err(e) => {
                ctx.set_last_error(e.code());
                os_sleep(duration_ms, &e)
            }
        },
        Err(e) => os_sleep(duration_ms, &e),
    }
}

// SleepEx has no failure return, so a failed sleep still takes its full interval
fn os_sleep(duration_ms: u32, cause: &Error) -> u32 {
    log::warn!(
        "SleepEx({}) falling back to a non-alertable OS sleep: {}",
        duration_ms,
        cause
    );
    std::thread::sleep(std::time::Duration::from_millis(u64::from(duration_ms)));
    0
}

/// Queues an APC to a thread.
#[doc(alias = "QueueUserAPC")]
pub fn queue_user_apc<F>(callback: F, thread: Handle, arg: usize) -> bool
where
    F: FnOnce(usize) + Send + 'static,
{
    call(false, |ctx| {
        ctx.queue_user_apc(thread, callback, arg).map(|()| true)
    })
}

/// Creates a thread running `entry`. Returns [`Handle::NULL`] on failure.
///
/// `stack_size` of `0` selects the default. `flags` takes `CREATE_SUSPENDED`. The new thread's
/// id is written to `thread_id` when provided.
#[doc(alias = "CreateThread")]
pub fn create_thread<F>(
    stack_size: usize,
    entry: F,
    flags: u32,
    thread_id: Option<&mut u32>,
) -> Handle
where
    F: FnOnce() -> u32 + Send + 'static,
{
    call(Handle::NULL, |ctx| {
        let flags = ThreadCreationFlags::from_bits(flags)
            .ok_or_else(|| Error::InvalidArgument(format!("creation flags {:#x}", flags)))?;
        let mut options = ThreadOptions {
            flags,
            ..ThreadOptions::default()
        };
        if stack_size > 0 {
            options = options.with_stack_size(stack_size);
        }
        let handle = ctx.create_thread(options, move |_| entry())?;
        if let Some(slot) = thread_id {
            *slot = ctx.get_thread_id(handle)?.value();
        }
        Ok(handle)
    })
}

/// Ends the calling thread with `exit_code`.
///
/// Returns only if the calling thread cannot be attached, after logging the failure.
/// See [`ThreadContext::exit_thread`].
#[doc(alias = "ExitThread")]
pub fn exit_thread(exit_code: u32) {
    exit_with(current_context(), exit_code);
}

fn exit_with(context: Result<ThreadContext>, exit_code: u32) {
    match context {
        Ok(ctx) => ctx.exit_thread(exit_code),
        Err(e) => log::error!("ExitThread({}) on a thread that cannot attach: {}", exit_code, e),
    }
}

/// Returns the pseudo handle of the calling thread.
#[doc(alias = "GetCurrentThread")]
pub fn get_current_thread() -> Handle {
    Handle::CURRENT_THREAD
}

/// Returns the id of the calling thread, `0` if it cannot be attached.
#[doc(alias = "GetCurrentThreadId")]
pub fn get_current_thread_id() -> u32 {
    call(0, |ctx| Ok(ctx.current_thread_id().value()))
}

/// Retrieves the exit code of a thread, [`STILL_ACTIVE`](constants::STILL_ACTIVE) while it
/// runs.
#[doc(alias = "GetExitCodeThread")]
pub fn get_exit_code_thread(thread: Handle, exit_code: &mut u32) -> bool {
    call(false, |ctx| {
        *exit_code = ctx.get_exit_code_thread(thread)?;
        Ok(true)
    })
}

/// Returns the priority of a thread, `THREAD_PRIORITY_ERROR_RETURN` on failure.
#[doc(alias = "GetThreadPriority")]
pub fn get_thread_priority(thread: Handle) -> i32 {
    call(THREAD_PRIORITY_ERROR_RETURN, |ctx| {
        ctx.get_thread_priority(thread).map(ThreadPriority::to_win32)
    })
}

/// Sets the priority of a thread.
#[doc(alias = "SetThreadPriority")]
pub fn set_thread_priority(thread: Handle, priority: i32) -> bool {
    call(false, |ctx| {
        ctx.set_thread_priority(thread, ThreadPriority::from_win32(priority)?)
            .map(|()| true)
    })
}

/// Increments the suspension count of a thread. Returns the previous count.
#[doc(alias = "SuspendThread")]
pub fn suspend_thread(thread: Handle) -> u32 {
    call(SUSPEND_FAILED, |ctx| ctx.suspend_thread(thread))
}

/// Decrements the suspension count of a thread. Returns the previous count.
#[doc(alias = "ResumeThread")]
pub fn resume_thread(thread: Handle) -> u32 {
    call(SUSPEND_FAILED, |ctx| ctx.resume_thread(thread))
}

/// Returns the calling thread's last-error code.
#[doc(alias = "GetLastError")]
pub fn get_last_error() -> u32 {
    current_context().map_or(0, |ctx| ctx.last_error())
}

/// Sets the calling thread's last-error code.
#[doc(alias = "SetLastError")]
pub fn set_last_error(code: u32) {
    if let Ok(ctx) = current_context() {
        ctx.set_last_error(code);
    }
}

/// Creates a critical section that parks immediately on contention.
#[doc(alias = "InitializeCriticalSection")]
pub fn initialize_critical_section() -> CriticalSection {
    CriticalSection::new()
}

/// Creates a critical section that spins `spin_count` times before parking.
#[doc(alias = "InitializeCriticalSectionAndSpinCount")]
pub fn initialize_critical_section_and_spin_count(spin_count: u32) -> CriticalSection {
    CriticalSection::with_spin_count(spin_count)
}

/// Enters a critical section.
#[doc(alias = "EnterCriticalSection")]
pub fn enter_critical_section(section: &CriticalSection) {
    section.enter();
}

/// Tries to enter a critical section without blocking.
#[doc(alias = "TryEnterCriticalSection")]
pub fn try_enter_critical_section(section: &CriticalSection) -> bool {
    section.try_enter()
}

/// Leaves a critical section.
#[doc(alias = "LeaveCriticalSection")]
pub fn leave_critical_section(section: &CriticalSection) {
    section.leave();
}

/// Changes the spin count of a critical section, returning the previous one.
#[doc(alias = "SetCriticalSectionSpinCount")]
pub fn set_critical_section_spin_count(section: &CriticalSection, spin_count: u32) -> u32 {
    section.set_spin_count(spin_count)
}

/// Destroys a critical section.
#[doc(alias = "DeleteCriticalSection")]
pub fn delete_critical_section(section: CriticalSection) {
    drop(section);
}

//! Single- and multi-object waits, sleeps and alertable interruption.
//!
//! # Wait Protocol
//!
//! 1. Honor a pending suspension request (wait entry is a safe point).
//! 2. Publish the wait block in the TCB. An alertable wait entered with APCs already pending
//!    dispatches them and returns [`WaitResult::IoCompletion`] without touching any object.
//! 3. Lock the distinct objects in ascending id order and try the fast path. If the wait can
//!    not complete and may block, register the block on every object before releasing the
//!    locks, so a signal can never slip in between the check and the park.
//! 4. Park until the outcome slot is filled by a grant, an APC alert or the deadline.
//! 5. Unregister from every object on all exit paths.
//!
//! An APC that reaches an alertable wait before the waiter returns always wins. If a grant
//! got there first, the grant is revoked when the wait ends: the consumed state goes back to
//! the objects and is offered to the remaining waiters, so an alerted wait never consumes
//! object state.

mod block;

pub(crate) use block::WaitBlock;

use std::sync::Arc;

use block::{LockedObjects, Parked, WakeReason};

use crate::{
    object::{ObjectKind, SyncObject},
    thread::{apc, ThreadControlBlock},
    utils::Deadline,
    win32::constants::{WAIT_ABANDONED_0, WAIT_IO_COMPLETION, WAIT_OBJECT_0, WAIT_TIMEOUT},
    Error, Result,
};

/// Timeout value that never expires.
pub const INFINITE: u32 = u32::MAX;

/// Successful outcome of a wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WaitResult {
    /// The object at this index satisfied the wait. For wait-all the index is `0`.
    Signaled(usize),
    /// The wait acquired an abandoned mutex at this index.
    Abandoned(usize),
    /// The timeout elapsed.
    Timeout,
    /// The wait was interrupted to run queued APCs.
    IoCompletion,
}

impl WaitResult {
    /// Returns the Win32 wait return code.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use palsync::WaitResult;
    ///
    /// assert_eq!(WaitResult::Signaled(2).code(), 2);
    /// assert_eq!(WaitResult::Abandoned(0).code(), 0x80);
    /// assert_eq!(WaitResult::Timeout.code(), 258);
    /// assert_eq!(WaitResult::IoCompletion.code(), 0xC0);
    /// ```
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            WaitResult::Signaled(index) => WAIT_OBJECT_0 + *index as u32,
            WaitResult::Abandoned(index) => WAIT_ABANDONED_0 + *index as u32,
            WaitResult::Timeout => WAIT_TIMEOUT,
            WaitResult::IoCompletion => WAIT_IO_COMPLETION,
        }
    }

    /// `true` for [`Signaled`](Self::Signaled) and [`Abandoned`](Self::Abandoned).
    #[must_use]
    pub fn is_acquired(&self) -> bool {
        matches!(self, WaitResult::Signaled(_) | WaitResult::Abandoned(_))
    }
}

/// Outcome of a sleep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SleepResult {
    /// The full interval elapsed.
    Elapsed,
    /// The sleep was interrupted to run queued APCs.
    IoCompletion,
}

impl SleepResult {
    /// Returns the Win32 `SleepEx` return code.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            SleepResult::Elapsed => 0,
            SleepResult::IoCompletion => WAIT_IO_COMPLETION,
        }
    }
}

/// Checks the handle list of a multi-object wait.
pub(crate) fn validate(objects: &[Arc<SyncObject>], wait_all: bool, max: usize) -> Result<()> {
    if objects.is_empty() || objects.len() > max {
        return Err(Error::InvalidArgument(format!(
            "wait object count {} outside 1..={}",
            objects.len(),
            max
        )));
    }
    if wait_all {
        for (i, object) in objects.iter().enumerate() {
            if objects[..i].iter().any(|o| Arc::ptr_eq(o, object)) {
                return Err(Error::InvalidArgument(
                    "duplicate object in wait-all".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Blocks the thread owning `tcb` on `objects`.
///
/// The caller validated the object list. See the [module documentation](self) for the
/// protocol.
pub(crate) fn wait_for_objects(
    tcb: &Arc<ThreadControlBlock>,
    objects: Vec<Arc<SyncObject>>,
    wait_all: bool,
    timeout_ms: u32,
    alertable: bool,
) -> Result<WaitResult> {
    let block = WaitBlock::new(tcb.id(), objects, wait_all);
    let reason = match block_on(tcb, &block, timeout_ms, alertable)? {
        Some(reason) => reason,
        None => return Ok(WaitResult::IoCompletion),
    };

    match reason {
        WakeReason::Alerted => {
            apc::dispatch_pending(tcb)?;
            Ok(WaitResult::IoCompletion)
        }
        WakeReason::TimedOut => Ok(WaitResult::Timeout),
        WakeReason::Satisfied { index, abandoned } => {
            if wait_all {
                for object in block.objects() {
                    if object.kind() == ObjectKind::Mutex {
                        tcb.note_owned(object)?;
                    }
                }
            } else if let Some(object) = block.objects().get(index) {
                if object.kind() == ObjectKind::Mutex {
                    tcb.note_owned(object)?;
                }
            }
            Ok(if abandoned {
                WaitResult::Abandoned(index)
            } else {
                WaitResult::Signaled(index)
            })
        }
    }
}

/// Suspends the thread owning `tcb` for `timeout_ms`.
///
/// A zero interval yields the processor. An alertable sleep ends early once an APC is queued.
pub(crate) fn sleep(
    tcb: &Arc<ThreadControlBlock>,
    timeout_ms: u32,
    alertable: bool,
) -> Result<SleepResult> {
    let block = WaitBlock::new(tcb.id(), Vec::new(), false);
    match block_on(tcb, &block, timeout_ms, alertable)? {
        None => Ok(SleepResult::IoCompletion),
        Some(WakeReason::Alerted) => {
            apc::dispatch_pending(tcb)?;
            Ok(SleepResult::IoCompletion)
        }
        Some(_) => {
            if timeout_ms == 0 {
                std::thread::yield_now();
            }
            Ok(SleepResult::Elapsed)
        }
    }
}

/// Runs steps 1 to 5 of the wait protocol.
///
/// Returns `None` if pending APCs were dispatched at entry. An alertable wait that ends with
/// APCs pending reports [`WakeReason::Alerted`] whatever decided it.
fn block_on(
    tcb: &Arc<ThreadControlBlock>,
    block: &Arc<WaitBlock>,
    timeout_ms: u32,
    alertable: bool,
) -> Result<Option<WakeReason>> {
    tcb.park_while_suspended()?;

    if !tcb.begin_wait(block, alertable)? {
        apc::dispatch_pending(tcb)?;
        return Ok(None);
    }

    let deadline = Deadline::after_ms(timeout_ms);
    let result = decide(block, deadline);

    let unregistered = block.unregister();
    let ended = tcb.end_wait();
    let mut reason = result?;
    unregistered?;
    if ended? && reason != WakeReason::Alerted {
        block.revoke()?;
        reason = WakeReason::Alerted;
    }
    Ok(Some(reason))
}

fn decide(block: &Arc<WaitBlock>, deadline: Deadline) -> Result<WakeReason> {
    {
        let mut locked = LockedObjects::lock_all(block.objects())?;
        if let Some(reason) = block.settle(&mut locked)? {
            return Ok(reason);
        }
        if deadline.expired() {
            return block.expire();
        }
        block.register(&mut locked);
    }

    loop {
        match block.park(deadline)? {
            Parked::Done(reason) => return Ok(reason),
            Parked::Recheck => {
                let mut locked = LockedObjects::lock_all(block.objects())?;
                if let Some(reason) = block.settle(&mut locked)? {
                    return Ok(reason);
                }
            }
        }
    }
}

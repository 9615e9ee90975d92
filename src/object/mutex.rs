//! Mutex state machine.

use crate::{thread::ThreadId, Error, Result};

/// Mutex synchronization primitive state.
///
/// A mutex is `Unowned` or `Owned(thread, depth)`. The owner may re-acquire it any number of
/// times, and must release it as often before another thread can take it.
///
/// # Abandonment
///
/// When the owning thread exits without releasing, the mutex is unowned again and flagged as
/// abandoned. The next acquisition takes ownership *and* consumes the flag, which surfaces
/// once as [`WaitResult::Abandoned`](crate::WaitResult::Abandoned). Later acquisitions behave
/// as on a healthy mutex.
#[derive(Clone, Debug, Default)]
pub(crate) struct MutexState {
    /// The thread that currently owns this mutex, or `None` if unlocked.
    pub(crate) owner: Option<ThreadId>,
    /// Number of times the owner has acquired this mutex.
    pub(crate) recursion_count: u32,
    /// Whether this mutex was abandoned by an exited thread and not yet re-acquired.
    pub(crate) abandoned: bool,
}

impl MutexState {
    /// Creates a mutex, optionally owned at depth 1 by `initial_owner`.
    pub(crate) fn new(initial_owner: Option<ThreadId>) -> Self {
        Self {
            owner: initial_owner,
            recursion_count: u32::from(initial_owner.is_some()),
            abandoned: false,
        }
    }

    /// Returns `true` if `thread` could acquire the mutex without blocking.
    pub(crate) fn is_available_to(&self, thread: ThreadId) -> bool {
        match self.owner {
            None => true,
            Some(owner) => owner == thread,
        }
    }

    /// Checks that `thread` may take one more level of ownership.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceExhausted`] if the owner already holds the mutex
    /// `u32::MAX` times.
    pub(crate) fn check_acquire(&self, thread: ThreadId) -> Result<()> {
        if self.owner == Some(thread) && self.recursion_count == u32::MAX {
            return Err(Error::ResourceExhausted(format!(
                "mutex recursion limit reached by {}",
                thread
            )));
        }
        Ok(())
    }

    /// Acquires the mutex for `thread`, which must be [available](Self::is_available_to) and
    /// pass [`check_acquire`](Self::check_acquire).
    ///
    /// # Returns
    ///
    /// `true` if this acquisition consumed the abandoned flag.
    pub(crate) fn acquire(&mut self, thread: ThreadId) -> bool {
        debug_assert!(self.is_available_to(thread));
        if self.owner == Some(thread) {
            self.recursion_count += 1;
            return false;
        }
        self.owner = Some(thread);
        self.recursion_count = 1;
        std::mem::take(&mut self.abandoned)
    }

    /// Releases one level of ownership.
    ///
    /// # Returns
    ///
    /// - `Ok(true)` if the mutex is now unowned
    /// - `Ok(false)` if the owner still holds it recursively
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOwner`] if `thread` does not own the mutex.
    pub(crate) fn release(&mut self, thread: ThreadId) -> Result<bool> {
        match self.owner {
            Some(owner) if owner == thread => {
                self.recursion_count -= 1;
                if self.recursion_count == 0 {
                    self.owner = None;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            _ => Err(Error::NotOwner),
        }
    }

    /// Undoes one [`acquire`](Self::acquire) by `thread`, restoring the abandoned flag it
    /// consumed.
    pub(crate) fn unacquire(&mut self, thread: ThreadId, abandoned: bool) {
        if self.owner != Some(thread) {
            return;
        }
        if self.recursion_count > 1 {
            self.recursion_count -= 1;
            return;
        }
        self.owner = None;
        self.recursion_count = 0;
        self.abandoned = abandoned;
    }

    /// Abandons the mutex if `thread` still owns it.
    ///
    /// Returns `true` if the mutex was abandoned by this call.
    pub(crate) fn abandon(&mut self, thread: ThreadId) -> bool {
        if self.owner != Some(thread) {
            return false;
        }
        self.owner = None;
        self.recursion_count = 0;
        self.abandoned = true;
        true
    }
}

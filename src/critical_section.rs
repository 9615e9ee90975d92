//! Recursive process-local lock without handles.
//!
//! A [`CriticalSection`] is cheaper than a mutex object: it has no handle, no name, no
//! abandonment tracking and is never waited on through the wait engine. The owning thread
//! may enter it recursively and must leave it as often as it entered.
//!
//! Ownership is tracked with a per-OS-thread token, so critical sections work on threads that
//! never attached to a [`Pal`](crate::Pal).
//!
//! # Example
//!
//! ```rust
//! use palsync::CriticalSection;
//!
//! let section = CriticalSection::new();
//! {
//!     let _outer = section.lock();
//!     let _inner = section.lock();
//!     assert_eq!(section.recursion_count(), 2);
//! }
//! assert!(!section.is_owned_by_current_thread());
//! ```

use std::{
    fmt,
    hint,
    marker::PhantomData,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Condvar, Mutex, MutexGuard, PoisonError, TryLockError,
    },
};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static TOKEN: u64 = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
}

fn current_token() -> u64 {
    TOKEN.with(|token| *token)
}

/// A recursive lock in the style of a Win32 `CRITICAL_SECTION`.
pub struct CriticalSection {
    /// Token of the owning thread, `0` when unowned.
    owner: AtomicU64,
    recursion: AtomicU32,
    spin_count: AtomicU32,
    locked: Mutex<bool>,
    available: Condvar,
}

impl CriticalSection {
    /// `InitializeCriticalSection`: a section that parks immediately on contention.
    #[must_use]
    pub fn new() -> Self {
        Self::with_spin_count(0)
    }

    /// `InitializeCriticalSectionAndSpinCount`: a section that polls `spin_count` times
    /// before parking on contention.
    #[must_use]
    pub fn with_spin_count(spin_count: u32) -> Self {
        Self {
            owner: AtomicU64::new(0),
            recursion: AtomicU32::new(0),
            spin_count: AtomicU32::new(spin_count),
            locked: Mutex::new(false),
            available: Condvar::new(),
        }
    }

    /// Returns the spin count.
    #[must_use]
    pub fn spin_count(&self) -> u32 {
        self.spin_count.load(Ordering::Relaxed)
    }

    /// `SetCriticalSectionSpinCount`. Returns the previous spin count.
    pub fn set_spin_count(&self, spin_count: u32) -> u32 {
        self.spin_count.swap(spin_count, Ordering::Relaxed)
    }

    // Poison carries no meaning for a bare flag
    fn raw_lock(&self) -> MutexGuard<'_, bool> {
        self.locked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_raw_acquire(&self) -> bool {
        let mut locked = match self.locked.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        if *locked {
            return false;
        }
        *locked = true;
        true
    }

    fn take_ownership(&self, token: u64) {
        self.owner.store(token, Ordering::Relaxed);
        self.recursion.store(1, Ordering::Relaxed);
    }

    /// `EnterCriticalSection`. Blocks until the section is owned by the calling thread.
    pub fn enter(&self) {
        let me = current_token();
        if self.owner.load(Ordering::Relaxed) == me {
            self.recursion.fetch_add(1, Ordering::Relaxed);
            return;
        }

        for _ in 0..self.spin_count() {
            if self.try_raw_acquire() {
                self.take_ownership(me);
                return;
            }
            hint::spin_loop();
        }

        let mut locked = self.raw_lock();
        while *locked {
            locked = self
                .available
                .wait(locked)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *locked = true;
        drop(locked);
        self.take_ownership(me);
    }

    /// `TryEnterCriticalSection`. Returns `true` if the calling thread now owns the section.
    pub fn try_enter(&self) -> bool {
        let me = current_token();
        if self.owner.load(Ordering::Relaxed) == me {
            self.recursion.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        if self.try_raw_acquire() {
            self.take_ownership(me);
            return true;
        }
        false
    }

    /// `LeaveCriticalSection`.
    ///
    /// Leaving a section the calling thread does not own is a programming error. Debug builds
    /// assert, release builds give no guarantee about the resulting state.
    pub fn leave(&self) {
        debug_assert!(
            self.is_owned_by_current_thread(),
            "leaving a critical section not owned by the calling thread"
        );
        let depth = self.recursion.load(Ordering::Relaxed).saturating_sub(1);
        self.recursion.store(depth, Ordering::Relaxed);
        if depth > 0 {
            return;
        }
        self.owner.store(0, Ordering::Relaxed);
        *self.raw_lock() = false;
        self.available.notify_one();
    }

    /// Enters the section and returns a guard that leaves it on drop.
    pub fn lock(&self) -> CriticalSectionGuard<'_> {
        self.enter();
        CriticalSectionGuard {
            section: self,
            _not_send: PhantomData,
        }
    }

    /// Non-blocking variant of [`lock`](Self::lock).
    pub fn try_lock(&self) -> Option<CriticalSectionGuard<'_>> {
        self.try_enter().then(|| CriticalSectionGuard {
            section: self,
            _not_send: PhantomData,
        })
    }

    /// Returns `true` if the calling thread owns the section.
    #[must_use]
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == current_token()
    }

    /// Current recursion depth, `0` when unowned.
    #[must_use]
    pub fn recursion_count(&self) -> u32 {
        self.recursion.load(Ordering::Relaxed)
    }
}

impl Default for CriticalSection {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CriticalSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriticalSection")
            .field("owned", &(self.owner.load(Ordering::Relaxed) != 0))
            .field("recursion", &self.recursion_count())
            .field("spin_count", &self.spin_count())
            .finish()
    }
}

/// RAII guard returned by [`CriticalSection::lock`].
///
/// Bound to the thread that entered the section.
#[must_use = "the section is left as soon as the guard is dropped"]
pub struct CriticalSectionGuard<'a> {
    section: &'a CriticalSection,
    _not_send: PhantomData<*const ()>,
}

impl Drop for CriticalSectionGuard<'_> {
    fn drop(&mut self) {
        self.section.leave();
    }
}

//! Lock and timeout helpers shared by the synchronization layer.
//!
//! Every internal lock of the crate is a [`std::sync::Mutex`]. A poisoned lock means that a
//! thread panicked while mutating kernel-object state, which is an unexpected host condition:
//! the helpers here surface it as [`Error::OsPrimitiveFailure`](crate::Error::OsPrimitiveFailure)
//! (logged on creation) instead of unwinding through the caller.
//!
//! # Key Components
//!
//! - [`lock`] - Acquire a mutex, mapping poisoning to an error
//! - [`wait_on`] / [`wait_on_timeout`] - Condition variable waits with the same mapping
//! - [`Deadline`] - Win32 millisecond timeout arithmetic, including `INFINITE`

use std::{
    sync::{Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::{wait::INFINITE, Result};

/// Acquires `mutex`, reporting a poisoned lock as an OS primitive failure.
///
/// # Arguments
///
/// * `mutex` - The lock to acquire
/// * `what` - Short description of the protected state, used in the error message
///
/// # Errors
///
/// Returns [`crate::Error::OsPrimitiveFailure`] if the lock is poisoned.
pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| os_failure!("{} lock is poisoned", what))
}

/// Blocks on `condvar` until notified.
///
/// # Errors
///
/// Returns [`crate::Error::OsPrimitiveFailure`] if the lock is poisoned while waiting.
pub(crate) fn wait_on<'a, T>(
    condvar: &Condvar,
    guard: MutexGuard<'a, T>,
    what: &str,
) -> Result<MutexGuard<'a, T>> {
    condvar
        .wait(guard)
        .map_err(|_| os_failure!("{} lock is poisoned", what))
}

/// Blocks on `condvar` until notified or until `timeout` elapsed.
///
/// Spurious and timed-out returns are indistinguishable to the caller, which always
/// re-checks its own state and deadline.
///
/// # Errors
///
/// Returns [`crate::Error::OsPrimitiveFailure`] if the lock is poisoned while waiting.
pub(crate) fn wait_on_timeout<'a, T>(
    condvar: &Condvar,
    guard: MutexGuard<'a, T>,
    timeout: Duration,
    what: &str,
) -> Result<MutexGuard<'a, T>> {
    condvar
        .wait_timeout(guard, timeout)
        .map(|(guard, _)| guard)
        .map_err(|_| os_failure!("{} lock is poisoned", what))
}

/// Absolute expiry point of a Win32 style millisecond timeout.
///
/// [`INFINITE`] never expires, `0` is already expired on creation ("try once"). Deadlines
/// that overflow the monotonic clock are treated as infinite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// Starts a deadline of `timeout_ms` milliseconds from now.
    pub(crate) fn after_ms(timeout_ms: u32) -> Self {
        if timeout_ms == INFINITE {
            return Self { at: None };
        }
        Self {
            at: Instant::now().checked_add(Duration::from_millis(u64::from(timeout_ms))),
        }
    }

    /// Returns `true` for a deadline that never expires.
    pub(crate) fn is_infinite(&self) -> bool {
        self.at.is_none()
    }

    /// Time left until expiry, `None` if infinite. Returns [`Duration::ZERO`] once expired.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Returns `true` once the deadline passed.
    pub(crate) fn expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn test_deadline_zero_is_expired() {
        let deadline = Deadline::after_ms(0);
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_deadline_infinite() {
        let deadline = Deadline::after_ms(INFINITE);
        assert!(deadline.is_infinite());
        assert!(!deadline.expired());
        assert_eq!(deadline.remaining(), None);
    }

    #[test]
    fn test_deadline_counts_down() {
        let deadline = Deadline::after_ms(50);
        let left = deadline.remaining().unwrap();
        assert!(left <= Duration::from_millis(50));
        thread::sleep(Duration::from_millis(60));
        assert!(deadline.expired());
    }

    #[test]
    fn test_poisoned_lock_is_reported() {
        let mutex = Arc::new(Mutex::new(0u32));
        let clone = Arc::clone(&mutex);
        let _ = thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        let result = lock(&mutex, "test").map(|guard| *guard);
        match result {
            Err(crate::Error::OsPrimitiveFailure { message, .. }) => {
                assert!(message.contains("test"));
            }
            _ => panic!("expected OsPrimitiveFailure"),
        }
    }
}

//! Counting semaphore state.

use crate::{Error, Result};

/// Counting semaphore synchronization primitive state.
///
/// The count always stays within `0..=max_count`. A release that would push it past the
/// maximum is rejected as a whole and leaves the count untouched.
#[derive(Clone, Debug)]
pub(crate) struct SemaphoreState {
    /// Current available count (0 to max_count).
    pub(crate) count: u32,
    /// Maximum count this semaphore can reach.
    pub(crate) max_count: u32,
}

impl SemaphoreState {
    /// Creates a semaphore with the given initial and maximum counts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `max_count` is zero or `initial_count` exceeds
    /// it.
    pub(crate) fn new(initial_count: u32, max_count: u32) -> Result<Self> {
        if max_count == 0 {
            return Err(Error::InvalidArgument(
                "semaphore maximum count must be positive".to_string(),
            ));
        }
        if initial_count > max_count {
            return Err(Error::InvalidArgument(format!(
                "semaphore initial count {} exceeds maximum {}",
                initial_count, max_count
            )));
        }
        Ok(Self {
            count: initial_count,
            max_count,
        })
    }

    pub(crate) fn is_available(&self) -> bool {
        self.count > 0
    }

    /// Takes one unit. The semaphore must be [available](Self::is_available).
    pub(crate) fn acquire(&mut self) {
        debug_assert!(self.count > 0);
        self.count -= 1;
    }

    /// Returns a unit taken by [`acquire`](Self::acquire). Never raises the count past the
    /// maximum.
    pub(crate) fn give_back(&mut self) {
        if self.count < self.max_count {
            self.count += 1;
        }
    }

    /// Adds `release_count` units, returning the previous count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `release_count` is zero or the result would
    /// exceed the maximum count. The count is unchanged in that case.
    pub(crate) fn release(&mut self, release_count: u32) -> Result<u32> {
        if release_count == 0 {
            return Err(Error::InvalidArgument(
                "semaphore release count must be positive".to_string(),
            ));
        }
        let previous = self.count;
        match previous.checked_add(release_count) {
            Some(count) if count <= self.max_count => {
                self.count = count;
                Ok(previous)
            }
            _ => Err(Error::InvalidArgument(format!(
                "releasing {} would exceed semaphore maximum {} (count {})",
                release_count, self.max_count, previous
            ))),
        }
    }
}

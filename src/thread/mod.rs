//! Threads as seen by the synchronization layer.
//!
//! # Key Components
//!
//! - [`ThreadControlBlock`] - Per-thread priority, last error, APC queue and wait bookkeeping
//! - [`ThreadContext`] - The handle-based API, bound to the calling thread
//! - [`ThreadOptions`] - Parameters of [`ThreadContext::create_thread`]
//! - [`apc`] - Queueing and dispatch of asynchronous procedure calls
//!
//! Threads are ordinary `std::thread`s. A thread either attaches itself through
//! [`Pal::attach_current_thread`](crate::Pal::attach_current_thread) or is spawned by
//! [`ThreadContext::create_thread`], in which case the crate owns its whole lifetime.

pub mod apc;
mod context;
mod tcb;

use bitflags::bitflags;

pub use context::{ThreadContext, ThreadOptions};
pub use tcb::{ThreadControlBlock, ThreadId, ThreadPriority};

bitflags! {
    /// Flags of `CreateThread`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ThreadCreationFlags: u32 {
        /// The thread does not run until resumed.
        const CREATE_SUSPENDED = crate::win32::constants::CREATE_SUSPENDED;
    }
}

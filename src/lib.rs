// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]

//! # palsync
//!
//! [![Crates.io](https://img.shields.io/crates/v/palsync.svg)](https://crates.io/crates/palsync)
//! [![Documentation](https://docs.rs/palsync/badge.svg)](https://docs.rs/palsync)
//! [![License](https://img.shields.io/badge/license-Apache--2.0-blue.svg)](https://github.com/BinFlip/palsync/blob/main/LICENSE-APACHE)
//!
//! Windows-style synchronization on native OS threads. `palsync` provides handle-based kernel
//! objects (mutexes, semaphores, events and threads), waits on one or many of them, alertable
//! waits with asynchronous procedure calls (APCs), critical sections and per-thread last-error
//! reporting, with the semantics a Win32 program expects.
//!
//! ## Features
//!
//! - **Handle table** - Reference-counted handles with named objects and `DuplicateHandle`
//! - **Wait engine** - Wait-any and atomic wait-all over up to 64 objects, with timeouts
//! - **Fair hand-off** - Released objects go to queued waiters in FIFO order, never barged
//! - **Abandonment** - Mutexes owned by an exiting thread are handed on as abandoned
//! - **APCs** - Callbacks queued to a thread and run during its next alertable wait or sleep
//! - **Thread lifecycle** - Creation (optionally suspended), exit codes, priorities
//! - **Win32 facade** - Sentinel-returning functions with last-error codes in [`win32`]
//!
//! ## Quick Start
//!
//! ```rust
//! use palsync::prelude::*;
//!
//! let pal = Pal::new(PalConfig::default());
//! let ctx = pal.attach_current_thread()?;
//!
//! let ready = ctx.create_event(true, false, None)?;
//! let worker = ctx.create_thread(ThreadOptions::new(), move |ctx| {
//!     ctx.set_event(ready).map_or(1, |()| 0)
//! })?;
//!
//! assert_eq!(ctx.wait_for_single_object(ready, INFINITE)?, WaitResult::Signaled(0));
//! assert_eq!(ctx.wait_for_single_object(worker, INFINITE)?, WaitResult::Signaled(0));
//! assert_eq!(ctx.get_exit_code_thread(worker)?, 0);
//! # Ok::<(), palsync::Error>(())
//! ```
//!
//! ## Alertable Waits
//!
//! ```rust
//! use palsync::prelude::*;
//! use std::sync::{atomic::{AtomicUsize, Ordering}, Arc};
//!
//! let pal = Pal::new(PalConfig::default());
//! let ctx = pal.attach_current_thread()?;
//!
//! let hits = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&hits);
//! ctx.queue_user_apc(ctx.current_thread(), move |arg| {
//!     counter.fetch_add(arg, Ordering::SeqCst);
//! }, 3)?;
//!
//! assert_eq!(ctx.sleep_ex(INFINITE, true)?, SleepResult::IoCompletion);
//! assert_eq!(hits.load(Ordering::SeqCst), 3);
//! # Ok::<(), palsync::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`Pal`] - One instance of the subsystem: configuration, handle table, thread registry
//! - [`ThreadContext`] - The calling thread's API, the way to every operation
//! - [`handle`] - Handles, the handle table and the named-object namespace
//! - [`object`] - The waitable kernel objects and their signal contract
//! - [`wait`] - The wait engine and its result codes
//! - [`thread`] - Thread control blocks, APCs and thread creation
//! - [`critical_section`] - Handle-less recursive locks
//! - [`win32`] - Win32-shaped free functions and constants
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`]. Every [`Error`] maps to a Win32 error code
//! through [`Error::code`], which the [`win32`] facade stores as the thread's last error.

#[macro_use]
pub(crate) mod error;

pub(crate) mod utils;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust
/// use palsync::prelude::*;
///
/// let pal = Pal::new(PalConfig::default());
/// let ctx = pal.attach_current_thread()?;
/// let mutex = ctx.create_mutex(true, None)?;
/// ctx.release_mutex(mutex)?;
/// # Ok::<(), palsync::Error>(())
/// ```
pub mod prelude;

/// Instance configuration and resource limits.
///
/// # Key Types
///
/// - [`PalConfig`] - Limits for handles, threads and wait sizes plus thread naming
pub mod config;

/// Handles, the handle table and named objects.
///
/// # Key Types
///
/// - [`Handle`] - Opaque handle value
/// - [`HandleTable`] - Maps handles to objects and owns the named-object namespace
/// - [`DuplicateOptions`] - Flags of `DuplicateHandle`
pub mod handle;

/// Waitable kernel objects.
pub mod object;

/// The wait engine.
///
/// # Key Types
///
/// - [`WaitResult`] - Outcome of a wait on one or many objects
/// - [`SleepResult`] - Outcome of a sleep
pub mod wait;

pub mod thread;

pub mod critical_section;

pub mod pal;

/// Win32-shaped API and constants.
///
/// # Examples
///
/// ```rust
/// use palsync::win32::{self, constants::ERROR_INVALID_HANDLE};
///
/// assert!(!win32::close_handle(palsync::Handle(0x7777)));
/// assert_eq!(win32::get_last_error(), ERROR_INVALID_HANDLE);
/// win32::detach();
/// ```
pub mod win32;

/// `palsync` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`]. This is used consistently throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// `palsync` Error type
///
/// The main error type for all operations in this crate. See [`Error::code`] for the
/// matching Win32 error codes.
pub use error::Error;

pub use config::{PalConfig, MAXIMUM_WAIT_OBJECTS};
pub use critical_section::{CriticalSection, CriticalSectionGuard};
pub use handle::{DuplicateOptions, Handle, HandleTable};
pub use object::{ObjectKind, SyncObject};
pub use pal::Pal;
pub use thread::{
    ThreadContext, ThreadControlBlock, ThreadCreationFlags, ThreadId, ThreadOptions,
    ThreadPriority,
};
pub use wait::{SleepResult, WaitResult, INFINITE};

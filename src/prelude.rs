//! # palsync Prelude
//!
//! Re-exports the types needed by most users of the crate. Import it with
//! `use palsync::prelude::*;`.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all palsync operations
pub use crate::Error;

/// The result type used throughout palsync
pub use crate::Result;

/// Instance configuration
pub use crate::{PalConfig, MAXIMUM_WAIT_OBJECTS};

// ================================================================================================
// Entry Points
// ================================================================================================

/// The synchronization instance and the per-thread API bound to it
pub use crate::{Pal, ThreadContext};

// ================================================================================================
// Handles and Objects
// ================================================================================================

/// Handle values and duplication flags
pub use crate::handle::{DuplicateOptions, Handle};

/// Object identity
pub use crate::object::ObjectKind;

// ================================================================================================
// Waiting
// ================================================================================================

/// Wait and sleep outcomes
pub use crate::wait::{SleepResult, WaitResult, INFINITE};

// ================================================================================================
// Threads
// ================================================================================================

/// Thread creation and identity
pub use crate::thread::{ThreadCreationFlags, ThreadId, ThreadOptions, ThreadPriority};

// ================================================================================================
// Locks
// ================================================================================================

/// Handle-less recursive lock
pub use crate::critical_section::{CriticalSection, CriticalSectionGuard};

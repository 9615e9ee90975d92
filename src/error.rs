use thiserror::Error;

use crate::win32::constants::{
    ERROR_FILE_NOT_FOUND, ERROR_INTERNAL_ERROR, ERROR_INVALID_HANDLE, ERROR_INVALID_PARAMETER,
    ERROR_NOT_ENOUGH_MEMORY, ERROR_NOT_OWNER,
};

macro_rules! os_failure {
    // Single string version
    ($msg:expr) => {{
        let message = $msg.to_string();
        log::error!("os primitive failure at {}:{}: {}", file!(), line!(), message);
        crate::Error::OsPrimitiveFailure {
            message,
            file: file!(),
            line: line!(),
        }
    }};

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {{
        let message = format!($fmt, $($arg)*);
        log::error!("os primitive failure at {}:{}: {}", file!(), line!(), message);
        crate::Error::OsPrimitiveFailure {
            message,
            file: file!(),
            line: line!(),
        }
    }};
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every failure of the synchronization layer is recoverable at the call site. The hosted
/// runtime receives the error either as a [`Result`](crate::Result) from the
/// [`ThreadContext`](crate::ThreadContext) API, or as a Win32 sentinel plus the value returned by
/// [`Error::code`] stored in the thread's last-error slot when going through [`crate::win32`].
///
/// # Error Categories
///
/// ## Usage Errors
/// - [`Error::InvalidHandle`] - Unknown, closed or wrong-kind handle
/// - [`Error::NotOwner`] - Mutex released by a thread that does not own it
/// - [`Error::InvalidArgument`] - Out of range argument, e.g. a semaphore overflow
/// - [`Error::NotFound`] - Named object does not exist
///
/// ## Resource and Host Errors
/// - [`Error::ResourceExhausted`] - Handle table or thread limit reached
/// - [`Error::OsPrimitiveFailure`] - An underlying lock or thread primitive failed unexpectedly
///
/// An abandoned mutex is *not* an error: it is reported as
/// [`WaitResult::Abandoned`](crate::WaitResult::Abandoned).
///
/// # Examples
///
/// ```rust
/// use palsync::{Error, Pal, PalConfig};
///
/// let pal = Pal::new(PalConfig::default());
/// let ctx = pal.attach_current_thread()?;
/// let mutex = ctx.create_mutex(false, None)?;
///
/// match ctx.release_mutex(mutex) {
///     Err(Error::NotOwner) => println!("not our mutex"),
///     Err(e) => println!("other error: {}", e),
///     Ok(()) => unreachable!(),
/// }
/// # Ok::<(), palsync::Error>(())
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The handle does not denote a live object of the expected kind.
    ///
    /// Raised for unknown or already closed handles, for operations applied to the wrong
    /// object kind (e.g. `SetEvent` on a mutex), for APCs queued to an exited thread and for
    /// named objects whose name is already taken by a different kind.
    #[error("The handle is invalid")]
    InvalidHandle,

    /// A thread attempted to release a mutex it does not own.
    #[error("Attempt to release mutex not owned by caller")]
    NotOwner,

    /// An argument is outside of its permitted range.
    ///
    /// The message describes which argument was rejected.
    #[error("Invalid argument - {0}")]
    InvalidArgument(String),

    /// A fixed-capacity resource ran out.
    ///
    /// Raised when the handle table is full or the configured thread limit is reached.
    #[error("Resource exhausted - {0}")]
    ResourceExhausted(String),

    /// A named object could not be found in the process namespace.
    #[error("Named object not found - {0}")]
    NotFound(String),

    /// An underlying OS primitive failed for an unexpected reason.
    ///
    /// This indicates an unexpected host condition (poisoned lock, failed thread spawn)
    /// rather than a usage error. The error is logged when it is created and never retried
    /// silently.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the failing primitive
    /// * `file` - Source file where the failure was detected
    /// * `line` - Source line where the failure was detected
    #[error("OS primitive failure - {file}:{line}: {message}")]
    OsPrimitiveFailure {
        /// The message to be printed for the failure
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },
}

impl Error {
    /// Returns the Win32 error code stored in the last-error slot for this error.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use palsync::{win32::constants::ERROR_INVALID_HANDLE, Error};
    ///
    /// assert_eq!(Error::InvalidHandle.code(), ERROR_INVALID_HANDLE);
    /// ```
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Error::InvalidHandle => ERROR_INVALID_HANDLE,
            Error::NotOwner => ERROR_NOT_OWNER,
            Error::InvalidArgument(_) => ERROR_INVALID_PARAMETER,
            Error::ResourceExhausted(_) => ERROR_NOT_ENOUGH_MEMORY,
            Error::NotFound(_) => ERROR_FILE_NOT_FOUND,
            Error::OsPrimitiveFailure { .. } => ERROR_INTERNAL_ERROR,
        }
    }
}

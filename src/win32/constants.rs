//! Win32 return codes, error codes and flag values.

/// Base of the wait codes reporting a signaled object.
pub const WAIT_OBJECT_0: u32 = 0;
/// Base of the wait codes reporting an abandoned mutex.
pub const WAIT_ABANDONED_0: u32 = 0x80;
/// Alias of [`WAIT_ABANDONED_0`].
pub const WAIT_ABANDONED: u32 = WAIT_ABANDONED_0;
/// The wait or sleep was interrupted by an APC (`STATUS_USER_APC`).
pub const WAIT_IO_COMPLETION: u32 = 0xC0;
/// The timeout elapsed.
pub const WAIT_TIMEOUT: u32 = 258;
/// The wait failed, see last error.
pub const WAIT_FAILED: u32 = 0xFFFF_FFFF;
/// Exit code reported for a running thread.
pub const STILL_ACTIVE: u32 = 259;
/// Returned by `ResumeThread` and `SuspendThread` on failure.
pub const SUSPEND_FAILED: u32 = 0xFFFF_FFFF;

/// `ERROR_SUCCESS`.
pub const ERROR_SUCCESS: u32 = 0;
/// `ERROR_FILE_NOT_FOUND`.
pub const ERROR_FILE_NOT_FOUND: u32 = 2;
/// `ERROR_INVALID_HANDLE`.
pub const ERROR_INVALID_HANDLE: u32 = 6;
/// `ERROR_NOT_ENOUGH_MEMORY`.
pub const ERROR_NOT_ENOUGH_MEMORY: u32 = 8;
/// `ERROR_INVALID_PARAMETER`.
pub const ERROR_INVALID_PARAMETER: u32 = 87;
/// `ERROR_ALREADY_EXISTS`.
pub const ERROR_ALREADY_EXISTS: u32 = 183;
/// `ERROR_NOT_OWNER`.
pub const ERROR_NOT_OWNER: u32 = 288;
/// `ERROR_INTERNAL_ERROR`.
pub const ERROR_INTERNAL_ERROR: u32 = 1359;

/// `THREAD_PRIORITY_IDLE`.
pub const THREAD_PRIORITY_IDLE: i32 = -15;
/// `THREAD_PRIORITY_LOWEST`.
pub const THREAD_PRIORITY_LOWEST: i32 = -2;
/// `THREAD_PRIORITY_BELOW_NORMAL`.
pub const THREAD_PRIORITY_BELOW_NORMAL: i32 = -1;
/// `THREAD_PRIORITY_NORMAL`.
pub const THREAD_PRIORITY_NORMAL: i32 = 0;
/// `THREAD_PRIORITY_ABOVE_NORMAL`.
pub const THREAD_PRIORITY_ABOVE_NORMAL: i32 = 1;
/// `THREAD_PRIORITY_HIGHEST`.
pub const THREAD_PRIORITY_HIGHEST: i32 = 2;
/// `THREAD_PRIORITY_TIME_CRITICAL`.
pub const THREAD_PRIORITY_TIME_CRITICAL: i32 = 15;
/// Returned by `GetThreadPriority` on failure (`MAXLONG`).
pub const THREAD_PRIORITY_ERROR_RETURN: i32 = i32::MAX;

/// `DUPLICATE_CLOSE_SOURCE`.
pub const DUPLICATE_CLOSE_SOURCE: u32 = 0x1;
/// `DUPLICATE_SAME_ACCESS`.
pub const DUPLICATE_SAME_ACCESS: u32 = 0x2;
/// `CREATE_SUSPENDED`.
pub const CREATE_SUSPENDED: u32 = 0x4;

pub use crate::{config::MAXIMUM_WAIT_OBJECTS, wait::INFINITE};

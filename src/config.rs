//! Process-wide configuration of the synchronization layer.
//!
//! [`PalConfig`] bounds the fixed-capacity resources of a [`Pal`](crate::Pal) instance: the
//! handle table, the number of live threads, the number of objects a single multi-object wait
//! may name, and the default spin count of [`CriticalSection`](crate::CriticalSection)s.
//!
//! # Configuration Presets
//!
//! - [`PalConfig::default()`] - Limits suitable for a hosted runtime
//! - [`PalConfig::constrained()`] - Small limits, useful to exercise exhaustion paths
//! - [`PalConfig::unbounded()`] - Effectively no handle or thread limit
//!
//! # Example
//!
//! ```rust
//! use palsync::PalConfig;
//!
//! // Use a preset
//! let config = PalConfig::constrained();
//!
//! // Or customize
//! let config = PalConfig::new()
//!     .with_max_handles(1024)
//!     .with_critical_section_spin_count(4000);
//! assert_eq!(config.max_handles, 1024);
//! ```

/// Win32 `MAXIMUM_WAIT_OBJECTS`.
pub const MAXIMUM_WAIT_OBJECTS: usize = 64;

/// Limits and defaults for a [`Pal`](crate::Pal) instance.
///
/// # Default Values
///
/// | Setting | Default Value |
/// |---------|---------------|
/// | `max_handles` | 65,536 |
/// | `max_threads` | 4,096 |
/// | `max_wait_objects` | 64 |
/// | `critical_section_spin_count` | 0 |
/// | `thread_name_prefix` | `"pal-thread"` |
#[derive(Clone, Debug)]
pub struct PalConfig {
    /// Maximum number of open handles in the handle table.
    ///
    /// Creating or duplicating a handle beyond this limit fails with
    /// [`Error::ResourceExhausted`](crate::Error::ResourceExhausted).
    pub max_handles: usize,

    /// Maximum number of live threads registered with the instance.
    ///
    /// Both attached and created threads count against this limit.
    pub max_threads: usize,

    /// Maximum number of handles accepted by a single multi-object wait.
    pub max_wait_objects: usize,

    /// Default spin count of critical sections created through
    /// [`Pal::critical_section`](crate::Pal::critical_section).
    pub critical_section_spin_count: u32,

    /// Name prefix for threads spawned without an explicit name.
    ///
    /// The thread id is appended, e.g. `pal-thread-7`.
    pub thread_name_prefix: String,
}

impl PalConfig {
    /// Creates the default configuration.
    ///
    /// # Example
    ///
    /// ```rust
    /// use palsync::PalConfig;
    ///
    /// let config = PalConfig::new().with_max_threads(16);
    /// assert_eq!(config.max_threads, 16);
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Small limits, mostly useful to exercise the exhaustion paths.
    #[must_use]
    pub fn constrained() -> Self {
        Self {
            max_handles: 64,
            max_threads: 16,
            max_wait_objects: 8,
            ..Self::default()
        }
    }

    /// Effectively unlimited handles and threads.
    ///
    /// The per-wait object limit stays at [`MAXIMUM_WAIT_OBJECTS`] since it is part of the
    /// Win32 contract.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            max_handles: usize::MAX,
            max_threads: usize::MAX,
            ..Self::default()
        }
    }

    /// Sets the maximum number of open handles.
    ///
    /// # Arguments
    ///
    /// * `max` - Maximum number of handles in the table
    ///
    /// # Returns
    ///
    /// Returns `self` for method chaining.
    #[must_use]
    pub fn with_max_handles(mut self, max: usize) -> Self {
        self.max_handles = max;
        self
    }

    /// Sets the maximum number of live threads.
    ///
    /// # Arguments
    ///
    /// * `max` - Maximum number of registered threads
    ///
    /// # Returns
    ///
    /// Returns `self` for method chaining.
    #[must_use]
    pub fn with_max_threads(mut self, max: usize) -> Self {
        self.max_threads = max;
        self
    }

    /// Sets the maximum number of handles per multi-object wait.
    ///
    /// # Arguments
    ///
    /// * `max` - Maximum handle count accepted by `wait_for_multiple_objects`
    ///
    /// # Returns
    ///
    /// Returns `self` for method chaining.
    #[must_use]
    pub fn with_max_wait_objects(mut self, max: usize) -> Self {
        self.max_wait_objects = max;
        self
    }

    /// Sets the default critical section spin count.
    ///
    /// # Returns
    ///
    /// Returns `self` for method chaining.
    #[must_use]
    pub fn with_critical_section_spin_count(mut self, spins: u32) -> Self {
        self.critical_section_spin_count = spins;
        self
    }

    /// Sets the name prefix of spawned threads.
    ///
    /// # Returns
    ///
    /// Returns `self` for method chaining.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

impl Default for PalConfig {
    /// Creates the default configuration.
    ///
    /// See the struct documentation for default values.
    fn default() -> Self {
        Self {
            max_handles: 65_536,
            max_threads: 4_096,
            max_wait_objects: MAXIMUM_WAIT_OBJECTS,
            critical_section_spin_count: 0,
            thread_name_prefix: "pal-thread".to_string(),
        }
    }
}

//! The process-wide synchronization context.
//!
//! A [`Pal`] owns everything that is shared between the threads of a hosted process: the
//! handle table with its object namespace, the registry of thread control blocks and the
//! configuration. It is created explicitly and passed around as `Arc<Pal>`, so tests can run
//! many independent instances side by side. [`Pal::global`] provides the lazily created
//! process singleton that the [`win32`](crate::win32) facade attaches to.
//!
//! # Example
//!
//! ```rust
//! use palsync::{Pal, PalConfig, WaitResult, INFINITE};
//!
//! let pal = Pal::new(PalConfig::default());
//! let ctx = pal.attach_current_thread()?;
//!
//! let event = ctx.create_event(true, true, None)?;
//! assert_eq!(ctx.wait_for_single_object(event, INFINITE)?, WaitResult::Signaled(0));
//! ctx.close_handle(event)?;
//! # Ok::<(), palsync::Error>(())
//! ```

use std::sync::{
    atomic::{AtomicU32, AtomicUsize, Ordering},
    Arc, OnceLock,
};

use dashmap::DashMap;

use crate::{
    config::PalConfig,
    critical_section::CriticalSection,
    handle::{Handle, HandleTable},
    object::{ObjectState, SyncObject, ThreadObjectState},
    thread::{ThreadContext, ThreadControlBlock, ThreadId, ThreadPriority},
    Error, Result,
};

static GLOBAL: OnceLock<Arc<Pal>> = OnceLock::new();

/// Process-wide synchronization state.
#[derive(Debug)]
pub struct Pal {
    config: PalConfig,
    handles: HandleTable,
    threads: DashMap<ThreadId, Arc<ThreadControlBlock>>,
    live_threads: AtomicUsize,
    next_thread_id: AtomicU32,
}

impl Pal {
    /// Creates an independent instance.
    #[must_use]
    pub fn new(config: PalConfig) -> Arc<Self> {
        Arc::new(Self {
            handles: HandleTable::new(config.max_handles),
            threads: DashMap::new(),
            live_threads: AtomicUsize::new(0),
            next_thread_id: AtomicU32::new(1),
            config,
        })
    }

    /// Returns the process singleton, creating it with the default configuration on first
    /// use.
    pub fn global() -> &'static Arc<Pal> {
        GLOBAL.get_or_init(|| Pal::new(PalConfig::default()))
    }

    /// Creates the process singleton with `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the singleton already exists.
    pub fn init_global(config: PalConfig) -> Result<&'static Arc<Pal>> {
        let mut created = false;
        let pal = GLOBAL.get_or_init(|| {
            created = true;
            Pal::new(config)
        });
        if created {
            Ok(pal)
        } else {
            Err(Error::InvalidArgument(
                "global instance already initialized".to_string(),
            ))
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PalConfig {
        &self.config
    }

    /// Returns the handle table.
    #[must_use]
    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    /// Number of live registered threads.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Returns the control block of a live thread.
    #[must_use]
    pub fn thread(&self, id: ThreadId) -> Option<Arc<ThreadControlBlock>> {
        self.threads.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of waits currently parked on the object behind `handle`.
    ///
    /// Mostly useful to sequence tests: a signal sent after this reports a waiter is
    /// guaranteed to go through the blocking path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if `handle` is not open.
    pub fn waiter_count(&self, handle: Handle) -> Result<usize> {
        self.handles.get(handle)?.waiter_count()
    }

    /// Registers the calling OS thread and returns its context.
    ///
    /// Attaching a thread that is already attached to this instance returns the existing
    /// context. Dropping the last clone of the context runs the thread-exit protocol.
    ///
    /// # Errors
    ///
    /// - [`Error::ResourceExhausted`] if [`PalConfig::max_threads`] threads are live
    /// - [`Error::InvalidArgument`] if the thread is attached to another instance
    pub fn attach_current_thread(self: &Arc<Self>) -> Result<ThreadContext> {
        ThreadContext::attach(self)
    }

    /// Creates a critical section using the configured default spin count.
    #[must_use]
    pub fn critical_section(&self) -> CriticalSection {
        CriticalSection::with_spin_count(self.config.critical_section_spin_count)
    }

    /// Allocates a TCB and its thread waitable, and adds the TCB to the registry.
    pub(crate) fn register_thread(
        &self,
        priority: ThreadPriority,
        suspend_count: u32,
    ) -> Result<(Arc<ThreadControlBlock>, Arc<SyncObject>)> {
        let max = self.config.max_threads;
        self.live_threads
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < max).then_some(live + 1)
            })
            .map_err(|_| Error::ResourceExhausted(format!("thread limit ({}) reached", max)))?;

        let id = ThreadId::new(self.next_thread_id.fetch_add(1, Ordering::Relaxed));
        let tcb = Arc::new(ThreadControlBlock::new(id, priority, suspend_count));
        let object = Arc::new(SyncObject::new(
            self.handles.next_object_id(),
            None,
            ObjectState::Thread(ThreadObjectState::new(Arc::clone(&tcb))),
        ));
        self.threads.insert(id, Arc::clone(&tcb));
        log::debug!("registered {}", id);
        Ok((tcb, object))
    }

    /// Removes a TCB from the registry.
    pub(crate) fn unregister_thread(&self, id: ThreadId) {
        if self.threads.remove(&id).is_some() {
            self.live_threads.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

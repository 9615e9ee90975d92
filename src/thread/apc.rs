//! Asynchronous procedure calls.
//!
//! An APC is a callback queued to a specific thread that runs on that thread the next time it
//! enters an alertable wait or sleep. Callbacks always run outside of every internal lock, so
//! they are free to call back into the synchronization layer, including queueing further APCs
//! to their own thread.

use std::{collections::VecDeque, fmt, sync::Arc};

use crate::{thread::tcb::ThreadControlBlock, Result};

/// Boxed APC callback receiving the opaque argument it was queued with.
pub type ApcCallback = Box<dyn FnOnce(usize) + Send + 'static>;

/// A queued callback together with its argument.
pub struct Apc {
    callback: ApcCallback,
    arg: usize,
}

impl Apc {
    /// Bundles a callback with the argument it will be invoked with.
    pub fn new(callback: ApcCallback, arg: usize) -> Self {
        Self { callback, arg }
    }

    /// Runs the callback, consuming the APC.
    pub fn run(self) {
        (self.callback)(self.arg);
    }
}

impl fmt::Debug for Apc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Apc").field("arg", &self.arg).finish_non_exhaustive()
    }
}

/// FIFO of pending APCs, stored in the TCB.
#[derive(Default, Debug)]
pub(crate) struct ApcQueue {
    pending: VecDeque<Apc>,
}

impl ApcQueue {
    pub(crate) fn push(&mut self, apc: Apc) {
        self.pending.push_back(apc);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Detaches every pending APC, preserving order.
    pub(crate) fn take_all(&mut self) -> VecDeque<Apc> {
        std::mem::take(&mut self.pending)
    }

    /// Drops every pending APC without running it. Returns how many were dropped.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }
}

/// Queues `apc` to the thread owning `tcb`.
///
/// If the target is currently blocked in an alertable wait, that wait is interrupted and will
/// report `WAIT_IO_COMPLETION` after dispatching. A target blocked in a non-alertable wait keeps
/// waiting, the APC stays pending.
///
/// # Errors
///
/// Returns [`Error::InvalidHandle`](crate::Error::InvalidHandle) if the target thread already
/// ran its exit protocol.
pub(crate) fn queue(tcb: &ThreadControlBlock, apc: Apc) -> Result<()> {
    let block = {
        let mut state = tcb.lock_state()?;
        if state.exited {
            return Err(crate::Error::InvalidHandle);
        }
        state.apc_queue.push(apc);
        if state.alertable {
            state.current_wait.as_ref().and_then(|weak| weak.upgrade())
        } else {
            None
        }
    };

    // TCB lock is released before touching the block
    if let Some(block) = block {
        log::trace!("alerting {} blocked in alertable wait", tcb.id());
        block.alert()?;
    }
    Ok(())
}

/// Runs every APC pending on `tcb`, including ones queued by the callbacks themselves.
///
/// The queue is detached in one piece under the TCB lock and the callbacks run with no lock
/// held, repeating until the queue is observed empty. Returns the number of callbacks run.
pub(crate) fn dispatch_pending(tcb: &Arc<ThreadControlBlock>) -> Result<usize> {
    let mut dispatched = 0;
    loop {
        let batch = tcb.lock_state()?.apc_queue.take_all();
        if batch.is_empty() {
            break;
        }
        for apc in batch {
            apc.run();
            dispatched += 1;
        }
    }
    if dispatched > 0 {
        log::debug!("{} dispatched {} APCs", tcb.id(), dispatched);
    }
    Ok(dispatched)
}

/// Number of APCs pending on `tcb`.
pub(crate) fn pending_count(tcb: &ThreadControlBlock) -> Result<usize> {
    Ok(tcb.lock_state()?.apc_queue.len())
}

//! Thread-as-waitable state.

use std::sync::Arc;

use crate::thread::ThreadControlBlock;

/// Waitable view of a thread.
///
/// Transitions once from running to exited. The control block is shared with the thread
/// registry so priority and APC operations through any handle reach the same thread.
#[derive(Debug)]
pub(crate) struct ThreadObjectState {
    pub(crate) tcb: Arc<ThreadControlBlock>,
    /// `Some` once the thread exited.
    pub(crate) exit_code: Option<u32>,
}

impl ThreadObjectState {
    pub(crate) fn new(tcb: Arc<ThreadControlBlock>) -> Self {
        Self {
            tcb,
            exit_code: None,
        }
    }

    pub(crate) fn is_exited(&self) -> bool {
        self.exit_code.is_some()
    }
}

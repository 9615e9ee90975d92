//! Event state.

/// State of an event synchronization primitive.
///
/// - **Manual reset events** stay signaled until explicitly reset and release every waiter.
/// - **Auto reset events** reset as soon as exactly one waiter consumed the signal. With
///   nobody waiting they stay signaled until the next successful wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct EventState {
    /// Whether the event is currently signaled (set).
    pub(crate) signaled: bool,
    /// Whether this is a manual reset event (`true`) or auto-reset event (`false`).
    pub(crate) manual_reset: bool,
}

impl EventState {
    pub(crate) fn new(manual_reset: bool, signaled: bool) -> Self {
        Self {
            signaled,
            manual_reset,
        }
    }

    /// Consumes the signal on behalf of one waiter.
    pub(crate) fn acquire(&mut self) {
        if !self.manual_reset {
            self.signaled = false;
        }
    }

    /// Puts back a signal taken by [`acquire`](Self::acquire).
    pub(crate) fn give_back(&mut self) {
        if !self.manual_reset {
            self.signaled = true;
        }
    }
}

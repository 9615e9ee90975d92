//! Per-call wait records.
//!
//! A [`WaitBlock`] is created for every blocking wait and owned by the waiting thread's stack
//! frame. Object waiter lists and the thread control block only ever hold [`Weak`]
//! references to it. The block carries the condition variable the thread parks on and a
//! one-shot outcome slot: whichever of grant, alert or timeout fills the slot first decides
//! how the wait ends, and the others become no-ops. A grant the waiter has not returned yet
//! can still be [revoked](WaitBlock::revoke), which hands the consumed state back to the
//! objects.
//!
//! # Lock Order
//!
//! Object locks (ascending id) come before the block lock, and nothing is locked while the
//! block lock is held. A sweep holding one object lock only `try_lock`s the other objects of
//! a wait-all block. When that fails the block is nudged and its own thread re-examines it
//! with all object locks taken in order.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};

use crate::{
    object::{ObjectCore, ObjectState, SyncObject},
    thread::ThreadId,
    utils::{lock, wait_on, wait_on_timeout, Deadline},
    Result,
};

/// Why a parked waiter woke up for good.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WakeReason {
    /// The object at `index` (or, for wait-all, every object) was consumed for the waiter.
    /// `index` names the abandoned mutex if one was involved.
    Satisfied { index: usize, abandoned: bool },
    /// An APC was queued to the alertable waiter.
    Alerted,
    /// The deadline passed first.
    TimedOut,
}

/// What [`WaitBlock::park`] observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Parked {
    Done(WakeReason),
    /// A sweep could not inspect every object of a wait-all block.
    Recheck,
}

#[derive(Default, Debug)]
struct BlockState {
    outcome: Option<WakeReason>,
    recheck: bool,
    /// Indices of abandoned mutexes consumed by the grant.
    abandoned: Vec<usize>,
}

/// Record of one wait call.
#[derive(Debug)]
pub(crate) struct WaitBlock {
    thread: ThreadId,
    objects: Vec<Arc<SyncObject>>,
    wait_all: bool,
    state: Mutex<BlockState>,
    wake: Condvar,
}

impl WaitBlock {
    pub(crate) fn new(thread: ThreadId, objects: Vec<Arc<SyncObject>>, wait_all: bool) -> Arc<Self> {
        Arc::new(Self {
            thread,
            objects,
            wait_all,
            state: Mutex::new(BlockState::default()),
            wake: Condvar::new(),
        })
    }

    pub(crate) fn thread(&self) -> ThreadId {
        self.thread
    }

    pub(crate) fn objects(&self) -> &[Arc<SyncObject>] {
        &self.objects
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, BlockState>> {
        lock(&self.state, "wait block")
    }

    /// `true` while no outcome has been decided.
    pub(crate) fn is_pending(&self) -> Result<bool> {
        Ok(self.lock_state()?.outcome.is_none())
    }

    /// Tries to complete the wait against the given object states and records the grant in
    /// `block`.
    ///
    /// `states` must cover every object of the block. Nothing is consumed unless the whole
    /// requirement can be met.
    fn try_satisfy(
        &self,
        states: &mut [(u64, &mut ObjectState)],
        block: &mut BlockState,
    ) -> Result<()> {
        if self.wait_all {
            if self.objects.is_empty() {
                return Ok(());
            }
            for object in &self.objects {
                match state_of(states, object.id()) {
                    Some(state) if state.is_satisfiable(self.thread) => {
                        state.check_consume(self.thread)?;
                    }
                    _ => return Ok(()),
                }
            }
            for (index, object) in self.objects.iter().enumerate() {
                if let Some(state) = state_of(states, object.id()) {
                    if state.consume(self.thread) {
                        block.abandoned.push(index);
                    }
                }
            }
            let first = block.abandoned.first().copied();
            block.outcome = Some(WakeReason::Satisfied {
                index: first.unwrap_or(0),
                abandoned: first.is_some(),
            });
        } else {
            for (index, object) in self.objects.iter().enumerate() {
                let Some(state) = state_of(states, object.id()) else {
                    continue;
                };
                if state.is_satisfiable(self.thread) {
                    state.check_consume(self.thread)?;
                    let abandoned = state.consume(self.thread);
                    if abandoned {
                        block.abandoned.push(index);
                    }
                    block.outcome = Some(WakeReason::Satisfied { index, abandoned });
                    break;
                }
            }
        }
        Ok(())
    }

    /// Decides the wait with every object lock held by the caller.
    ///
    /// Returns the outcome if one was already decided or can be decided now. A decided
    /// outcome clears any pending recheck request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceExhausted`](crate::Error::ResourceExhausted) if a mutex of the
    /// block is held at its recursion limit by the waiting thread.
    pub(crate) fn settle(&self, locked: &mut LockedObjects<'_>) -> Result<Option<WakeReason>> {
        let mut states = locked.states();
        let mut block = self.lock_state()?;
        block.recheck = false;
        if block.outcome.is_none() {
            self.try_satisfy(&mut states, &mut block)?;
        }
        Ok(block.outcome)
    }

    /// Ends the wait as timed out unless it was decided already.
    pub(crate) fn expire(&self) -> Result<WakeReason> {
        let mut block = self.lock_state()?;
        Ok(*block.outcome.get_or_insert(WakeReason::TimedOut))
    }

    /// Offers `object`, whose core is locked by the caller, to this block.
    ///
    /// Returns `true` if the wait was completed by this call. A block that cannot be decided
    /// here is nudged so its own thread settles it, which also surfaces its errors there
    /// instead of in the signaling thread.
    pub(crate) fn offer(&self, object: &SyncObject, state: &mut ObjectState) -> Result<bool> {
        if !self.wait_all {
            let Some(index) = self.objects.iter().position(|o| o.id() == object.id()) else {
                return Ok(false);
            };
            let mut block = self.lock_state()?;
            if block.outcome.is_some() || !state.is_satisfiable(self.thread) {
                return Ok(false);
            }
            if state.check_consume(self.thread).is_err() {
                block.recheck = true;
                self.wake.notify_one();
                return Ok(false);
            }
            let abandoned = state.consume(self.thread);
            if abandoned {
                block.abandoned.push(index);
            }
            block.outcome = Some(WakeReason::Satisfied { index, abandoned });
            self.wake.notify_one();
            return Ok(true);
        }

        let mut others = Vec::with_capacity(self.objects.len());
        for other in &self.objects {
            if other.id() == object.id() {
                continue;
            }
            match other.try_lock()? {
                Some(guard) => others.push((other.id(), guard)),
                None => {
                    self.nudge()?;
                    return Ok(false);
                }
            }
        }

        let mut states: Vec<(u64, &mut ObjectState)> = Vec::with_capacity(self.objects.len());
        states.push((object.id(), state));
        states.extend(
            others
                .iter_mut()
                .map(|(id, guard)| (*id, &mut guard.state)),
        );

        let mut block = self.lock_state()?;
        if block.outcome.is_some() {
            return Ok(false);
        }
        if self.try_satisfy(&mut states, &mut block).is_err() {
            block.recheck = true;
            self.wake.notify_one();
            return Ok(false);
        }
        if block.outcome.is_some() {
            self.wake.notify_one();
        }
        Ok(block.outcome.is_some())
    }

    /// Interrupts the wait on behalf of a queued APC.
    pub(crate) fn alert(&self) -> Result<()> {
        let mut block = self.lock_state()?;
        if block.outcome.is_none() {
            block.outcome = Some(WakeReason::Alerted);
            self.wake.notify_one();
        }
        Ok(())
    }

    /// Asks the waiting thread to re-examine its objects itself.
    fn nudge(&self) -> Result<()> {
        let mut block = self.lock_state()?;
        if block.outcome.is_none() {
            block.recheck = true;
            self.wake.notify_one();
        }
        Ok(())
    }

    /// Parks the calling thread until an outcome is decided, a recheck is requested or the
    /// deadline passes.
    pub(crate) fn park(&self, deadline: Deadline) -> Result<Parked> {
        let mut block = self.lock_state()?;
        loop {
            if let Some(outcome) = block.outcome {
                return Ok(Parked::Done(outcome));
            }
            if block.recheck {
                block.recheck = false;
                return Ok(Parked::Recheck);
            }
            block = match deadline.remaining() {
                None => wait_on(&self.wake, block, "wait block")?,
                Some(left) if left.is_zero() => {
                    block.outcome = Some(WakeReason::TimedOut);
                    return Ok(Parked::Done(WakeReason::TimedOut));
                }
                Some(left) => wait_on_timeout(&self.wake, block, left, "wait block")?,
            };
        }
    }

    /// Hands back what the grant of this block consumed and offers it to the remaining
    /// waiters.
    ///
    /// Used when an APC beat the grant to the waiting thread. The block must already be
    /// unregistered. Does nothing unless the outcome is a grant.
    pub(crate) fn revoke(&self) -> Result<()> {
        let (index, abandoned) = {
            let mut block = self.lock_state()?;
            let outcome = block.outcome;
            match outcome {
                Some(WakeReason::Satisfied { index, .. }) => {
                    block.outcome = Some(WakeReason::Alerted);
                    (index, std::mem::take(&mut block.abandoned))
                }
                _ => return Ok(()),
            }
        };

        let taken: Vec<usize> = if self.wait_all {
            (0..self.objects.len()).collect()
        } else {
            vec![index]
        };
        let mut locked = LockedObjects::lock_all(&self.objects)?;
        for (i, object) in self.objects.iter().enumerate() {
            if !taken.contains(&i) {
                continue;
            }
            if let Some(core) = locked.core_mut(object.id()) {
                core.state.restore(self.thread, abandoned.contains(&i));
            }
        }
        // Other waiters see the restored state only once every object is back
        for (i, object) in self.objects.iter().enumerate() {
            if !taken.contains(&i) {
                continue;
            }
            if let Some(core) = locked.core_mut(object.id()) {
                object.sweep(core)?;
            }
        }
        Ok(())
    }

    /// Appends the block to the waiter list of every locked object.
    pub(crate) fn register(self: &Arc<Self>, locked: &mut LockedObjects<'_>) {
        for core in locked.cores_mut() {
            core.waiters.push_back(Arc::downgrade(self));
        }
    }

    /// Removes the block from every waiter list it was registered on.
    pub(crate) fn unregister(self: &Arc<Self>) -> Result<()> {
        let me = Arc::as_ptr(self);
        for core in LockedObjects::lock_all(&self.objects)?.cores_mut() {
            core.waiters.retain(|w| !std::ptr::eq(Weak::as_ptr(w), me));
        }
        Ok(())
    }
}

fn state_of<'s>(
    states: &'s mut [(u64, &mut ObjectState)],
    id: u64,
) -> Option<&'s mut ObjectState> {
    states
        .iter_mut()
        .find(|(object_id, _)| *object_id == id)
        .map(|(_, state)| &mut **state)
}

/// Locks held on the distinct objects of a wait, taken in ascending id order.
pub(crate) struct LockedObjects<'a> {
    guards: Vec<(u64, MutexGuard<'a, ObjectCore>)>,
}

impl<'a> LockedObjects<'a> {
    pub(crate) fn lock_all(objects: &'a [Arc<SyncObject>]) -> Result<Self> {
        let mut ordered: Vec<&'a Arc<SyncObject>> = objects.iter().collect();
        ordered.sort_by_key(|object| object.id());
        ordered.dedup_by_key(|object| object.id());

        let mut guards = Vec::with_capacity(ordered.len());
        for object in ordered {
            guards.push((object.id(), object.lock()?));
        }
        Ok(Self { guards })
    }

    fn states(&mut self) -> Vec<(u64, &mut ObjectState)> {
        self.guards
            .iter_mut()
            .map(|(id, guard)| (*id, &mut guard.state))
            .collect()
    }

    fn cores_mut(&mut self) -> Vec<&mut ObjectCore> {
        self.guards.iter_mut().map(|(_, guard)| &mut **guard).collect()
    }

    fn core_mut(&mut self, id: u64) -> Option<&mut ObjectCore> {
        self.guards
            .iter_mut()
            .find(|(object_id, _)| *object_id == id)
            .map(|(_, guard)| &mut **guard)
    }
}

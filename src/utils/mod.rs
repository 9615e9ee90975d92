//! Internal helpers shared across the crate.

pub(crate) mod synchronization;

pub(crate) use synchronization::{lock, wait_on, wait_on_timeout, Deadline};

//! Helpers shared by the unit tests.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crate::{
    config::PalConfig, handle::Handle, pal::Pal, thread::ThreadContext, wait::INFINITE, Result,
};

/// Upper bound for anything a test waits on before giving up.
pub const PATIENCE: Duration = Duration::from_secs(10);

/// Creates a fresh instance and attaches the calling thread to it.
pub fn attached(config: PalConfig) -> (Arc<Pal>, ThreadContext) {
    let pal = Pal::new(config);
    let ctx = pal
        .attach_current_thread()
        .expect("attaching a fresh instance must succeed");
    (pal, ctx)
}

/// Waits for a thread to exit and returns its exit code.
pub fn join(ctx: &ThreadContext, thread: Handle) -> Result<u32> {
    ctx.wait_for_single_object(thread, INFINITE)?;
    ctx.get_exit_code_thread(thread)
}

/// Polls until `condition` holds, panicking after [`PATIENCE`].
pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < PATIENCE, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Blocks until `count` waiters are parked on the object behind `handle`.
pub fn wait_for_waiters(pal: &Pal, handle: Handle, count: usize) {
    wait_until(|| pal.waiter_count(handle).is_ok_and(|n| n >= count));
}

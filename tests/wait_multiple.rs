//! Multi-object waits, hand-off order and wake counts.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use palsync::prelude::*;

fn setup() -> Result<(Arc<Pal>, ThreadContext)> {
    let pal = Pal::new(PalConfig::default());
    let ctx = pal.attach_current_thread()?;
    Ok((pal, ctx))
}

fn wait_for_waiters(pal: &Pal, handle: Handle, count: usize) {
    let start = Instant::now();
    while pal.waiter_count(handle).unwrap_or(0) < count {
        assert!(start.elapsed() < Duration::from_secs(10), "waiters never arrived");
        thread::sleep(Duration::from_millis(1));
    }
}

fn join(ctx: &ThreadContext, thread: Handle) -> Result<u32> {
    ctx.wait_for_single_object(thread, INFINITE)?;
    ctx.get_exit_code_thread(thread)
}

#[test]
fn wait_any_reports_lowest_signaled_index() -> Result<()> {
    let (_pal, ctx) = setup()?;
    let a = ctx.create_event(true, false, None)?;
    let b = ctx.create_event(true, true, None)?;
    let c = ctx.create_event(true, true, None)?;

    assert_eq!(
        ctx.wait_for_multiple_objects(&[a, b, c], false, 0)?,
        WaitResult::Signaled(1)
    );
    ctx.set_event(a)?;
    assert_eq!(
        ctx.wait_for_multiple_objects(&[a, b, c], false, 0)?,
        WaitResult::Signaled(0)
    );
    ctx.reset_event(a)?;
    ctx.reset_event(b)?;
    ctx.reset_event(c)?;
    assert_eq!(
        ctx.wait_for_multiple_objects(&[a, b, c], false, 30)?,
        WaitResult::Timeout
    );
    Ok(())
}

#[test]
fn wait_any_consumes_only_the_chosen_object() -> Result<()> {
    let (_pal, ctx) = setup()?;
    let first = ctx.create_semaphore(1, 1, None)?;
    let second = ctx.create_semaphore(1, 1, None)?;

    assert_eq!(
        ctx.wait_for_multiple_objects(&[first, second], false, 0)?,
        WaitResult::Signaled(0)
    );
    // Still at its maximum
    assert!(matches!(
        ctx.release_semaphore(second, 1),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(ctx.wait_for_single_object(second, 0)?, WaitResult::Signaled(0));
    assert_eq!(ctx.wait_for_single_object(first, 0)?, WaitResult::Timeout);
    Ok(())
}

#[test]
fn wait_all_takes_nothing_until_everything_is_available() -> Result<()> {
    let (pal, ctx) = setup()?;
    let first = ctx.create_semaphore(0, 1, None)?;
    let second = ctx.create_semaphore(0, 1, None)?;

    let waiter = ctx.create_thread(ThreadOptions::new(), move |ctx| {
        match ctx.wait_for_multiple_objects(&[first, second], true, INFINITE) {
            Ok(WaitResult::Signaled(0)) => 0,
            _ => 1,
        }
    })?;
    wait_for_waiters(&pal, first, 1);

    // A partially available set is not reserved by the blocked wait-all
    ctx.release_semaphore(first, 1)?;
    thread::sleep(Duration::from_millis(30));
    assert_eq!(ctx.wait_for_single_object(first, 0)?, WaitResult::Signaled(0));
    assert_eq!(ctx.get_exit_code_thread(waiter)?, palsync::win32::constants::STILL_ACTIVE);

    ctx.release_semaphore(second, 1)?;
    thread::sleep(Duration::from_millis(30));
    assert_eq!(ctx.get_exit_code_thread(waiter)?, palsync::win32::constants::STILL_ACTIVE);

    ctx.release_semaphore(first, 1)?;
    assert_eq!(join(&ctx, waiter)?, 0);

    // Both counts were taken together
    assert_eq!(ctx.wait_for_single_object(first, 0)?, WaitResult::Timeout);
    assert_eq!(ctx.wait_for_single_object(second, 0)?, WaitResult::Timeout);
    Ok(())
}

#[test]
fn wait_all_timeout_leaves_objects_untouched() -> Result<()> {
    let (_pal, ctx) = setup()?;
    let ready = ctx.create_semaphore(1, 1, None)?;
    let never = ctx.create_event(false, false, None)?;

    assert_eq!(
        ctx.wait_for_multiple_objects(&[ready, never], true, 40)?,
        WaitResult::Timeout
    );
    assert!(matches!(
        ctx.release_semaphore(ready, 1),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(ctx.wait_for_single_object(ready, 0)?, WaitResult::Signaled(0));
    Ok(())
}

#[test]
fn wait_list_validation() -> Result<()> {
    let (_pal, ctx) = setup()?;
    let event = ctx.create_event(true, true, None)?;

    assert!(matches!(
        ctx.wait_for_multiple_objects(&[], false, 0),
        Err(Error::InvalidArgument(_))
    ));
    let too_many = vec![event; MAXIMUM_WAIT_OBJECTS + 1];
    assert!(matches!(
        ctx.wait_for_multiple_objects(&too_many, false, 0),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        ctx.wait_for_multiple_objects(&[event, event], true, 0),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(
        ctx.wait_for_multiple_objects(&[event, event], false, 0)?,
        WaitResult::Signaled(0)
    );
    let closed = ctx.create_event(true, true, None)?;
    ctx.close_handle(closed)?;
    assert!(matches!(
        ctx.wait_for_multiple_objects(&[event, closed], false, 0),
        Err(Error::InvalidHandle)
    ));
    Ok(())
}

#[test]
fn semaphore_waiters_served_in_arrival_order() -> Result<()> {
    let (pal, ctx) = setup()?;
    let sem = ctx.create_semaphore(0, 10, None)?;
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut threads = Vec::new();
    for i in 0..4u32 {
        let order = Arc::clone(&order);
        let thread = ctx.create_thread(ThreadOptions::new(), move |ctx| {
            if ctx.wait_for_single_object(sem, INFINITE).is_err() {
                return 1;
            }
            order.lock().unwrap().push(i);
            0
        })?;
        wait_for_waiters(&pal, sem, i as usize + 1);
        threads.push(thread);
    }

    for (served, thread) in threads.iter().enumerate() {
        ctx.release_semaphore(sem, 1)?;
        assert_eq!(join(&ctx, *thread)?, 0);
        assert_eq!(order.lock().unwrap().len(), served + 1);
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    Ok(())
}

#[test]
fn released_count_goes_to_queued_waiter_first() -> Result<()> {
    let (pal, ctx) = setup()?;
    let sem = ctx.create_semaphore(0, 1, None)?;
    let waiter = ctx.create_thread(ThreadOptions::new(), move |ctx| {
        ctx.wait_for_single_object(sem, INFINITE).map_or(1, |_| 0)
    })?;
    wait_for_waiters(&pal, sem, 1);

    ctx.release_semaphore(sem, 1)?;
    // The waiter was granted the count inside the release
    assert_eq!(ctx.wait_for_single_object(sem, 0)?, WaitResult::Timeout);
    assert_eq!(join(&ctx, waiter)?, 0);
    Ok(())
}

/// Starts `count` threads blocked on `event` and returns their handles plus a wake counter.
fn blocked_on_event(
    pal: &Pal,
    ctx: &ThreadContext,
    event: Handle,
    count: usize,
) -> Result<(Vec<Handle>, Arc<AtomicUsize>)> {
    let woken = Arc::new(AtomicUsize::new(0));
    let mut threads = Vec::new();
    for _ in 0..count {
        let woken = Arc::clone(&woken);
        threads.push(ctx.create_thread(ThreadOptions::new(), move |ctx| {
            match ctx.wait_for_single_object(event, 2000) {
                Ok(WaitResult::Signaled(0)) => {
                    woken.fetch_add(1, Ordering::SeqCst);
                    0
                }
                _ => 1,
            }
        })?);
    }
    wait_for_waiters(pal, event, count);
    Ok((threads, woken))
}

#[test]
fn manual_reset_event_wakes_every_waiter() -> Result<()> {
    let (pal, ctx) = setup()?;
    let event = ctx.create_event(true, false, None)?;
    let (threads, woken) = blocked_on_event(&pal, &ctx, event, 3)?;

    ctx.set_event(event)?;
    for thread in threads {
        assert_eq!(join(&ctx, thread)?, 0);
    }
    assert_eq!(woken.load(Ordering::SeqCst), 3);
    assert_eq!(ctx.wait_for_single_object(event, 0)?, WaitResult::Signaled(0));
    Ok(())
}

#[test]
fn auto_reset_event_wakes_one_waiter_per_set() -> Result<()> {
    let (pal, ctx) = setup()?;
    let event = ctx.create_event(false, false, None)?;
    let (threads, woken) = blocked_on_event(&pal, &ctx, event, 3)?;

    ctx.set_event(event)?;
    thread::sleep(Duration::from_millis(50));
    assert_eq!(woken.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.wait_for_single_object(event, 0)?, WaitResult::Timeout);

    ctx.set_event(event)?;
    ctx.set_event(event)?;
    for thread in threads {
        assert_eq!(join(&ctx, thread)?, 0);
    }
    assert_eq!(woken.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn pulse_releases_current_waiters_and_resets() -> Result<()> {
    let (pal, ctx) = setup()?;
    let event = ctx.create_event(true, false, None)?;
    let (threads, woken) = blocked_on_event(&pal, &ctx, event, 2)?;

    ctx.pulse_event(event)?;
    for thread in threads {
        assert_eq!(join(&ctx, thread)?, 0);
    }
    assert_eq!(woken.load(Ordering::SeqCst), 2);
    assert_eq!(ctx.wait_for_single_object(event, 0)?, WaitResult::Timeout);

    // Nobody waiting: a pulse leaves no trace
    ctx.pulse_event(event)?;
    assert_eq!(ctx.wait_for_single_object(event, 0)?, WaitResult::Timeout);
    Ok(())
}

#[test]
fn thread_exit_wakes_every_waiter() -> Result<()> {
    let (pal, ctx) = setup()?;
    let gate = ctx.create_event(true, false, None)?;
    let target = ctx.create_thread(ThreadOptions::new(), move |ctx| {
        ctx.wait_for_single_object(gate, INFINITE).map_or(1, |_| 9)
    })?;

    let woken = Arc::new(AtomicUsize::new(0));
    let mut watchers = Vec::new();
    for _ in 0..3 {
        let woken = Arc::clone(&woken);
        watchers.push(ctx.create_thread(ThreadOptions::new(), move |ctx| {
            match ctx.wait_for_single_object(target, INFINITE) {
                Ok(WaitResult::Signaled(0)) => {
                    woken.fetch_add(1, Ordering::SeqCst);
                    0
                }
                _ => 1,
            }
        })?);
    }
    wait_for_waiters(&pal, target, 3);

    ctx.set_event(gate)?;
    for watcher in watchers {
        assert_eq!(join(&ctx, watcher)?, 0);
    }
    assert_eq!(woken.load(Ordering::SeqCst), 3);
    assert_eq!(ctx.get_exit_code_thread(target)?, 9);
    // An exited thread stays signaled
    assert_eq!(ctx.wait_for_single_object(target, 0)?, WaitResult::Signaled(0));
    Ok(())
}

/// Starts a wait-all on `handles` that records `tag` in `order` once it completes.
fn wait_all_recording(
    ctx: &ThreadContext,
    handles: Vec<Handle>,
    tag: u32,
    order: &Arc<Mutex<Vec<u32>>>,
) -> Result<Handle> {
    let order = Arc::clone(order);
    ctx.create_thread(ThreadOptions::new(), move |ctx| {
        match ctx.wait_for_multiple_objects(&handles, true, INFINITE) {
            Ok(WaitResult::Signaled(0)) => {
                order.lock().unwrap().push(tag);
                0
            }
            _ => 1,
        }
    })
}

#[test]
fn wait_all_ties_go_to_the_earliest_registration() -> Result<()> {
    let (pal, ctx) = setup()?;
    let shared = ctx.create_semaphore(0, 1, None)?;
    let b = ctx.create_event(true, true, None)?;
    let c = ctx.create_event(true, true, None)?;
    let order = Arc::new(Mutex::new(Vec::new()));

    let first = wait_all_recording(&ctx, vec![shared, b], 1, &order)?;
    wait_for_waiters(&pal, shared, 1);
    let second = wait_all_recording(&ctx, vec![c, shared], 2, &order)?;
    wait_for_waiters(&pal, shared, 2);

    ctx.release_semaphore(shared, 1)?;
    assert_eq!(join(&ctx, first)?, 0);
    assert_eq!(*order.lock().unwrap(), vec![1]);

    ctx.release_semaphore(shared, 1)?;
    assert_eq!(join(&ctx, second)?, 0);
    assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    Ok(())
}

#[test]
fn wait_all_that_cannot_complete_does_not_block_later_waiters() -> Result<()> {
    let (pal, ctx) = setup()?;
    let shared = ctx.create_semaphore(0, 1, None)?;
    let closed_gate = ctx.create_event(true, false, None)?;
    let open_gate = ctx.create_event(true, true, None)?;
    let order = Arc::new(Mutex::new(Vec::new()));

    let blocked = wait_all_recording(&ctx, vec![shared, closed_gate], 1, &order)?;
    wait_for_waiters(&pal, shared, 1);
    let ready = wait_all_recording(&ctx, vec![shared, open_gate], 2, &order)?;
    wait_for_waiters(&pal, shared, 2);

    // The earlier registration is skipped because it reserves nothing
    ctx.release_semaphore(shared, 1)?;
    assert_eq!(join(&ctx, ready)?, 0);
    assert_eq!(*order.lock().unwrap(), vec![2]);

    ctx.set_event(closed_gate)?;
    ctx.release_semaphore(shared, 1)?;
    assert_eq!(join(&ctx, blocked)?, 0);
    assert_eq!(*order.lock().unwrap(), vec![2, 1]);
    Ok(())
}

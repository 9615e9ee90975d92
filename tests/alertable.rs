//! Alertable sleeps and waits interrupted by APCs queued from another thread.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use palsync::prelude::*;

/// Accepted deviation from every measured interval, in both directions.
const TOLERANCE: Duration = Duration::from_millis(50);

const SLEEP_MS: u32 = 2000;
const SLEEP_INTERRUPT: Duration = Duration::from_millis(1000);
const WAIT_MS: u32 = 4000;
const WAIT_INTERRUPT: Duration = Duration::from_millis(2000);

type Outcome<T> = Arc<Mutex<Option<(T, Duration)>>>;
type Started = Arc<Mutex<Option<Instant>>>;

fn assert_near(elapsed: Duration, expected: Duration) {
    assert!(
        elapsed + TOLERANCE >= expected && elapsed <= expected + TOLERANCE,
        "expected {:?} +/- {:?}, measured {:?}",
        expected,
        TOLERANCE,
        elapsed
    );
}

/// Starts a thread that runs `block` with the instant it started, publishing that instant
/// before blocking and recording what `block` returned together with its duration.
fn spawn_timed<T, F>(ctx: &ThreadContext, block: F) -> Result<(Handle, Started, Outcome<T>)>
where
    T: Send + 'static,
    F: FnOnce(&ThreadContext) -> Result<T> + Send + 'static,
{
    let started = ctx.create_event(true, false, None)?;
    let signal = ctx.duplicate_handle(started, DuplicateOptions::SAME_ACCESS)?;
    let start_slot: Started = Arc::new(Mutex::new(None));
    let outcome: Outcome<T> = Arc::new(Mutex::new(None));
    let (publish, slot) = (Arc::clone(&start_slot), Arc::clone(&outcome));

    let child = ctx.create_thread(ThreadOptions::new().with_name("timed"), move |ctx| {
        let start = Instant::now();
        *publish.lock().unwrap() = Some(start);
        if ctx.set_event(signal).is_err() {
            return 1;
        }
        match block(ctx) {
            Ok(result) => {
                *slot.lock().unwrap() = Some((result, start.elapsed()));
                0
            }
            Err(_) => 2,
        }
    })?;

    ctx.wait_for_single_object(started, INFINITE)?;
    ctx.close_handle(started)?;
    Ok((child, start_slot, outcome))
}

/// Sleeps until `offset` after the instant the child published.
fn sleep_until(started: &Started, offset: Duration) {
    let start = started.lock().unwrap().expect("child published its start");
    thread::sleep((start + offset).saturating_duration_since(Instant::now()));
}

/// An APC that records the id of the thread it runs on.
fn record_thread(ran_on: &Arc<Mutex<Option<ThreadId>>>) -> impl FnOnce(usize) + Send + 'static {
    let ran_on = Arc::clone(ran_on);
    move |_| {
        *ran_on.lock().unwrap() = ThreadContext::current().map(|ctx| ctx.current_thread_id());
    }
}

#[test]
fn alertable_sleep_ends_at_interrupt() -> Result<()> {
    let pal = Pal::new(PalConfig::default());
    let ctx = pal.attach_current_thread()?;
    let ran_on = Arc::new(Mutex::new(None));

    let (child, started, outcome) =
        spawn_timed(&ctx, |ctx| ctx.sleep_ex(SLEEP_MS, true))?;
    sleep_until(&started, SLEEP_INTERRUPT);
    ctx.queue_user_apc(child, record_thread(&ran_on), 0)?;

    ctx.wait_for_single_object(child, INFINITE)?;
    assert_eq!(ctx.get_exit_code_thread(child)?, 0);

    let (result, elapsed) = outcome.lock().unwrap().take().unwrap();
    assert_eq!(result, SleepResult::IoCompletion);
    assert_eq!(result.code(), palsync::win32::constants::WAIT_IO_COMPLETION);
    assert_near(elapsed, SLEEP_INTERRUPT);

    let target = ctx.get_thread_id(child)?;
    assert_eq!(*ran_on.lock().unwrap(), Some(target));
    Ok(())
}

#[test]
fn non_alertable_sleep_runs_full_interval() -> Result<()> {
    let pal = Pal::new(PalConfig::default());
    let ctx = pal.attach_current_thread()?;
    let ran_on = Arc::new(Mutex::new(None));

    let (child, started, outcome) =
        spawn_timed(&ctx, |ctx| ctx.sleep_ex(SLEEP_MS, false))?;
    sleep_until(&started, SLEEP_INTERRUPT);
    ctx.queue_user_apc(child, record_thread(&ran_on), 0)?;
    assert_eq!(ctx.pending_apc_count(child)?, 1);

    ctx.wait_for_single_object(child, INFINITE)?;
    let (result, elapsed) = outcome.lock().unwrap().take().unwrap();
    assert_eq!(result, SleepResult::Elapsed);
    assert_eq!(result.code(), 0);
    assert_near(elapsed, Duration::from_millis(u64::from(SLEEP_MS)));

    // The child exited without an alertable wait, its APC was discarded
    assert_eq!(*ran_on.lock().unwrap(), None);
    Ok(())
}

#[test]
fn apc_stays_pending_until_alertable() -> Result<()> {
    let pal = Pal::new(PalConfig::default());
    let ctx = pal.attach_current_thread()?;
    let me = ctx.current_thread();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&hits);
    ctx.queue_user_apc(me, move |arg| {
        counter.fetch_add(arg, Ordering::SeqCst);
    }, 5)?;

    assert_eq!(ctx.sleep_ex(20, false)?, SleepResult::Elapsed);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(ctx.pending_apc_count(me)?, 1);

    let event = ctx.create_event(false, true, None)?;
    assert_eq!(
        ctx.wait_for_single_object_ex(event, 0, false)?,
        WaitResult::Signaled(0)
    );
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    // Entering an alertable wait with APCs pending returns before looking at the object
    ctx.set_event(event)?;
    assert_eq!(
        ctx.wait_for_single_object_ex(event, INFINITE, true)?,
        WaitResult::IoCompletion
    );
    assert_eq!(hits.load(Ordering::SeqCst), 5);
    assert_eq!(ctx.pending_apc_count(me)?, 0);
    assert_eq!(
        ctx.wait_for_single_object(event, 0)?,
        WaitResult::Signaled(0)
    );
    Ok(())
}

#[test]
fn alertable_semaphore_wait_interrupted() -> Result<()> {
    let pal = Pal::new(PalConfig::default());
    let ctx = pal.attach_current_thread()?;
    let sem = ctx.create_semaphore(0, 1, None)?;
    let child_sem = ctx.duplicate_handle(sem, DuplicateOptions::SAME_ACCESS)?;

    let (child, started, outcome) = spawn_timed(&ctx, move |ctx| {
        ctx.wait_for_single_object_ex(child_sem, WAIT_MS, true)
    })?;
    sleep_until(&started, WAIT_INTERRUPT);
    ctx.queue_user_apc(child, |_| {}, 0)?;
    ctx.wait_for_single_object(child, INFINITE)?;

    let (result, elapsed) = outcome.lock().unwrap().take().unwrap();
    assert_eq!(result, WaitResult::IoCompletion);
    assert_near(elapsed, WAIT_INTERRUPT);

    // The interrupted wait consumed nothing
    assert_eq!(ctx.release_semaphore(sem, 1)?, 0);
    Ok(())
}

#[test]
fn alertable_semaphore_wait_times_out_without_apc() -> Result<()> {
    let pal = Pal::new(PalConfig::default());
    let ctx = pal.attach_current_thread()?;
    let sem = ctx.create_semaphore(0, 1, None)?;

    let start = Instant::now();
    let result = ctx.wait_for_single_object_ex(sem, WAIT_MS, true)?;
    let elapsed = start.elapsed();
    assert_eq!(result, WaitResult::Timeout);
    assert_eq!(result.code(), 258);
    assert_near(elapsed, Duration::from_millis(u64::from(WAIT_MS)));
    Ok(())
}

#[test]
fn apc_racing_a_release_never_loses_either() -> Result<()> {
    let pal = Pal::new(PalConfig::default());
    let ctx = pal.attach_current_thread()?;

    for _ in 0..20 {
        let sem = ctx.create_semaphore(0, 1, None)?;
        let child_sem = ctx.duplicate_handle(sem, DuplicateOptions::SAME_ACCESS)?;
        let ran = Arc::new(AtomicUsize::new(0));
        let (counter, leftover) = (Arc::clone(&ran), Arc::new(AtomicUsize::new(0)));
        let pending = Arc::clone(&leftover);

        let child = ctx.create_thread(ThreadOptions::new(), move |ctx| {
            let result = ctx.wait_for_single_object_ex(child_sem, 5000, true);
            let me = ctx.current_thread();
            pending.store(ctx.pending_apc_count(me).unwrap_or(usize::MAX), Ordering::SeqCst);
            match result {
                Ok(WaitResult::IoCompletion) => 1,
                Ok(WaitResult::Signaled(0)) => 2,
                _ => 3,
            }
        })?;

        wait_for_waiter(&pal, sem);
        ctx.release_semaphore(sem, 1)?;
        let queued = ctx.queue_user_apc(child, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }, 0);
        // A child that already returned from its wait may have exited too
        match queued {
            Ok(()) | Err(Error::InvalidHandle) => {}
            Err(e) => return Err(e),
        }
        ctx.wait_for_single_object(child, INFINITE)?;

        match ctx.get_exit_code_thread(child)? {
            // The APC won: it ran inside the wait and the unit went back to the semaphore
            1 => {
                assert_eq!(ran.load(Ordering::SeqCst), 1);
                assert_eq!(leftover.load(Ordering::SeqCst), 0);
                assert_eq!(ctx.wait_for_single_object(sem, 0)?, WaitResult::Signaled(0));
            }
            // The wait had returned before the APC was queued
            2 => {
                assert_eq!(ran.load(Ordering::SeqCst), 0);
                assert_eq!(ctx.wait_for_single_object(sem, 0)?, WaitResult::Timeout);
            }
            code => panic!("unexpected wait outcome {}", code),
        }
        ctx.close_handle(sem)?;
        ctx.close_handle(child)?;
    }
    Ok(())
}

#[test]
fn apcs_run_in_fifo_order_in_one_wait() -> Result<()> {
    let pal = Pal::new(PalConfig::default());
    let ctx = pal.attach_current_thread()?;
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..4 {
        let order = Arc::clone(&order);
        ctx.queue_user_apc(ctx.current_thread(), move |arg| {
            order.lock().unwrap().push(arg);
        }, i)?;
    }
    assert_eq!(ctx.sleep_ex(INFINITE, true)?, SleepResult::IoCompletion);
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    Ok(())
}

#[test]
fn apc_to_exited_thread_fails() -> Result<()> {
    let pal = Pal::new(PalConfig::default());
    let ctx = pal.attach_current_thread()?;
    let child = ctx.create_thread(ThreadOptions::new(), |_| 0)?;
    ctx.wait_for_single_object(child, INFINITE)?;

    assert!(matches!(
        ctx.queue_user_apc(child, |_| {}, 0),
        Err(Error::InvalidHandle)
    ));
    Ok(())
}

fn wait_for_waiter(pal: &Pal, handle: Handle) {
    let start = Instant::now();
    while pal.waiter_count(handle).unwrap_or(0) == 0 {
        assert!(start.elapsed() < Duration::from_secs(10), "waiter never arrived");
        thread::sleep(Duration::from_millis(1));
    }
}

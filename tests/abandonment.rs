//! Mutexes left owned by exiting threads.

use std::{thread, time::Duration};

use palsync::prelude::*;

#[test]
fn first_wait_after_exit_reports_abandoned_once() -> Result<()> {
    let pal = Pal::new(PalConfig::default());
    let ctx = pal.attach_current_thread()?;
    let mutex = ctx.create_mutex(false, None)?;
    let child_mutex = ctx.duplicate_handle(mutex, DuplicateOptions::SAME_ACCESS)?;

    let owner = ctx.create_thread(ThreadOptions::new(), move |ctx| {
        match ctx.wait_for_single_object(child_mutex, INFINITE) {
            Ok(WaitResult::Signaled(0)) => 0,
            _ => 1,
        }
    })?;
    ctx.wait_for_single_object(owner, INFINITE)?;
    assert_eq!(ctx.get_exit_code_thread(owner)?, 0);

    assert_eq!(
        ctx.wait_for_single_object(mutex, 0)?,
        WaitResult::Abandoned(0)
    );
    assert_eq!(WaitResult::Abandoned(0).code(), 0x80);
    ctx.release_mutex(mutex)?;

    for _ in 0..3 {
        assert_eq!(
            ctx.wait_for_single_object(mutex, 0)?,
            WaitResult::Signaled(0)
        );
        ctx.release_mutex(mutex)?;
    }
    Ok(())
}

#[test]
fn blocked_waiter_receives_abandoned_mutex() -> Result<()> {
    let pal = Pal::new(PalConfig::default());
    let ctx = pal.attach_current_thread()?;
    let mutex = ctx.create_mutex(false, None)?;
    let held = ctx.create_event(true, false, None)?;
    let finish = ctx.create_event(true, false, None)?;
    let (child_mutex, child_held, child_finish) = (
        ctx.duplicate_handle(mutex, DuplicateOptions::SAME_ACCESS)?,
        ctx.duplicate_handle(held, DuplicateOptions::SAME_ACCESS)?,
        ctx.duplicate_handle(finish, DuplicateOptions::SAME_ACCESS)?,
    );

    let owner = ctx.create_thread(ThreadOptions::new(), move |ctx| {
        let steps = || -> Result<()> {
            // Recursive ownership is abandoned as a whole
            ctx.wait_for_single_object(child_mutex, INFINITE)?;
            ctx.wait_for_single_object(child_mutex, INFINITE)?;
            ctx.set_event(child_held)?;
            ctx.wait_for_single_object(child_finish, INFINITE)?;
            Ok(())
        };
        steps().map_or(1, |()| 0)
    })?;

    ctx.wait_for_single_object(held, INFINITE)?;
    let waiter = ctx.create_thread(ThreadOptions::new(), move |ctx| {
        match ctx.wait_for_multiple_objects(&[mutex], false, INFINITE) {
            Ok(WaitResult::Abandoned(0)) => match ctx.release_mutex(mutex) {
                Ok(()) => 0,
                Err(_) => 3,
            },
            Ok(_) => 1,
            Err(_) => 2,
        }
    })?;

    while pal.waiter_count(mutex)? == 0 {
        thread::sleep(Duration::from_millis(1));
    }
    ctx.set_event(finish)?;

    ctx.wait_for_single_object(waiter, INFINITE)?;
    assert_eq!(ctx.get_exit_code_thread(waiter)?, 0);
    assert_eq!(ctx.get_exit_code_thread(owner)?, 0);

    assert_eq!(
        ctx.wait_for_single_object(mutex, 0)?,
        WaitResult::Signaled(0)
    );
    Ok(())
}

#[test]
fn abandoned_mutex_in_wait_all_reports_its_index() -> Result<()> {
    let pal = Pal::new(PalConfig::default());
    let ctx = pal.attach_current_thread()?;
    let event = ctx.create_event(true, true, None)?;
    let mutex = ctx.create_mutex(false, None)?;

    let owner = ctx.create_thread(ThreadOptions::new(), move |ctx| {
        ctx.wait_for_single_object(mutex, INFINITE).map_or(1, |_| 0)
    })?;
    ctx.wait_for_single_object(owner, INFINITE)?;

    assert_eq!(
        ctx.wait_for_multiple_objects(&[event, mutex], true, 0)?,
        WaitResult::Abandoned(1)
    );
    ctx.release_mutex(mutex)?;
    assert_eq!(
        ctx.wait_for_multiple_objects(&[event, mutex], true, 0)?,
        WaitResult::Signaled(0)
    );
    Ok(())
}

#[test]
fn released_mutex_is_not_abandoned() -> Result<()> {
    let pal = Pal::new(PalConfig::default());
    let ctx = pal.attach_current_thread()?;
    let mutex = ctx.create_mutex(false, None)?;

    let owner = ctx.create_thread(ThreadOptions::new(), move |ctx| {
        let acquire_release = || -> Result<()> {
            ctx.wait_for_single_object(mutex, INFINITE)?;
            ctx.release_mutex(mutex)
        };
        acquire_release().map_or(1, |()| 0)
    })?;
    ctx.wait_for_single_object(owner, INFINITE)?;
    assert_eq!(ctx.get_exit_code_thread(owner)?, 0);

    assert_eq!(
        ctx.wait_for_single_object(mutex, 0)?,
        WaitResult::Signaled(0)
    );
    Ok(())
}

#[test]
fn release_by_non_owner_fails() -> Result<()> {
    let pal = Pal::new(PalConfig::default());
    let ctx = pal.attach_current_thread()?;
    let mutex = ctx.create_mutex(true, None)?;

    let intruder = ctx.create_thread(ThreadOptions::new(), move |ctx| {
        match ctx.release_mutex(mutex) {
            Err(Error::NotOwner) => 0,
            _ => 1,
        }
    })?;
    ctx.wait_for_single_object(intruder, INFINITE)?;
    assert_eq!(ctx.get_exit_code_thread(intruder)?, 0);
    ctx.release_mutex(mutex)?;
    assert!(matches!(ctx.release_mutex(mutex), Err(Error::NotOwner)));
    Ok(())
}

mod common;

use common::{config, normal, rig, submit, submit_with, tick_until, wait_for};
use mcq::{CoreId, CoreMask, CoreState, Instr, OwnerTag, RecoveryCounts, ResultTag};
use mcq_hal::regs::REG_CUR_ADDR;

const CORE: CoreId = CoreId(0);

fn counts(device: &mcq::Device) -> RecoveryCounts {
    device.recovery_counts(CORE).unwrap()
}

#[test]
fn watchdog_is_sized_by_pending_buffers() {
    let cfg = config(1).watchdog_ticks_per_buffer(2).build();
    let (_hw, device) = rig(cfg);
    let session = device.open_session().unwrap();

    assert_eq!(device.watchdog_remaining(CORE), None);
    for _ in 0..3 {
        submit(&session, &normal(), CoreMask::ALL);
    }
    assert_eq!(device.watchdog_remaining(CORE), Some(6));
}

#[test]
fn arbiter_window_overrides_per_buffer_budget() {
    let cfg = config(1).hw_arbiter_timeout_ticks(7).build();
    let (_hw, device) = rig(cfg);
    let session = device.open_session().unwrap();
    submit(&session, &normal(), CoreMask::ALL);
    submit(&session, &normal(), CoreMask::ALL);
    assert_eq!(device.watchdog_remaining(CORE), Some(7));
}

#[test]
fn hung_core_recovers_by_abort() {
    let cfg = config(1).watchdog_ticks_per_buffer(2).build();
    let (hw, device) = rig(cfg);
    let session = device.open_session().unwrap();
    hw.stall(0);

    let ids: Vec<_> = (0..3)
        .map(|_| submit(&session, &normal(), CoreMask::ALL))
        .collect();
    hw.settle(&device);
    assert!(hw.is_busy(0));

    tick_until(&device, 20, || counts(&device).abort == 1);
    hw.settle(&device);

    assert_eq!(wait_for(&session, ids[0]).tag, ResultTag::Aborted);
    assert_eq!(wait_for(&session, ids[1]).tag, ResultTag::Ok);
    assert_eq!(wait_for(&session, ids[2]).tag, ResultTag::Ok);
    assert_eq!(
        counts(&device),
        RecoveryCounts {
            abort: 1,
            reset: 0,
            escalated: 0,
        }
    );
    assert_eq!(device.watchdog_remaining(CORE), None);
}

#[test]
fn ignored_abort_falls_back_to_reset() {
    let cfg = config(1).watchdog_ticks_per_buffer(2).build();
    let (hw, device) = rig(cfg);
    let session = device.open_session().unwrap();
    hw.stall(0);
    hw.ignore_abort(0);

    let ids: Vec<_> = (0..3)
        .map(|_| submit(&session, &normal(), CoreMask::ALL))
        .collect();
    tick_until(&device, 20, || counts(&device).reset == 1);
    // The reset cycled the power domain and restored the configuration.
    assert_eq!(hw.power_ups(), 2);
    assert_eq!(hw.reg(0, mcq_hal::regs::REG_CONFIG), 1);

    hw.settle(&device);
    assert_eq!(wait_for(&session, ids[0]).tag, ResultTag::Aborted);
    assert_eq!(wait_for(&session, ids[1]).tag, ResultTag::Ok);
    assert_eq!(wait_for(&session, ids[2]).tag, ResultTag::Ok);
    assert_eq!(counts(&device).abort, 0);
    assert_eq!(counts(&device).escalated, 0);
}

#[test]
fn reset_keeps_buffers_that_finished_before_the_hang() {
    let cfg = config(1)
        .watchdog_ticks_per_buffer(2)
        .irq_coalesce_workload(100)
        .build();
    let (hw, device) = rig(cfg);
    let session = device.open_session().unwrap();
    let ids: Vec<_> = (0..3)
        .map(|_| submit(&session, &normal(), CoreMask::ALL))
        .collect();

    // The first buffer chains into the second without raising DONE.
    assert!(hw.step(0));
    hw.stall(0);
    hw.ignore_abort(0);
    tick_until(&device, 20, || counts(&device).reset == 1);
    hw.settle(&device);

    assert_eq!(wait_for(&session, ids[0]).tag, ResultTag::Ok);
    assert_eq!(wait_for(&session, ids[1]).tag, ResultTag::Aborted);
    assert_eq!(wait_for(&session, ids[2]).tag, ResultTag::Ok);
    let addr = |id| device.buffer_addr(id).unwrap();
    assert_eq!(hw.executed(0), vec![addr(ids[0]), addr(ids[2])]);
}

#[test]
fn cancel_through_reset_does_not_rerun_finished_work() {
    let cfg = config(1).irq_coalesce_workload(100).build();
    let (hw, device) = rig(cfg);
    let session = device.open_session().unwrap();
    let doomed = OwnerTag(3);
    let first = submit(&session, &normal(), CoreMask::ALL);
    let victim = submit(&session, &normal().owner(doomed), CoreMask::ALL);
    let last = submit(&session, &normal(), CoreMask::ALL);

    assert!(hw.step(0));
    hw.ignore_abort(0);
    assert_eq!(session.cancel_by_owner(doomed), Ok(1));
    assert_eq!(counts(&device).reset, 1);
    hw.settle(&device);

    assert_eq!(wait_for(&session, first).tag, ResultTag::Ok);
    assert_eq!(wait_for(&session, victim).tag, ResultTag::Aborted);
    assert_eq!(wait_for(&session, last).tag, ResultTag::Ok);
    let addr = |id| device.buffer_addr(id).unwrap();
    assert_eq!(hw.executed(0), vec![addr(first), addr(last)]);
}

#[test]
fn failed_reset_escalates_and_fails_the_queue() {
    let cfg = config(1).watchdog_ticks_per_buffer(2).build();
    let (hw, device) = rig(cfg);
    let session = device.open_session().unwrap();
    hw.stall(0);
    hw.ignore_abort(0);

    let ids: Vec<_> = (0..3)
        .map(|_| submit(&session, &normal(), CoreMask::ALL))
        .collect();
    hw.fail_power_acquire(1);
    tick_until(&device, 20, || counts(&device).escalated == 1);

    for id in &ids {
        assert_eq!(wait_for(&session, *id).tag, ResultTag::Aborted);
    }
    assert_eq!(hw.subsystem_resets(), 1);
    assert_eq!(device.queue_depth(CORE), 0);
    assert_eq!(device.core_state(CORE), Some(CoreState::PoweredOff));

    // The core takes work again once power comes back.
    let next = submit(&session, &normal(), CoreMask::ALL);
    hw.settle(&device);
    assert_eq!(wait_for(&session, next).tag, ResultTag::Ok);
}

#[test]
fn bus_error_fails_only_the_current_buffer() {
    let (hw, device) = rig(config(1).build());
    let session = device.open_session().unwrap();
    let bad = submit(&session, &normal(), CoreMask::ALL);
    let good = submit(&session, &normal(), CoreMask::ALL);
    hw.inject_bus_error(0);

    hw.settle(&device);
    assert_eq!(wait_for(&session, bad).tag, ResultTag::BusError);
    assert_eq!(wait_for(&session, good).tag, ResultTag::Ok);

    let snapshot = device.core_snapshot(CORE).unwrap();
    assert_eq!(
        snapshot[REG_CUR_ADDR] as u64,
        device.buffer_addr(bad).unwrap()
    );
}

#[test]
fn undecodable_command_is_a_command_error() {
    let (hw, device) = rig(config(1).build());
    let session = device.open_session().unwrap();
    let good = submit(&session, &normal(), CoreMask::ALL);
    let bad = submit_with(
        &session,
        &normal(),
        &[Instr::Nop, Instr::Raw([0x0000_00ee, 0])],
        CoreMask::ALL,
    );
    let after = submit(&session, &normal(), CoreMask::ALL);

    hw.settle(&device);
    assert_eq!(wait_for(&session, good).tag, ResultTag::Ok);
    assert_eq!(wait_for(&session, bad).tag, ResultTag::CommandError);
    assert_eq!(wait_for(&session, after).tag, ResultTag::Ok);
}

#[test]
fn hardware_timeout_retries_the_buffer() {
    let (hw, device) = rig(config(1).max_timeout_restarts(1).build());
    let session = device.open_session().unwrap();
    let id = submit(&session, &normal(), CoreMask::ALL);
    hw.inject_timeout(0);

    hw.settle(&device);
    assert_eq!(wait_for(&session, id).tag, ResultTag::Ok);
    assert_eq!(hw.executed(0), vec![device.buffer_addr(id).unwrap()]);
}

#[test]
fn repeated_timeouts_give_up() {
    let (hw, device) = rig(config(1).max_timeout_restarts(0).build());
    let session = device.open_session().unwrap();
    let id = submit(&session, &normal(), CoreMask::ALL);
    let next = submit(&session, &normal(), CoreMask::ALL);
    hw.inject_timeout(0);

    hw.settle(&device);
    assert_eq!(wait_for(&session, id).tag, ResultTag::Aborted);
    assert_eq!(wait_for(&session, next).tag, ResultTag::Ok);
}

#[test]
fn streaming_buffer_runs_when_fed() {
    let (hw, device) = rig(config(1).slice_timeout_ticks(3).build());
    let session = device.open_session().unwrap();
    let id = submit_with(
        &session,
        &normal().streaming(),
        &[Instr::WaitData, Instr::Nop],
        CoreMask::ALL,
    );

    hw.settle(&device);
    assert!(hw.is_waiting_data(0));
    device.tick();
    device.tick();

    session.feed(id).unwrap();
    // Feeding restarted the slice, so two more ticks are harmless.
    device.tick();
    device.tick();
    hw.settle(&device);
    assert_eq!(wait_for(&session, id).tag, ResultTag::Ok);
}

#[test]
fn starved_streaming_buffer_is_skipped() {
    let (hw, device) = rig(config(1).slice_timeout_ticks(3).build());
    let session = device.open_session().unwrap();
    let stream = submit_with(
        &session,
        &normal().streaming(),
        &[Instr::WaitData],
        CoreMask::ALL,
    );
    let next = submit(&session, &normal(), CoreMask::ALL);

    hw.settle(&device);
    tick_until(&device, 10, || device.queue_depth(CORE) == 1);
    hw.settle(&device);

    assert_eq!(wait_for(&session, stream).tag, ResultTag::SliceSuspended);
    assert_eq!(wait_for(&session, next).tag, ResultTag::Ok);
    assert_eq!(counts(&device), RecoveryCounts::default());
}

#[test]
fn unanswered_skip_aborts_the_slice() {
    let (hw, device) = rig(config(1).slice_timeout_ticks(3).build());
    let session = device.open_session().unwrap();
    hw.ignore_abort(0);
    let stream = submit_with(
        &session,
        &normal().streaming(),
        &[Instr::WaitData],
        CoreMask::ALL,
    );

    hw.settle(&device);
    tick_until(&device, 10, || device.queue_depth(CORE) == 0);
    assert_eq!(wait_for(&session, stream).tag, ResultTag::SliceAborted);
    assert_eq!(counts(&device).reset, 1);
}

#[test]
fn feed_is_only_for_queued_streaming_buffers() {
    let (_hw, device) = rig(config(1).build());
    let session = device.open_session().unwrap();
    let plain = submit(&session, &normal(), CoreMask::ALL);
    assert!(matches!(
        session.feed(plain),
        Err(mcq::CqError::BadCommand(_))
    ));

    let reserved = session.try_reserve(&normal().streaming()).unwrap();
    assert_eq!(
        session.feed(reserved),
        Err(mcq::CqError::NotSubmitted(reserved))
    );
}

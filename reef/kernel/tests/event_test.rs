//! Event waits: priority order, signals and timeouts.

mod common;

use common::*;
use reef_kernel::{KernelError, ThreadState, WaitOutcome};

#[test]
fn signal_wakes_the_best_waiter_first() {
    let (mut kernel, _) = booted();
    let event = kernel.evt_create("rx").unwrap();

    let low = spawn(&mut kernel, "low", 6);
    kernel.evt_wait(event, 0).unwrap();
    let high = spawn(&mut kernel, "high", 4);
    kernel.evt_wait(event, 0).unwrap();
    let peer = spawn(&mut kernel, "peer", 6);
    kernel.evt_wait(event, 0).unwrap();

    assert_eq!(kernel.evt_waiters(event), vec![high, low, peer]);
    assert_eq!(kernel.evt_high_thread(event), Some(high));
    assert_eq!(kernel.current(), kernel.system_threads().idle);

    assert_eq!(kernel.evt_signal(event), Ok(Some(high)));
    assert_eq!(kernel.current(), Some(high));
    assert_eq!(kernel.evt_wait_outcome(high), Some(WaitOutcome::Signaled));
    assert_eq!(kernel.evt_wait_outcome(low), None);
    assert_eq!(kernel.evt_waiters(event), vec![low, peer]);
}

#[test]
fn bounded_wait_times_out() {
    let (mut kernel, _) = booted();
    let event = kernel.evt_create("rx").unwrap();
    let waiter = spawn(&mut kernel, "waiter", 4);
    kernel.evt_wait(event, 50).unwrap();
    assert_eq!(state(&kernel, waiter), ThreadState::SUSPEND);

    tick(&mut kernel, 4);
    assert_eq!(kernel.evt_wait_outcome(waiter), None);
    assert_eq!(kernel.evt_waiters(event), vec![waiter]);

    tick(&mut kernel, 1);
    assert_eq!(kernel.evt_wait_outcome(waiter), Some(WaitOutcome::TimedOut));
    assert!(kernel.evt_queue_empty(event));
    assert_eq!(kernel.current(), Some(waiter));
    assert_eq!(kernel.evt_signal(event), Ok(None));
}

#[test]
fn signal_disarms_the_timeout() {
    let (mut kernel, _) = booted();
    let event = kernel.evt_create("rx").unwrap();
    let waiter = spawn(&mut kernel, "waiter", 4);
    kernel.evt_wait(event, 50).unwrap();

    tick(&mut kernel, 2);
    assert_eq!(kernel.evt_signal(event), Ok(Some(waiter)));
    tick(&mut kernel, 10);
    assert_eq!(kernel.evt_wait_outcome(waiter), Some(WaitOutcome::Signaled));
    assert_eq!(kernel.current(), Some(waiter));
}

#[test]
fn destroy_refuses_events_with_waiters() {
    let (mut kernel, _) = booted();
    let event = kernel.evt_create("rx").unwrap();
    spawn(&mut kernel, "waiter", 4);
    kernel.evt_wait(event, 0).unwrap();

    assert_eq!(kernel.evt_destroy(event), Err(KernelError::EventBusy(event)));
    kernel.evt_signal(event).unwrap();
    assert_eq!(kernel.evt_destroy(event), Ok(()));
    assert_eq!(kernel.evt_destroy(event), Err(KernelError::NoEvent(event)));
    assert_eq!(kernel.evt_signal(event), Err(KernelError::NoEvent(event)));
}

#[test]
fn waiting_needs_a_running_thread() {
    let (mut kernel, _) = kernel();
    let event = kernel.evt_create("rx").unwrap();
    assert_eq!(kernel.evt_wait(event, 0), Err(KernelError::NoCurrent));
}

#[test]
fn killing_a_middle_waiter_detaches_it_from_the_timeout_queue() {
    let (mut kernel, _) = booted();
    let event = kernel.evt_create("rx").unwrap();
    let first = spawn(&mut kernel, "first", 4);
    kernel.evt_wait(event, 100).unwrap();
    let middle = spawn(&mut kernel, "middle", 4);
    kernel.evt_wait(event, 200).unwrap();
    let last = spawn(&mut kernel, "last", 4);
    kernel.evt_wait(event, 300).unwrap();
    assert_eq!(kernel.timeout_deltas(), vec![10, 10, 10]);
    assert!(kernel.delay_deltas().is_empty());

    kernel.kill(middle).unwrap();
    assert_eq!(state(&kernel, middle), ThreadState::RELEASE);
    assert_eq!(kernel.evt_waiters(event), vec![first, last]);
    assert_eq!(kernel.timeout_deltas(), vec![10, 20]);
    assert!(kernel.delay_deltas().is_empty());

    tick(&mut kernel, 10);
    assert_eq!(kernel.evt_wait_outcome(first), Some(WaitOutcome::TimedOut));
    assert_eq!(kernel.evt_wait_outcome(last), None);
    tick(&mut kernel, 20);
    assert_eq!(kernel.evt_wait_outcome(last), Some(WaitOutcome::TimedOut));
    assert!(kernel.evt_queue_empty(event));
    assert!(kernel.timeout_deltas().is_empty());
}

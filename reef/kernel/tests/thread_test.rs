//! Thread creation, termination and daemon reclaim.

mod common;

use common::*;
use reef_core::Error;
use reef_kernel::{
    KernelConfig, KernelError, PolicyData, PolicyKind, PortEvent, PrioClass, ThreadConfig,
    ThreadState,
};

#[test]
fn boot_leaves_idle_and_daemon() {
    let (kernel, _) = booted();
    let names: Vec<_> = kernel.threads().iter().map(|info| info.name).collect();
    assert_eq!(names, vec!["idle", "daemon"]);

    let system = kernel.system_threads();
    let daemon = system.daemon.unwrap();
    assert_eq!(state(&kernel, daemon), ThreadState::SUSPEND);
    assert_eq!(kernel.thread_priority(daemon), Some(14));
    assert_eq!(kernel.thread_priority(system.idle.unwrap()), Some(16));
    assert!(kernel.reclaim_queue().is_empty());
}

#[test]
fn killing_a_delayed_thread_unlinks_its_timer() {
    let (mut kernel, _) = booted();
    let worker = spawn(&mut kernel, "worker", 4);
    kernel.delay_self(100).unwrap();
    assert_eq!(state(&kernel, worker), ThreadState::SUSPEND | ThreadState::DELAY);
    assert_eq!(kernel.delay_deltas(), vec![10]);

    kernel.kill(worker).unwrap();
    assert_eq!(state(&kernel, worker), ThreadState::RELEASE);
    assert!(kernel.delay_deltas().is_empty());

    assert_eq!(kernel.current(), kernel.system_threads().daemon);
    assert_eq!(run_daemon(&mut kernel), 1);
    assert_eq!(kernel.thread_state(worker), None);

    tick(&mut kernel, 20);
    assert_eq!(kernel.current(), kernel.system_threads().idle);
}

#[test]
fn killing_a_waiting_thread_leaves_the_event_queue() {
    let (mut kernel, _) = booted();
    let event = kernel.evt_create("rx").unwrap();
    let worker = spawn(&mut kernel, "worker", 4);
    kernel.evt_wait(event, 100).unwrap();
    assert_eq!(kernel.evt_waiters(event), vec![worker]);

    kernel.kill(worker).unwrap();
    assert!(kernel.evt_queue_empty(event));
    assert!(kernel.evt_destroy(event).is_ok());
}

#[test]
fn running_thread_is_reclaimed_only_after_the_switch() {
    let (mut kernel, _) = booted();
    let worker = spawn(&mut kernel, "worker", 4);

    let status = kernel.lock_sched();
    kernel.exit_self().unwrap();
    assert_eq!(state(&kernel, worker), ThreadState::EXIT);
    assert_eq!(kernel.current(), Some(worker));

    // Still on its own stack: the pass must put it back.
    assert_eq!(kernel.daemon_pass(), 0);
    assert_eq!(kernel.reclaim_queue(), vec![worker]);

    kernel.unlock_sched(status);
    assert_eq!(state(&kernel, worker), ThreadState::RELEASE);
    assert_eq!(kernel.current(), kernel.system_threads().daemon);
    assert_eq!(run_daemon(&mut kernel), 1);
    assert!(kernel.reclaim_queue().is_empty());
}

#[test]
fn reclaim_returns_stack_timer_and_tcb() {
    let (mut kernel, _) = booted();
    let free = kernel.heap().free_bytes();
    let threads = kernel.thread_pools().len();
    let timers = kernel.timer_pools().len();

    let worker = spawn(&mut kernel, "worker", 4);
    assert!(kernel.heap().free_bytes() < free);
    assert_eq!(kernel.thread_pools().len(), threads + 1);
    assert_eq!(kernel.timer_pools().len(), timers + 1);

    kernel.kill(worker).unwrap();
    run_daemon(&mut kernel);
    assert_eq!(kernel.heap().free_bytes(), free);
    assert_eq!(kernel.thread_pools().len(), threads);
    assert_eq!(kernel.timer_pools().len(), timers);
    assert_eq!(kernel.kill(worker), Err(KernelError::NoThread(worker)));
}

#[test]
fn caller_stack_is_used_and_never_freed() {
    let (mut kernel, port) = booted();
    let free = kernel.heap().free_bytes();
    let bottom = 0x3000_0000;

    let worker = kernel
        .create_thread(hard("worker", 4).with_stack(bottom, 2048))
        .unwrap();
    assert_eq!(kernel.heap().free_bytes(), free);
    let top = bottom + 2048 - 4;
    assert!(port
        .events()
        .iter()
        .any(|event| matches!(event, PortEvent::StackInit { top: t, .. } if *t == top)));

    kernel.kill(worker).unwrap();
    run_daemon(&mut kernel);
    assert_eq!(kernel.heap().free_bytes(), free);
}

#[test]
fn stack_size_is_aligned_and_raised_to_minimum() {
    let (mut kernel, _) = booted();
    let big = kernel
        .create_thread(hard("big", 6).with_stack_size(MIN_STACK + 7))
        .unwrap();
    let small = kernel
        .create_thread(hard("small", 6).with_stack_size(100))
        .unwrap();
    assert_eq!(kernel.thread_info(big).unwrap().stack_size, MIN_STACK + 4);
    assert_eq!(kernel.thread_info(small).unwrap().stack_size, MIN_STACK);
}

#[test]
fn missing_stack_memory_releases_everything() {
    let (mut kernel, _) = booted();
    let threads = kernel.thread_pools().len();
    let timers = kernel.timer_pools().len();

    let err = kernel
        .create_thread(hard("huge", 4).with_stack_size(1 << 30))
        .unwrap_err();
    assert_eq!(err, KernelError::NoStack("huge"));
    assert_eq!(kernel.thread_pools().len(), threads);
    assert_eq!(kernel.timer_pools().len(), timers);
    assert!(kernel.threads().iter().all(|info| info.name != "huge"));
    assert_eq!(kernel.current(), kernel.system_threads().idle);
}

#[test]
fn unregistered_policy_is_rejected() {
    let config = KernelConfig::builder()
        .max_threads(16)
        .min_stack_size(MIN_STACK)
        .period_policy(false)
        .build()
        .unwrap();
    let (mut kernel, _) = booted_with(config);
    assert_eq!(kernel.policies(), &[PolicyKind::Common]);
    let threads = kernel.thread_pools().len();
    let timers = kernel.timer_pools().len();

    let periodic = ThreadConfig::new("tick", body, PolicyData::period(4, PrioClass::Hard, 50));
    assert_eq!(
        kernel.create_thread(periodic),
        Err(KernelError::NoPolicy(PolicyKind::Period))
    );
    assert_eq!(kernel.thread_pools().len(), threads);
    assert_eq!(kernel.timer_pools().len(), timers);
}

#[test]
fn non_hard_priorities_are_shifted_into_their_band() {
    let (mut kernel, _) = booted();
    let soft = kernel
        .create_thread(ThreadConfig::new("soft", body, PolicyData::common(2, PrioClass::NonHard)))
        .unwrap();
    let lowest = kernel
        .create_thread(ThreadConfig::new("lowest", body, PolicyData::common(30, PrioClass::NonHard)))
        .unwrap();
    assert_eq!(kernel.thread_priority(soft), Some(5));
    assert_eq!(kernel.thread_priority(lowest), Some(15));

    let err = kernel.create_thread(hard("bad", 17)).unwrap_err();
    assert_eq!(err, KernelError::Core(Error::InvalidPriority(17)));
}

#[test]
fn change_priority_requeues_ready_threads() {
    let (mut kernel, _) = booted();
    let a = spawn(&mut kernel, "a", 6);
    let b = spawn(&mut kernel, "b", 8);
    assert_eq!(kernel.current(), Some(a));

    kernel.change_priority(b, 2).unwrap();
    assert_eq!(kernel.current(), Some(b));
    assert_eq!(kernel.ready_threads(2), vec![b]);
    assert!(kernel.ready_threads(8).is_empty());
    assert!(!kernel.ready_queue().is_ready(8));

    kernel.suspend(a).unwrap();
    kernel.change_priority(a, 1).unwrap();
    assert_eq!(kernel.thread_priority(a), Some(1));
    assert_eq!(kernel.current(), Some(b));

    kernel.change_priority_self(9).unwrap();
    assert_eq!(kernel.thread_priority(b), Some(9));
    assert_eq!(
        kernel.change_priority(a, 17),
        Err(KernelError::Core(Error::InvalidPriority(17)))
    );
}

#[test]
fn operations_without_a_running_thread_fail() {
    let (mut kernel, _) = kernel();
    assert_eq!(kernel.exit_self(), Err(KernelError::NoCurrent));
    assert_eq!(kernel.delay_self(10), Err(KernelError::NoCurrent));
    assert_eq!(kernel.suspend_self(), Err(KernelError::NoCurrent));
}

#[test]
fn kill_is_idempotent_until_reclaim() {
    let (mut kernel, _) = booted();
    let worker = spawn(&mut kernel, "worker", 4);
    kernel.kill(worker).unwrap();
    kernel.kill(worker).unwrap();
    assert_eq!(kernel.reclaim_queue(), vec![worker]);
}

#[test]
fn raw_ids_resolve_only_for_live_threads() {
    let (mut kernel, _) = booted();
    let worker = spawn(&mut kernel, "worker", 4);
    assert_eq!(kernel.thread_by_id(worker.raw()), Some(worker));
    kernel.kill(worker).unwrap();
    run_daemon(&mut kernel);
    assert_eq!(kernel.thread_by_id(worker.raw()), None);
}

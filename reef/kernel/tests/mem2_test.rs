//! Threads sharing the secondary allocator through its mutex.

mod common;

use common::*;
use reef_kernel::{KernelError, PolicyData, PrioClass, ThreadConfig, ThreadState};
use reef_mem::MemError;

fn periodic(prio: u8) -> ThreadConfig {
    ThreadConfig::new("sampler", body, PolicyData::period(prio, PrioClass::Hard, 50))
}

#[test]
fn contender_waits_for_the_owner_and_retries() {
    let (mut kernel, _) = booted();
    let owner = spawn(&mut kernel, "owner", 4);
    kernel.mem2_lock().unwrap();
    let held = kernel.mem2_malloc(64).unwrap();
    assert_eq!(kernel.mem2_owner(), Some(owner));

    let user = spawn(&mut kernel, "user", 2);
    assert_eq!(kernel.current(), Some(user));
    assert_eq!(kernel.mem2_malloc(64), Err(KernelError::Mem(MemError::Busy)));
    assert_eq!(state(&kernel, user), ThreadState::SUSPEND);
    assert_eq!(kernel.current(), Some(owner));

    // Nested use by the owner does not give the mutex away.
    kernel.mem2_lock().unwrap();
    kernel.mem2_free(held).unwrap();
    assert_eq!(kernel.mem2_owner(), Some(owner));
    assert_eq!(state(&kernel, user), ThreadState::SUSPEND);

    kernel.mem2_unlock().unwrap();
    assert_eq!(kernel.mem2_owner(), None);
    assert_eq!(kernel.current(), Some(user));

    let free = kernel.mem2().free_bytes();
    let addr = kernel.mem2_malloc(64).unwrap();
    assert!(kernel.mem2().free_bytes() < free);
    assert_eq!(kernel.mem2_owner(), None);
    kernel.mem2_free(addr).unwrap();
    assert_eq!(kernel.mem2().free_bytes(), free);
}

#[test]
fn periodic_creation_waits_for_the_allocator() {
    let (mut kernel, _) = booted();
    let owner = spawn(&mut kernel, "owner", 4);
    kernel.mem2_lock().unwrap();
    let user = spawn(&mut kernel, "user", 2);
    let threads = kernel.thread_pools().len();

    assert_eq!(
        kernel.create_thread(periodic(6)),
        Err(KernelError::Mem(MemError::Busy))
    );
    assert_eq!(kernel.thread_pools().len(), threads);
    assert_eq!(kernel.current(), Some(owner));

    kernel.mem2_unlock().unwrap();
    assert_eq!(kernel.current(), Some(user));
    let sampler = kernel.create_thread(periodic(6)).unwrap();
    assert_eq!(state(&kernel, sampler), ThreadState::READY);
    assert_eq!(kernel.period_deltas(), vec![5]);
}

#[test]
fn killing_the_owner_hands_the_allocator_on() {
    let (mut kernel, _) = booted();
    let owner = spawn(&mut kernel, "owner", 4);
    kernel.mem2_lock().unwrap();
    let user = spawn(&mut kernel, "user", 2);
    assert!(kernel.mem2_lock().is_err());
    assert_eq!(kernel.current(), Some(owner));

    kernel.exit_self().unwrap();
    assert_eq!(kernel.mem2_owner(), None);
    assert_eq!(kernel.current(), Some(user));
    kernel.mem2_lock().unwrap();
    assert_eq!(kernel.mem2_owner(), Some(user));
}

#[test]
fn period_data_of_a_killed_thread_is_freed_on_unlock() {
    let (mut kernel, _) = booted();
    let free = kernel.mem2().free_bytes();
    spawn(&mut kernel, "owner", 4);
    kernel.mem2_lock().unwrap();

    let sampler = kernel.create_thread(periodic(6)).unwrap();
    let in_use = kernel.mem2().free_bytes();
    assert!(in_use < free);

    kernel.kill(sampler).unwrap();
    assert_eq!(kernel.mem2().free_bytes(), in_use);
    kernel.mem2_unlock().unwrap();
    assert_eq!(kernel.mem2().free_bytes(), free);
}

#[test]
fn interrupt_context_does_not_wait() {
    let (mut kernel, port) = booted();
    let owner = spawn(&mut kernel, "owner", 4);
    kernel.mem2_lock().unwrap();
    let user = spawn(&mut kernel, "user", 2);

    port.set_intr_nesting(1);
    assert_eq!(kernel.mem2_malloc(8), Err(KernelError::Mem(MemError::Busy)));
    port.set_intr_nesting(0);
    assert_eq!(kernel.mem2_owner(), Some(owner));
    assert_eq!(kernel.current(), Some(user));
    assert!(state(&kernel, user).contains(ThreadState::READY));
}

#[test]
fn lock_and_unlock_are_checked() {
    let (mut kernel, _) = kernel();
    assert_eq!(kernel.mem2_lock(), Err(KernelError::NoCurrent));
    let addr = kernel.mem2_malloc(8).unwrap();
    assert_eq!(kernel.mem2_owner(), None);
    kernel.mem2_free(addr).unwrap();

    let (mut kernel, _) = booted();
    spawn(&mut kernel, "owner", 4);
    kernel.mem2_lock().unwrap();
    let user = spawn(&mut kernel, "user", 2);
    assert_eq!(kernel.mem2_unlock(), Err(KernelError::NotOwner(user)));
}

//! Kernel fixtures shared by the integration tests.

#![allow(dead_code)]

use core::ops::Range;

use reef_kernel::{
    HostPort, Kernel, KernelConfig, PolicyData, PrioClass, ThreadConfig, ThreadId, ThreadState,
};

pub const HEAP: Range<usize> = 0x2000_0000..0x2004_0000;
pub const MIN_STACK: usize = 1024;

pub fn config() -> KernelConfig {
    KernelConfig::builder()
        .name("test")
        .max_threads(16)
        .min_stack_size(MIN_STACK)
        .mem2_size(4096)
        .build()
        .unwrap()
}

pub fn body(_: usize) {}

fn user_main() {}

/// Kernel over [`HEAP`] with a recording port, not yet booted.
pub fn kernel_with(config: KernelConfig) -> (Kernel, HostPort) {
    let port = HostPort::new();
    let kernel = Kernel::new(config, Box::new(port.clone()), HEAP).unwrap();
    (kernel, port)
}

pub fn kernel() -> (Kernel, HostPort) {
    kernel_with(config())
}

/// Boots, lets the init thread finish and the daemon park, leaving the
/// idle thread on the CPU.
pub fn booted_with(config: KernelConfig) -> (Kernel, HostPort) {
    let (mut kernel, port) = kernel_with(config);
    kernel.boot(user_main).unwrap();
    kernel.start_ticks().unwrap();
    kernel.exit_self().unwrap();
    run_daemon(&mut kernel);
    let idle = kernel.system_threads().idle;
    assert_eq!(kernel.current(), idle);
    port.clear();
    (kernel, port)
}

pub fn booted() -> (Kernel, HostPort) {
    booted_with(config())
}

/// Runs one daemon wake as if the daemon thread were on the CPU.
pub fn run_daemon(kernel: &mut Kernel) -> usize {
    let daemon = kernel.system_threads().daemon;
    assert_eq!(kernel.current(), daemon, "daemon is not running");
    let reclaimed = kernel.daemon_pass();
    kernel.suspend_self().unwrap();
    reclaimed
}

pub fn hard(name: &'static str, prio: u8) -> ThreadConfig {
    ThreadConfig::new(name, body, PolicyData::common(prio, PrioClass::Hard))
}

pub fn spawn(kernel: &mut Kernel, name: &'static str, prio: u8) -> ThreadId {
    kernel.create_thread(hard(name, prio)).unwrap()
}

pub fn state(kernel: &Kernel, thread: ThreadId) -> ThreadState {
    kernel.thread_state(thread).unwrap()
}

/// Ticks `n` times, each followed by the interrupt exit path.
pub fn tick(kernel: &mut Kernel, n: u32) {
    for _ in 0..n {
        kernel.ticks_entry();
        let sp = saved_sp(kernel);
        kernel.intr_exit(sp);
    }
}

/// Stack pointer recorded for the running thread.
pub fn saved_sp(kernel: &Kernel) -> usize {
    kernel
        .current()
        .and_then(|thread| kernel.thread_pools().get_by_id(thread.resource()))
        .map_or(0, |tcb| tcb.sp())
}

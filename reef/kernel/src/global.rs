//! The installed kernel instance.
//!
//! Thread bodies, exit trampolines and interrupt handlers are plain
//! functions, so they reach the kernel through one global cell guarded by
//! the critical section. A kernel call runs entirely inside the critical
//! section.

use core::cell::RefCell;

use critical_section::Mutex;

use reef_mem::MemError;

use crate::error::KernelError;
use crate::id::ThreadId;
use crate::kernel::Kernel;
use crate::thread::ThreadConfig;

static KERNEL: Mutex<RefCell<Option<Kernel>>> = Mutex::new(RefCell::new(None));

/// Puts `kernel` in the global cell, returning the one it replaces.
pub fn install(kernel: Kernel) -> Result<Option<Kernel>, KernelError> {
    critical_section::with(|cs| {
        let mut slot = KERNEL
            .borrow(cs)
            .try_borrow_mut()
            .map_err(|_| KernelError::Reentrant)?;
        Ok(slot.replace(kernel))
    })
}

/// Removes the installed kernel.
pub fn take() -> Result<Option<Kernel>, KernelError> {
    critical_section::with(|cs| {
        let mut slot = KERNEL
            .borrow(cs)
            .try_borrow_mut()
            .map_err(|_| KernelError::Reentrant)?;
        Ok(slot.take())
    })
}

/// Runs `f` on the installed kernel.
pub fn with<R>(f: impl FnOnce(&mut Kernel) -> R) -> Result<R, KernelError> {
    critical_section::with(|cs| {
        let mut slot = KERNEL
            .borrow(cs)
            .try_borrow_mut()
            .map_err(|_| KernelError::Reentrant)?;
        let kernel = slot.as_mut().ok_or(KernelError::NotBooted)?;
        Ok(f(kernel))
    })
}

/// Installs `kernel` and boots it.
pub fn start(kernel: Kernel, user_main: fn()) -> Result<(), KernelError> {
    install(kernel)?;
    with(|kernel| kernel.boot(user_main))?
}

/// Runs `op` until it stops reporting a busy secondary allocator.
///
/// A busy call has already queued the caller on the allocator mutex, so
/// the retry happens once the owner lets go and the thread runs again.
fn retry_busy<R>(
    mut op: impl FnMut(&mut Kernel) -> Result<R, KernelError>,
) -> Result<R, KernelError> {
    loop {
        match with(&mut op)? {
            Err(KernelError::Mem(MemError::Busy)) => continue,
            result => return result,
        }
    }
}

/// Allocates from the secondary allocator, waiting out its owner.
pub fn mem2_malloc(size: usize) -> Result<usize, KernelError> {
    retry_busy(|kernel| kernel.mem2_malloc(size))
}

/// Frees a secondary-allocator block, waiting out its owner.
pub fn mem2_free(addr: usize) -> Result<(), KernelError> {
    retry_busy(|kernel| kernel.mem2_free(addr))
}

/// Creates a thread; periodic threads may wait for the secondary allocator.
pub fn create_thread(config: ThreadConfig) -> Result<ThreadId, KernelError> {
    retry_busy(|kernel| kernel.create_thread(config))
}

/// Cooperative reschedule point.
pub fn schedule() {
    if let Err(err) = with(Kernel::schedule) {
        log::error!("schedule: {}", err);
    }
}

/// Tick interrupt handler registered with the port.
pub fn tick_isr() {
    if let Err(err) = with(Kernel::ticks_entry) {
        log::error!("tick: {}", err);
    }
}

/// Interrupt exit hook for ports: returns the stack pointer to restore.
pub fn intr_exit(old_sp: usize) -> usize {
    with(|kernel| kernel.intr_exit(old_sp)).unwrap_or(old_sp)
}

pub(crate) fn idle_entry(_: usize) {
    loop {
        core::hint::spin_loop();
    }
}

pub(crate) fn init_entry(_: usize) {
    let started = with(|kernel| kernel.start_ticks().map(|()| kernel.user_main()));
    match started {
        Ok(Ok(Some(user_main))) => user_main(),
        Ok(Ok(None)) => {}
        Ok(Err(err)) | Err(err) => log::error!("init: {}", err),
    }
}

pub(crate) fn daemon_entry(_: usize) {
    loop {
        let pass = with(|kernel| {
            let reclaimed = kernel.daemon_pass();
            kernel.suspend_self().map(|()| reclaimed)
        });
        match pass {
            Ok(Ok(reclaimed)) => log::trace!("daemon: {} reclaimed", reclaimed),
            Ok(Err(err)) | Err(err) => {
                log::error!("daemon: {}", err);
                core::hint::spin_loop();
            }
        }
    }
}

/// Exit path of common threads: the body returned.
pub fn comm_thread_exit() {
    if let Err(err) = with(Kernel::exit_self).and_then(|result| result) {
        log::error!("thread exit: {}", err);
    }
}

/// Exit path of periodic threads: parks until the next period.
pub fn period_thread_exit() {
    if let Err(err) = with(Kernel::suspend_self).and_then(|result| result) {
        log::error!("period exit: {}", err);
    }
}

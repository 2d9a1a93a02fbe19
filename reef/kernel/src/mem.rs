//! Thread access to the secondary allocator.
//!
//! The arena is guarded by a kernel mutex owned by a thread. Each arena
//! operation is atomic under the critical section; the mutex orders threads
//! that hold the allocator across several calls. A thread that finds the
//! mutex held by another is queued on it and suspended. Its call fails with
//! [`MemError::Busy`] and is retried once the thread runs again, which
//! [`global::mem2_malloc`](crate::global::mem2_malloc) and friends do.

use reef_mem::MemError;

use crate::error::KernelError;
use crate::id::{EventId, ThreadId};
use crate::kernel::Kernel;

impl Kernel {
    /// Takes the secondary allocator for the running thread.
    ///
    /// Nests for the owner. Another thread is suspended on the mutex and
    /// gets [`MemError::Busy`].
    pub fn mem2_lock(&mut self) -> Result<(), KernelError> {
        self.current.ok_or(KernelError::NoCurrent)?;
        self.mem2_enter().map(|_| ())
    }

    /// Gives the secondary allocator back and wakes the best waiter.
    pub fn mem2_unlock(&mut self) -> Result<(), KernelError> {
        let thread = self.current.ok_or(KernelError::NoCurrent)?;
        if self.mem2_owner != Some(thread) {
            return Err(KernelError::NotOwner(thread));
        }
        self.mem2_release();
        self.schedule();
        Ok(())
    }

    /// Thread holding the secondary allocator.
    pub fn mem2_owner(&self) -> Option<ThreadId> {
        self.mem2_owner
    }

    /// Allocates from the secondary allocator under its mutex.
    pub fn mem2_malloc(&mut self, size: usize) -> Result<usize, KernelError> {
        let result = self.mem2_alloc(size);
        self.schedule();
        result
    }

    /// Frees a secondary-allocator block under its mutex.
    pub fn mem2_free(&mut self, addr: usize) -> Result<(), KernelError> {
        let took = self.mem2_enter()?;
        let result = self.mem2.free(addr).map_err(KernelError::from);
        self.mem2_exit(took);
        self.schedule();
        result
    }

    /// [`Kernel::mem2_malloc`] without the reschedule, for kernel paths
    /// that finish their own work first.
    pub(crate) fn mem2_alloc(&mut self, size: usize) -> Result<usize, KernelError> {
        let took = self.mem2_enter()?;
        let result = self.mem2.malloc(size).map_err(KernelError::from);
        self.mem2_exit(took);
        result
    }

    /// Frees a block on behalf of the kernel, from a path that cannot
    /// block. While a thread holds the mutex the free waits for its unlock.
    pub(crate) fn mem2_free_deferred(&mut self, addr: usize) {
        if self.mem2_owner.is_some() {
            self.mem2_deferred.push(addr);
            return;
        }
        if let Err(err) = self.mem2.free(addr) {
            log::error!("mem2: free of {:#x} failed: {}", addr, err);
        }
    }

    /// Claims the mutex for the caller; `true` when this call took it.
    ///
    /// Without a running thread, or in interrupt context, nobody can be
    /// suspended, so a held mutex is reported as busy straight away.
    fn mem2_enter(&mut self) -> Result<bool, KernelError> {
        let owner = match self.mem2_owner {
            None => {
                self.mem2_owner = self.current;
                return Ok(self.current.is_some());
            }
            Some(owner) => owner,
        };
        let Some(thread) = self.current else {
            return Err(MemError::Busy.into());
        };
        if owner == thread {
            return Ok(false);
        }
        if self.port.intr_nesting() > 0 {
            return Err(MemError::Busy.into());
        }
        let waiters = self.mem2_waiters()?;
        log::trace!("mem2: thread {} waits for {}", thread, owner);
        self.evt_wait(waiters, 0)?;
        Err(MemError::Busy.into())
    }

    fn mem2_exit(&mut self, took: bool) {
        if took {
            self.mem2_release();
        }
    }

    /// Drops ownership, runs the frees that waited for it and readies the
    /// best waiter. Does not reschedule.
    pub(crate) fn mem2_release(&mut self) {
        self.mem2_owner = None;
        for addr in core::mem::take(&mut self.mem2_deferred) {
            if let Err(err) = self.mem2.free(addr) {
                log::error!("mem2: deferred free of {:#x} failed: {}", addr, err);
            }
        }
        if let Some(waiters) = self.mem2_waiters {
            self.evt_wake(waiters);
        }
    }

    fn mem2_waiters(&mut self) -> Result<EventId, KernelError> {
        if let Some(waiters) = self.mem2_waiters {
            return Ok(waiters);
        }
        let waiters = self.evt_create("mem2")?;
        self.mem2_waiters = Some(waiters);
        Ok(waiters)
    }
}

//! Thread lifecycle.
//!
//! A thread is a [`Tcb`] resource. Creation claims the TCB and a timer,
//! then hands the thread to its scheduling policy, which lays out the stack
//! and readies it. Termination is two-phase: a thread that dies while on the
//! CPU is marked EXIT and only becomes RELEASE once the scheduler has
//! switched away from its stack. The daemon thread frees RELEASE threads.

use alloc::vec::Vec;

use reef_core::{Hook, Links, ResourceKind};
use reef_mem::{Resource, ResourcePools};

use crate::error::KernelError;
use crate::event::WaitOutcome;
use crate::id::{EventId, ThreadId, TimerId};
use crate::kernel::Kernel;
use crate::policy::{PolicyData, PolicyKind};
use crate::port::ThreadEntry;
use crate::sched::ThreadState;
use crate::timer::Timer;
use crate::trace::{self, records};

/// Thread control block.
#[derive(Debug)]
pub struct Tcb {
    pub(crate) name: &'static str,
    pub(crate) id: ThreadId,
    pub(crate) state: ThreadState,
    pub(crate) prio: u8,
    pub(crate) policy: PolicyKind,
    pub(crate) entry: ThreadEntry,
    pub(crate) args: usize,
    pub(crate) exit: Option<fn()>,
    pub(crate) stack_bottom: Option<usize>,
    pub(crate) stack_size: usize,
    pub(crate) stack_owned: bool,
    pub(crate) sp: usize,
    ready_hook: Hook<ThreadId>,
    pub(crate) wait_hook: Hook<ThreadId>,
    reclaim_hook: Hook<ThreadId>,
    global_hook: Hook<ThreadId>,
    pub(crate) timer: Option<TimerId>,
    pub(crate) period_timer: Option<TimerId>,
    pub(crate) event: Option<EventId>,
    pub(crate) outcome: Option<WaitOutcome>,
    pub(crate) policy_data: Option<usize>,
}

impl Tcb {
    fn new(id: ThreadId, config: &ThreadConfig, stack_size: usize) -> Self {
        Self {
            name: config.name,
            id,
            state: ThreadState::SUSPEND,
            prio: 0,
            policy: config.policy.kind(),
            entry: config.entry,
            args: config.args,
            exit: None,
            stack_bottom: config.stack,
            stack_size,
            stack_owned: false,
            sp: 0,
            ready_hook: Hook::new(),
            wait_hook: Hook::new(),
            reclaim_hook: Hook::new(),
            global_hook: Hook::new(),
            timer: None,
            period_timer: None,
            event: None,
            outcome: None,
            policy_data: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn prio(&self) -> u8 {
        self.prio
    }

    pub fn policy(&self) -> PolicyKind {
        self.policy
    }

    /// Saved stack pointer.
    pub fn sp(&self) -> usize {
        self.sp
    }

    /// Highest usable stack address, once the stack is set up.
    pub(crate) fn stack_top(&self) -> Option<usize> {
        self.stack_bottom
            .map(|bottom| bottom + self.stack_size.saturating_sub(4))
    }
}

impl Resource for Tcb {
    const KIND: ResourceKind = ResourceKind::Thread;
}

macro_rules! tcb_links {
    ($name:ident, $hook:ident) => {
        pub(crate) struct $name<P>(pub(crate) P);

        impl Links<ThreadId> for $name<&ResourcePools<Tcb>> {
            fn hook(&self, key: ThreadId) -> Option<&Hook<ThreadId>> {
                self.0.get_by_id(key.0).map(|tcb| &tcb.$hook)
            }

            fn hook_mut(&mut self, _key: ThreadId) -> Option<&mut Hook<ThreadId>> {
                None
            }
        }

        impl Links<ThreadId> for $name<&mut ResourcePools<Tcb>> {
            fn hook(&self, key: ThreadId) -> Option<&Hook<ThreadId>> {
                self.0.get_by_id(key.0).map(|tcb| &tcb.$hook)
            }

            fn hook_mut(&mut self, key: ThreadId) -> Option<&mut Hook<ThreadId>> {
                self.0.get_by_id_mut(key.0).map(|tcb| &mut tcb.$hook)
            }
        }
    };
}

tcb_links!(ReadyLinks, ready_hook);
tcb_links!(WaitLinks, wait_hook);
tcb_links!(ReclaimLinks, reclaim_hook);
tcb_links!(GlobalLinks, global_hook);

/// Parameters of a new thread.
#[derive(Debug, Clone, Copy)]
pub struct ThreadConfig {
    pub name: &'static str,
    pub entry: ThreadEntry,
    pub args: usize,
    /// Requested stack size; raised to the configured minimum when the
    /// kernel allocates the stack.
    pub stack_size: usize,
    /// Bottom of a caller-provided stack of `stack_size` bytes.
    pub stack: Option<usize>,
    pub policy: PolicyData,
}

impl ThreadConfig {
    pub fn new(name: &'static str, entry: ThreadEntry, policy: PolicyData) -> Self {
        Self {
            name,
            entry,
            args: 0,
            stack_size: 0,
            stack: None,
            policy,
        }
    }

    pub fn with_args(mut self, args: usize) -> Self {
        self.args = args;
        self
    }

    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    /// Runs the thread on caller memory; the kernel never frees it.
    pub fn with_stack(mut self, bottom: usize, size: usize) -> Self {
        self.stack = Some(bottom);
        self.stack_size = size;
        self
    }
}

/// Snapshot of a thread for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: &'static str,
    pub state: ThreadState,
    pub prio: u8,
    pub policy: PolicyKind,
    pub stack_size: usize,
}

impl Kernel {
    pub(crate) fn tcb(&self, thread: ThreadId) -> Result<&Tcb, KernelError> {
        self.threads
            .get_by_id(thread.0)
            .ok_or(KernelError::NoThread(thread))
    }

    pub(crate) fn tcb_mut(&mut self, thread: ThreadId) -> Result<&mut Tcb, KernelError> {
        self.threads
            .get_by_id_mut(thread.0)
            .ok_or(KernelError::NoThread(thread))
    }

    /// Creates a thread and hands it to its scheduling policy.
    ///
    /// On failure everything claimed so far is given back.
    pub fn create_thread(&mut self, config: ThreadConfig) -> Result<ThreadId, KernelError> {
        let stack_size = config.stack_size & !(self.config.stack_align - 1);
        let thread = ThreadId(self.threads.get(&mut self.table, &mut self.heap, |id| {
            Tcb::new(ThreadId(id), &config, stack_size)
        })?);

        let timer = match self
            .timers
            .get(&mut self.table, &mut self.heap, |_| Timer::new(thread))
        {
            Ok(timer) => TimerId(timer),
            Err(err) => {
                log::warn!("thread {}: no timer: {}", config.name, err);
                let _ = self.threads.release(thread.0);
                return Err(err.into());
            }
        };
        if let Some(tcb) = self.threads.get_by_id_mut(thread.0) {
            tcb.timer = Some(timer);
        }

        let kind = config.policy.kind();
        if !self.policies.contains(&kind) {
            log::warn!("thread {}: policy {:?} is not registered", config.name, kind);
            self.discard_thread(thread);
            return Err(KernelError::NoPolicy(kind));
        }

        critical_section::with(|_| {
            self.all_threads
                .push_back(&mut GlobalLinks(&mut self.threads), thread);
        });

        if let Err(err) = kind.thread_init(self, thread, &config.policy) {
            log::warn!("thread {}: {:?} init failed: {}", config.name, kind, err);
            self.discard_thread(thread);
            return Err(err);
        }
        log::info!(
            "thread {} created as {} at prio {}",
            config.name,
            thread,
            self.thread_priority(thread).unwrap_or_default()
        );
        Ok(thread)
    }

    /// Sets up the stack of `thread` so that it starts in its entry and
    /// calls `exit` when the entry returns.
    pub(crate) fn system_thread_init(&mut self, thread: ThreadId, exit: fn()) -> Result<(), KernelError> {
        let min_stack = self.config.min_stack_size;
        let tcb = self.threads
            .get_by_id_mut(thread.0)
            .ok_or(KernelError::NoThread(thread))?;
        if tcb.stack_bottom.is_none() {
            let size = tcb.stack_size.max(min_stack);
            let bottom = self.heap.malloc(size).map_err(|err| {
                log::warn!("thread {}: no stack of {} bytes: {}", tcb.name, size, err);
                KernelError::NoStack(tcb.name)
            })?;
            tcb.stack_bottom = Some(bottom);
            tcb.stack_size = size;
            tcb.stack_owned = true;
        }
        tcb.exit = Some(exit);
        let top = tcb.stack_top().ok_or(KernelError::NoStack(tcb.name))?;
        let (entry, args) = (tcb.entry, tcb.args);
        tcb.sp = self.port.stack_init(top, entry, exit, args);
        Ok(())
    }

    /// Lays the initial frame of `thread` out again, restarting its entry on
    /// the next switch to it.
    pub(crate) fn reinit_stack(&mut self, thread: ThreadId) {
        let Some(tcb) = self.threads.get_by_id_mut(thread.0) else {
            return;
        };
        if let (Some(top), Some(exit)) = (tcb.stack_top(), tcb.exit) {
            tcb.sp = self.port.stack_init(top, tcb.entry, exit, tcb.args);
        }
    }

    /// Suspends a ready thread; no-op in any other state.
    pub fn suspend(&mut self, thread: ThreadId) -> Result<(), KernelError> {
        if !self.tcb(thread)?.state.contains(ThreadState::READY) {
            return Ok(());
        }
        self.unready_thread(thread);
        self.schedule();
        Ok(())
    }

    /// Readies a suspended thread; no-op in any other state.
    pub fn resume(&mut self, thread: ThreadId) -> Result<(), KernelError> {
        if !self.tcb(thread)?.state.contains(ThreadState::SUSPEND) {
            return Ok(());
        }
        self.ready_thread(thread);
        self.schedule();
        Ok(())
    }

    pub fn suspend_self(&mut self) -> Result<(), KernelError> {
        let thread = self.current.ok_or(KernelError::NoCurrent)?;
        self.suspend(thread)
    }

    /// Terminates `thread`.
    ///
    /// The thread is detached from every queue it waits on and handed to
    /// the daemon. A thread still on the CPU stays EXIT until the scheduler
    /// has left its stack.
    pub fn kill(&mut self, thread: ThreadId) -> Result<(), KernelError> {
        let tcb = self.tcb(thread)?;
        if tcb.state.is_terminated() {
            return Ok(());
        }
        let (name, kind) = (tcb.name, tcb.policy);

        critical_section::with(|_| {
            self.detach_waits(thread);
            if self.state_of(thread).contains(ThreadState::READY) {
                self.rdyqueue_del(thread);
            }
            kind.release(self, thread);

            let running = self.current == Some(thread);
            if let Some(tcb) = self.threads.get_by_id_mut(thread.0) {
                tcb.state = if running {
                    ThreadState::EXIT
                } else {
                    ThreadState::RELEASE
                };
            }
            if self.mem2_owner == Some(thread) {
                self.mem2_release();
            }
            self.reclaim
                .push_back(&mut ReclaimLinks(&mut self.threads), thread);
            trace::emit(&self.trace, records::THREAD_EXIT, &thread.raw().to_le_bytes());

            if let Some(daemon) = self.system.daemon {
                if daemon != thread && self.state_of(daemon).contains(ThreadState::SUSPEND) {
                    self.rdyqueue_add(daemon);
                }
            }
        });
        log::debug!("thread {} ({}) killed", name, thread);
        self.schedule();
        Ok(())
    }

    /// Terminates the running thread.
    pub fn exit_self(&mut self) -> Result<(), KernelError> {
        let thread = self.current.ok_or(KernelError::NoCurrent)?;
        self.kill(thread)
    }

    /// Blocks the running thread for `ms` milliseconds.
    ///
    /// No-op if its timer is already armed.
    pub fn delay_self(&mut self, ms: u32) -> Result<(), KernelError> {
        let thread = self.current.ok_or(KernelError::NoCurrent)?;
        let timer = self.tcb(thread)?.timer.ok_or(KernelError::NoThread(thread))?;
        let ticks = self.time_to_ticks(ms);

        critical_section::with(|_| {
            if !self.delay_queue.insert(&mut self.timers, timer, ticks) {
                return;
            }
            if let Some(tcb) = self.threads.get_by_id_mut(thread.0) {
                tcb.state.insert(ThreadState::DELAY);
            }
            if self.state_of(thread).contains(ThreadState::READY) {
                self.rdyqueue_del(thread);
            }
        });
        self.schedule();
        Ok(())
    }

    /// Moves `thread` to priority `prio`, requeueing it if it is ready.
    pub fn change_priority(&mut self, thread: ThreadId, prio: u8) -> Result<(), KernelError> {
        if prio > self.prio.idle() {
            return Err(reef_core::Error::InvalidPriority(prio).into());
        }
        self.tcb(thread)?;
        critical_section::with(|_| {
            let ready = self.state_of(thread).contains(ThreadState::READY);
            if ready {
                self.rdyqueue_del(thread);
            }
            if let Some(tcb) = self.threads.get_by_id_mut(thread.0) {
                tcb.prio = prio;
            }
            if ready {
                self.rdyqueue_add(thread);
            }
        });
        self.schedule();
        Ok(())
    }

    pub fn change_priority_self(&mut self, prio: u8) -> Result<(), KernelError> {
        let thread = self.current.ok_or(KernelError::NoCurrent)?;
        self.change_priority(thread, prio)
    }

    /// One daemon wake: reclaims every RELEASE thread on the reclaim queue
    /// and requeues the rest. Returns the number reclaimed.
    pub fn daemon_pass(&mut self) -> usize {
        critical_section::with(|_| {
            let mut reclaimed = 0;
            for _ in 0..self.reclaim.len() {
                let Some(thread) = self
                    .reclaim
                    .pop_front(&mut ReclaimLinks(&mut self.threads))
                else {
                    break;
                };
                if self.state_of(thread).contains(ThreadState::RELEASE) {
                    self.reclaim_thread(thread);
                    reclaimed += 1;
                } else {
                    self.reclaim
                        .push_back(&mut ReclaimLinks(&mut self.threads), thread);
                }
            }
            reclaimed
        })
    }

    /// Frees the stack, timers and TCB of a detached thread.
    fn reclaim_thread(&mut self, thread: ThreadId) {
        self.all_threads
            .remove(&mut GlobalLinks(&mut self.threads), thread);
        let Ok(tcb) = self.threads.release(thread.0) else {
            return;
        };
        if tcb.stack_owned {
            if let Some(bottom) = tcb.stack_bottom {
                if let Err(err) = self.heap.free(bottom) {
                    log::error!("thread {}: stack free failed: {}", tcb.name, err);
                }
            }
        }
        for timer in [tcb.timer, tcb.period_timer].into_iter().flatten() {
            if let Err(err) = self.timers.release(timer.0) {
                log::error!("thread {}: timer release failed: {}", tcb.name, err);
            }
        }
        trace::emit(&self.trace, records::THREAD_RECLAIM, &thread.raw().to_le_bytes());
        log::debug!("thread {} ({}) reclaimed", tcb.name, thread);
    }

    /// Undoes a partial creation.
    fn discard_thread(&mut self, thread: ThreadId) {
        critical_section::with(|_| {
            self.detach_waits(thread);
            if self.state_of(thread).contains(ThreadState::READY) {
                self.rdyqueue_del(thread);
            }
            if let Ok(kind) = self.tcb(thread).map(|tcb| tcb.policy) {
                kind.release(self, thread);
            }
            self.reclaim_thread(thread);
        })
    }

    /// Unlinks `thread` from the delay, timeout and event queues.
    fn detach_waits(&mut self, thread: ThreadId) {
        let Some(tcb) = self.threads.get_by_id_mut(thread.0) else {
            return;
        };
        tcb.state.remove(ThreadState::DELAY);
        let (timer, event) = (tcb.timer, tcb.event);
        if let Some(timer) = timer {
            self.delay_queue.remove(&mut self.timers, timer);
            self.timeout_queue.remove(&mut self.timers, timer);
        }
        if let Some(event) = event {
            self.evt_queue_del(event, thread);
        }
    }

    /// The running thread.
    pub fn current(&self) -> Option<ThreadId> {
        self.current
    }

    /// Handle for a raw id, if it names a live thread.
    pub fn thread_by_id(&self, raw: u32) -> Option<ThreadId> {
        let thread = ThreadId::from_raw(raw);
        self.threads.contains(thread.0).then_some(thread)
    }

    pub fn thread_state(&self, thread: ThreadId) -> Option<ThreadState> {
        self.threads.get_by_id(thread.0).map(Tcb::state)
    }

    pub fn thread_priority(&self, thread: ThreadId) -> Option<u8> {
        self.threads.get_by_id(thread.0).map(Tcb::prio)
    }

    pub fn thread_info(&self, thread: ThreadId) -> Option<ThreadInfo> {
        self.threads.get_by_id(thread.0).map(|tcb| ThreadInfo {
            id: tcb.id,
            name: tcb.name,
            state: tcb.state,
            prio: tcb.prio,
            policy: tcb.policy,
            stack_size: tcb.stack_size,
        })
    }

    /// Every thread not yet reclaimed, in creation order.
    pub fn threads(&self) -> Vec<ThreadInfo> {
        self.all_threads
            .keys(&GlobalLinks(&self.threads))
            .into_iter()
            .filter_map(|thread| self.thread_info(thread))
            .collect()
    }

    /// Threads waiting for the daemon, oldest first.
    pub fn reclaim_queue(&self) -> Vec<ThreadId> {
        self.reclaim.keys(&ReclaimLinks(&self.threads))
    }
}

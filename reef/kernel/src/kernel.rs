//! Kernel context and boot.
//!
//! [`Kernel`] owns every piece of kernel state: the allocators, the resource
//! pools, the ready and timer queues and the scheduler flags. It is built
//! once by [`Kernel::new`] over a heap range and brought up by
//! [`Kernel::boot`], which creates the idle, init and daemon threads and
//! switches to the best of them.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::ops::Range;

use reef_core::{KernelConfig, List, PrioClass, PriorityMap};
use reef_mem::{BuddyAllocator, BuddyState, MemError, Mem2, Mem2State, PoolTable, ResourcePools};

use crate::error::KernelError;
use crate::event::Event;
use crate::global;
use crate::id::{EventId, ThreadId};
use crate::policy::{PolicyData, PolicyKind};
use crate::port::Port;
use crate::sched::ReadyQueue;
use crate::thread::{Tcb, ThreadConfig};
use crate::timer::{DeltaQueue, Timer, TimerQueue};
use crate::trace::TraceHook;

/// Handles of the threads the kernel creates for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SystemThreads {
    pub idle: Option<ThreadId>,
    pub init: Option<ThreadId>,
    pub daemon: Option<ThreadId>,
}

/// The kernel context.
pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) prio: PriorityMap,
    pub(crate) port: Box<dyn Port>,
    pub(crate) heap: BuddyAllocator,
    pub(crate) mem2: Mem2,
    pub(crate) table: PoolTable,
    pub(crate) threads: ResourcePools<Tcb>,
    pub(crate) timers: ResourcePools<Timer>,
    pub(crate) events: ResourcePools<Event>,
    pub(crate) ready: ReadyQueue<ThreadId>,
    pub(crate) all_threads: List<ThreadId>,
    pub(crate) reclaim: List<ThreadId>,
    pub(crate) delay_queue: DeltaQueue,
    pub(crate) timeout_queue: DeltaQueue,
    pub(crate) period_queue: DeltaQueue,
    pub(crate) policies: heapless::Vec<PolicyKind, { PolicyKind::COUNT }>,
    pub(crate) current: Option<ThreadId>,
    pub(crate) need_sched: bool,
    pub(crate) sched_locked: bool,
    pub(crate) started: bool,
    pub(crate) ticks: u32,
    pub(crate) trace: Option<TraceHook>,
    pub(crate) system: SystemThreads,
    pub(crate) user_main: Option<fn()>,
    pub(crate) mem2_owner: Option<ThreadId>,
    pub(crate) mem2_waiters: Option<EventId>,
    pub(crate) mem2_deferred: Vec<usize>,
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.config.name)
            .field("current", &self.current)
            .field("need_sched", &self.need_sched)
            .field("sched_locked", &self.sched_locked)
            .field("started", &self.started)
            .field("ticks", &self.ticks)
            .field("ready", &self.ready.len())
            .field("mem2_owner", &self.mem2_owner)
            .field("threads", &self.threads)
            .finish_non_exhaustive()
    }
}

impl Kernel {
    /// Builds the memory system, resource pools and queues over `heap`.
    ///
    /// The secondary allocator is optional; if its span does not fit it is
    /// left disabled and periodic threads cannot be created.
    pub fn new(config: KernelConfig, port: Box<dyn Port>, heap: Range<usize>) -> Result<Self, KernelError> {
        config.validate()?;
        let prio = config.priorities()?;

        let mut buddy = BuddyAllocator::new(heap.start, heap.end);
        if buddy.state() == BuddyState::NoAlloc {
            log::error!("heap {:#x}..{:#x} is too small", heap.start, heap.end);
            return Err(MemError::NoAlloc.into());
        }
        let mem2 = Mem2::new(&mut buddy, config.mem2_size);
        if config.mem2_size > 0 && mem2.state() == Mem2State::Disabled {
            log::warn!("secondary allocator of {} bytes does not fit", config.mem2_size);
        }

        let threads = ResourcePools::new(config.thread_pool, &buddy);
        let timers = ResourcePools::new(config.timer_pool, &buddy);
        let events = ResourcePools::new(config.event_pool, &buddy);

        let mut kernel = Self {
            table: PoolTable::new(config.max_res_pools),
            ready: ReadyQueue::new(prio.levels()),
            prio,
            port,
            heap: buddy,
            mem2,
            threads,
            timers,
            events,
            all_threads: List::new(),
            reclaim: List::new(),
            delay_queue: DeltaQueue::new(TimerQueue::Delay),
            timeout_queue: DeltaQueue::new(TimerQueue::Timeout),
            period_queue: DeltaQueue::new(TimerQueue::Period),
            policies: heapless::Vec::new(),
            current: None,
            need_sched: false,
            sched_locked: true,
            started: false,
            ticks: 0,
            trace: None,
            system: SystemThreads::default(),
            user_main: None,
            mem2_owner: None,
            mem2_waiters: None,
            mem2_deferred: Vec::new(),
            config,
        };
        kernel.register_policy(PolicyKind::Common);
        if kernel.config.period_policy {
            kernel.register_policy(PolicyKind::Period);
        }
        log::info!(
            "{}: heap {:#x}..{:#x}, {} priorities",
            kernel.config.name,
            heap.start,
            heap.end,
            kernel.prio.levels()
        );
        Ok(kernel)
    }

    /// Appends a policy to the registry; `false` if already registered.
    pub fn register_policy(&mut self, kind: PolicyKind) -> bool {
        if self.policies.contains(&kind) {
            return false;
        }
        self.policies.push(kind).is_ok()
    }

    /// Registered policies in tick-hook order.
    pub fn policies(&self) -> &[PolicyKind] {
        &self.policies
    }

    /// Installs or removes the trace hook.
    pub fn set_trace_hook(&mut self, hook: Option<TraceHook>) {
        self.trace = hook;
    }

    /// Creates the system threads and switches to the first thread.
    ///
    /// `user_main` runs on the init thread once the tick timer is started.
    /// Switching stays inhibited until then.
    pub fn boot(&mut self, user_main: fn()) -> Result<(), KernelError> {
        self.user_main = Some(user_main);
        let idle = self.prio.idle();
        let daemon = self.prio.daemon();
        let init = self.prio.init();

        self.system.idle = Some(self.boot_thread(
            ThreadConfig::new("idle", global::idle_entry, PolicyData::common(idle, PrioClass::Hard))
                .with_stack_size(self.config.idle_stack),
        )?);
        self.system.init = Some(self.boot_thread(
            ThreadConfig::new("init", global::init_entry, PolicyData::common(init, PrioClass::Hard))
                .with_stack_size(self.config.init_stack),
        )?);
        self.system.daemon = Some(self.boot_thread(
            ThreadConfig::new("daemon", global::daemon_entry, PolicyData::common(daemon, PrioClass::Hard))
                .with_stack_size(self.config.daemon_stack),
        )?);

        critical_section::with(|_| {
            self.sched_locked = false;
            self.need_sched = false;
            let first = self.select_thread().ok_or(KernelError::Boot("idle"))?;
            let load = self.set_running(first);
            log::info!("{}: booting into {}", self.config.name, first);
            self.port.switch_to(load);
            Ok(())
        })
    }

    fn boot_thread(&mut self, config: ThreadConfig) -> Result<ThreadId, KernelError> {
        let name = config.name;
        self.create_thread(config).map_err(|err| {
            log::error!("system thread {} failed: {}", name, err);
            KernelError::Boot(name)
        })
    }

    /// Starts the tick timer and lifts the boot-time switch inhibitor.
    pub fn start_ticks(&mut self) -> Result<(), KernelError> {
        self.ticks = 0;
        self.port
            .timer_init(self.config.ticks_per_sec, global::tick_isr)?;
        self.started = true;
        log::info!("{}: ticks at {} Hz", self.config.name, self.config.ticks_per_sec);
        Ok(())
    }

    /// Whether boot has completed and switching is allowed.
    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn need_sched(&self) -> bool {
        self.need_sched
    }

    pub fn is_sched_locked(&self) -> bool {
        self.sched_locked
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn priorities(&self) -> PriorityMap {
        self.prio
    }

    pub fn system_threads(&self) -> SystemThreads {
        self.system
    }

    pub(crate) fn user_main(&self) -> Option<fn()> {
        self.user_main
    }

    pub fn heap(&self) -> &BuddyAllocator {
        &self.heap
    }

    /// Allocates `size` bytes from the primary allocator.
    pub fn malloc(&mut self, size: usize) -> Result<usize, KernelError> {
        Ok(self.heap.malloc(size)?)
    }

    pub fn free(&mut self, addr: usize) -> Result<(), KernelError> {
        Ok(self.heap.free(addr)?)
    }

    pub fn mem2(&self) -> &Mem2 {
        &self.mem2
    }

    pub fn pool_table(&self) -> &PoolTable {
        &self.table
    }

    pub fn thread_pools(&self) -> &ResourcePools<Tcb> {
        &self.threads
    }

    pub fn timer_pools(&self) -> &ResourcePools<Timer> {
        &self.timers
    }

    pub fn event_pools(&self) -> &ResourcePools<Event> {
        &self.events
    }

    /// Ready threads at `prio`, head first.
    pub fn ready_threads(&self, prio: u8) -> Vec<ThreadId> {
        self.ready
            .keys(&crate::thread::ReadyLinks(&self.threads), prio)
    }

    pub fn ready_queue(&self) -> &ReadyQueue<ThreadId> {
        &self.ready
    }
}

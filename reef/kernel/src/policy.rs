//! Scheduling policies.
//!
//! A policy finishes thread creation (priority mapping, stack layout,
//! readying), frees whatever it attached to a thread when the thread dies,
//! and may act on every tick. The set of policies is closed; the kernel
//! keeps the registered kinds in a fixed-capacity registry filled at
//! start-up, in the order their tick hooks run.

use reef_core::PrioClass;

use crate::error::KernelError;
use crate::global;
use crate::id::{ThreadId, TimerId};
use crate::kernel::Kernel;
use crate::sched::ThreadState;
use crate::timer::Timer;

/// Registered policy kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PolicyKind {
    /// Plain priority FIFO.
    Common = 0,
    /// Released once per period.
    Period = 1,
}

impl PolicyKind {
    /// Number of policy kinds.
    pub const COUNT: usize = 2;

    pub(crate) fn thread_init(
        self,
        kernel: &mut Kernel,
        thread: ThreadId,
        data: &PolicyData,
    ) -> Result<(), KernelError> {
        match self {
            PolicyKind::Common => CommonPolicy.thread_init(kernel, thread, data),
            PolicyKind::Period => PeriodPolicy.thread_init(kernel, thread, data),
        }
    }

    pub(crate) fn release(self, kernel: &mut Kernel, thread: ThreadId) {
        match self {
            PolicyKind::Common => CommonPolicy.release(kernel, thread),
            PolicyKind::Period => PeriodPolicy.release(kernel, thread),
        }
    }

    pub(crate) fn delay_deal(self, kernel: &mut Kernel) {
        match self {
            PolicyKind::Common => CommonPolicy.delay_deal(kernel),
            PolicyKind::Period => PeriodPolicy.delay_deal(kernel),
        }
    }
}

/// Per-thread policy parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyData {
    Common { prio: u8, class: PrioClass },
    Period { prio: u8, class: PrioClass, period_ms: u32 },
}

impl PolicyData {
    pub const fn common(prio: u8, class: PrioClass) -> Self {
        Self::Common { prio, class }
    }

    pub const fn period(prio: u8, class: PrioClass, period_ms: u32) -> Self {
        Self::Period {
            prio,
            class,
            period_ms,
        }
    }

    pub const fn kind(&self) -> PolicyKind {
        match self {
            Self::Common { .. } => PolicyKind::Common,
            Self::Period { .. } => PolicyKind::Period,
        }
    }

    /// Requested priority and its class.
    pub const fn priority(&self) -> (u8, PrioClass) {
        match *self {
            Self::Common { prio, class } | Self::Period { prio, class, .. } => (prio, class),
        }
    }
}

/// Hooks a scheduling policy provides.
pub trait SchedPolicy {
    const KIND: PolicyKind;

    /// Finishes creating `thread` and readies it.
    fn thread_init(&self, kernel: &mut Kernel, thread: ThreadId, data: &PolicyData) -> Result<(), KernelError>;

    /// Frees what the policy attached to a dying thread.
    fn release(&self, _kernel: &mut Kernel, _thread: ThreadId) {}

    /// Runs once per tick, from interrupt context.
    fn delay_deal(&self, _kernel: &mut Kernel) {}
}

/// Maps the requested priority and stores it on the thread.
fn assign_priority(kernel: &mut Kernel, thread: ThreadId, data: &PolicyData) -> Result<u8, KernelError> {
    let (prio, class) = data.priority();
    let prio = kernel.prio.adjust(prio, class)?;
    kernel.tcb_mut(thread)?.prio = prio;
    Ok(prio)
}

/// Plain priority scheduling.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommonPolicy;

impl SchedPolicy for CommonPolicy {
    const KIND: PolicyKind = PolicyKind::Common;

    fn thread_init(&self, kernel: &mut Kernel, thread: ThreadId, data: &PolicyData) -> Result<(), KernelError> {
        assign_priority(kernel, thread, data)?;
        kernel.system_thread_init(thread, global::comm_thread_exit)?;
        kernel.resume(thread)
    }
}

/// Periodic release.
///
/// The period lives in a small secondary-allocator block owned by the
/// policy, and a second timer per thread sits on the period queue. When the
/// period elapses a thread that has finished its body is restarted from its
/// entry. Tick handling only readies threads; the switch happens on the
/// interrupt exit path.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeriodPolicy;

impl PeriodPolicy {
    fn period_of(kernel: &Kernel, thread: ThreadId) -> Option<u32> {
        let addr = kernel.threads.get_by_id(thread.0)?.policy_data?;
        let mut period = [0u32; 1];
        kernel.mem2.read_words(addr, &mut period).ok()?;
        Some(period[0])
    }

    fn arm(kernel: &mut Kernel, timer: TimerId, period_ms: u32) -> bool {
        let ticks = kernel.time_to_ticks(period_ms);
        kernel.period_queue.insert(&mut kernel.timers, timer, ticks)
    }
}

impl SchedPolicy for PeriodPolicy {
    const KIND: PolicyKind = PolicyKind::Period;

    fn thread_init(&self, kernel: &mut Kernel, thread: ThreadId, data: &PolicyData) -> Result<(), KernelError> {
        let PolicyData::Period { period_ms, .. } = *data else {
            return Err(KernelError::NoPolicy(Self::KIND));
        };
        assign_priority(kernel, thread, data)?;

        let addr = kernel.mem2_alloc(4)?;
        kernel.tcb_mut(thread)?.policy_data = Some(addr);
        kernel.mem2.write_words(addr, &[period_ms])?;

        let timer = TimerId(
            kernel
                .timers
                .get(&mut kernel.table, &mut kernel.heap, |_| Timer::new(thread))?,
        );
        kernel.tcb_mut(thread)?.period_timer = Some(timer);

        kernel.system_thread_init(thread, global::period_thread_exit)?;
        kernel.resume(thread)?;
        critical_section::with(|_| Self::arm(kernel, timer, period_ms));
        Ok(())
    }

    fn release(&self, kernel: &mut Kernel, thread: ThreadId) {
        let Some(tcb) = kernel.threads.get_by_id_mut(thread.0) else {
            return;
        };
        let (timer, data) = (tcb.period_timer, tcb.policy_data.take());
        if let Some(timer) = timer {
            kernel.period_queue.remove(&mut kernel.timers, timer);
        }
        if let Some(addr) = data {
            kernel.mem2_free_deferred(addr);
        }
    }

    fn delay_deal(&self, kernel: &mut Kernel) {
        for thread in kernel.period_queue.tick(&mut kernel.timers) {
            if kernel.state_of(thread) == ThreadState::SUSPEND {
                kernel.reinit_stack(thread);
                kernel.rdyqueue_add(thread);
            }
            let timer = kernel
                .threads
                .get_by_id(thread.0)
                .and_then(|tcb| tcb.period_timer);
            match (timer, Self::period_of(kernel, thread)) {
                (Some(timer), Some(period_ms)) => {
                    Self::arm(kernel, timer, period_ms);
                }
                _ => log::error!("thread {}: period data lost", thread),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_reports_kind_and_priority() {
        let common = PolicyData::common(5, PrioClass::NonHard);
        assert_eq!(common.kind(), PolicyKind::Common);
        assert_eq!(common.priority(), (5, PrioClass::NonHard));

        let period = PolicyData::period(2, PrioClass::Hard, 50);
        assert_eq!(period.kind(), PolicyKind::Period);
        assert_eq!(period.priority(), (2, PrioClass::Hard));
    }

    #[test]
    fn policy_kinds_are_tagged() {
        assert_eq!(CommonPolicy::KIND as u8, 0);
        assert_eq!(PeriodPolicy::KIND as u8, 1);
        assert_eq!(PolicyKind::COUNT, 2);
    }
}

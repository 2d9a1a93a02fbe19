//! Tick handling and delta queues.
//!
//! Every thread owns one [`Timer`] resource for delays and bounded waits;
//! periodic threads own a second one for their period. A [`DeltaQueue`]
//! keeps timers sorted by expiry, each storing only the ticks left after
//! its predecessor, so a tick touches the head alone.

use alloc::vec::Vec;

use reef_core::{Hook, Links, List, ResourceKind};
use reef_mem::{Resource, ResourcePools};

use crate::event::WaitOutcome;
use crate::id::{ThreadId, TimerId};
use crate::kernel::Kernel;
use crate::sched::ThreadState;

/// The delta queues a timer can sit on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerQueue {
    Delay,
    Timeout,
    Period,
}

/// Timer resource queued on a delta queue.
#[derive(Debug)]
pub struct Timer {
    pub(crate) delta: u32,
    pub(crate) owner: ThreadId,
    pub(crate) queue: Option<TimerQueue>,
    pub(crate) hook: Hook<TimerId>,
}

impl Timer {
    pub fn new(owner: ThreadId) -> Self {
        Self {
            delta: 0,
            owner,
            queue: None,
            hook: Hook::new(),
        }
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Ticks after the previous timer on the same queue.
    pub fn delta(&self) -> u32 {
        self.delta
    }

    pub fn is_queued(&self) -> bool {
        self.queue.is_some()
    }

    /// Queue the timer is linked on.
    pub fn queue(&self) -> Option<TimerQueue> {
        self.queue
    }
}

impl Resource for Timer {
    const KIND: ResourceKind = ResourceKind::Timer;
}

struct TimerLinks<P>(P);

impl Links<TimerId> for TimerLinks<&ResourcePools<Timer>> {
    fn hook(&self, key: TimerId) -> Option<&Hook<TimerId>> {
        self.0.get_by_id(key.0).map(|timer| &timer.hook)
    }

    fn hook_mut(&mut self, _key: TimerId) -> Option<&mut Hook<TimerId>> {
        None
    }
}

impl Links<TimerId> for TimerLinks<&mut ResourcePools<Timer>> {
    fn hook(&self, key: TimerId) -> Option<&Hook<TimerId>> {
        self.0.get_by_id(key.0).map(|timer| &timer.hook)
    }

    fn hook_mut(&mut self, key: TimerId) -> Option<&mut Hook<TimerId>> {
        self.0.get_by_id_mut(key.0).map(|timer| &mut timer.hook)
    }
}

/// Timers sorted by expiry, each holding the ticks after its predecessor.
///
/// The sum of the deltas from the head up to a timer is the number of ticks
/// until that timer expires. Timers share one hook across queues, so each
/// timer records the queue it is linked on and the other queues refuse it.
#[derive(Debug, Clone)]
pub struct DeltaQueue {
    kind: TimerQueue,
    list: List<TimerId>,
}

impl DeltaQueue {
    pub const fn new(kind: TimerQueue) -> Self {
        Self {
            kind,
            list: List::new(),
        }
    }

    pub fn kind(&self) -> TimerQueue {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn front(&self) -> Option<TimerId> {
        self.list.front()
    }

    pub fn contains(&self, timers: &ResourcePools<Timer>, id: TimerId) -> bool {
        timers
            .get_by_id(id.0)
            .map_or(false, |timer| timer.queue == Some(self.kind))
    }

    /// Queues `id` to expire `ticks` ticks from now, behind any timer
    /// expiring at the same tick. Returns `false` if the timer is missing
    /// or already queued.
    pub fn insert(&mut self, timers: &mut ResourcePools<Timer>, id: TimerId, ticks: u32) -> bool {
        if timers.get_by_id(id.0).map_or(true, Timer::is_queued) {
            return false;
        }
        let mut remaining = ticks;
        let mut at = None;
        let mut cursor = self.list.front();
        while let Some(key) = cursor {
            let delta = timers.get_by_id(key.0).map_or(0, Timer::delta);
            if remaining < delta {
                at = Some((key, delta));
                break;
            }
            remaining -= delta;
            cursor = self.list.next_of(&TimerLinks(&*timers), key);
        }

        let linked = match at {
            Some((key, _)) => self.list.insert_before(&mut TimerLinks(&mut *timers), key, id),
            None => self.list.push_back(&mut TimerLinks(&mut *timers), id),
        };
        if !linked {
            return false;
        }
        if let Some((key, delta)) = at {
            if let Some(next) = timers.get_by_id_mut(key.0) {
                next.delta = delta - remaining;
            }
        }
        if let Some(timer) = timers.get_by_id_mut(id.0) {
            timer.delta = remaining;
            timer.queue = Some(self.kind);
        }
        true
    }

    /// Unlinks `id`, handing its delta to its successor.
    pub fn remove(&mut self, timers: &mut ResourcePools<Timer>, id: TimerId) -> bool {
        if !self.contains(timers, id) {
            return false;
        }
        let next = self.list.next_of(&TimerLinks(&*timers), id);
        if !self.list.remove(&mut TimerLinks(&mut *timers), id) {
            return false;
        }
        let delta = timers.get_by_id_mut(id.0).map_or(0, |timer| {
            let delta = timer.delta;
            timer.delta = 0;
            timer.queue = None;
            delta
        });
        if let Some(next) = next.and_then(|next| timers.get_by_id_mut(next.0)) {
            next.delta += delta;
        }
        true
    }

    /// Advances one tick and unlinks every timer that expired, returning
    /// their owners in expiry order.
    pub fn tick(&mut self, timers: &mut ResourcePools<Timer>) -> Vec<ThreadId> {
        let mut expired = Vec::new();
        // Timers queued with zero ticks are already due.
        self.pop_due(timers, &mut expired);
        let Some(head) = self.list.front() else {
            return expired;
        };
        if let Some(timer) = timers.get_by_id_mut(head.0) {
            timer.delta = timer.delta.saturating_sub(1);
        }
        self.pop_due(timers, &mut expired);
        expired
    }

    fn pop_due(&mut self, timers: &mut ResourcePools<Timer>, expired: &mut Vec<ThreadId>) {
        while let Some(head) = self.list.front() {
            let owner = match timers.get_by_id(head.0) {
                Some(timer) if timer.delta == 0 => timer.owner,
                _ => break,
            };
            if self.list.pop_front(&mut TimerLinks(&mut *timers)).is_none() {
                break;
            }
            if let Some(timer) = timers.get_by_id_mut(head.0) {
                timer.queue = None;
            }
            expired.push(owner);
        }
    }

    /// Deltas from head to tail.
    pub fn deltas(&self, timers: &ResourcePools<Timer>) -> Vec<u32> {
        self.list
            .iter(&TimerLinks(timers))
            .filter_map(|id| timers.get_by_id(id.0).map(Timer::delta))
            .collect()
    }

    /// Ticks until `id` expires, if queued.
    pub fn remaining(&self, timers: &ResourcePools<Timer>, id: TimerId) -> Option<u32> {
        let mut total = 0u32;
        for key in self.list.iter(&TimerLinks(timers)) {
            total += timers.get_by_id(key.0).map_or(0, Timer::delta);
            if key == id {
                return Some(total);
            }
        }
        None
    }
}

impl Kernel {
    /// Ticks since the tick timer started.
    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn set_ticks(&mut self, ticks: u32) {
        critical_section::with(|_| self.ticks = ticks)
    }

    /// Converts milliseconds to ticks at the configured rate, truncating.
    pub fn time_to_ticks(&self, ms: u32) -> u32 {
        self.config.time_to_ticks(ms)
    }

    /// Tick handler body.
    ///
    /// Runs in interrupt context: expired threads are only made ready, the
    /// switch happens on the interrupt exit path.
    pub fn ticks_entry(&mut self) {
        critical_section::with(|_| {
            self.ticks = self.ticks.wrapping_add(1);
            self.time_delay_deal();
            for kind in self.policies.clone() {
                kind.delay_deal(self);
            }
            self.timeout_delay_deal();
        })
    }

    /// Wakes every thread whose delay expired this tick.
    pub fn time_delay_deal(&mut self) {
        for thread in self.delay_queue.tick(&mut self.timers) {
            if let Some(tcb) = self.threads.get_by_id_mut(thread.0) {
                tcb.state.remove(ThreadState::DELAY);
            }
            if self.state_of(thread).contains(ThreadState::SUSPEND) {
                self.rdyqueue_add(thread);
            }
        }
    }

    /// Wakes every thread whose bounded wait ran out this tick, detaching it
    /// from the event it waited on.
    pub fn timeout_delay_deal(&mut self) {
        for thread in self.timeout_queue.tick(&mut self.timers) {
            let event = match self.threads.get_by_id_mut(thread.0) {
                Some(tcb) => {
                    tcb.outcome = Some(WaitOutcome::TimedOut);
                    tcb.event
                }
                None => continue,
            };
            if let Some(event) = event {
                self.evt_queue_del(event, thread);
            }
            log::debug!("thread {} timed out", thread);
            if self.state_of(thread).contains(ThreadState::SUSPEND) {
                self.rdyqueue_add(thread);
            }
        }
    }

    /// Arms the bounded-wait timer of `thread`.
    pub fn timeout_queue_add(&mut self, thread: ThreadId, ticks: u32) -> bool {
        let Some(timer) = self.threads.get_by_id(thread.0).and_then(|tcb| tcb.timer) else {
            return false;
        };
        critical_section::with(|_| self.timeout_queue.insert(&mut self.timers, timer, ticks))
    }

    /// Disarms the bounded-wait timer of `thread`.
    pub fn timeout_queue_del(&mut self, thread: ThreadId) -> bool {
        let Some(timer) = self.threads.get_by_id(thread.0).and_then(|tcb| tcb.timer) else {
            return false;
        };
        critical_section::with(|_| self.timeout_queue.remove(&mut self.timers, timer))
    }

    /// Ticks left on the delay of `thread`, if it is delayed.
    pub fn delay_remaining(&self, thread: ThreadId) -> Option<u32> {
        let timer = self.threads.get_by_id(thread.0)?.timer?;
        self.delay_queue.remaining(&self.timers, timer)
    }

    /// Deltas of the delay queue, head first.
    pub fn delay_deltas(&self) -> Vec<u32> {
        self.delay_queue.deltas(&self.timers)
    }

    /// Deltas of the timeout queue, head first.
    pub fn timeout_deltas(&self) -> Vec<u32> {
        self.timeout_queue.deltas(&self.timers)
    }

    /// Deltas of the period queue, head first.
    pub fn period_deltas(&self) -> Vec<u32> {
        self.period_queue.deltas(&self.timers)
    }
}

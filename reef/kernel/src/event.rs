//! Event wait queues.
//!
//! An [`Event`] is the blocking primitive IPC objects are built on: threads
//! wait on it in priority order and a signal wakes the best waiter. A wait
//! may be bounded, in which case the waiter sits on the timeout queue too
//! and reads [`WaitOutcome`] after waking to learn which side won.

use alloc::vec::Vec;

use reef_core::{List, ResourceKind};
use reef_mem::Resource;

use crate::error::KernelError;
use crate::id::{EventId, ThreadId};
use crate::kernel::Kernel;
use crate::sched::ThreadState;
use crate::thread::WaitLinks;

/// Why a waiter woke up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
}

/// Event control block.
#[derive(Debug)]
pub struct Event {
    name: &'static str,
    wait: List<ThreadId>,
}

impl Event {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn waiters(&self) -> usize {
        self.wait.len()
    }
}

impl Resource for Event {
    const KIND: ResourceKind = ResourceKind::Event;
}

impl Kernel {
    pub fn evt_create(&mut self, name: &'static str) -> Result<EventId, KernelError> {
        let id = self.events.get(&mut self.table, &mut self.heap, |_| Event {
            name,
            wait: List::new(),
        })?;
        Ok(EventId(id))
    }

    /// Destroys an event nobody waits on.
    pub fn evt_destroy(&mut self, event: EventId) -> Result<(), KernelError> {
        let waiters = self
            .events
            .get_by_id(event.0)
            .ok_or(KernelError::NoEvent(event))?
            .waiters();
        if waiters > 0 {
            return Err(KernelError::EventBusy(event));
        }
        self.events.release(event.0)?;
        Ok(())
    }

    /// Queues `thread` on `event` behind every waiter of the same or
    /// higher priority.
    pub fn evt_queue_add(&mut self, event: EventId, thread: ThreadId) -> Result<(), KernelError> {
        let prio = self.tcb(thread)?.prio;
        critical_section::with(|_| {
            let evt = self
                .events
                .get_by_id_mut(event.0)
                .ok_or(KernelError::NoEvent(event))?;
            let at = evt
                .wait
                .iter(&WaitLinks(&self.threads))
                .find(|&waiter| {
                    self.threads
                        .get_by_id(waiter.0)
                        .map_or(false, |tcb| tcb.prio > prio)
                });
            let linked = match at {
                Some(at) => evt
                    .wait
                    .insert_before(&mut WaitLinks(&mut self.threads), at, thread),
                None => evt.wait.push_back(&mut WaitLinks(&mut self.threads), thread),
            };
            if linked {
                if let Some(tcb) = self.threads.get_by_id_mut(thread.0) {
                    tcb.event = Some(event);
                }
            }
            Ok(())
        })
    }

    /// Takes `thread` off the wait queue of `event`.
    pub fn evt_queue_del(&mut self, event: EventId, thread: ThreadId) -> bool {
        critical_section::with(|_| {
            let removed = self.events.get_by_id_mut(event.0).map_or(false, |evt| {
                evt.wait.remove(&mut WaitLinks(&mut self.threads), thread)
            });
            if let Some(tcb) = self.threads.get_by_id_mut(thread.0) {
                if tcb.event == Some(event) {
                    tcb.event = None;
                }
            }
            removed
        })
    }

    /// Best waiter of `event`.
    pub fn evt_high_thread(&self, event: EventId) -> Option<ThreadId> {
        self.events.get_by_id(event.0)?.wait.front()
    }

    pub fn evt_queue_empty(&self, event: EventId) -> bool {
        self.events
            .get_by_id(event.0)
            .map_or(true, |evt| evt.wait.is_empty())
    }

    /// Waiters of `event`, best first.
    pub fn evt_waiters(&self, event: EventId) -> Vec<ThreadId> {
        self.events
            .get_by_id(event.0)
            .map(|evt| evt.wait.keys(&WaitLinks(&self.threads)))
            .unwrap_or_default()
    }

    /// Blocks the running thread on `event`, for at most `timeout_ms`
    /// milliseconds when non-zero.
    pub fn evt_wait(&mut self, event: EventId, timeout_ms: u32) -> Result<(), KernelError> {
        let thread = self.current.ok_or(KernelError::NoCurrent)?;
        if !self.events.contains(event.0) {
            return Err(KernelError::NoEvent(event));
        }
        self.tcb_mut(thread)?.outcome = None;
        self.evt_queue_add(event, thread)?;
        if timeout_ms > 0 {
            let ticks = self.time_to_ticks(timeout_ms);
            self.timeout_queue_add(thread, ticks);
        }
        self.unready_thread(thread);
        self.schedule();
        Ok(())
    }

    /// Wakes the best waiter of `event`, if any.
    pub fn evt_signal(&mut self, event: EventId) -> Result<Option<ThreadId>, KernelError> {
        if !self.events.contains(event.0) {
            return Err(KernelError::NoEvent(event));
        }
        let woken = self.evt_wake(event);
        self.schedule();
        Ok(woken)
    }

    /// Readies the best waiter of `event` without rescheduling.
    pub(crate) fn evt_wake(&mut self, event: EventId) -> Option<ThreadId> {
        critical_section::with(|_| {
            let thread = self.evt_high_thread(event)?;
            self.evt_queue_del(event, thread);
            self.timeout_queue_del(thread);
            if let Some(tcb) = self.threads.get_by_id_mut(thread.0) {
                tcb.outcome = Some(WaitOutcome::Signaled);
            }
            if self.state_of(thread).contains(ThreadState::SUSPEND) {
                self.rdyqueue_add(thread);
            }
            Some(thread)
        })
    }

    /// How the last wait of `thread` ended; `None` while still waiting.
    pub fn evt_wait_outcome(&self, thread: ThreadId) -> Option<WaitOutcome> {
        self.threads.get_by_id(thread.0)?.outcome
    }
}

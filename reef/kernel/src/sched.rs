//! Priority scheduler.
//!
//! Ready threads sit in one FIFO list per priority, and a bitmap records
//! which lists are non-empty, so the highest ready priority is a first-set
//! bit search. Numerically lower priorities run first. The running thread
//! stays on its ready list; it only leaves when it blocks or exits.
//!
//! A switch happens only when a reschedule is pending and none of the three
//! inhibitors is active: interrupt nesting, the scheduler lock, or boot not
//! yet complete.

use alloc::vec::Vec;
use core::fmt;
use core::ops::{BitOr, BitOrAssign};

use reef_core::{Bitmap, Links, List};

use crate::id::ThreadId;
use crate::kernel::Kernel;
use crate::thread::ReadyLinks;
use crate::trace::{self, records};

/// Thread state flags.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ThreadState(u8);

impl ThreadState {
    pub const READY: Self = Self(1 << 0);
    pub const SUSPEND: Self = Self(1 << 1);
    pub const RUNNING: Self = Self(1 << 2);
    /// Terminated; the stack may still be in use.
    pub const EXIT: Self = Self(1 << 3);
    /// Terminated and safe to reclaim.
    pub const RELEASE: Self = Self(1 << 4);
    /// Timed wait; combined with `SUSPEND`.
    pub const DELAY: Self = Self(1 << 5);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Terminated, whether or not reclaimable yet.
    pub const fn is_terminated(self) -> bool {
        self.intersects(Self::EXIT.union(Self::RELEASE))
    }

    const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for ThreadState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for ThreadState {
    fn bitor_assign(&mut self, rhs: Self) {
        self.insert(rhs);
    }
}

impl fmt::Debug for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(ThreadState, &str); 6] = [
            (ThreadState::READY, "READY"),
            (ThreadState::SUSPEND, "SUSPEND"),
            (ThreadState::RUNNING, "RUNNING"),
            (ThreadState::EXIT, "EXIT"),
            (ThreadState::RELEASE, "RELEASE"),
            (ThreadState::DELAY, "DELAY"),
        ];
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("-")?;
        }
        Ok(())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ThreadState {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "ThreadState({=u8:#x})", self.0);
    }
}

/// Previous scheduler lock state, returned by [`Kernel::lock_sched`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedStatus {
    Locked,
    Unlocked,
}

impl SchedStatus {
    pub fn is_locked(self) -> bool {
        matches!(self, Self::Locked)
    }
}

/// Per-priority FIFO lists plus the bitmap of non-empty priorities.
#[derive(Debug, Clone)]
pub struct ReadyQueue<K> {
    num: usize,
    bitmap: Bitmap,
    queues: Vec<List<K>>,
}

impl<K: Copy + Eq> ReadyQueue<K> {
    /// Queue for priorities `0..levels`.
    pub fn new(levels: usize) -> Self {
        Self {
            num: 0,
            bitmap: Bitmap::new(levels),
            queues: (0..levels).map(|_| List::new()).collect(),
        }
    }

    pub fn levels(&self) -> usize {
        self.queues.len()
    }

    /// Threads queued across all priorities.
    pub fn len(&self) -> usize {
        self.num
    }

    pub fn is_empty(&self) -> bool {
        self.num == 0
    }

    /// Appends `key` to the tail of its priority list.
    pub fn add<L: Links<K> + ?Sized>(&mut self, links: &mut L, key: K, prio: u8) -> bool {
        let Some(queue) = self.queues.get_mut(prio as usize) else {
            return false;
        };
        if !queue.push_back(links, key) {
            return false;
        }
        self.bitmap.set(prio as usize);
        self.num += 1;
        true
    }

    /// Detaches `key` from its priority list.
    pub fn remove<L: Links<K> + ?Sized>(&mut self, links: &mut L, key: K, prio: u8) -> bool {
        let Some(queue) = self.queues.get_mut(prio as usize) else {
            return false;
        };
        if !queue.remove(links, key) {
            return false;
        }
        if queue.is_empty() {
            self.bitmap.clear(prio as usize);
        }
        self.num -= 1;
        true
    }

    /// Highest ready priority, i.e. the lowest number with a queued thread.
    pub fn highest_priority(&self) -> Option<u8> {
        self.bitmap.first_set().map(|prio| prio as u8)
    }

    /// Oldest thread queued at `prio`.
    pub fn front(&self, prio: u8) -> Option<K> {
        self.queues.get(prio as usize).and_then(List::front)
    }

    /// Whether the bitmap marks `prio` as ready.
    pub fn is_ready(&self, prio: u8) -> bool {
        (prio as usize) < self.queues.len() && self.bitmap.get(prio as usize)
    }

    pub fn queue_len(&self, prio: u8) -> usize {
        self.queues.get(prio as usize).map_or(0, List::len)
    }

    /// Threads queued at `prio`, head first.
    pub fn keys<L: Links<K> + ?Sized>(&self, links: &L, prio: u8) -> Vec<K> {
        self.queues
            .get(prio as usize)
            .map(|queue| queue.keys(links))
            .unwrap_or_default()
    }
}

impl Kernel {
    /// Puts `thread` on the ready queue and marks a reschedule.
    pub(crate) fn rdyqueue_add(&mut self, thread: ThreadId) {
        let Some(tcb) = self.threads.get_by_id_mut(thread.0) else {
            return;
        };
        tcb.state.remove(ThreadState::SUSPEND);
        tcb.state.insert(ThreadState::READY);
        let prio = tcb.prio;
        self.ready.add(&mut ReadyLinks(&mut self.threads), thread, prio);
        self.need_sched = true;
    }

    /// Takes `thread` off the ready queue and marks a reschedule.
    pub(crate) fn rdyqueue_del(&mut self, thread: ThreadId) {
        let Some(tcb) = self.threads.get_by_id_mut(thread.0) else {
            return;
        };
        tcb.state.remove(ThreadState::READY);
        tcb.state.insert(ThreadState::SUSPEND);
        let prio = tcb.prio;
        self.ready.remove(&mut ReadyLinks(&mut self.threads), thread, prio);
        self.need_sched = true;
    }

    /// Readies a suspended thread; no-op for any other state.
    pub fn ready_thread(&mut self, thread: ThreadId) {
        critical_section::with(|_| {
            if self.state_of(thread).contains(ThreadState::SUSPEND) {
                self.rdyqueue_add(thread);
            }
        })
    }

    /// Unreadies a ready thread; no-op for any other state.
    pub fn unready_thread(&mut self, thread: ThreadId) {
        critical_section::with(|_| {
            if self.state_of(thread).contains(ThreadState::READY) {
                self.rdyqueue_del(thread);
            }
        })
    }

    /// Head of the highest non-empty priority list.
    pub fn select_thread(&self) -> Option<ThreadId> {
        let prio = self.ready.highest_priority()?;
        self.ready.front(prio)
    }

    /// Switches to the best ready thread if a reschedule is pending and
    /// nothing inhibits it.
    pub fn schedule(&mut self) {
        if !self.need_sched
            || self.port.intr_nesting() > 0
            || self.sched_locked
            || !self.started
        {
            return;
        }
        self.real_sched();
    }

    /// Cooperative switch path.
    ///
    /// An outgoing thread in EXIT becomes RELEASE and is left without
    /// saving its context.
    pub fn real_sched(&mut self) {
        critical_section::with(|_| {
            self.need_sched = false;
            let Some(next) = self.select_thread() else {
                return;
            };
            let prev = self.current;
            if prev == Some(next) {
                return;
            }
            let load = self.set_running(next);

            match prev {
                Some(prev) if self.state_of(prev).contains(ThreadState::EXIT) => {
                    self.mark_released(prev);
                    self.port.switch_to(load);
                }
                Some(prev) => {
                    let Some(tcb) = self.threads.get_by_id_mut(prev.0) else {
                        self.port.switch_to(load);
                        return;
                    };
                    let mut save = tcb.sp;
                    self.port.context_switch(&mut save, load);
                    if let Some(tcb) = self.threads.get_by_id_mut(prev.0) {
                        tcb.sp = save;
                    }
                }
                None => self.port.switch_to(load),
            }
        })
    }

    /// Interrupt-return switch path.
    ///
    /// Records `old_sp` as the outgoing thread's stack pointer and returns
    /// the stack pointer the interrupt exit code must restore.
    pub fn real_intr_sched(&mut self, old_sp: usize) -> usize {
        critical_section::with(|_| {
            self.need_sched = false;
            let Some(next) = self.select_thread() else {
                return old_sp;
            };
            let prev = self.current;
            if prev == Some(next) {
                return old_sp;
            }
            if let Some(prev) = prev {
                if self.state_of(prev).contains(ThreadState::EXIT) {
                    self.mark_released(prev);
                } else if let Some(tcb) = self.threads.get_by_id_mut(prev.0) {
                    tcb.sp = old_sp;
                }
            }
            self.set_running(next)
        })
    }

    /// Interrupt exit hook: reschedules unless an inhibitor is active.
    pub fn intr_exit(&mut self, old_sp: usize) -> usize {
        if !self.need_sched
            || self.port.intr_nesting() > 0
            || self.sched_locked
            || !self.started
        {
            return old_sp;
        }
        self.real_intr_sched(old_sp)
    }

    /// Inhibits switching until [`Kernel::unlock_sched`].
    pub fn lock_sched(&mut self) -> SchedStatus {
        let previous = if self.sched_locked {
            SchedStatus::Locked
        } else {
            SchedStatus::Unlocked
        };
        if !self.sched_locked {
            self.sched_locked = true;
            trace::emit(&self.trace, records::SCHED_LOCK, &[]);
        }
        previous
    }

    /// Restores the lock state returned by the matching `lock_sched` and
    /// runs any reschedule deferred while locked.
    pub fn unlock_sched(&mut self, previous: SchedStatus) {
        if previous == SchedStatus::Unlocked && self.sched_locked {
            self.sched_locked = false;
            trace::emit(&self.trace, records::SCHED_UNLOCK, &[]);
            self.schedule();
        }
    }

    /// Moves a ready thread behind its priority peers.
    pub fn move_to_tail(&mut self, thread: ThreadId) {
        critical_section::with(|_| {
            if self.state_of(thread).contains(ThreadState::READY) {
                self.rdyqueue_del(thread);
                self.rdyqueue_add(thread);
            }
        });
        self.schedule();
    }

    /// Makes `next` the running thread and returns its stack pointer.
    pub(crate) fn set_running(&mut self, next: ThreadId) -> usize {
        let prev = self.current.replace(next);
        if let Some(tcb) = prev.and_then(|prev| self.threads.get_by_id_mut(prev.0)) {
            tcb.state.remove(ThreadState::RUNNING);
        }
        let (load, prio) = match self.threads.get_by_id_mut(next.0) {
            Some(tcb) => {
                tcb.state.insert(ThreadState::RUNNING);
                (tcb.sp, tcb.prio)
            }
            None => (0, 0),
        };
        let old = prev.map_or(0, ThreadId::raw);
        if prio == self.prio.idle() {
            trace::emit(&self.trace, records::SCHED_IDLE, &old.to_le_bytes());
        } else {
            trace::emit(&self.trace, records::SCHED_NEXT, &trace::ids(next.raw(), old));
        }
        log::trace!("sched: {} -> {}", old, next);
        load
    }

    fn mark_released(&mut self, thread: ThreadId) {
        if let Some(tcb) = self.threads.get_by_id_mut(thread.0) {
            tcb.state = ThreadState::RELEASE;
        }
    }

    pub(crate) fn state_of(&self, thread: ThreadId) -> ThreadState {
        self.threads
            .get_by_id(thread.0)
            .map_or(ThreadState::empty(), |tcb| tcb.state)
    }
}

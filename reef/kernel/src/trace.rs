//! Trace records emitted by the scheduler and the thread lifecycle.
//!
//! A [`TraceHook`] receives a record id, a little-endian payload and a
//! timestamp request flag. Hook failures are ignored.

use alloc::sync::Arc;

pub type TraceError = core::convert::Infallible;

pub type TraceResult = Result<(), TraceError>;

pub type TraceHook = Arc<dyn Fn(u8, &[u8], bool) -> TraceResult + Send + Sync>;

/// Record ids.
pub mod records {
    /// Scheduler locked; payload: none
    pub const SCHED_LOCK: u8 = 0;
    /// Scheduler unlocked; payload: none
    pub const SCHED_UNLOCK: u8 = 1;
    /// Switch; payload: new thread id, old thread id (zero when none)
    pub const SCHED_NEXT: u8 = 2;
    /// Switch to the idle thread; payload: old thread id
    pub const SCHED_IDLE: u8 = 3;
    /// Thread killed or exited; payload: thread id
    pub const THREAD_EXIT: u8 = 4;
    /// Thread memory reclaimed; payload: thread id
    pub const THREAD_RECLAIM: u8 = 5;
}

pub(crate) fn emit(hook: &Option<TraceHook>, record: u8, payload: &[u8]) {
    if let Some(hook) = hook {
        let _ = hook(record, payload, true);
    }
}

pub(crate) fn ids(first: u32, second: u32) -> [u8; 8] {
    let mut payload = [0u8; 8];
    payload[..4].copy_from_slice(&first.to_le_bytes());
    payload[4..].copy_from_slice(&second.to_le_bytes());
    payload
}

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

//! # Reef Kernel
//!
//! Preemptive priority scheduler for a single core:
//!
//! - [`sched`] - per-priority ready queues with a bitmap, switch paths for
//!   thread and interrupt context
//! - [`thread`] - creation, suspension, termination and daemon reclaim
//! - [`policy`] - common and periodic scheduling policies
//! - [`timer`] - delta queues for delays, bounded waits and periods
//! - [`event`] - priority-ordered wait queues
//! - [`kernel`] - the kernel context and boot
//! - [`mem`] - the thread-owned mutex over the secondary allocator
//! - [`global`] - the installed instance used by thread bodies and ISRs
//! - [`port`] - the hardware interface and a recording host port
//!
//! Numerically lower priorities run first.

extern crate alloc;

pub mod error;
pub mod event;
pub mod global;
pub mod id;
pub mod kernel;
pub mod mem;
pub mod policy;
pub mod port;
pub mod sched;
pub mod thread;
pub mod timer;
pub mod trace;

pub use error::KernelError;
pub use event::{Event, WaitOutcome};
pub use id::{EventId, ThreadId, TimerId};
pub use kernel::{Kernel, SystemThreads};
pub use policy::{CommonPolicy, PeriodPolicy, PolicyData, PolicyKind, SchedPolicy};
pub use port::{HostPort, Port, PortError, PortEvent, ThreadEntry};
pub use sched::{ReadyQueue, SchedStatus, ThreadState};
pub use thread::{Tcb, ThreadConfig, ThreadInfo};
pub use timer::{DeltaQueue, Timer, TimerQueue};
pub use trace::{TraceError, TraceHook, TraceResult};

pub use reef_core::{KernelConfig, KernelConfigBuilder, PoolSpec, PrioClass, PriorityMap};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

use reef_mem::{MemError, ResourceError};

use crate::id::{EventId, ThreadId};
use crate::policy::PolicyKind;
use crate::port::PortError;

/// Kernel operation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// Priority or configuration rejected
    #[error(transparent)]
    Core(#[from] reef_core::Error),
    /// Allocator failure
    #[error(transparent)]
    Mem(#[from] MemError),
    /// Resource pool failure
    #[error(transparent)]
    Resource(#[from] ResourceError),
    /// Thread created with a policy that is not registered
    #[error("scheduling policy {0:?} is not registered")]
    NoPolicy(PolicyKind),
    /// No memory for a thread stack
    #[error("no stack for thread {0}")]
    NoStack(&'static str),
    /// Handle does not name a live thread
    #[error("no live thread {0}")]
    NoThread(ThreadId),
    /// Handle does not name a live event
    #[error("no live event {0}")]
    NoEvent(EventId),
    /// Event still has waiters
    #[error("event {0} has waiting threads")]
    EventBusy(EventId),
    /// Operation needs a running thread
    #[error("no thread is running")]
    NoCurrent,
    /// Unlock by a thread that does not hold the secondary allocator
    #[error("thread {0} does not hold the secondary allocator")]
    NotOwner(ThreadId),
    /// No kernel installed in the global cell
    #[error("kernel is not installed")]
    NotBooted,
    /// Global kernel cell entered twice
    #[error("kernel is already borrowed")]
    Reentrant,
    /// Port rejected a request
    #[error("port failure: {0}")]
    Port(#[from] PortError),
    /// A mandatory system thread could not be created
    #[error("failed to create system thread {0}")]
    Boot(&'static str),
}

#[cfg(feature = "defmt")]
impl defmt::Format for KernelError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            KernelError::Core(err) => defmt::write!(fmt, "Core({})", err),
            KernelError::Mem(err) => defmt::write!(fmt, "Mem({})", err),
            KernelError::Resource(err) => defmt::write!(fmt, "Resource({})", err),
            KernelError::NoPolicy(kind) => defmt::write!(fmt, "NoPolicy({})", *kind as u8),
            KernelError::NoStack(name) => defmt::write!(fmt, "NoStack({})", name),
            KernelError::NoThread(id) => defmt::write!(fmt, "NoThread({=u32:#x})", id.raw()),
            KernelError::NoEvent(id) => defmt::write!(fmt, "NoEvent({=u32:#x})", id.raw()),
            KernelError::EventBusy(id) => defmt::write!(fmt, "EventBusy({=u32:#x})", id.raw()),
            KernelError::NoCurrent => defmt::write!(fmt, "NoCurrent"),
            KernelError::NotOwner(id) => defmt::write!(fmt, "NotOwner({=u32:#x})", id.raw()),
            KernelError::NotBooted => defmt::write!(fmt, "NotBooted"),
            KernelError::Reentrant => defmt::write!(fmt, "Reentrant"),
            KernelError::Port(err) => defmt::write!(fmt, "Port({})", err),
            KernelError::Boot(name) => defmt::write!(fmt, "Boot({})", name),
        }
    }
}

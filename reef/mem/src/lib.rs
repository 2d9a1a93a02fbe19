#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

//! # Reef Mem
//!
//! Memory management for the Reef kernel:
//!
//! - [`buddy`] - the primary allocator, handing out power-of-two runs of
//!   128-byte blocks from one contiguous range
//! - [`mem2`] - a boundary-tag allocator for small requests, carved out of
//!   one buddy block
//! - [`resource`] - typed slot pools that back every kernel object and the
//!   ids that name them
//!
//! Allocators deal in addresses (`usize`) and never touch the memory they
//! describe, with the exception of [`Mem2`] which owns its arena.

extern crate alloc;

pub mod buddy;
pub mod mem2;
pub mod resource;
pub mod stats;

pub use buddy::{BuddyAllocator, BuddyState, BASIC_BLOCK_SIZE, MAX_LEVELS};
pub use mem2::{BlockInfo, Mem2, Mem2State};
pub use resource::{Pool, PoolTable, Resource, ResourcePools};
pub use stats::PoolStats;

use reef_core::{ResourceId, ResourceKind};

/// Allocator failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MemError {
    /// The allocator was never usable
    #[error("allocator is not initialized")]
    NoAlloc,
    /// No free block large enough for the request
    #[error("out of memory for {0} bytes")]
    OutOfMemory(usize),
    /// The request exceeds the largest block the allocator can hand out
    #[error("request of {0} bytes is too large")]
    TooLarge(usize),
    /// Address outside the arena or not the start of a block
    #[error("invalid address {0:#x}")]
    InvalidAddress(usize),
    /// Block already free
    #[error("double free at {0:#x}")]
    DoubleFree(usize),
    /// Block header failed validation
    #[error("corrupted block header at {0:#x}")]
    Corrupted(usize),
    /// Another context holds the allocator
    #[error("allocator busy")]
    Busy,
}

/// Resource pool failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    /// Global pool table has no free entry
    #[error("no free pool table entry for {0:?}")]
    NoPool(ResourceKind),
    /// Buddy allocator could not back a new pool
    #[error("no memory for a new {0:?} pool")]
    NoMem(ResourceKind),
    /// The type already owns its maximum number of pools
    #[error("{0:?} already owns its maximum number of pools")]
    MaxPools(ResourceKind),
    /// Id of another type or of a pool the type does not own
    #[error("resource {0} does not belong to this pool set")]
    ForeignResource(ResourceId),
    /// Slot index past the end of its pool
    #[error("resource {0} names a slot past the end of its pool")]
    SlotOutOfRange(ResourceId),
    /// Slot already free
    #[error("resource {0} is already released")]
    DoubleRelease(ResourceId),
    /// Pool bookkeeping lost track of a table entry
    #[error("pool {0} is not tracked")]
    UnknownPool(u16),
}

#[cfg(feature = "defmt")]
impl defmt::Format for MemError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            MemError::NoAlloc => defmt::write!(fmt, "NoAlloc"),
            MemError::OutOfMemory(size) => defmt::write!(fmt, "OutOfMemory({})", size),
            MemError::TooLarge(size) => defmt::write!(fmt, "TooLarge({})", size),
            MemError::InvalidAddress(addr) => defmt::write!(fmt, "InvalidAddress({=usize:#x})", addr),
            MemError::DoubleFree(addr) => defmt::write!(fmt, "DoubleFree({=usize:#x})", addr),
            MemError::Corrupted(addr) => defmt::write!(fmt, "Corrupted({=usize:#x})", addr),
            MemError::Busy => defmt::write!(fmt, "Busy"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ResourceError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            ResourceError::NoPool(kind) => defmt::write!(fmt, "NoPool({})", kind.tag()),
            ResourceError::NoMem(kind) => defmt::write!(fmt, "NoMem({})", kind.tag()),
            ResourceError::MaxPools(kind) => defmt::write!(fmt, "MaxPools({})", kind.tag()),
            ResourceError::ForeignResource(id) => defmt::write!(fmt, "ForeignResource({=u32:#x})", id.raw()),
            ResourceError::SlotOutOfRange(id) => defmt::write!(fmt, "SlotOutOfRange({=u32:#x})", id.raw()),
            ResourceError::DoubleRelease(id) => defmt::write!(fmt, "DoubleRelease({=u32:#x})", id.raw()),
            ResourceError::UnknownPool(index) => defmt::write!(fmt, "UnknownPool({})", index),
        }
    }
}

//! Packed resource identifiers.
//!
//! Layout of a [`ResourceId`]:
//!
//! ```text
//!  31      24 23      16 15  14 13    10 9            0
//! +----------+----------+------+--------+--------------+
//! | reserved |   slot   |  --  |  kind  |  pool index  |
//! +----------+----------+------+--------+--------------+
//! ```
//!
//! While a slot sits on its pool's free list the same word is a
//! [`FreeLink`]: the slot index stays in bits [23:16] and the low 16 bits
//! hold the index of the next free slot.

use core::fmt;

const POOL_MASK: u32 = 0x3ff;
const KIND_SHIFT: u32 = 10;
const KIND_MASK: u32 = 0xf;
const SLOT_SHIFT: u32 = 16;
const SLOT_MASK: u32 = 0xff;
const LINK_MASK: u32 = 0xffff;

/// Largest pool index an id can carry.
pub const MAX_POOL_INDEX: u16 = POOL_MASK as u16;
/// Largest number of slots a pool can hold.
pub const MAX_SLOTS_PER_POOL: usize = SLOT_MASK as usize + 1;

/// Kernel object types drawn from resource pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResourceKind {
    Thread = 0,
    Event = 1,
    Timer = 2,
    MessageContainer = 3,
    Message = 4,
    Policy = 5,
}

impl ResourceKind {
    pub const fn tag(self) -> u8 {
        self as u8
    }

    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Thread),
            1 => Some(Self::Event),
            2 => Some(Self::Timer),
            3 => Some(Self::MessageContainer),
            4 => Some(Self::Message),
            5 => Some(Self::Policy),
            _ => None,
        }
    }
}

/// 32-bit packed identifier of a live resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u32);

impl ResourceId {
    /// Packs a pool index, a kind and a slot index.
    pub const fn new(pool: u16, kind: ResourceKind, slot: u8) -> Self {
        Self(
            (pool as u32 & POOL_MASK)
                | ((kind as u32 & KIND_MASK) << KIND_SHIFT)
                | ((slot as u32) << SLOT_SHIFT),
        )
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Index of the owning pool in the global pool table.
    pub const fn pool(self) -> u16 {
        (self.0 & POOL_MASK) as u16
    }

    pub const fn kind_tag(self) -> u8 {
        ((self.0 >> KIND_SHIFT) & KIND_MASK) as u8
    }

    pub const fn kind(self) -> Option<ResourceKind> {
        ResourceKind::from_tag(self.kind_tag())
    }

    /// Slot index inside the owning pool.
    pub const fn slot(self) -> u8 {
        ((self.0 >> SLOT_SHIFT) & SLOT_MASK) as u8
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ResourceId {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "ResourceId({=u32:#x})", self.0);
    }
}

/// Slot word of an unallocated resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeLink(u32);

impl FreeLink {
    /// End-of-list marker in the link field.
    pub const END: u16 = LINK_MASK as u16;

    pub const fn new(slot: u8, next: Option<u8>) -> Self {
        let next = match next {
            Some(next) => next as u32,
            None => LINK_MASK,
        };
        Self(((slot as u32) << SLOT_SHIFT) | next)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn slot(self) -> u8 {
        ((self.0 >> SLOT_SHIFT) & SLOT_MASK) as u8
    }

    /// Next free slot, `None` at the end of the list.
    pub const fn next(self) -> Option<u8> {
        let next = self.0 & LINK_MASK;
        if next == LINK_MASK {
            None
        } else {
            Some(next as u8)
        }
    }

    /// Same slot with a different successor.
    pub const fn with_next(self, next: Option<u8>) -> Self {
        Self::new(self.slot(), next)
    }
}

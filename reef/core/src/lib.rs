#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

//! # Reef Core
//!
//! Leaf building blocks shared by every layer of the Reef kernel:
//!
//! - [`bitmap`] - word/array bit search used by the allocator, the pool
//!   table and the ready queue
//! - [`list`] - index-based intrusive doubly-linked lists
//! - [`id`] - packed 32-bit resource identifiers
//! - [`priority`] - priority layout and class adjustment
//! - [`config`] - kernel configuration with a builder

extern crate alloc;

pub mod bitmap;
pub mod config;
pub mod id;
pub mod list;
pub mod priority;

pub use bitmap::Bitmap;
pub use config::{KernelConfig, KernelConfigBuilder, PoolSpec};
pub use id::{FreeLink, ResourceId, ResourceKind};
pub use list::{Hook, Links, List};
pub use priority::{PrioClass, PriorityMap};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type used by the core building blocks
pub type Result<T> = core::result::Result<T, Error>;

/// Errors raised while validating priorities and configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Priority outside the configured range
    #[error("priority {0} outside the configured range")]
    InvalidPriority(u8),
    /// Configuration value that cannot be honored
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Error::InvalidPriority(prio) => defmt::write!(fmt, "InvalidPriority({})", prio),
            Error::InvalidConfig(what) => defmt::write!(fmt, "InvalidConfig({})", what),
        }
    }
}

//! Priority layout.
//!
//! Numerically smaller priorities run first. The range is carved up as:
//!
//! ```text
//! 0                      init thread
//! 1                      highest user priority
//! 2 ..= 2+hard           hard real-time band
//! hard_min+1 ..= idle-1  non-hard band (daemon sits at idle-2)
//! idle = max_threads     idle thread
//! ```

use core::fmt;

use crate::{Error, Result};

/// How a requested priority is mapped into the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrioClass {
    /// Used verbatim.
    Hard,
    /// Shifted into the non-hard band and clamped to its lowest level.
    #[default]
    NonHard,
}

impl fmt::Display for PrioClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrioClass::Hard => write!(f, "hard"),
            PrioClass::NonHard => write!(f, "non-hard"),
        }
    }
}

/// Priority layout derived from the thread limit and the hard band size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityMap {
    idle: u8,
    hard_rt_num: u8,
}

impl PriorityMap {
    pub const INIT: u8 = 0;
    pub const MAX: u8 = 1;
    pub const HARD_RT_MAX: u8 = 2;

    /// Builds the layout; the band boundaries must leave room for the
    /// daemon and non-hard levels.
    pub fn new(max_threads: u8, hard_rt_num: u8) -> Result<Self> {
        if max_threads < 4 {
            return Err(Error::InvalidConfig("need at least four priority levels"));
        }
        if u16::from(Self::HARD_RT_MAX) + u16::from(hard_rt_num) + 1 > u16::from(max_threads) - 2 {
            return Err(Error::InvalidConfig("hard real-time band leaves no non-hard levels"));
        }
        Ok(Self {
            idle: max_threads,
            hard_rt_num,
        })
    }

    pub const fn init(&self) -> u8 {
        Self::INIT
    }

    pub const fn hard_rt_min(&self) -> u8 {
        Self::HARD_RT_MAX + self.hard_rt_num
    }

    pub const fn nonhard_rt_max(&self) -> u8 {
        self.hard_rt_min() + 1
    }

    pub const fn nonhard_rt_min(&self) -> u8 {
        self.idle - 1
    }

    pub const fn daemon(&self) -> u8 {
        self.idle - 2
    }

    pub const fn idle(&self) -> u8 {
        self.idle
    }

    /// Number of distinct priority levels, idle included.
    pub const fn levels(&self) -> usize {
        self.idle as usize + 1
    }

    /// Maps a requested priority into the layout.
    pub fn adjust(&self, prio: u8, class: PrioClass) -> Result<u8> {
        match class {
            PrioClass::Hard if prio <= self.idle => Ok(prio),
            PrioClass::Hard => Err(Error::InvalidPriority(prio)),
            PrioClass::NonHard => Ok(prio
                .saturating_add(self.nonhard_rt_max())
                .min(self.nonhard_rt_min())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout() {
        let map = PriorityMap::new(40, 0).unwrap();
        assert_eq!(map.hard_rt_min(), 2);
        assert_eq!(map.nonhard_rt_max(), 3);
        assert_eq!(map.daemon(), 38);
        assert_eq!(map.nonhard_rt_min(), 39);
        assert_eq!(map.idle(), 40);
        assert_eq!(map.levels(), 41);
    }

    #[test]
    fn nonhard_priorities_are_shifted_and_clamped() {
        let map = PriorityMap::new(40, 0).unwrap();
        assert_eq!(map.adjust(5, PrioClass::NonHard), Ok(8));
        assert_eq!(map.adjust(36, PrioClass::NonHard), Ok(39));
        assert_eq!(map.adjust(200, PrioClass::NonHard), Ok(39));
    }

    #[test]
    fn hard_priorities_are_verbatim() {
        let map = PriorityMap::new(40, 4).unwrap();
        assert_eq!(map.adjust(5, PrioClass::Hard), Ok(5));
        assert_eq!(map.adjust(40, PrioClass::Hard), Ok(40));
        assert_eq!(map.adjust(41, PrioClass::Hard), Err(Error::InvalidPriority(41)));
        assert_eq!(map.nonhard_rt_max(), 7);
    }

    #[test]
    fn oversized_hard_band_is_rejected() {
        assert!(PriorityMap::new(8, 10).is_err());
    }
}

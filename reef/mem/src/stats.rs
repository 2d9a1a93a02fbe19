/// Slot statistics for one resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Slots across every pool of the type
    pub total_slots: usize,
    /// Slots currently free
    pub free_slots: usize,
    /// Slots currently handed out
    pub used_slots: usize,
    /// Lowest number of free slots observed right after an allocation
    pub min_free_slots: usize,
    /// Pools currently owned by the type
    pub pools: usize,
    /// Allocations served since creation
    pub allocations: usize,
}

impl PoolStats {
    pub const fn new() -> Self {
        Self {
            total_slots: 0,
            free_slots: 0,
            used_slots: 0,
            min_free_slots: 0,
            pools: 0,
            allocations: 0,
        }
    }

    /// A new pool of `slots` slots joined the type.
    pub fn on_grow(&mut self, slots: usize) {
        self.total_slots += slots;
        self.free_slots += slots;
        self.pools += 1;
    }

    pub fn on_alloc(&mut self) {
        self.used_slots += 1;
        self.free_slots -= 1;
        self.allocations += 1;
        if self.allocations == 1 || self.free_slots < self.min_free_slots {
            self.min_free_slots = self.free_slots;
        }
    }

    pub fn on_release(&mut self) {
        if self.used_slots > 0 {
            self.used_slots -= 1;
            self.free_slots += 1;
        }
    }

    pub const fn is_full(&self) -> bool {
        self.free_slots == 0
    }

    pub const fn is_empty(&self) -> bool {
        self.used_slots == 0
    }

    /// Utilization as a percentage (0-100)
    pub fn utilization(&self) -> u8 {
        if self.total_slots == 0 {
            0
        } else {
            ((self.used_slots * 100) / self.total_slots) as u8
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for PoolStats {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "PoolStats{{ total: {}, free: {}, used: {}, min_free: {}, pools: {} }}",
            self.total_slots,
            self.free_slots,
            self.used_slots,
            self.min_free_slots,
            self.pools
        );
    }
}

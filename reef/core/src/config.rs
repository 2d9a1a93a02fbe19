//! Kernel configuration.

use crate::id::{MAX_POOL_INDEX, MAX_SLOTS_PER_POOL};
use crate::priority::PriorityMap;
use crate::{Error, Result};

/// Sizing of the pools backing one resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSpec {
    /// Requested slots per pool; rounded down to fit a buddy block.
    pub per_pool: usize,
    /// Hard cap on the number of pools of this type.
    pub max_pools: usize,
}

impl PoolSpec {
    pub const fn new(per_pool: usize, max_pools: usize) -> Self {
        Self {
            per_pool,
            max_pools,
        }
    }

    /// Total slots if every pool keeps the requested size.
    pub const fn capacity(&self) -> usize {
        self.per_pool * self.max_pools
    }

    fn validate(&self, what: &'static str) -> Result<()> {
        if self.per_pool == 0 || self.per_pool > MAX_SLOTS_PER_POOL || self.max_pools == 0 {
            return Err(Error::InvalidConfig(what));
        }
        Ok(())
    }

    fn for_count(count: usize, per_pool_cap: usize) -> Self {
        let per_pool = count.clamp(1, per_pool_cap);
        Self::new(per_pool, (count + per_pool - 1) / per_pool)
    }
}

/// Static configuration of a kernel instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    pub name: &'static str,
    /// Thread limit; also the idle priority.
    pub max_threads: u8,
    /// Entries in the global pool table.
    pub max_res_pools: usize,
    /// Number of priorities in the hard real-time band.
    pub hard_rt_prio_num: u8,
    /// Stack size used when a thread asks for less and brings no stack.
    pub min_stack_size: usize,
    pub ticks_per_sec: u32,
    /// Span handed to the secondary allocator; zero disables it.
    pub mem2_size: usize,
    /// Register the periodic scheduling policy at boot.
    pub period_policy: bool,
    pub stack_align: usize,
    pub idle_stack: usize,
    pub init_stack: usize,
    pub daemon_stack: usize,
    pub thread_pool: PoolSpec,
    pub timer_pool: PoolSpec,
    pub event_pool: PoolSpec,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: "reef",
            max_threads: 40,
            max_res_pools: 40,
            hard_rt_prio_num: 0,
            min_stack_size: 10240,
            ticks_per_sec: 100,
            mem2_size: 102400,
            period_policy: true,
            stack_align: 4,
            idle_stack: 128,
            init_stack: 512,
            daemon_stack: 256,
            thread_pool: PoolSpec::for_count(40, 20),
            timer_pool: PoolSpec::for_count(80, 20),
            event_pool: PoolSpec::new(8, 4),
        }
    }
}

impl KernelConfig {
    /// Creates a new kernel configuration builder.
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }

    /// Priority layout implied by this configuration.
    pub fn priorities(&self) -> Result<PriorityMap> {
        PriorityMap::new(self.max_threads, self.hard_rt_prio_num)
    }

    /// Converts milliseconds to ticks, truncating; saturates at `u32::MAX`.
    pub const fn time_to_ticks(&self, ms: u32) -> u32 {
        let ticks = (ms as u64 * self.ticks_per_sec as u64) / 1000;
        if ticks > u32::MAX as u64 {
            u32::MAX
        } else {
            ticks as u32
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.priorities()?;
        if self.max_res_pools == 0 || self.max_res_pools > MAX_POOL_INDEX as usize + 1 {
            return Err(Error::InvalidConfig("pool table size out of range"));
        }
        if self.ticks_per_sec == 0 {
            return Err(Error::InvalidConfig("tick rate must be non-zero"));
        }
        if self.stack_align < 4 || !self.stack_align.is_power_of_two() {
            return Err(Error::InvalidConfig("stack alignment must be a power of two >= 4"));
        }
        self.thread_pool.validate("thread pool sizing")?;
        self.timer_pool.validate("timer pool sizing")?;
        self.event_pool.validate("event pool sizing")?;
        Ok(())
    }
}

/// Builder for ergonomic kernel configuration construction.
#[derive(Debug, Clone, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    pub fn name(mut self, name: &'static str) -> Self {
        self.config.name = name;
        self
    }

    /// Sets the thread limit and resizes the thread and timer pools to match.
    pub fn max_threads(mut self, max: u8) -> Self {
        self.config.max_threads = max;
        self.config.thread_pool = PoolSpec::for_count(max as usize, 20);
        self.config.timer_pool = PoolSpec::for_count(2 * max as usize, 20);
        self
    }

    pub fn max_res_pools(mut self, max: usize) -> Self {
        self.config.max_res_pools = max;
        self
    }

    pub fn hard_rt_prio_num(mut self, num: u8) -> Self {
        self.config.hard_rt_prio_num = num;
        self
    }

    pub fn min_stack_size(mut self, size: usize) -> Self {
        self.config.min_stack_size = size;
        self
    }

    pub fn ticks_per_sec(mut self, ticks: u32) -> Self {
        self.config.ticks_per_sec = ticks;
        self
    }

    /// Sets the secondary allocator span; zero disables it.
    pub fn mem2_size(mut self, size: usize) -> Self {
        self.config.mem2_size = size;
        self
    }

    pub fn period_policy(mut self, enabled: bool) -> Self {
        self.config.period_policy = enabled;
        self
    }

    pub fn stack_align(mut self, align: usize) -> Self {
        self.config.stack_align = align;
        self
    }

    /// Sets the requested stack sizes of the idle, init and daemon threads.
    pub fn system_stacks(mut self, idle: usize, init: usize, daemon: usize) -> Self {
        self.config.idle_stack = idle;
        self.config.init_stack = init;
        self.config.daemon_stack = daemon;
        self
    }

    pub fn thread_pool(mut self, spec: PoolSpec) -> Self {
        self.config.thread_pool = spec;
        self
    }

    pub fn timer_pool(mut self, spec: PoolSpec) -> Self {
        self.config.timer_pool = spec;
        self
    }

    pub fn event_pool(mut self, spec: PoolSpec) -> Self {
        self.config.event_pool = spec;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<KernelConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = KernelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.thread_pool, PoolSpec::new(20, 2));
        assert_eq!(config.timer_pool, PoolSpec::new(20, 4));
    }

    #[test]
    fn time_to_ticks_truncates() {
        let config = KernelConfig::default();
        assert_eq!(config.time_to_ticks(100), 10);
        assert_eq!(config.time_to_ticks(15), 1);
        assert_eq!(config.time_to_ticks(9), 0);
    }

    #[test]
    fn time_to_ticks_saturates() {
        let config = KernelConfig {
            ticks_per_sec: 10_000,
            ..KernelConfig::default()
        };
        assert_eq!(config.time_to_ticks(u32::MAX), u32::MAX);
        assert_eq!(config.time_to_ticks(1_000), 10_000);
    }

    #[test]
    fn max_threads_resizes_pools() {
        let config = KernelConfig::builder().max_threads(8).build().unwrap();
        assert_eq!(config.thread_pool, PoolSpec::new(8, 1));
        assert_eq!(config.timer_pool, PoolSpec::new(16, 1));
    }
}

//! Typed slot pools for kernel objects.
//!
//! Every kernel object (thread, timer, event, ...) lives in a slot of a
//! pool, and every pool occupies one entry of the global [`PoolTable`].
//! [`ResourcePools`] is the per-type control block: it grows the type by
//! claiming a table entry and a buddy block, hands out slots, and takes
//! them back. A slot is addressed by a packed [`ResourceId`] naming the
//! pool entry, the type and the slot index.
//!
//! Free slots of a pool form a FIFO threaded through the slot words, so a
//! released id is not handed out again until the rest of the pool's free
//! slots have been used.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;
use core::mem::size_of;

use reef_core::id::MAX_SLOTS_PER_POOL;
use reef_core::{Bitmap, FreeLink, Hook, Links, List, PoolSpec, ResourceId, ResourceKind};

use crate::buddy::BuddyAllocator;
use crate::stats::PoolStats;
use crate::ResourceError;

/// A kernel object type drawn from resource pools.
pub trait Resource {
    const KIND: ResourceKind;
}

/// Occupancy of the global pool table.
#[derive(Debug, Clone)]
pub struct PoolTable {
    occupied: Bitmap,
}

impl PoolTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            occupied: Bitmap::new(capacity.min(reef_core::id::MAX_POOL_INDEX as usize + 1)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.occupied.len()
    }

    /// Entries currently owned by some resource type.
    pub fn in_use(&self) -> usize {
        self.occupied.count_ones()
    }

    /// Claims the lowest unowned entry.
    pub fn acquire(&mut self) -> Option<u16> {
        let index = self.occupied.first_clear()?;
        self.occupied.set(index);
        Some(index as u16)
    }

    /// Returns an entry to the table; `false` if it was not owned.
    pub fn release(&mut self, index: u16) -> bool {
        let index = index as usize;
        if !self.occupied.get(index) {
            return false;
        }
        self.occupied.clear(index);
        true
    }

    pub fn is_acquired(&self, index: u16) -> bool {
        self.occupied.get(index as usize)
    }
}

#[derive(Debug)]
struct Slot<T> {
    /// Resource id while allocated, a [`FreeLink`] while free.
    word: u32,
    value: Option<T>,
}

/// One pool of same-typed slots.
#[derive(Debug)]
pub struct Pool<T> {
    index: u16,
    base_adr: usize,
    num: usize,
    free_num: usize,
    free_head: Option<u8>,
    free_tail: Option<u8>,
    slots: Vec<Slot<T>>,
    all_hook: Hook<u16>,
    free_hook: Hook<u16>,
}

impl<T> Pool<T> {
    fn new(index: u16, base_adr: usize, num: usize) -> Self {
        let slots = (0..num)
            .map(|slot| {
                let next = (slot + 1 < num).then(|| (slot + 1) as u8);
                Slot {
                    word: FreeLink::new(slot as u8, next).raw(),
                    value: None,
                }
            })
            .collect();
        Self {
            index,
            base_adr,
            num,
            free_num: num,
            free_head: (num > 0).then_some(0),
            free_tail: num.checked_sub(1).map(|last| last as u8),
            slots,
            all_hook: Hook::new(),
            free_hook: Hook::new(),
        }
    }

    /// Entry in the global pool table.
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Address of the buddy block backing the slots.
    pub fn base_adr(&self) -> usize {
        self.base_adr
    }

    pub fn num(&self) -> usize {
        self.num
    }

    pub fn free_num(&self) -> usize {
        self.free_num
    }

    fn pop_free(&mut self) -> Option<u8> {
        let slot = self.free_head?;
        let link = FreeLink::from_raw(self.slots[slot as usize].word);
        self.free_head = link.next();
        if self.free_head.is_none() {
            self.free_tail = None;
        }
        Some(slot)
    }

    fn push_free(&mut self, slot: u8) {
        self.slots[slot as usize].word = FreeLink::new(slot, None).raw();
        match self.free_tail {
            Some(tail) => {
                let link = FreeLink::from_raw(self.slots[tail as usize].word);
                self.slots[tail as usize].word = link.with_next(Some(slot)).raw();
            }
            None => self.free_head = Some(slot),
        }
        self.free_tail = Some(slot);
    }
}

macro_rules! pool_links {
    ($name:ident, $hook:ident) => {
        struct $name<M>(M);

        impl<T> Links<u16> for $name<&BTreeMap<u16, Pool<T>>> {
            fn hook(&self, key: u16) -> Option<&Hook<u16>> {
                self.0.get(&key).map(|pool| &pool.$hook)
            }

            fn hook_mut(&mut self, _key: u16) -> Option<&mut Hook<u16>> {
                None
            }
        }

        impl<T> Links<u16> for $name<&mut BTreeMap<u16, Pool<T>>> {
            fn hook(&self, key: u16) -> Option<&Hook<u16>> {
                self.0.get(&key).map(|pool| &pool.$hook)
            }

            fn hook_mut(&mut self, key: u16) -> Option<&mut Hook<u16>> {
                self.0.get_mut(&key).map(|pool| &mut pool.$hook)
            }
        }
    };
}

pool_links!(AllPools, all_hook);
pool_links!(FreePools, free_hook);

/// Control block of one resource type.
pub struct ResourcePools<T: Resource> {
    size: usize,
    num_per_pool: usize,
    max_pools: usize,
    pools: BTreeMap<u16, Pool<T>>,
    all: List<u16>,
    free: List<u16>,
    stats: PoolStats,
}

impl<T: Resource> fmt::Debug for ResourcePools<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePools")
            .field("kind", &T::KIND)
            .field("size", &self.size)
            .field("num_per_pool", &self.num_per_pool)
            .field("num", &self.pools.len())
            .field("max_pools", &self.max_pools)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<T: Resource> ResourcePools<T> {
    /// Plans the pools of a type.
    ///
    /// The slot block of `spec.per_pool` slots is rounded up to the buddy
    /// block it will occupy and the slot count recomputed to fill it.
    pub fn new(spec: PoolSpec, heap: &BuddyAllocator) -> Self {
        let size = (size_of::<T>().max(4) + 3) & !3;
        let block = heap.malloc_size(size.saturating_mul(spec.per_pool));
        let num_per_pool = (block / size).min(MAX_SLOTS_PER_POOL);
        log::debug!(
            "pool {:?}: slot {} bytes, {} per pool, {} pools max",
            T::KIND,
            size,
            num_per_pool,
            spec.max_pools
        );
        Self {
            size,
            num_per_pool,
            max_pools: spec.max_pools,
            pools: BTreeMap::new(),
            all: List::new(),
            free: List::new(),
            stats: PoolStats::new(),
        }
    }

    /// Slot size in bytes.
    pub fn slot_size(&self) -> usize {
        self.size
    }

    pub fn num_per_pool(&self) -> usize {
        self.num_per_pool
    }

    /// Pools currently owned.
    pub fn num(&self) -> usize {
        self.pools.len()
    }

    pub fn max_pools(&self) -> usize {
        self.max_pools
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Table indices of the owned pools, in creation order.
    pub fn pool_indices(&self) -> Vec<u16> {
        self.all.keys(&AllPools(&self.pools))
    }

    /// Table indices of the pools with free slots.
    pub fn free_pool_indices(&self) -> Vec<u16> {
        self.free.keys(&FreePools(&self.pools))
    }

    pub fn pool(&self, index: u16) -> Option<&Pool<T>> {
        self.pools.get(&index)
    }

    /// Claims a slot, growing the type by one pool when every pool is full,
    /// and stores `init(id)` in it.
    pub fn get(
        &mut self,
        table: &mut PoolTable,
        heap: &mut BuddyAllocator,
        init: impl FnOnce(ResourceId) -> T,
    ) -> Result<ResourceId, ResourceError> {
        critical_section::with(|_| {
            let index = match self.free.front() {
                Some(index) => index,
                None => self.grow(table, heap)?,
            };
            let pool = self
                .pools
                .get_mut(&index)
                .ok_or(ResourceError::UnknownPool(index))?;
            let slot = pool.pop_free().ok_or(ResourceError::UnknownPool(index))?;
            let id = ResourceId::new(index, T::KIND, slot);
            let entry = &mut pool.slots[slot as usize];
            entry.word = id.raw();
            entry.value = Some(init(id));
            pool.free_num -= 1;
            let exhausted = pool.free_num == 0;
            if exhausted {
                self.free.remove(&mut FreePools(&mut self.pools), index);
            }
            self.stats.on_alloc();
            Ok(id)
        })
    }

    fn grow(&mut self, table: &mut PoolTable, heap: &mut BuddyAllocator) -> Result<u16, ResourceError> {
        if self.pools.len() >= self.max_pools {
            log::warn!("pool {:?}: {} pools already in use", T::KIND, self.max_pools);
            return Err(ResourceError::MaxPools(T::KIND));
        }
        if self.num_per_pool == 0 {
            log::warn!("pool {:?}: slot block does not fit the heap", T::KIND);
            return Err(ResourceError::NoMem(T::KIND));
        }
        let index = table.acquire().ok_or_else(|| {
            log::warn!("pool {:?}: global pool table exhausted", T::KIND);
            ResourceError::NoPool(T::KIND)
        })?;
        let base_adr = match heap.malloc(self.size * self.num_per_pool) {
            Ok(addr) => addr,
            Err(err) => {
                log::warn!("pool {:?}: no memory for a new pool: {}", T::KIND, err);
                table.release(index);
                return Err(ResourceError::NoMem(T::KIND));
            }
        };

        self.pools
            .insert(index, Pool::new(index, base_adr, self.num_per_pool));
        self.all.push_back(&mut AllPools(&mut self.pools), index);
        self.free.push_back(&mut FreePools(&mut self.pools), index);
        self.stats.on_grow(self.num_per_pool);
        log::debug!("pool {:?}: pool {} at {:#x}", T::KIND, index, base_adr);
        Ok(index)
    }

    /// Takes back the slot named by `id` and returns its value.
    ///
    /// Ids of another type, of a pool this type does not own, with an
    /// out-of-range slot, or naming a slot that is already free are
    /// rejected and nothing changes.
    pub fn release(&mut self, id: ResourceId) -> Result<T, ResourceError> {
        critical_section::with(|_| {
            if id.kind_tag() != T::KIND.tag() {
                log::error!("pool {:?}: foreign resource {}", T::KIND, id);
                return Err(ResourceError::ForeignResource(id));
            }
            let index = id.pool();
            let pool = self.pools.get_mut(&index).ok_or_else(|| {
                log::error!("pool {:?}: resource {} names a foreign pool", T::KIND, id);
                ResourceError::ForeignResource(id)
            })?;
            let slot = id.slot();
            if slot as usize >= pool.num {
                log::error!("pool {:?}: slot {} of {} out of range", T::KIND, slot, id);
                return Err(ResourceError::SlotOutOfRange(id));
            }
            let entry = &mut pool.slots[slot as usize];
            if entry.word != id.raw() || entry.value.is_none() {
                log::error!("pool {:?}: {} released twice", T::KIND, id);
                return Err(ResourceError::DoubleRelease(id));
            }
            let value = entry.value.take().ok_or(ResourceError::DoubleRelease(id))?;
            pool.push_free(slot);
            pool.free_num += 1;
            let was_full = pool.free_num == 1;
            if was_full {
                self.free.push_back(&mut FreePools(&mut self.pools), index);
            }
            self.stats.on_release();
            Ok(value)
        })
    }

    fn slot(&self, id: ResourceId) -> Option<&Slot<T>> {
        if id.kind_tag() != T::KIND.tag() {
            return None;
        }
        let pool = self.pools.get(&id.pool())?;
        pool.slots
            .get(id.slot() as usize)
            .filter(|entry| entry.word == id.raw())
    }

    /// Live resource named by `id`.
    pub fn get_by_id(&self, id: ResourceId) -> Option<&T> {
        self.slot(id).and_then(|entry| entry.value.as_ref())
    }

    pub fn get_by_id_mut(&mut self, id: ResourceId) -> Option<&mut T> {
        if id.kind_tag() != T::KIND.tag() {
            return None;
        }
        let pool = self.pools.get_mut(&id.pool())?;
        pool.slots
            .get_mut(id.slot() as usize)
            .filter(|entry| entry.word == id.raw())
            .and_then(|entry| entry.value.as_mut())
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.get_by_id(id).is_some()
    }

    /// Live resources, pool by pool in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceId, &T)> + '_ {
        self.pool_indices()
            .into_iter()
            .filter_map(move |index| self.pools.get(&index))
            .flat_map(|pool| {
                pool.slots.iter().filter_map(|entry| {
                    entry
                        .value
                        .as_ref()
                        .map(|value| (ResourceId::from_raw(entry.word), value))
                })
            })
    }

    /// Ids of the live resources.
    pub fn ids(&self) -> Vec<ResourceId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.stats.used_slots
    }

    pub fn is_empty(&self) -> bool {
        self.stats.used_slots == 0
    }
}

//! Buddy allocator over a fixed address range.
//!
//! The arena is cut into 128-byte basic blocks. Level `k` hands out blocks
//! of `2^k` basic blocks, up to [`MAX_LEVELS`] levels. Below the top level a
//! bit covers a buddy pair and is set when exactly one half of the pair is
//! free; at the top level a bit is one whole free block. Each level also
//! keeps a list of its bitmap words that have a set bit, sorted by word
//! index, so the lowest free block is found without scanning.
//!
//! A per-basic-block tag remembers the level a block was handed out at,
//! which is all `free` needs to recover the allocation size from an address.
//! Bookkeeping lives outside the arena, so every byte of it is allocatable.

use alloc::vec;
use alloc::vec::Vec;

use reef_core::bitmap::{self, find_first_bit_in_word, words_for, WORD_BITS};

use crate::MemError;

/// log2 of the basic block size
pub const BLOCK_SHIFT: u32 = 7;
/// Smallest allocatable unit in bytes
pub const BASIC_BLOCK_SIZE: usize = 1 << BLOCK_SHIFT;
/// Upper bound on the number of levels
pub const MAX_LEVELS: usize = 14;

/// Whether an arena can serve requests at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuddyState {
    /// The range could not host a single basic block. Terminal.
    NoAlloc,
    Ok,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    None,
    /// First basic block of a free block at this level.
    Free(u8),
    /// First basic block of a block handed out at this level.
    Used(u8),
}

#[derive(Debug, Clone)]
struct Level {
    bitmap: Vec<u32>,
    next: Vec<Option<usize>>,
    head: Option<usize>,
}

impl Level {
    fn new(bits: usize) -> Self {
        let words = words_for(bits.max(1));
        Self {
            bitmap: vec![0; words],
            next: vec![None; words],
            head: None,
        }
    }

    fn get(&self, bit: usize) -> bool {
        bitmap::get_bit(bit, &self.bitmap)
    }

    fn set(&mut self, bit: usize) {
        let word = bit / WORD_BITS;
        let was_empty = self.bitmap[word] == 0;
        bitmap::set_bit(bit, &mut self.bitmap);
        if was_empty {
            self.link(word);
        }
    }

    fn clear(&mut self, bit: usize) {
        let word = bit / WORD_BITS;
        bitmap::clear_bit(bit, &mut self.bitmap);
        if self.bitmap[word] == 0 {
            self.unlink(word);
        }
    }

    /// Lowest set bit of the first word on the free list.
    fn first_free(&self) -> Option<usize> {
        let word = self.head?;
        find_first_bit_in_word(self.bitmap[word], true).map(|bit| word * WORD_BITS + bit as usize)
    }

    fn link(&mut self, word: usize) {
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(current) = cursor {
            if current > word {
                break;
            }
            prev = Some(current);
            cursor = self.next[current];
        }
        self.next[word] = cursor;
        match prev {
            Some(prev) => self.next[prev] = Some(word),
            None => self.head = Some(word),
        }
    }

    fn unlink(&mut self, word: usize) {
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(current) = cursor {
            if current == word {
                let after = self.next[current].take();
                match prev {
                    Some(prev) => self.next[prev] = after,
                    None => self.head = after,
                }
                return;
            }
            prev = Some(current);
            cursor = self.next[current];
        }
    }
}

/// Power-of-two block allocator.
#[derive(Debug, Clone)]
pub struct BuddyAllocator {
    state: BuddyState,
    start: usize,
    end: usize,
    block_num: usize,
    free_num: usize,
    levels: Vec<Level>,
    tags: Vec<Tag>,
}

impl BuddyAllocator {
    /// Takes over `[start, end)`. Both bounds are aligned to 4 bytes first.
    pub fn new(start: usize, end: usize) -> Self {
        let start = (start + 3) & !3;
        let end = end & !3;
        if end <= start || end - start < BASIC_BLOCK_SIZE {
            log::warn!("buddy: arena {:#x}..{:#x} too small, allocator disabled", start, end);
            return Self {
                state: BuddyState::NoAlloc,
                start,
                end: start,
                block_num: 0,
                free_num: 0,
                levels: Vec::new(),
                tags: Vec::new(),
            };
        }

        let block_num = (end - start) >> BLOCK_SHIFT;
        let level_num = ((usize::BITS - block_num.leading_zeros()) as usize).min(MAX_LEVELS);
        let top = level_num - 1;
        let mut levels: Vec<Level> = (0..top)
            .map(|level| Level::new((block_num >> (level + 1)) + 1))
            .collect();
        levels.push(Level::new(block_num >> top));

        let mut allocator = Self {
            state: BuddyState::Ok,
            start,
            end: start + (block_num << BLOCK_SHIFT),
            block_num,
            free_num: block_num,
            levels,
            tags: vec![Tag::None; block_num],
        };
        allocator.mark_initial_free();
        log::debug!(
            "buddy: {} blocks of {} bytes at {:#x}, {} levels",
            block_num,
            BASIC_BLOCK_SIZE,
            start,
            level_num
        );
        allocator
    }

    /// Whole top-level blocks first, then the remainder greedily from the
    /// largest level down.
    fn mark_initial_free(&mut self) {
        let top = self.top();
        let top_blocks = self.block_num >> top;
        for index in 0..top_blocks {
            self.levels[top].set(index);
            self.tags[index << top] = Tag::Free(top as u8);
        }

        let mut offset = top_blocks << top;
        for level in (0..top).rev() {
            let size = 1 << level;
            if self.block_num - offset >= size {
                self.levels[level].set(offset >> (level + 1));
                self.tags[offset] = Tag::Free(level as u8);
                offset += size;
            }
        }
    }

    pub fn state(&self) -> BuddyState {
        self.state
    }

    /// First allocatable address.
    pub fn start(&self) -> usize {
        self.start
    }

    /// One past the last allocatable address.
    pub fn end(&self) -> usize {
        self.end
    }

    pub fn levels(&self) -> usize {
        self.levels.len()
    }

    /// Total basic blocks under management.
    pub fn block_count(&self) -> usize {
        self.block_num
    }

    /// Basic blocks currently free.
    pub fn free_blocks(&self) -> usize {
        self.free_num
    }

    pub fn free_bytes(&self) -> usize {
        self.free_num << BLOCK_SHIFT
    }

    fn top(&self) -> usize {
        self.levels.len() - 1
    }

    fn level_for(&self, size: usize) -> Option<usize> {
        let blocks = size.div_ceil(BASIC_BLOCK_SIZE).max(1);
        let level = blocks.checked_next_power_of_two()?.trailing_zeros() as usize;
        (level < self.levels.len()).then_some(level)
    }

    /// Size of the block a request of `size` bytes would receive, or zero
    /// when no block is large enough.
    pub fn malloc_size(&self, size: usize) -> usize {
        if self.state == BuddyState::NoAlloc {
            return 0;
        }
        self.level_for(size)
            .map(|level| BASIC_BLOCK_SIZE << level)
            .unwrap_or(0)
    }

    /// Allocates the smallest power-of-two block holding `size` bytes.
    pub fn malloc(&mut self, size: usize) -> Result<usize, MemError> {
        if self.state == BuddyState::NoAlloc {
            return Err(MemError::NoAlloc);
        }
        let level = self.level_for(size).ok_or(MemError::TooLarge(size))?;
        let count = 1usize << level;
        if count > self.free_num {
            log::warn!("buddy: {} bytes requested, {} free", size, self.free_bytes());
            return Err(MemError::OutOfMemory(size));
        }

        critical_section::with(|_| {
            let block = self.take(level).ok_or_else(|| {
                log::warn!("buddy: no contiguous block for {} bytes", size);
                MemError::OutOfMemory(size)
            })?;
            self.tags[block] = Tag::Used(level as u8);
            self.free_num -= count;
            log::trace!("buddy: level {} block {} allocated", level, block);
            Ok(self.start + (block << BLOCK_SHIFT))
        })
    }

    /// Takes a free block at `level`, splitting a larger one when needed.
    fn take(&mut self, level: usize) -> Option<usize> {
        let top = self.top();
        if level == top {
            let index = self.levels[top].first_free()?;
            self.levels[top].clear(index);
            let block = index << top;
            self.tags[block] = Tag::None;
            return Some(block);
        }

        if let Some(pair) = self.levels[level].first_free() {
            self.levels[level].clear(pair);
            let first = pair << (level + 1);
            let block = if self.tags[first] == Tag::Free(level as u8) {
                first
            } else {
                first + (1 << level)
            };
            debug_assert_eq!(self.tags[block], Tag::Free(level as u8));
            self.tags[block] = Tag::None;
            return Some(block);
        }

        // Split a parent: the first half is handed out, the second stays free.
        let parent = self.take(level + 1)?;
        self.levels[level].set(parent >> (level + 1));
        self.tags[parent + (1 << level)] = Tag::Free(level as u8);
        Some(parent)
    }

    /// Returns the block starting at `addr`.
    ///
    /// Addresses that are out of range, not block aligned, not the start of
    /// an allocation or already free are rejected without touching state.
    pub fn free(&mut self, addr: usize) -> Result<(), MemError> {
        if self.state == BuddyState::NoAlloc {
            return Err(MemError::NoAlloc);
        }
        if addr < self.start || addr >= self.end || (addr - self.start) % BASIC_BLOCK_SIZE != 0 {
            log::error!("buddy: invalid free address {:#x}", addr);
            return Err(MemError::InvalidAddress(addr));
        }

        let block = (addr - self.start) >> BLOCK_SHIFT;
        let level = match self.tags[block] {
            Tag::Used(level) => level as usize,
            Tag::Free(_) => {
                log::error!("buddy: {:#x} freed twice", addr);
                return Err(MemError::DoubleFree(addr));
            }
            Tag::None => {
                log::error!("buddy: {:#x} is not the start of an allocation", addr);
                return Err(MemError::InvalidAddress(addr));
            }
        };

        critical_section::with(|_| {
            self.release(block, level);
            self.free_num += 1 << level;
        });
        log::trace!("buddy: level {} block {} freed", level, block);
        Ok(())
    }

    /// Marks `block` free at `level` and merges upward while its buddy is free.
    fn release(&mut self, mut block: usize, mut level: usize) {
        let top = self.top();
        self.tags[block] = Tag::None;
        loop {
            if level == top {
                self.levels[top].set(block >> top);
                self.tags[block] = Tag::Free(top as u8);
                return;
            }
            let pair = block >> (level + 1);
            if !self.levels[level].get(pair) {
                self.levels[level].set(pair);
                self.tags[block] = Tag::Free(level as u8);
                return;
            }
            self.levels[level].clear(pair);
            let buddy = block ^ (1 << level);
            self.tags[buddy] = Tag::None;
            block = pair << (level + 1);
            level += 1;
        }
    }

    /// Size of the live allocation starting at `addr`.
    pub fn allocation_size(&self, addr: usize) -> Option<usize> {
        if addr < self.start || addr >= self.end {
            return None;
        }
        match self.tags.get((addr - self.start) >> BLOCK_SHIFT) {
            Some(Tag::Used(level)) => Some(BASIC_BLOCK_SIZE << level),
            _ => None,
        }
    }

    /// Dumps per-level bitmaps and free heads to the debug log.
    pub fn scan(&self) {
        for (index, level) in self.levels.iter().enumerate() {
            log::debug!(
                "buddy level {}: bitmap {:x?} free head {:?}",
                index,
                level.bitmap,
                level.head
            );
        }
        log::debug!("buddy free blocks: {}", self.free_num);
    }
}

//! Arbitrary-size allocator carved out of one buddy block.
//!
//! The span is a sequence of blocks, each led by a header word:
//!
//! ```text
//!  31                            8 7          1   0
//! +-------------------------------+------------+----+
//! |  block size in bytes (w/ hdr) | magic 0xcc | used|
//! +-------------------------------+------------+----+
//! ```
//!
//! Allocation is first fit from a roving offset, wrapping once to the
//! bottom of the span. Freeing merges with the following block and, after a
//! walk from the bottom, with the preceding one.

use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::buddy::BuddyAllocator;
use crate::MemError;

const MAGIC: u32 = 0xcc;
const MAGIC_MASK: u32 = 0xfe;
const USED: u32 = 0x1;
const SIZE_SHIFT: u32 = 8;
const HEADER: usize = 4;
/// Largest span a header can describe.
pub const MAX_SPAN: usize = (u32::MAX >> SIZE_SHIFT) as usize & !3;

#[inline]
fn header_valid(word: u32) -> bool {
    word & MAGIC_MASK == MAGIC
}

#[inline]
fn header_used(word: u32) -> bool {
    word & USED != 0
}

#[inline]
fn header_size(word: u32) -> usize {
    (word >> SIZE_SHIFT) as usize
}

#[inline]
fn used_header(size: usize) -> u32 {
    ((size as u32) << SIZE_SHIFT) | MAGIC | USED
}

#[inline]
fn free_header(size: usize) -> u32 {
    ((size as u32) << SIZE_SHIFT) | MAGIC
}

/// Whether the allocator obtained its span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mem2State {
    Disabled,
    Ok,
}

/// One block as seen by [`Mem2::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Address of the header word.
    pub addr: usize,
    /// Block size including the header.
    pub size: usize,
    pub used: bool,
}

#[derive(Debug)]
struct Arena {
    words: Vec<u32>,
    /// Byte offset of the block the next search starts at.
    rover: usize,
}

impl Arena {
    fn len(&self) -> usize {
        self.words.len() * HEADER
    }

    fn header(&self, offset: usize) -> u32 {
        self.words[offset / HEADER]
    }

    fn set_header(&mut self, offset: usize, word: u32) {
        self.words[offset / HEADER] = word;
    }

    /// Size of the well-formed block at `offset`.
    fn block_at(&self, offset: usize) -> Result<(usize, bool), usize> {
        let word = self.header(offset);
        let size = header_size(word);
        if !header_valid(word) || size == 0 || offset + size > self.len() {
            return Err(offset);
        }
        Ok((size, header_used(word)))
    }

    fn alloc(&mut self, need: usize) -> Result<Option<usize>, usize> {
        let len = self.len();
        let rover = self.rover;
        for (from, to) in [(rover, len), (0, rover)] {
            let mut offset = from;
            while offset < to {
                let (size, used) = self.block_at(offset)?;
                if !used && size >= need {
                    self.set_header(offset, used_header(need));
                    if size > need {
                        self.set_header(offset + need, free_header(size - need));
                    }
                    self.rover = if offset + need < len { offset + need } else { 0 };
                    return Ok(Some(offset));
                }
                offset += size;
            }
        }
        Ok(None)
    }

    /// Finds the block starting at `target` and the one before it.
    fn locate(&self, target: usize) -> Result<Option<Option<usize>>, usize> {
        let mut prev = None;
        let mut offset = 0;
        while offset < target {
            let (size, _) = self.block_at(offset)?;
            prev = Some(offset);
            offset += size;
        }
        Ok((offset == target).then_some(prev))
    }

    fn free(&mut self, offset: usize) -> Result<(), MemError> {
        let prev = match self.locate(offset) {
            Ok(Some(prev)) => prev,
            Ok(None) => return Err(MemError::InvalidAddress(offset)),
            Err(at) => return Err(MemError::Corrupted(at)),
        };
        let (mut size, used) = self.block_at(offset).map_err(MemError::Corrupted)?;
        if !used {
            return Err(MemError::DoubleFree(offset));
        }

        let next = offset + size;
        if next < self.len() {
            let (next_size, next_used) = self.block_at(next).map_err(MemError::Corrupted)?;
            if !next_used {
                size += next_size;
                self.set_header(next, 0);
            }
        }
        self.set_header(offset, free_header(size));
        self.rover = offset;

        if let Some(prev) = prev {
            let (prev_size, prev_used) = self.block_at(prev).map_err(MemError::Corrupted)?;
            if !prev_used {
                self.set_header(offset, 0);
                self.set_header(prev, free_header(prev_size + size));
                self.rover = prev;
            }
        }
        Ok(())
    }
}

/// Secondary allocator for small, infrequent, odd-sized requests.
#[derive(Debug)]
pub struct Mem2 {
    state: Mem2State,
    base: usize,
    arena: Mutex<Arena>,
}

impl Mem2 {
    /// Takes one block of about `size` bytes from `heap`.
    ///
    /// The allocator is [`Mem2State::Disabled`] when `size` is zero or the
    /// buddy allocator cannot serve the span.
    pub fn new(heap: &mut BuddyAllocator, size: usize) -> Self {
        let span = heap.malloc_size(size).min(MAX_SPAN);
        let base = if size == 0 || span == 0 {
            None
        } else {
            heap.malloc(span)
                .map_err(|err| log::warn!("mem2: no span of {} bytes: {}", span, err))
                .ok()
        };

        match base {
            Some(base) => {
                let mut words = vec![0u32; span / HEADER];
                words[0] = free_header(span);
                log::debug!("mem2: {} bytes at {:#x}", span, base);
                Self {
                    state: Mem2State::Ok,
                    base,
                    arena: Mutex::new(Arena { words, rover: 0 }),
                }
            }
            None => Self::disabled(),
        }
    }

    /// An allocator that fails every request.
    pub fn disabled() -> Self {
        Self {
            state: Mem2State::Disabled,
            base: 0,
            arena: Mutex::new(Arena {
                words: Vec::new(),
                rover: 0,
            }),
        }
    }

    pub fn state(&self) -> Mem2State {
        self.state
    }

    /// Address of the span.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Span length in bytes.
    pub fn span(&self) -> usize {
        self.arena.lock().len()
    }

    /// Allocates `size` bytes, rounded up to a word, and returns the
    /// payload address.
    pub fn malloc(&self, size: usize) -> Result<usize, MemError> {
        if self.state == Mem2State::Disabled {
            return Err(MemError::NoAlloc);
        }
        if size > MAX_SPAN - HEADER {
            return Err(MemError::TooLarge(size));
        }
        let need = ((size + 3) & !3) + HEADER;
        let mut arena = self.arena.try_lock().ok_or(MemError::Busy)?;
        match arena.alloc(need) {
            Ok(Some(offset)) => Ok(self.base + offset + HEADER),
            Ok(None) => {
                log::warn!("mem2: no free block for {} bytes", size);
                Err(MemError::OutOfMemory(size))
            }
            Err(offset) => {
                log::error!("mem2: corrupted header at {:#x}", self.base + offset);
                Err(MemError::Corrupted(self.base + offset))
            }
        }
    }

    /// Releases the allocation whose payload starts at `addr`.
    pub fn free(&self, addr: usize) -> Result<(), MemError> {
        if self.state == Mem2State::Disabled {
            return Err(MemError::NoAlloc);
        }
        let offset = self.offset_of(addr)?;
        let mut arena = self.arena.try_lock().ok_or(MemError::Busy)?;
        arena.free(offset).map_err(|err| {
            let err = self.rebase(err);
            log::error!("mem2: free of {:#x} rejected: {}", addr, err);
            err
        })
    }

    /// Copies `data` into the allocation at `addr`.
    pub fn write_words(&self, addr: usize, data: &[u32]) -> Result<(), MemError> {
        let offset = self.offset_of(addr)?;
        let mut arena = self.arena.lock();
        let start = Self::payload_of(&arena, offset, data.len()).map_err(|e| self.rebase(e))?;
        arena.words[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Copies the first `out.len()` words of the allocation at `addr`.
    pub fn read_words(&self, addr: usize, out: &mut [u32]) -> Result<(), MemError> {
        let offset = self.offset_of(addr)?;
        let arena = self.arena.lock();
        let start = Self::payload_of(&arena, offset, out.len()).map_err(|e| self.rebase(e))?;
        out.copy_from_slice(&arena.words[start..start + out.len()]);
        Ok(())
    }

    fn payload_of(arena: &Arena, offset: usize, words: usize) -> Result<usize, MemError> {
        if offset >= arena.len() {
            return Err(MemError::InvalidAddress(offset));
        }
        match arena.block_at(offset) {
            Ok((size, true)) if (size - HEADER) / HEADER >= words => Ok(offset / HEADER + 1),
            Ok((_, true)) => Err(MemError::TooLarge(words * HEADER)),
            Ok((_, false)) => Err(MemError::DoubleFree(offset)),
            Err(at) => Err(MemError::InvalidAddress(at)),
        }
    }

    fn offset_of(&self, addr: usize) -> Result<usize, MemError> {
        if self.state == Mem2State::Disabled {
            return Err(MemError::NoAlloc);
        }
        if addr < self.base + HEADER || (addr - self.base) % HEADER != 0 {
            log::error!("mem2: invalid address {:#x}", addr);
            return Err(MemError::InvalidAddress(addr));
        }
        let offset = addr - self.base - HEADER;
        if offset >= self.span() {
            log::error!("mem2: invalid address {:#x}", addr);
            return Err(MemError::InvalidAddress(addr));
        }
        Ok(offset)
    }

    /// Turns span offsets inside an error into absolute addresses.
    fn rebase(&self, err: MemError) -> MemError {
        match err {
            MemError::InvalidAddress(offset) => MemError::InvalidAddress(self.base + offset + HEADER),
            MemError::DoubleFree(offset) => MemError::DoubleFree(self.base + offset + HEADER),
            MemError::Corrupted(offset) => MemError::Corrupted(self.base + offset),
            other => other,
        }
    }

    /// Walks the span from the bottom.
    pub fn blocks(&self) -> Vec<BlockInfo> {
        let arena = self.arena.lock();
        let mut blocks = Vec::new();
        let mut offset = 0;
        while offset < arena.len() {
            match arena.block_at(offset) {
                Ok((size, used)) => {
                    blocks.push(BlockInfo {
                        addr: self.base + offset,
                        size,
                        used,
                    });
                    offset += size;
                }
                Err(at) => {
                    log::error!("mem2: corrupted header at {:#x}", self.base + at);
                    break;
                }
            }
        }
        blocks
    }

    /// Free bytes, headers included.
    pub fn free_bytes(&self) -> usize {
        self.blocks()
            .iter()
            .filter(|block| !block.used)
            .map(|block| block.size)
            .sum()
    }

    /// Dumps the block list to the debug log.
    pub fn scan(&self) {
        if self.state == Mem2State::Disabled {
            log::debug!("mem2: disabled");
            return;
        }
        for block in self.blocks() {
            log::debug!(
                "mem2: block {:#x} size {} {}",
                block.addr,
                block.size,
                if block.used { "used" } else { "free" }
            );
        }
    }

    /// Gives the span back to the buddy allocator.
    pub fn release(self, heap: &mut BuddyAllocator) -> Result<(), MemError> {
        match self.state {
            Mem2State::Ok => heap.free(self.base),
            Mem2State::Disabled => Ok(()),
        }
    }
}

//! Buddy allocator behavior through the public API.

use proptest::prelude::*;
use reef_mem::{BuddyAllocator, BuddyState, MemError, BASIC_BLOCK_SIZE};

const BASE: usize = 0x2000_0000;

fn arena(blocks: usize) -> BuddyAllocator {
    BuddyAllocator::new(BASE, BASE + blocks * BASIC_BLOCK_SIZE)
}

#[test]
fn sixteen_block_arena_splits_and_merges() {
    let mut heap = arena(16);
    assert_eq!(heap.state(), BuddyState::Ok);
    assert_eq!(heap.levels(), 5);

    let a = heap.malloc(100).unwrap();
    let b = heap.malloc(300).unwrap();
    let c = heap.malloc(BASIC_BLOCK_SIZE).unwrap();
    assert_eq!(heap.allocation_size(a), Some(128));
    assert_eq!(heap.allocation_size(b), Some(512));
    assert_eq!(heap.free_blocks(), 16 - 1 - 4 - 1);

    heap.free(b).unwrap();
    heap.free(a).unwrap();
    heap.free(c).unwrap();
    assert_eq!(heap.free_blocks(), 16);
    assert_eq!(heap.malloc(16 * BASIC_BLOCK_SIZE), Ok(BASE));
}

#[test]
fn freed_block_makes_room_for_a_larger_request() {
    let mut heap = arena(16);
    assert_eq!(heap.malloc_size(200), 256);

    let a = heap.malloc(200).unwrap();
    let b = heap.malloc(200).unwrap();
    assert_eq!(heap.allocation_size(a), Some(256));
    assert_eq!(heap.allocation_size(b), Some(256));
    assert!(a + 256 <= b || b + 256 <= a);

    heap.free(a).unwrap();
    assert_eq!(heap.malloc_size(500), 512);
    let c = heap.malloc(500).unwrap();
    assert_eq!(heap.allocation_size(c), Some(512));
    assert!(c + 512 <= b || b + 256 <= c);
    assert_eq!(heap.free_blocks(), 16 - 2 - 4);

    heap.free(b).unwrap();
    heap.free(c).unwrap();
    assert_eq!(heap.free_blocks(), 16);
}

#[test]
fn double_free_is_rejected_without_damage() {
    let mut heap = arena(16);
    let a = heap.malloc(1).unwrap();
    heap.free(a).unwrap();
    assert_eq!(heap.free(a), Err(MemError::DoubleFree(a)));
    assert_eq!(heap.free_blocks(), 16);
    assert_eq!(heap.malloc(16 * BASIC_BLOCK_SIZE), Ok(BASE));
}

#[test]
fn oversized_and_exhausted_requests_fail() {
    let mut heap = arena(16);
    assert_eq!(heap.malloc_size(17 * BASIC_BLOCK_SIZE), 0);
    assert_eq!(
        heap.malloc(17 * BASIC_BLOCK_SIZE),
        Err(MemError::TooLarge(17 * BASIC_BLOCK_SIZE))
    );
    heap.malloc(16 * BASIC_BLOCK_SIZE).unwrap();
    assert_eq!(heap.malloc(1), Err(MemError::OutOfMemory(1)));
}

#[test]
fn tiny_range_is_disabled() {
    let mut heap = BuddyAllocator::new(BASE, BASE + 100);
    assert_eq!(heap.state(), BuddyState::NoAlloc);
    assert_eq!(heap.malloc_size(1), 0);
    assert_eq!(heap.malloc(1), Err(MemError::NoAlloc));
}

#[test]
fn unaligned_bounds_are_rounded_inward() {
    let heap = BuddyAllocator::new(BASE + 1, BASE + 4 * BASIC_BLOCK_SIZE + 7);
    assert_eq!(heap.start(), BASE + 4);
    assert_eq!(heap.block_count(), 4);
}

proptest! {
    #[test]
    fn freeing_everything_restores_the_arena(
        sizes in prop::collection::vec(1usize..2048, 1..24),
        blocks in 8usize..64,
    ) {
        let mut heap = arena(blocks);
        let total = heap.free_blocks();

        let first: Vec<_> = sizes.iter().map(|&size| heap.malloc(size).ok()).collect();
        for addr in first.iter().rev().flatten() {
            prop_assert!(heap.free(*addr).is_ok());
        }
        prop_assert_eq!(heap.free_blocks(), total);

        let second: Vec<_> = sizes.iter().map(|&size| heap.malloc(size).ok()).collect();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn live_blocks_never_overlap(sizes in prop::collection::vec(1usize..1024, 1..32)) {
        let mut heap = arena(64);
        let mut live: Vec<(usize, usize)> = Vec::new();
        for size in sizes {
            if let Ok(addr) = heap.malloc(size) {
                let len = heap.allocation_size(addr).unwrap();
                prop_assert!(len >= size);
                prop_assert_eq!((addr - BASE) % len, 0);
                for &(other, other_len) in &live {
                    prop_assert!(addr + len <= other || other + other_len <= addr);
                }
                live.push((addr, len));
            }
        }
    }
}

//! Secondary allocator behavior through the public API.

use proptest::prelude::*;
use reef_mem::{BuddyAllocator, Mem2, Mem2State, MemError};

const BASE: usize = 0x4000_0000;

fn setup(span: usize) -> (BuddyAllocator, Mem2) {
    let mut heap = BuddyAllocator::new(BASE, BASE + 32 * 1024);
    let mem = Mem2::new(&mut heap, span);
    (heap, mem)
}

#[test]
fn span_larger_than_heap_disables() {
    let (heap, mem) = setup(64 * 1024);
    assert_eq!(mem.state(), Mem2State::Disabled);
    assert_eq!(mem.free(BASE), Err(MemError::NoAlloc));
    assert_eq!(heap.free_bytes(), 32 * 1024);
}

#[test]
fn roving_search_continues_after_last_allocation() {
    let (_heap, mem) = setup(1024);
    let a = mem.malloc(64).unwrap();
    let b = mem.malloc(64).unwrap();
    mem.free(a).unwrap();
    // The search resumes at the freed block, which fits again.
    assert_eq!(mem.malloc(64), Ok(a));
    let c = mem.malloc(64).unwrap();
    assert!(c > b);
}

#[test]
fn payload_writes_stay_inside_their_block() {
    let (_heap, mem) = setup(1024);
    let a = mem.malloc(16).unwrap();
    let b = mem.malloc(16).unwrap();
    mem.write_words(a, &[0; 4]).unwrap();
    assert_eq!(mem.write_words(a, &[0; 5]), Err(MemError::TooLarge(20)));
    assert_eq!(mem.read_words(b + 4, &mut [0; 1]), Err(MemError::InvalidAddress(b + 4)));
    mem.free(b).unwrap();
    mem.free(a).unwrap();
    assert_eq!(mem.blocks().len(), 1);
}

proptest! {
    #[test]
    fn blocks_tile_the_span(ops in prop::collection::vec((1usize..200, any::<bool>()), 1..40)) {
        let (_heap, mem) = setup(2048);
        let span = mem.span();
        let mut live = Vec::new();
        for (size, free_one) in ops {
            if free_one && !live.is_empty() {
                let addr = live.remove(size % live.len());
                prop_assert!(mem.free(addr).is_ok());
            } else if let Ok(addr) = mem.malloc(size) {
                live.push(addr);
            }
            let blocks = mem.blocks();
            prop_assert_eq!(blocks.iter().map(|b| b.size).sum::<usize>(), span);
            prop_assert!(blocks.windows(2).all(|w| w[0].used || w[1].used));
        }
        for addr in live {
            prop_assert!(mem.free(addr).is_ok());
        }
        prop_assert_eq!(mem.free_bytes(), span);
    }
}

mod common;

use common::{PAGE_SIZE, POOL_BASE, Pool, allocator, states};
use kernel_alloc::FrameAllocError;
use kernel_vmem::{FrameAlloc, PhysicalAddress};

#[test]
fn exhausting_the_pool_hands_out_every_page_once() {
    let pool = Pool::new(256);
    let mut states = states(8);
    let frames = allocator(&pool, &mut states, 8);

    let mut pages: Vec<_> = (0..256).map(|_| frames.alloc_4k().expect("page")).collect();
    assert_eq!(frames.alloc_4k(), None);
    assert_eq!(frames.allocate(0), Err(FrameAllocError::OutOfMemory));
    assert_eq!(frames.allocated_pages(), 256);

    pages.sort();
    pages.dedup();
    assert_eq!(pages.len(), 256);
    assert_eq!(pages[0].base(), POOL_BASE);

    for page in pages {
        frames.free_4k(page);
    }
    assert_eq!(frames.allocated_pages(), 0);
    assert_eq!(frames.verify(), Ok(()));
    assert_eq!(frames.allocate(8), Ok(POOL_BASE));
}

#[test]
fn zeroed_allocations_overwrite_stale_contents() {
    let pool = Pool::new(16);
    let mut states = states(4);
    let frames = allocator(&pool, &mut states, 4);

    let block = frames.allocate(2).unwrap();
    for i in 0..4 {
        pool.scribble(block + i * PAGE_SIZE, 0xA5);
    }
    assert_eq!(frames.free(block), Ok(2));

    let again = frames.allocate_zeroed(2).unwrap();
    assert_eq!(again, block);
    for i in 0..4 {
        assert!(pool.bytes(again + i * PAGE_SIZE).iter().all(|&b| b == 0));
    }

    pool.scribble(again, 0x5A);
    frames.free(again).unwrap();
    let page = frames.alloc_4k().expect("page");
    assert!(pool.bytes(page.base()).iter().all(|&b| b == 0));
}

#[test]
fn rejected_frees_leave_the_pool_intact() {
    let pool = Pool::new(16);
    let mut states = states(4);
    let frames = allocator(&pool, &mut states, 4);

    let block = frames.allocate(1).unwrap();
    assert_eq!(frames.free(block + PAGE_SIZE), Err(FrameAllocError::NotBlockStart(block + PAGE_SIZE)));
    let outside = PhysicalAddress::new(0x1000);
    assert_eq!(frames.free(outside), Err(FrameAllocError::OutOfRange(outside)));
    assert_eq!(frames.allocated_pages(), 2);

    assert_eq!(frames.free(block), Ok(1));
    assert_eq!(frames.free(block), Err(FrameAllocError::DoubleFree(block)));
    assert_eq!(frames.verify(), Ok(()));
}

#[test]
fn stats_track_allocations() {
    let pool = Pool::new(256);
    let mut states = states(8);
    let frames = allocator(&pool, &mut states, 8);

    assert_eq!(frames.stats().to_string(), "MemTotal: 1024 kB\nMemFree: 1024 kB\nMemUsed: 0 kB\n");

    let block = frames.allocate(3).unwrap();
    let stats = frames.stats();
    assert_eq!(stats.allocated_pages, 8);
    assert_eq!(stats.free_pages, 248);
    assert_eq!(stats.to_string(), "MemTotal: 1024 kB\nMemFree: 992 kB\nMemUsed: 32 kB\n");

    frames.free(block).unwrap();
    assert_eq!(frames.stats().free_pages, 256);
}

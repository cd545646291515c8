//! A simulated physical memory pool for host tests.

#![allow(dead_code, clippy::missing_panics_doc, clippy::must_use_candidate)]

use core::cell::UnsafeCell;
use kernel_alloc::FrameAllocator;
use kernel_alloc::buddy::{BuddyAllocator, NodeState, tree};
use kernel_vmem::{PhysMapper, PhysicalAddress};

pub const PAGE_SIZE: u32 = 4096;

/// Physical address of the first simulated frame.
pub const POOL_BASE: PhysicalAddress = PhysicalAddress::new(0x0040_0000);

#[repr(C, align(4096))]
struct Frame([u8; PAGE_SIZE as usize]);

/// `pages` frames starting at [`POOL_BASE`].
pub struct Pool {
    frames: Vec<UnsafeCell<Frame>>,
}

impl Pool {
    pub fn new(pages: usize) -> Self {
        Self {
            frames: (0..pages)
                .map(|_| UnsafeCell::new(Frame([0; PAGE_SIZE as usize])))
                .collect(),
        }
    }

    pub fn pages(&self) -> u32 {
        u32::try_from(self.frames.len()).unwrap()
    }

    /// Fill the frame at `pa` with `byte`.
    pub fn scribble(&self, pa: PhysicalAddress, byte: u8) {
        let frame: &mut [u8; PAGE_SIZE as usize] = unsafe { self.phys_to_mut(pa) };
        frame.fill(byte);
    }

    pub fn bytes(&self, pa: PhysicalAddress) -> &[u8; PAGE_SIZE as usize] {
        unsafe { self.phys_to_mut(pa) }
    }
}

impl PhysMapper for Pool {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let offset = pa.as_u32().checked_sub(POOL_BASE.as_u32()).expect("below the pool");
        let frame = (offset / PAGE_SIZE) as usize;
        let ptr = self.frames[frame].get().cast::<u8>();
        unsafe { &mut *ptr.add((offset % PAGE_SIZE) as usize).cast::<T>() }
    }
}

/// Node states for a pool of `2^max_order` pages.
pub fn states(max_order: u32) -> Vec<NodeState> {
    vec![NodeState::Free; tree::node_count(max_order)]
}

/// A frame allocator managing every page of `pool`.
pub fn allocator<'a>(pool: &'a Pool, states: &'a mut [NodeState], max_order: u32) -> FrameAllocator<'a, Pool> {
    let buddy = BuddyAllocator::new(states, POOL_BASE, max_order, pool.pages());
    FrameAllocator::new(buddy, pool)
}

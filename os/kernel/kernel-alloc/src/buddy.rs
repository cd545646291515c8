//! # Binary Buddy Allocator
//!
//! Hands out naturally aligned blocks of `2^order` physical pages from one
//! contiguous region. The state of every possible block lives in an implicit
//! binary tree (see [`tree`]); each node is one byte of [`NodeState`].
//!
//! ## Node states
//!
//! | State | Meaning |
//! |-------|---------|
//! | [`NodeState::Free`] | The whole block is available. |
//! | [`NodeState::Partial`] | Some, but not all, of the block is in use. |
//! | [`NodeState::Full`] | The whole block is in use. |
//!
//! An internal node is `Free` iff both children are `Free`, `Full` iff both
//! children are `Full`, and `Partial` otherwise. The one exception is the
//! block handed out by an allocation: it is `Full` while its own subtree
//! stays `Free`, which is how [`BuddyAllocator::free`] finds the allocated
//! unit without being told its order.
//!
//! ## Allocation
//!
//! A depth-first search from the root looks for a `Free` node of the requested
//! order. Inside a `Partial` node the search tries `Partial` children before
//! `Free` ones, so a partially used buddy pair is filled up before a free
//! block is split.

pub mod tree;

use core::fmt;
use kernel_info::memory::{PAGE_SHIFT, PAGE_SIZE};
use kernel_memory_addresses::PhysicalAddress;
use log::trace;

/// Largest order a 32-bit physical address space can hold (4 GiB).
pub const MAX_ORDER: u32 = u32::BITS - PAGE_SHIFT;

/// Allocation state of one block of the buddy tree.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum NodeState {
    #[default]
    Free = 0,
    Partial = 1,
    Full = 2,
}

impl NodeState {
    /// The state an internal node derives from its two children.
    #[inline]
    #[must_use]
    pub const fn combine(left: Self, right: Self) -> Self {
        match (left, right) {
            (Self::Free, Self::Free) => Self::Free,
            (Self::Full, Self::Full) => Self::Full,
            _ => Self::Partial,
        }
    }
}

/// Errors reported by the frame allocator.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameAllocError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("address {0} is outside the managed region")]
    OutOfRange(PhysicalAddress),
    #[error("address {0} is not the start of an allocated block")]
    NotBlockStart(PhysicalAddress),
    #[error("double free of {0}")]
    DoubleFree(PhysicalAddress),
    #[error("buddy tree is inconsistent at node {index}")]
    CorruptTree { index: usize },
}

/// Size in bytes of a block of order `order`.
///
/// ```rust
/// # use kernel_alloc::buddy::frame_size;
/// assert_eq!(frame_size(0), 4096);
/// assert_eq!(frame_size(8), 1 << 20);
/// ```
#[inline]
#[must_use]
pub const fn frame_size(order: u32) -> u64 {
    (PAGE_SIZE as u64) << order
}

/// Smallest order whose block holds `pages` pages.
///
/// ```rust
/// # use kernel_alloc::buddy::order_for_pages;
/// assert_eq!(order_for_pages(0), 0);
/// assert_eq!(order_for_pages(1), 0);
/// assert_eq!(order_for_pages(3), 2);
/// assert_eq!(order_for_pages(256), 8);
/// ```
#[inline]
#[must_use]
pub const fn order_for_pages(pages: u32) -> u32 {
    if pages <= 1 {
        0
    } else {
        u32::BITS - (pages - 1).leading_zeros()
    }
}

/// Smallest order whose block covers `bytes` bytes.
///
/// ```rust
/// # use kernel_alloc::buddy::max_order_for;
/// assert_eq!(max_order_for(1 << 20), 8);
/// assert_eq!(max_order_for((1 << 20) + 1), 9);
/// ```
#[inline]
#[must_use]
pub const fn max_order_for(bytes: u32) -> u32 {
    order_for_pages(bytes.div_ceil(PAGE_SIZE))
}

/// Page counters of an allocator.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MemoryStats {
    /// Pages backed by memory.
    pub total_pages: u32,
    /// Pages currently handed out.
    pub allocated_pages: u32,
    /// Pages available for allocation (possibly fragmented).
    pub free_pages: u32,
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kib = |pages: u32| u64::from(pages) * u64::from(PAGE_SIZE / 1024);
        writeln!(f, "MemTotal: {} kB", kib(self.total_pages))?;
        writeln!(f, "MemFree: {} kB", kib(self.free_pages))?;
        writeln!(f, "MemUsed: {} kB", kib(self.allocated_pages))
    }
}

/// Buddy allocator over `2^max_order` pages starting at `base`.
///
/// The node states are borrowed, so the caller decides where the metadata
/// lives (a reserved physical region in the kernel, a vector in tests).
pub struct BuddyAllocator<'s> {
    states: &'s mut [NodeState],
    base: PhysicalAddress,
    max_order: u32,
    usable_pages: u32,
    allocated_pages: u32,
}

impl<'s> BuddyAllocator<'s> {
    /// Bytes of node state needed for a tree of order `max_order`.
    #[inline]
    #[must_use]
    pub const fn metadata_size(max_order: u32) -> usize {
        tree::node_count(max_order) * size_of::<NodeState>()
    }

    /// Create an allocator managing `usable_pages` pages from `base`.
    ///
    /// Every node is reset to `Free`. Pages of the tree beyond `usable_pages`
    /// are reserved up front so they are never handed out.
    ///
    /// # Panics
    /// - If `max_order` exceeds [`MAX_ORDER`] or `states` holds fewer than
    ///   [`tree::node_count`] entries.
    /// - If the usable region would run past the top of the address space.
    pub fn new(states: &'s mut [NodeState], base: PhysicalAddress, max_order: u32, usable_pages: u32) -> Self {
        assert!(max_order <= MAX_ORDER, "order {max_order} exceeds {MAX_ORDER}");
        let nodes = tree::node_count(max_order);
        assert!(
            states.len() >= nodes,
            "buddy tree of order {max_order} needs {nodes} nodes, got {}",
            states.len()
        );
        debug_assert!(base.is_page_aligned());

        let usable_pages = usable_pages.min(1 << max_order);
        assert!(
            u64::from(base.as_u32()) + (u64::from(usable_pages) << PAGE_SHIFT) <= 1 << 32,
            "managed region starting at {base} exceeds the address space"
        );

        let states = &mut states[..nodes];
        states.fill(NodeState::Free);

        let mut allocator = Self {
            states,
            base,
            max_order,
            usable_pages,
            allocated_pages: 0,
        };
        allocator.reserve_tail();
        allocator
    }

    /// Mark the tree pages `[usable_pages, 2^max_order)` as in use.
    fn reserve_tail(&mut self) {
        let total = 1u32 << self.max_order;
        let mut page = self.usable_pages;
        while page < total {
            let order = page.trailing_zeros().min(self.max_order);
            self.set_state(tree::node_at(page, order, self.max_order), NodeState::Full);
            page += 1 << order;
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn max_order(&self) -> u32 {
        self.max_order
    }

    #[inline]
    #[must_use]
    pub const fn usable_pages(&self) -> u32 {
        self.usable_pages
    }

    #[inline]
    #[must_use]
    pub const fn allocated_pages(&self) -> u32 {
        self.allocated_pages
    }

    #[must_use]
    pub const fn stats(&self) -> MemoryStats {
        MemoryStats {
            total_pages: self.usable_pages,
            allocated_pages: self.allocated_pages,
            free_pages: self.usable_pages - self.allocated_pages,
        }
    }

    /// State of node `index`.
    #[inline]
    #[must_use]
    pub fn state(&self, index: usize) -> NodeState {
        self.states[index]
    }

    /// Allocate a block of `2^order` pages.
    ///
    /// The returned address is aligned to the block size.
    ///
    /// # Errors
    /// [`FrameAllocError::OutOfMemory`] if no free block of that order exists.
    pub fn allocate(&mut self, order: u32) -> Result<PhysicalAddress, FrameAllocError> {
        if order > self.max_order {
            return Err(FrameAllocError::OutOfMemory);
        }

        let index = self.find_free(0, order).ok_or(FrameAllocError::OutOfMemory)?;
        self.set_state(index, NodeState::Full);
        self.allocated_pages += 1 << order;

        let addr = self.block_start(index);
        trace!("Allocated order-{order} block at {addr}");
        Ok(addr)
    }

    /// Depth-first search below `index` for a free node of `order`.
    fn find_free(&self, index: usize, order: u32) -> Option<usize> {
        let node_order = tree::order_of(index, self.max_order);
        match self.states[index] {
            NodeState::Full => None,
            NodeState::Free => {
                // The whole subtree is free: its leftmost node of `order` fits.
                let depth = node_order - order;
                Some(((index + 1) << depth) - 1)
            }
            NodeState::Partial if node_order > order => {
                let (left, right) = (tree::left(index), tree::right(index));
                let visit = if self.states[right] == NodeState::Partial
                    && self.states[left] != NodeState::Partial
                {
                    [right, left]
                } else {
                    [left, right]
                };
                visit.into_iter().find_map(|child| self.find_free(child, order))
            }
            NodeState::Partial => None,
        }
    }

    /// Return the block starting at `addr`, merging it with free buddies.
    ///
    /// Returns the order of the freed block.
    ///
    /// # Errors
    /// - [`FrameAllocError::OutOfRange`] if `addr` is not in the usable region.
    /// - [`FrameAllocError::NotBlockStart`] if `addr` points into, but not at
    ///   the start of, an allocated block.
    /// - [`FrameAllocError::DoubleFree`] if the block containing `addr` is free.
    /// - [`FrameAllocError::CorruptTree`] if the walk hits an impossible state.
    pub fn free(&mut self, addr: PhysicalAddress) -> Result<u32, FrameAllocError> {
        let offset = addr
            .as_u32()
            .checked_sub(self.base.as_u32())
            .filter(|&offset| (offset >> PAGE_SHIFT) < self.usable_pages)
            .ok_or(FrameAllocError::OutOfRange(addr))?;
        let page = offset >> PAGE_SHIFT;

        let index = self.allocated_unit(page, addr)?;
        if self.block_start(index) != addr {
            return Err(FrameAllocError::NotBlockStart(addr));
        }

        let order = tree::order_of(index, self.max_order);
        self.set_state(index, NodeState::Free);
        self.allocated_pages -= 1 << order;
        trace!("Freed order-{order} block at {addr}");
        Ok(order)
    }

    /// Walk from the root to the allocated block containing `page`.
    fn allocated_unit(&self, page: u32, addr: PhysicalAddress) -> Result<usize, FrameAllocError> {
        let mut index = 0;
        loop {
            let order = tree::order_of(index, self.max_order);
            let (left, right) = (tree::left(index), tree::right(index));
            let descend = match self.states[index] {
                NodeState::Free => return Err(FrameAllocError::DoubleFree(addr)),
                NodeState::Partial if order == 0 => {
                    return Err(FrameAllocError::CorruptTree { index });
                }
                NodeState::Partial => true,
                NodeState::Full => {
                    order > 0
                        && self.states[left] == NodeState::Full
                        && self.states[right] == NodeState::Full
                }
            };
            if !descend {
                return Ok(index);
            }
            index = if page & (1 << (order - 1)) == 0 { left } else { right };
        }
    }

    /// Set node `index` and re-derive every ancestor up to the root.
    ///
    /// Freeing a node whose buddy is free collapses the pair into a free
    /// parent, and so on upwards: this is the buddy merge.
    fn set_state(&mut self, index: usize, state: NodeState) {
        self.states[index] = state;
        let mut child = index;
        while let Some(parent) = tree::parent(child) {
            let derived = NodeState::combine(
                self.states[tree::left(parent)],
                self.states[tree::right(parent)],
            );
            self.states[parent] = derived;
            child = parent;
        }
    }

    fn block_start(&self, index: usize) -> PhysicalAddress {
        let page = tree::first_page(index, self.max_order);
        self.base + (page << PAGE_SHIFT)
    }

    /// Check every internal node against its children.
    ///
    /// # Errors
    /// [`FrameAllocError::CorruptTree`] naming the first inconsistent node.
    pub fn verify(&self) -> Result<(), FrameAllocError> {
        for index in 0..tree::node_count(self.max_order) {
            let state = self.states[index];
            if tree::order_of(index, self.max_order) == 0 {
                if state == NodeState::Partial {
                    return Err(FrameAllocError::CorruptTree { index });
                }
                continue;
            }

            let derived = NodeState::combine(
                self.states[tree::left(index)],
                self.states[tree::right(index)],
            );
            let allocated_unit = state == NodeState::Full && derived == NodeState::Free;
            if state != derived && !allocated_unit {
                return Err(FrameAllocError::CorruptTree { index });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: PhysicalAddress = PhysicalAddress::new(0x0040_0000);

    fn states(max_order: u32) -> Vec<NodeState> {
        vec![NodeState::Free; tree::node_count(max_order)]
    }

    #[test]
    fn one_mebibyte_pool_exhausts_after_256_pages() {
        let mut nodes = states(8);
        let mut buddy = BuddyAllocator::new(&mut nodes, BASE, 8, 256);

        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..256 {
            let addr = buddy.allocate(0).expect("page");
            assert!(addr.is_page_aligned());
            assert!(addr >= BASE && addr.as_u32() < BASE.as_u32() + (1 << 20));
            assert!(seen.insert(addr), "{addr} handed out twice");
        }
        assert_eq!(buddy.allocate(0), Err(FrameAllocError::OutOfMemory));
        assert_eq!(buddy.allocated_pages(), 256);
        assert_eq!(buddy.state(0), NodeState::Full);
        buddy.verify().expect("consistent tree");
    }

    #[test]
    fn whole_pool_is_one_block() {
        let mut nodes = states(8);
        let mut buddy = BuddyAllocator::new(&mut nodes, BASE, 8, 256);

        assert_eq!(buddy.allocate(8), Ok(BASE));
        assert_eq!(buddy.allocate(8), Err(FrameAllocError::OutOfMemory));
        assert_eq!(buddy.allocate(0), Err(FrameAllocError::OutOfMemory));
        assert_eq!(buddy.allocate(9), Err(FrameAllocError::OutOfMemory));

        assert_eq!(buddy.free(BASE), Ok(8));
        assert_eq!(buddy.state(0), NodeState::Free);
    }

    #[test]
    fn blocks_are_aligned_and_disjoint() {
        let mut nodes = states(8);
        let mut buddy = BuddyAllocator::new(&mut nodes, BASE, 8, 256);

        let mut blocks = Vec::new();
        for order in [3, 0, 5, 1, 0, 2, 4, 0, 3] {
            let addr = buddy.allocate(order).expect("block");
            let size = frame_size(order);
            assert_eq!(u64::from(addr.as_u32() - BASE.as_u32()) % size, 0);
            blocks.push((u64::from(addr.as_u32()), size));
        }

        for (i, &(a, a_len)) in blocks.iter().enumerate() {
            for &(b, b_len) in &blocks[i + 1..] {
                assert!(a + a_len <= b || b + b_len <= a, "{a:#x} overlaps {b:#x}");
            }
        }
        buddy.verify().expect("consistent tree");
    }

    #[test]
    fn free_merges_back_to_identical_tree() {
        let mut nodes = states(6);
        let mut buddy = BuddyAllocator::new(&mut nodes, BASE, 6, 64);
        let keep = buddy.allocate(2).expect("block");
        let before = buddy.states.to_vec();

        let addr = buddy.allocate(1).expect("block");
        assert_eq!(buddy.free(addr), Ok(1));
        assert_eq!(buddy.states, &before[..]);

        assert_eq!(buddy.allocate(1), Ok(addr));
        buddy.free(addr).expect("free");
        buddy.free(keep).expect("free");
        assert!(buddy.states.iter().all(|&s| s == NodeState::Free));
        assert_eq!(buddy.allocated_pages(), 0);
    }

    #[test]
    fn partial_pairs_are_reused_before_splitting() {
        let mut nodes = states(4);
        let mut buddy = BuddyAllocator::new(&mut nodes, BASE, 4, 16);

        let half = buddy.allocate(3).expect("left half");
        assert_eq!(buddy.allocate(0), Ok(BASE + 8 * PAGE_SIZE));
        buddy.free(half).expect("free");

        // The left half is free again, but the used right half is filled first.
        assert_eq!(buddy.state(1), NodeState::Free);
        assert_eq!(buddy.state(2), NodeState::Partial);
        assert_eq!(buddy.allocate(0), Ok(BASE + 9 * PAGE_SIZE));
        assert_eq!(buddy.state(1), NodeState::Free);
    }

    #[test]
    fn double_free_and_foreign_addresses_are_rejected() {
        let mut nodes = states(4);
        let mut buddy = BuddyAllocator::new(&mut nodes, BASE, 4, 16);
        let addr = buddy.allocate(2).expect("block");

        assert_eq!(
            buddy.free(addr + PAGE_SIZE),
            Err(FrameAllocError::NotBlockStart(addr + PAGE_SIZE))
        );
        assert_eq!(
            buddy.free(PhysicalAddress::new(0x1000)),
            Err(FrameAllocError::OutOfRange(PhysicalAddress::new(0x1000)))
        );
        let past_end = BASE + 16 * PAGE_SIZE;
        assert_eq!(buddy.free(past_end), Err(FrameAllocError::OutOfRange(past_end)));

        buddy.free(addr).expect("free");
        assert_eq!(buddy.free(addr), Err(FrameAllocError::DoubleFree(addr)));
        assert_eq!(buddy.allocated_pages(), 0);
    }

    #[test]
    fn pages_beyond_usable_memory_are_reserved() {
        let mut nodes = states(4);
        let mut buddy = BuddyAllocator::new(&mut nodes, BASE, 4, 11);
        buddy.verify().expect("consistent tree");
        assert_eq!(buddy.stats().free_pages, 11);

        assert_eq!(buddy.allocate(4), Err(FrameAllocError::OutOfMemory));
        assert_eq!(buddy.allocate(3), Ok(BASE));

        let mut pages = Vec::new();
        while let Ok(addr) = buddy.allocate(0) {
            pages.push(addr);
        }
        assert_eq!(pages.len(), 3);
        assert!(pages.iter().all(|a| a.as_u32() < BASE.as_u32() + 11 * PAGE_SIZE));
        assert_eq!(buddy.allocated_pages(), 11);

        let tail = BASE + 12 * PAGE_SIZE;
        assert_eq!(buddy.free(tail), Err(FrameAllocError::OutOfRange(tail)));
    }

    /// xorshift64; a fixed seed keeps failures reproducible.
    struct XorShift(u64);

    impl XorShift {
        fn below(&mut self, n: usize) -> usize {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            usize::try_from(x % n as u64).unwrap()
        }
    }

    #[test]
    fn random_interleavings_keep_the_tree_consistent() {
        for usable in [256, 200, 255, 1, 129] {
            let mut nodes = states(8);
            let mut buddy = BuddyAllocator::new(&mut nodes, BASE, 8, usable);
            let mut rng = XorShift(0x9E37_79B9_7F4A_7C15 ^ u64::from(usable));
            let end = u64::from(BASE.as_u32()) + (u64::from(usable) << PAGE_SHIFT);
            let mut live: Vec<(PhysicalAddress, u32)> = Vec::new();

            for step in 0..4000 {
                if !live.is_empty() && rng.below(3) == 0 {
                    let (addr, order) = live.swap_remove(rng.below(live.len()));
                    assert_eq!(buddy.free(addr), Ok(order), "step {step}: free {addr}");
                } else {
                    let order = u32::try_from(rng.below(5)).unwrap();
                    if let Ok(addr) = buddy.allocate(order) {
                        let start = u64::from(addr.as_u32());
                        let size = frame_size(order);
                        assert_eq!((start - u64::from(BASE.as_u32())) % size, 0, "step {step}");
                        assert!(start + size <= end, "step {step}: {addr} past usable memory");
                        for &(other, other_order) in &live {
                            let b = u64::from(other.as_u32());
                            assert!(
                                start + size <= b || b + frame_size(other_order) <= start,
                                "step {step}: {addr} overlaps {other}"
                            );
                        }
                        live.push((addr, order));
                    }
                }

                assert_eq!(buddy.verify(), Ok(()), "step {step}");
                let pages: u32 = live.iter().map(|&(_, order)| 1 << order).sum();
                assert_eq!(buddy.allocated_pages(), pages, "step {step}");
            }

            for (addr, order) in live {
                assert_eq!(buddy.free(addr), Ok(order));
            }
            assert_eq!(buddy.allocated_pages(), 0);
            assert_eq!(buddy.allocate(0), Ok(BASE));
        }
    }

    #[test]
    fn verify_detects_corruption() {
        let mut nodes = states(3);
        let mut buddy = BuddyAllocator::new(&mut nodes, BASE, 3, 8);
        buddy.allocate(0).expect("page");
        buddy.verify().expect("consistent tree");

        buddy.states[2] = NodeState::Partial;
        assert_eq!(buddy.verify(), Err(FrameAllocError::CorruptTree { index: 2 }));
    }

    #[test]
    fn stats_render_as_meminfo() {
        let stats = MemoryStats {
            total_pages: 256,
            allocated_pages: 3,
            free_pages: 253,
        };
        assert_eq!(
            stats.to_string(),
            "MemTotal: 1024 kB\nMemFree: 1012 kB\nMemUsed: 12 kB\n"
        );
    }

    #[test]
    fn order_helpers() {
        assert_eq!(order_for_pages(2), 1);
        assert_eq!(order_for_pages(5), 3);
        assert_eq!(max_order_for(4096), 0);
        assert_eq!(max_order_for(4097), 1);
        assert_eq!(max_order_for(u32::MAX), MAX_ORDER);
        assert_eq!(frame_size(MAX_ORDER), 1 << 32);
    }
}

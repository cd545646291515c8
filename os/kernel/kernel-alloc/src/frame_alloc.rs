//! # Physical Frame Allocator
//!
//! [`FrameAllocator`] wraps a [`BuddyAllocator`] in a spin lock that also
//! masks local interrupts, so allocations are atomic with respect to other
//! CPUs and to interrupt handlers that allocate themselves (a page-fault
//! handler, for instance).
//!
//! The kernel uses one process-wide instance, created by [`init`] from the
//! boot memory map and reachable through [`global`]:
//!
//! ```text
//!  KERNEL_HEAP_BEGIN   FRAME_POOL_BEGIN                              memory_end
//!  │ kernel heap       │ node states │ managed frames ...            │
//!  └───────────────────┴─────────────┴───────────────────────────────┘
//!                                     ▲ page aligned
//! ```

use crate::buddy::{BuddyAllocator, FrameAllocError, MemoryStats, NodeState, max_order_for, tree};
use crate::phys_mapper::{IDENTITY_MAPPER, IdentityPhysMapper};
use kernel_info::boot::MemoryInfo;
use kernel_info::memory::{PAGE_SHIFT, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};
use kernel_sync::{SpinMutex, SyncOnceCell};
use kernel_vmem::{FrameAlloc, PhysMapper};
use log::{error, info, warn};

/// Interrupt-safe, lock-protected buddy allocator.
pub struct FrameAllocator<'a, M: PhysMapper> {
    buddy: SpinMutex<BuddyAllocator<'a>>,
    mapper: &'a M,
}

impl<'a, M: PhysMapper> FrameAllocator<'a, M> {
    /// Wrap `buddy`; `mapper` is used to zero-fill allocated frames.
    pub const fn new(buddy: BuddyAllocator<'a>, mapper: &'a M) -> Self {
        Self {
            buddy: SpinMutex::new(buddy),
            mapper,
        }
    }

    /// Allocate `2^order` contiguous pages.
    ///
    /// # Errors
    /// [`FrameAllocError::OutOfMemory`] if no block of that order is free.
    pub fn allocate(&self, order: u32) -> Result<PhysicalAddress, FrameAllocError> {
        self.buddy.lock_irq().allocate(order)
    }

    /// Allocate `2^order` contiguous pages and fill them with zeros.
    ///
    /// # Errors
    /// See [`allocate`](Self::allocate).
    pub fn allocate_zeroed(&self, order: u32) -> Result<PhysicalAddress, FrameAllocError> {
        let addr = self.allocate(order)?;
        let mut page = addr;
        for _ in 0..1u32 << order {
            // SAFETY: the block was just handed out to us and is not aliased.
            let bytes: &mut [u8; PAGE_SIZE as usize] = unsafe { self.mapper.phys_to_mut(page) };
            bytes.fill(0);
            page += PAGE_SIZE;
        }
        Ok(addr)
    }

    /// Return the block starting at `addr`. Returns the order of the block.
    ///
    /// # Errors
    /// See [`BuddyAllocator::free`]. The allocator is unchanged on error.
    pub fn free(&self, addr: PhysicalAddress) -> Result<u32, FrameAllocError> {
        let result = self.buddy.lock_irq().free(addr);
        if let Err(e) = result {
            warn!("Rejected free of {addr}: {e}");
        }
        result
    }

    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        self.buddy.lock_irq().stats()
    }

    #[must_use]
    pub fn allocated_pages(&self) -> u32 {
        self.buddy.lock_irq().allocated_pages()
    }

    #[must_use]
    pub fn max_order(&self) -> u32 {
        self.buddy.lock_irq().max_order()
    }

    /// Check the consistency of the buddy tree.
    ///
    /// # Errors
    /// [`FrameAllocError::CorruptTree`] naming the first inconsistent node.
    pub fn verify(&self) -> Result<(), FrameAllocError> {
        self.buddy.lock_irq().verify()
    }
}

impl<M: PhysMapper> FrameAlloc for FrameAllocator<'_, M> {
    fn alloc_4k(&self) -> Option<PhysicalPage> {
        self.allocate_zeroed(0).ok().map(PhysicalAddress::page)
    }

    fn free_4k(&self, page: PhysicalPage) {
        let result = self.free(page.base());
        debug_assert!(result.is_ok(), "Invalid page frame release: {result:?}");
        if let Err(e) = result {
            error!("Invalid page frame release: {e}");
        }
    }
}

/// Placement of the process-wide allocator in physical memory.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PoolLayout {
    /// Start of the node state array.
    pub metadata: PhysicalAddress,
    /// Size of the node state array in bytes.
    pub metadata_size: usize,
    /// First managed frame.
    pub base: PhysicalAddress,
    pub max_order: u32,
    /// Frames between `base` and the end of memory.
    pub usable_pages: u32,
}

impl PoolLayout {
    /// Compute the layout for the memory described by `info`.
    ///
    /// `max_order` covers all memory above the frame pool begin; the node
    /// states are carved from the start of that region and the managed frames
    /// follow on the next page boundary.
    ///
    /// Returns `None` if nothing is left to manage after the metadata.
    #[must_use]
    pub fn for_memory(info: &MemoryInfo) -> Option<Self> {
        let metadata = info.frame_pool_begin();
        let max_order = max_order_for(info.available_memory());
        let metadata_size = BuddyAllocator::metadata_size(max_order);

        let page_size = u64::from(PAGE_SIZE);
        let base = (u64::from(metadata.as_u32()) + metadata_size as u64).next_multiple_of(page_size);
        let end = u64::from(info.memory_end.as_u32()) & !(page_size - 1);
        if base >= end {
            return None;
        }

        Some(Self {
            metadata,
            metadata_size,
            base: PhysicalAddress::new(u32::try_from(base).ok()?),
            max_order,
            usable_pages: u32::try_from((end - base) >> PAGE_SHIFT).ok()?,
        })
    }
}

static FRAME_ALLOCATOR: SyncOnceCell<FrameAllocator<'static, IdentityPhysMapper>> =
    SyncOnceCell::new();

/// Create the process-wide frame allocator from the boot memory map.
///
/// Must run once, while the frame pool is identity mapped (or paging is off).
///
/// # Panics
/// If called twice, or if the memory map leaves no room for the allocator.
/// The kernel cannot continue booting in either case.
pub fn init(info: &MemoryInfo) -> &'static FrameAllocator<'static, IdentityPhysMapper> {
    assert!(FRAME_ALLOCATOR.get().is_none(), "Frame allocator initialized twice");
    let Some(layout) = PoolLayout::for_memory(info) else {
        panic!(
            "Not enough memory for the frame allocator (memory ends at {})",
            info.memory_end
        );
    };

    let nodes = tree::node_count(layout.max_order);
    // SAFETY: the metadata region lies in identity-mapped memory reserved for
    // the allocator. Zero bytes are valid `NodeState::Free` values.
    let states = unsafe {
        let ptr = core::ptr::from_mut(IDENTITY_MAPPER.phys_to_mut::<u8>(layout.metadata))
            .cast::<NodeState>();
        core::ptr::write_bytes(ptr, 0, nodes);
        core::slice::from_raw_parts_mut(ptr, nodes)
    };

    let buddy = BuddyAllocator::new(states, layout.base, layout.max_order, layout.usable_pages);
    info!(
        "Frame allocator: {} pages from {} (max order {}, {} bytes of metadata at {})",
        layout.usable_pages, layout.base, layout.max_order, layout.metadata_size, layout.metadata
    );

    let Ok(allocator) = FRAME_ALLOCATOR.set(FrameAllocator::new(buddy, &IDENTITY_MAPPER)) else {
        panic!("Frame allocator initialized twice");
    };
    allocator
}

/// The process-wide frame allocator, once [`init`] has run.
#[must_use]
pub fn global() -> Option<&'static FrameAllocator<'static, IdentityPhysMapper>> {
    FRAME_ALLOCATOR.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::memory::FRAME_POOL_BEGIN;

    #[test]
    fn layout_places_frames_after_metadata() {
        // 4 MiB of RAM: 1 MiB above the pool begin.
        let info = MemoryInfo::new(PhysicalAddress::new(FRAME_POOL_BEGIN + (1 << 20)));
        let layout = PoolLayout::for_memory(&info).expect("layout");

        assert_eq!(layout.metadata.as_u32(), FRAME_POOL_BEGIN);
        assert_eq!(layout.max_order, 8);
        assert_eq!(layout.metadata_size, 511);
        assert_eq!(layout.base.as_u32(), FRAME_POOL_BEGIN + PAGE_SIZE);
        assert_eq!(layout.usable_pages, 255);
    }

    #[test]
    fn layout_ignores_partial_last_page() {
        let info = MemoryInfo::new(PhysicalAddress::new(FRAME_POOL_BEGIN + 3 * PAGE_SIZE + 12));
        let layout = PoolLayout::for_memory(&info).expect("layout");
        assert_eq!(layout.usable_pages, 2);
        assert_eq!(layout.max_order, 2);
    }

    #[test]
    fn layout_requires_room_after_metadata() {
        let info = MemoryInfo::new(PhysicalAddress::new(FRAME_POOL_BEGIN + PAGE_SIZE));
        assert_eq!(PoolLayout::for_memory(&info), None);

        let info = MemoryInfo::new(PhysicalAddress::new(FRAME_POOL_BEGIN - PAGE_SIZE));
        assert_eq!(PoolLayout::for_memory(&info), None);
    }
}

//! # Memory Layout

pub use kernel_memory_addresses::{PAGE_SHIFT, PAGE_SIZE};

/// Number of entries in a page directory and in a page table.
pub const TABLE_ENTRIES: usize = 1024;

/// Size of a single directory or table entry in bytes.
pub const ENTRY_SIZE: usize = 4;

/// Start of the reserved kernel heap region.
pub const KERNEL_HEAP_BEGIN: u32 = 0x0020_0000; // 2 MiB

/// Size of the reserved kernel heap region.
pub const KERNEL_HEAP_SIZE: u32 = 0x0010_0000; // 1 MiB

/// First byte of physical memory owned by the frame allocator.
///
/// The buddy state array is placed here, the managed frames follow it.
pub const FRAME_POOL_BEGIN: u32 = KERNEL_HEAP_BEGIN + KERNEL_HEAP_SIZE;

const _: () = {
    assert!(TABLE_ENTRIES * ENTRY_SIZE == PAGE_SIZE as usize);
    assert!(KERNEL_HEAP_BEGIN.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_HEAP_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(FRAME_POOL_BEGIN > KERNEL_HEAP_BEGIN);
};

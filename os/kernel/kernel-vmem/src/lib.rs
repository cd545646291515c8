//! # Virtual Memory Support
//!
//! Two-level IA-32 paging for the kernel and for process address spaces.
//!
//! ## What you get
//! - An [`AddressSpace`] describing one page directory plus the page tables it
//!   references, and the [`KernelAddressSpace`] singleton every process space
//!   is derived from.
//! - IA-32 page-table [`PageFlags`] with practical explanations.
//! - 4 KiB-aligned [`PageDirectory`]/[`PageTable`] wrappers and index helpers.
//! - A tiny allocator/mapper interface ([`FrameAlloc`], [`PhysMapper`]).
//!
//! ## IA-32 Virtual Address → Physical Address Walk
//!
//! Each 32-bit virtual address is divided into three fields:
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |  PD   |   PT  | Offset |
//! ```
//!
//! The CPU uses the first two fields as **indices** into two levels of tables,
//! each containing 1024 (2¹⁰) entries of 4 bytes.
//!
//! ```text
//!  CR3 → PD  →  PT  →  Physical Page
//!        │       │
//!        │       └───► PTE (Page Table Entry) → maps a 4 KiB page
//!        └───────────► PDE (Page Directory Entry) → points to a PT
//! ```
//!
//! | Level | Table name | Entry name | Description |
//! |:------|:-----------|:-----------|:------------|
//! | 1 | **PD** (Page Directory) | **PDE** | One per address space, referenced by `CR3`. Each entry points to a PT. |
//! | 2 | **PT** (Page Table) | **PTE** | Each entry maps one 4 KiB physical page (always a leaf). |
//!
//! Large (4 MiB) pages are never used, so every PDE with `P=1` points to a PT.
//!
//! ## Shared and owned page tables
//!
//! Every process address space starts as a copy of the kernel's page
//! directory: its PDEs alias the kernel's page tables. Bit 9 of a PDE
//! (ignored by the MMU) records whether the table is **owned** by the space
//! holding the entry or **shared** with the kernel space:
//!
//! ```text
//!   kernel PD            process PD
//!  ┌─────────┐          ┌─────────┐
//!  │ 0: owned├──┐    ┌──┤0: shared│
//!  │         │  ▼    ▼  │         │
//!  │         │  PT A ◄  │5: owned ├──► PT B
//!  └─────────┘          └─────────┘
//! ```
//!
//! Only owned tables are copied on clone and freed on destroy. Writing
//! through a shared entry first gives the process its own copy of the table,
//! so a process never modifies the kernel's tables.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod address_space;
mod page_entry_bits;
pub mod page_table;

#[cfg(test)]
mod test_support;

pub use crate::address_space::{AddressSpace, KernelAddressSpace};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::pd::{Ownership, PageDirectory, PdEntry, PdIndex};
pub use crate::page_table::pt::{PageTable, PtEntry, PtIndex};
pub use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};

bitflags::bitflags! {
    /// IA-32 page-table flags (low 9 bits of a PDE/PTE).
    ///
    /// Combine these to describe permissions and caching for a mapping.
    /// For a page to be writable or user-accessible, both the PDE and the
    /// PTE must allow it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageFlags: u32 {
        /// Entry is valid. Clear means any access faults.
        const PRESENT = 1 << 0;

        /// Writes are allowed (enforced for the kernel only with CR0.WP).
        const WRITABLE = 1 << 1;

        /// Ring 3 may access the page. Clear restricts it to the kernel.
        const USER = 1 << 2;

        /// Write-through caching instead of write-back.
        const WRITE_THROUGH = 1 << 3;

        /// Disable caching, e.g. for MMIO.
        const CACHE_DISABLE = 1 << 4;

        /// Set by the CPU when the entry is used for a translation.
        const ACCESSED = 1 << 5;

        /// Set by the CPU on the first write through a PTE.
        const DIRTY = 1 << 6;

        /// Keep the TLB entry across CR3 reloads (requires CR4.PGE).
        const GLOBAL = 1 << 8;
    }
}

/// Errors reported by address space operations.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmemError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("physical address {0} is not page aligned")]
    Unaligned(PhysicalAddress),
    #[error("virtual address {0} is not mapped")]
    NotMapped(VirtualAddress),
}

/// Frame allocator used to obtain **physical** 4 KiB frames for page
/// directories and page tables.
///
/// Implementations synchronize internally, so the methods take `&self`.
pub trait FrameAlloc {
    /// Allocate one zero-filled 4 KiB *physical* frame.
    ///
    /// Returns `None` on out-of-memory.
    fn alloc_4k(&self) -> Option<PhysicalPage>;

    /// Return a frame obtained from [`alloc_4k`](Self::alloc_4k).
    fn free_4k(&self, page: PhysicalPage);
}

impl<A: FrameAlloc + ?Sized> FrameAlloc for &A {
    #[inline]
    fn alloc_4k(&self) -> Option<PhysicalPage> {
        (**self).alloc_4k()
    }

    #[inline]
    fn free_4k(&self, page: PhysicalPage) {
        (**self).free_4k(page);
    }
}

/// Converts physical addresses to *temporarily* usable pointers in the current
/// virtual address space.
///
/// Typical patterns:
/// - **Kernel**: all usable memory is identity mapped, so the physical address
///   is the pointer.
/// - **Tests**: a vector of frames stands in for physical memory.
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// - `pa` must be mapped as writable in the current address space.
    /// - Lifetime `'a` is purely borrow-checked; the mapping must remain valid
    ///   for `'a`.
    /// - Type `T` must match the bytes at `pa`, and the caller must not create
    ///   overlapping mutable references.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

/// Align `x` down to the nearest multiple of `a`.
///
/// ### Preconditions
/// - `a` must be **non-zero** and a **power of two**.
///
/// ### Examples
/// ```rust
/// # use kernel_vmem::align_down;
/// assert_eq!(align_down(0,      4096), 0);
/// assert_eq!(align_down(4095,   4096), 0);
/// assert_eq!(align_down(8191,   4096), 4096);
/// assert_eq!(align_down(0x12345,   16), 0x12340);
/// ```
#[inline(always)]
#[must_use]
#[allow(clippy::inline_always)]
pub const fn align_down(x: u32, a: u32) -> u32 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// ### Preconditions
/// - `a` must be **non-zero** and a **power of two**.
/// - `x + (a - 1)` must **not overflow** `u32`.
///
/// ### Examples
/// ```rust
/// # use kernel_vmem::align_up;
/// assert_eq!(align_up(0,       4096), 0);
/// assert_eq!(align_up(1,       4096), 4096);
/// assert_eq!(align_up(4096,    4096), 4096);
/// assert_eq!(align_up(0x12345,   16), 0x12350);
/// ```
#[inline(always)]
#[must_use]
#[allow(clippy::inline_always)]
pub const fn align_up(x: u32, a: u32) -> u32 {
    (x + a - 1) & !(a - 1)
}

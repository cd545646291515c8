//! # IA-32 Page Table (PT)
//!
//! This module models the second paging level.
//!
//! - [`PtIndex`]: index type for VA bits `[21:12]`.
//! - [`PtEntry`]: a PT entry (PTE). Entries represent 4 KiB leaf mappings only.
//! - [`PageTable`]: a 4 KiB-aligned array of 1024 PTEs.
//!
//! ## Semantics
//!
//! - A PT does **not** point to another table. Every present entry maps a 4 KiB page.
//! - The base address stored in a PTE must be 4 KiB-aligned (hardware requirement).
//!
//! ## Invariants & Notes
//!
//! - [`PageTable`] is 4 KiB-aligned and contains exactly 1024 entries.
//! - [`PtEntry::make`] forces `PAT=0` and `present=1`.
//! - After modifying active mappings, the caller must perform any required TLB maintenance.

use crate::{PageEntryBits, PageFlags};
use kernel_info::memory::TABLE_ENTRIES;
use kernel_memory_addresses::{PhysicalPage, VirtualAddress};

/// Index into a Page Table (derived from VA bits `[21:12]`).
///
/// Strongly typed to avoid mixing with directory indices. Range is `0..1024`
/// (checked in debug builds).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PtIndex(u16);

/// A single Page Table entry (PTE).
///
/// A present PTE maps exactly one 4 KiB page. All permission/cache/present
/// bits live inside the inner [`PageEntryBits`].
#[doc(alias = "PTE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PtEntry(PageEntryBits);

/// A Page Table: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PtEntry; TABLE_ENTRIES],
}

impl PtIndex {
    /// Build an index from a virtual address (extracts bits `[21:12]`).
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new(va.table_index() as u16)
    }

    /// Construct from a raw `u16`.
    ///
    /// ### Debug assertions
    /// - Asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < TABLE_ENTRIES);
        Self(v)
    }

    /// Return the index as `usize` for table access.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl PtEntry {
    /// Create a zero (non-present) entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    /// Return `true` if the entry is marked present.
    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    /// Expose the underlying bitfield for inspection.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> PageEntryBits {
        self.0
    }

    /// The architectural flag bits of this entry (including `PRESENT`).
    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageFlags {
        self.0.page_flags()
    }

    /// If present, return the mapped 4 KiB physical page.
    #[inline]
    #[must_use]
    pub const fn page(self) -> Option<PhysicalPage> {
        if self.is_present() {
            Some(self.0.physical_page())
        } else {
            None
        }
    }

    /// Create a 4 KiB leaf PTE: `page | PRESENT | flags`.
    #[inline]
    #[must_use]
    pub const fn make(page: PhysicalPage, flags: PageFlags) -> Self {
        Self(
            PageEntryBits::new()
                .with_page_flags(flags)
                .with_present(true)
                .with_large_page(false)
                .with_physical_page(page),
        )
    }

    /// Replace the flag bits, keeping the mapped frame.
    ///
    /// `PRESENT` is taken from `flags`; clearing it unmaps the page.
    #[inline]
    pub const fn set_flags(&mut self, flags: PageFlags) {
        let page = self.0.physical_page();
        self.0 = PageEntryBits::new().with_page_flags(flags).with_physical_page(page);
    }

    /// Return the raw 32-bit value (flags + address).
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0.into_bits()
    }

    /// Construct from a raw 32-bit value.
    #[inline]
    #[must_use]
    pub const fn from_raw(v: u32) -> Self {
        Self(PageEntryBits::from_bits(v))
    }
}

impl PageTable {
    /// Create a fully zeroed Page Table (all entries non-present).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PtEntry::zero(); TABLE_ENTRIES],
        }
    }

    /// Read the entry at `i`.
    #[inline]
    #[must_use]
    pub const fn get(&self, i: PtIndex) -> PtEntry {
        self.entries[i.as_usize()]
    }

    /// Mutable access to the entry at `i`.
    #[inline]
    pub const fn get_mut(&mut self, i: PtIndex) -> &mut PtEntry {
        &mut self.entries[i.as_usize()]
    }

    /// Write the entry at `i`.
    ///
    /// Caller must handle any required TLB invalidation when changing active mappings.
    #[inline]
    pub const fn set(&mut self, i: PtIndex, e: PtEntry) {
        self.entries[i.as_usize()] = e;
    }

    /// Mark every entry non-present.
    #[inline]
    pub fn clear(&mut self) {
        self.entries.fill(PtEntry::zero());
    }

    /// `true` if no entry is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.entries.iter().any(|e| e.is_present())
    }

    /// Number of present entries.
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_present()).count()
    }

    /// Overwrite every entry with the entries of `other`.
    #[inline]
    pub fn copy_from(&mut self, other: &Self) {
        self.entries.copy_from_slice(&other.entries);
    }

    /// Derive the PT index from a virtual address.
    #[inline]
    #[must_use]
    pub const fn index_of(va: VirtualAddress) -> PtIndex {
        PtIndex::from(va)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use kernel_memory_addresses::PhysicalAddress;

    #[test]
    fn pte_4k_leaf() {
        let page = PhysicalAddress::new(0x5555_0000).page();
        let e = PtEntry::make(page, PageFlags::USER);
        assert_eq!(e.page(), Some(page));
        assert_eq!(e.flags(), PageFlags::PRESENT | PageFlags::USER);
        assert!(!e.bits().writable());
        assert_eq!(e.raw(), 0x5555_0005);
    }

    #[test]
    fn set_flags_keeps_frame() {
        let page = PhysicalAddress::new(0x0001_0000).page();
        let mut e = PtEntry::make(page, PageFlags::WRITABLE);
        e.set_flags(PageFlags::PRESENT);
        assert_eq!(e.page(), Some(page));
        assert!(!e.bits().writable());
    }

    #[test]
    fn table_is_one_page() {
        assert_eq!(size_of::<PageTable>(), 4096);
        assert_eq!(align_of::<PageTable>(), 4096);

        let mut t = PageTable::zeroed();
        assert!(t.is_empty());
        t.set(PtIndex::new(1023), PtEntry::make(PhysicalAddress::new(0x1000).page(), PageFlags::empty()));
        assert!(!t.is_empty());
        assert_eq!(t.present_count(), 1);
    }
}

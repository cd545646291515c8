//! # IA-32 Page Directory (PD)
//!
//! This module models the top paging level.
//!
//! - [`PdIndex`]: index type for VA bits `[31:22]`.
//! - [`PdEntry`]: a PD entry (PDE). Every present entry points to a [`PageTable`](super::pt::PageTable).
//! - [`PageDirectory`]: a 4 KiB-aligned array of 1024 PDEs, loaded into `CR3`.
//!
//! ## Ownership
//!
//! A PDE carries an [`Ownership`] tag in an OS-available bit. The tag is
//! part of the entry itself, so it travels with the directory and can be
//! checked without any side table.

use crate::{PageEntryBits, PageFlags};
use kernel_info::memory::TABLE_ENTRIES;
use kernel_memory_addresses::{PhysicalPage, VirtualAddress};

/// Index into the Page Directory (derived from VA bits `[31:22]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PdIndex(u16);

/// Who is responsible for the page table a PDE points to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Ownership {
    /// The table belongs to another address space (the kernel's) and is only
    /// referenced here. It must never be freed through this entry.
    Shared,
    /// The table belongs to the address space holding the entry.
    Owned,
}

/// A single Page Directory entry (PDE).
#[doc(alias = "PDE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PdEntry(PageEntryBits);

/// The Page Directory: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PdEntry; TABLE_ENTRIES],
}

impl PdIndex {
    /// Build an index from a virtual address (extracts bits `[31:22]`).
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new(va.directory_index() as u16)
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

    /// Every directory index, in ascending order.
    #[allow(clippy::cast_possible_truncation)]
    pub fn all() -> impl Iterator<Item = Self> {
        (0..TABLE_ENTRIES as u16).map(Self)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// First virtual address covered by this entry.
    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::from_indices(self.as_usize(), 0, 0)
    }
}

impl PdEntry {
    /// Create a zero (non-present) entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    /// Create a present entry pointing at `table`.
    #[inline]
    #[must_use]
    pub const fn make(table: PhysicalPage, flags: PageFlags, ownership: Ownership) -> Self {
        Self(
            PageEntryBits::new()
                .with_page_flags(flags)
                .with_present(true)
                .with_large_page(false)
                .with_owned(matches!(ownership, Ownership::Owned))
                .with_physical_page(table),
        )
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    /// If present, the page table this entry points to.
    #[inline]
    #[must_use]
    pub const fn table(self) -> Option<PhysicalPage> {
        if self.is_present() {
            Some(self.0.physical_page())
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn ownership(self) -> Ownership {
        if self.0.owned() {
            Ownership::Owned
        } else {
            Ownership::Shared
        }
    }

    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageFlags {
        self.0.page_flags()
    }

    /// Same entry with a different ownership tag.
    #[inline]
    #[must_use]
    pub const fn with_ownership(self, ownership: Ownership) -> Self {
        Self(self.0.with_owned(matches!(ownership, Ownership::Owned)))
    }

    /// Same entry and flags pointing at another table.
    #[inline]
    #[must_use]
    pub const fn with_table(self, table: PhysicalPage) -> Self {
        Self(self.0.with_physical_page(table))
    }

    /// Same entry with `flags` added.
    #[inline]
    #[must_use]
    pub const fn with_flags(self, flags: PageFlags) -> Self {
        Self(self.0.with_page_flags(flags))
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> PageEntryBits {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0.into_bits()
    }

    #[inline]
    #[must_use]
    pub const fn from_raw(v: u32) -> Self {
        Self(PageEntryBits::from_bits(v))
    }
}

impl PageDirectory {
    /// Create a fully zeroed Page Directory (all entries non-present).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PdEntry::zero(); TABLE_ENTRIES],
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: PdIndex) -> PdEntry {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: PdIndex, e: PdEntry) {
        self.entries[i.as_usize()] = e;
    }

    /// Mark every entry non-present.
    #[inline]
    pub fn clear(&mut self) {
        self.entries.fill(PdEntry::zero());
    }

    /// Iterate over the present entries and their indices.
    pub fn present(&self) -> impl Iterator<Item = (PdIndex, PdEntry)> + '_ {
        PdIndex::all()
            .map(|i| (i, self.get(i)))
            .filter(|(_, e)| e.is_present())
    }

    #[inline]
    #[must_use]
    pub const fn index_of(va: VirtualAddress) -> PdIndex {
        PdIndex::from(va)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use kernel_memory_addresses::PhysicalAddress;

    #[test]
    fn pde_carries_ownership() {
        let table = PhysicalAddress::new(0x0040_0000).page();
        let e = PdEntry::make(table, PageFlags::WRITABLE, Ownership::Owned);
        assert_eq!(e.table(), Some(table));
        assert_eq!(e.ownership(), Ownership::Owned);
        assert_eq!(e.raw(), 0x0040_0203);

        let shared = e.with_ownership(Ownership::Shared);
        assert_eq!(shared.ownership(), Ownership::Shared);
        assert_eq!(shared.table(), Some(table));
        assert_eq!(shared.flags(), PageFlags::PRESENT | PageFlags::WRITABLE);
    }

    #[test]
    fn index_covers_four_mebibytes() {
        let i = PdIndex::from(VirtualAddress::new(0x0140_0000));
        assert_eq!(i.as_usize(), 5);
        assert_eq!(i.base().as_u32(), 0x0140_0000);
        assert_eq!(PdIndex::all().count(), 1024);
    }

    #[test]
    fn present_skips_empty_entries() {
        let mut dir = PageDirectory::zeroed();
        let table = PhysicalAddress::new(0x3000).page();
        dir.set(PdIndex::new(7), PdEntry::make(table, PageFlags::empty(), Ownership::Shared));
        let present: Vec<_> = dir.present().collect();
        assert_eq!(present.len(), 1);
        assert_eq!(present[0].0, PdIndex::new(7));
    }
}

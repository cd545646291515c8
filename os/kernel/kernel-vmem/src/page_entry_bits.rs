use crate::PageFlags;
use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalPage;

/// Represents a single 32-bit page directory or page table entry in its raw
/// bitfield form.
///
/// This structure models the **common superset** of fields found in both
/// paging levels (PDE, PTE). Each bit corresponds to a hardware-defined flag
/// or address field as specified by the IA-32 manuals, plus one bit of the
/// OS-available range used by the kernel.
///
/// ### Bit layout
///
/// | Bits      | Name / Mnemonic   | Meaning |
/// |-----------|-------------------|----------|
/// | 0         | `P` (present)     | Valid entry if set |
/// | 1         | `RW`              | Writable if set |
/// | 2         | `US`              | User-mode accessible if set |
/// | 3         | `PWT`             | Write-through caching |
/// | 4         | `PCD`             | Disable caching |
/// | 5         | `A`               | Accessed |
/// | 6         | `D`               | Dirty (PTE only) |
/// | 7         | `PS` / `PAT`      | Must be 0 for a PDE (no 4 MiB pages) |
/// | 8         | `G`               | Global (PTE only) |
/// | 9         | owned             | PDE: the address space owns the table |
/// | 10–11     | OS avail          | Reserved for OS use |
/// | 12–31     | `frame`           | Physical frame bits [31:12] |
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::PhysicalAddress;
/// # use kernel_vmem::PageEntryBits;
/// let mut e = PageEntryBits::new();
/// e.set_present(true);
/// e.set_writable(true);
/// e.set_physical_page(PhysicalAddress::new(0x12345).page());
/// assert!(e.present());
/// assert_eq!(e.into_bits(), 0x0001_2003);
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    ///
    /// Set to allow writes; clear for read-only. In supervisor mode this is
    /// only enforced with CR0.WP set.
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    ///
    /// Set to allow user-mode access; clear restricts to supervisor only.
    /// For a PDE the effective permission is the intersection with the PTE.
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU on first access.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on first write to a leaf page.
    pub dirty: bool,

    /// Page Size (PS, bit 7) in a PDE; PAT in a PTE.
    ///
    /// Always 0 here: only 4 KiB pages are mapped.
    pub large_page: bool,

    /// Global (G, bit 8). Leaf-only; survives CR3 reloads with CR4.PGE.
    pub global: bool,

    /// Ownership tag (bit 9, ignored by hardware).
    ///
    /// Set on a PDE whose page table belongs to the address space holding
    /// the entry; clear when the table is aliased from the kernel space.
    pub owned: bool,

    /// OS-available bits 10–11.
    #[bits(2)]
    pub os_available: u8,

    /// Physical frame number (bits 31:12).
    #[bits(20)]
    frame: u32,
}

impl PageEntryBits {
    /// Physical frame referenced by this entry.
    #[inline]
    #[must_use]
    pub const fn physical_page(&self) -> PhysicalPage {
        PhysicalPage::from_number(self.frame())
    }

    #[inline]
    pub const fn set_physical_page(&mut self, page: PhysicalPage) {
        self.set_frame(page.number());
    }

    #[inline]
    #[must_use]
    pub const fn with_physical_page(self, page: PhysicalPage) -> Self {
        self.with_frame(page.number())
    }

    /// The architectural flag bits (0–8).
    #[inline]
    #[must_use]
    pub const fn page_flags(&self) -> PageFlags {
        PageFlags::from_bits_truncate(self.into_bits())
    }

    /// Set every flag in `flags`, leaving the others untouched.
    #[inline]
    #[must_use]
    pub const fn with_page_flags(self, flags: PageFlags) -> Self {
        Self::from_bits(self.into_bits() | flags.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::PhysicalAddress;

    #[test]
    fn flags_map_to_low_bits() {
        let e = PageEntryBits::new().with_page_flags(PageFlags::PRESENT | PageFlags::USER);
        assert!(e.present());
        assert!(e.user_access());
        assert!(!e.writable());
        assert_eq!(e.into_bits(), 0b101);
    }

    #[test]
    fn owned_tag_is_not_a_page_flag() {
        let e = PageEntryBits::new().with_owned(true).with_writable(true);
        assert_eq!(e.into_bits(), 0x202);
        assert_eq!(e.page_flags(), PageFlags::WRITABLE);
    }

    #[test]
    fn frame_round_trips() {
        let page = PhysicalAddress::new(0xFFFF_F000).page();
        let e = PageEntryBits::new().with_physical_page(page);
        assert_eq!(e.physical_page(), page);
        assert_eq!(e.into_bits(), 0xFFFF_F000);
    }
}

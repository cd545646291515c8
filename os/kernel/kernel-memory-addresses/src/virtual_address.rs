use crate::{MemoryAddress, PAGE_SHIFT, VirtualPage};
use core::fmt;
use core::ops::{Add, AddAssign};

/// Number of virtual address bits consumed by the table index and offset.
const DIRECTORY_SHIFT: u32 = 22;

/// Mask for a 10-bit table or directory index.
const INDEX_MASK: u32 = 0x3FF;

/// Virtual memory address.
///
/// A thin wrapper around [`MemoryAddress`] that denotes **virtual** addresses.
/// It only carries the *kind* of address at the type level so you don't
/// accidentally mix virtual and physical values.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let va = VirtualAddress::new(0x0040_2010);
/// assert_eq!(va.directory_index(), 1);
/// assert_eq!(va.table_index(), 2);
/// assert_eq!(va.page_offset(), 0x10);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(pub(crate) MemoryAddress);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(MemoryAddress::new(v))
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0)
    }

    /// Rebuild an address from its directory index, table index and offset.
    ///
    /// Out-of-range components are masked to their field width.
    #[inline]
    #[must_use]
    pub const fn from_indices(directory: usize, table: usize, offset: u32) -> Self {
        let directory = (directory as u32) & INDEX_MASK;
        let table = (table as u32) & INDEX_MASK;
        Self::new(
            (directory << DIRECTORY_SHIFT) | (table << PAGE_SHIFT) | (offset & crate::PAGE_OFFSET_MASK),
        )
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0.as_u32()
    }

    /// Top-level (page directory) index, bits `[31:22]`.
    #[inline]
    #[must_use]
    pub const fn directory_index(self) -> usize {
        (self.as_u32() >> DIRECTORY_SHIFT) as usize
    }

    /// Second-level (page table) index, bits `[21:12]`.
    #[inline]
    #[must_use]
    pub const fn table_index(self) -> usize {
        ((self.as_u32() >> PAGE_SHIFT) & INDEX_MASK) as usize
    }

    /// Byte offset within the 4 KiB page, bits `[11:0]`.
    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u32 {
        self.0.page_offset()
    }

    #[inline]
    #[must_use]
    pub const fn page(self) -> VirtualPage {
        VirtualPage::containing(self)
    }

    #[inline]
    #[must_use]
    pub const fn split(self) -> (VirtualPage, u32) {
        (self.page(), self.page_offset())
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0.is_page_aligned()
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u32) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:08X})", self.as_u32())
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<u32> for VirtualAddress {
    #[inline]
    fn from(v: u32) -> Self {
        Self::new(v)
    }
}

impl From<VirtualPage> for VirtualAddress {
    #[inline]
    fn from(value: VirtualPage) -> Self {
        value.base()
    }
}

impl Add<u32> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u32> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u32) {
        self.0 += rhs;
    }
}

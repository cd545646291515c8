use crate::{MemoryAddress, PAGE_SIZE, PhysicalAddress};
use core::fmt;

/// Physical 4 KiB frame base.
///
/// ### Invariants
/// - The low 12 bits of the base are always zero (page aligned).
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let pa = PhysicalAddress::new(0x0008_1234);
/// let pp = pa.page();
/// assert_eq!(pp.base().as_u32(), 0x0008_1000);
/// assert_eq!(pp.join(pa.offset()), pa);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(MemoryAddress);

impl PhysicalPage {
    /// Frame that contains `addr` (aligns down).
    #[inline]
    #[must_use]
    pub const fn from_addr(addr: PhysicalAddress) -> Self {
        Self(addr.0.align_down())
    }

    /// Create from an address that must already be aligned.
    /// Panics in debug if unaligned.
    #[inline]
    #[must_use]
    pub fn new_aligned(addr: PhysicalAddress) -> Self {
        debug_assert!(addr.is_page_aligned(), "unaligned frame address {addr}");
        Self::from_addr(addr)
    }

    /// Frame with the given frame number (`base >> 12`).
    #[inline]
    #[must_use]
    pub const fn from_number(number: u32) -> Self {
        Self(MemoryAddress::new(number << crate::PAGE_SHIFT))
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress(self.0)
    }

    /// The frame number (`base >> 12`).
    #[inline]
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0.as_u32() >> crate::PAGE_SHIFT
    }

    /// Combine with an in-page offset to form a full address.
    #[inline]
    #[must_use]
    pub const fn join(self, offset: u32) -> PhysicalAddress {
        PhysicalAddress::new(self.0.as_u32() | (offset & crate::PAGE_OFFSET_MASK))
    }

    /// The following frame, or `None` at the top of the address space.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(PAGE_SIZE) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}/4K", self.0.as_u32())
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage(0x{:08X})", self.0.as_u32())
    }
}

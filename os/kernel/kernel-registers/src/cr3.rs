use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalPage;

/// CR3, the Page Directory Base Register (32-bit paging).
///
/// Holds the physical base address of the page directory and cache-control
/// flags for directory walks.
#[bitfield(u32)]
pub struct Cr3 {
    /// Bits 0–2: Reserved (must be 0).
    #[bits(3)]
    pub reserved0: u8,

    /// Bit 3, PWT: Page-level Write-Through for the page directory.
    pub pwt: bool,

    /// Bit 4, PCD: Page-level Cache Disable for the page directory.
    pub pcd: bool,

    /// Bits 5–11: Reserved (must be 0 when written).
    #[bits(7)]
    pub reserved1: u8,

    /// Bits 12–31: Page directory physical base >> 12.
    #[bits(20)]
    directory_frame: u32,
}

impl Cr3 {
    /// Create a `Cr3` value pointing at a page directory frame.
    #[must_use]
    pub const fn from_directory(directory: PhysicalPage, pwt: bool, pcd: bool) -> Self {
        Self::new()
            .with_pwt(pwt)
            .with_pcd(pcd)
            .with_directory_frame(directory.number())
    }

    /// Return the physical frame of the page directory.
    #[must_use]
    pub const fn directory(&self) -> PhysicalPage {
        PhysicalPage::from_number(self.directory_frame())
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let mut cr3: u32;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}

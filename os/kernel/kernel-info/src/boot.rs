//! # Boot Hand-Off Records

use crate::memory::{FRAME_POOL_BEGIN, PAGE_SIZE};
use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// Physical memory description provided by the boot sequence.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryInfo {
    /// First byte past the end of usable physical memory.
    pub memory_end: PhysicalAddress,
}

impl MemoryInfo {
    #[must_use]
    pub const fn new(memory_end: PhysicalAddress) -> Self {
        Self { memory_end }
    }

    /// Start of the frame pool (metadata followed by managed frames).
    #[must_use]
    pub const fn frame_pool_begin(&self) -> PhysicalAddress {
        PhysicalAddress::new(FRAME_POOL_BEGIN)
    }

    /// Bytes of physical memory available to the frame allocator.
    ///
    /// Zero if memory ends below the frame pool.
    #[must_use]
    pub const fn available_memory(&self) -> u32 {
        self.memory_end.as_u32().saturating_sub(FRAME_POOL_BEGIN)
    }
}

/// ELF section header flags (`sh_flags`).
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct SectionFlags {
    /// `SHF_WRITE`: writable at runtime.
    pub write: bool,
    /// `SHF_ALLOC`: occupies memory at runtime.
    pub alloc: bool,
    /// `SHF_EXECINSTR`: contains executable code.
    pub execinstr: bool,
    #[bits(29)]
    __: u32,
}

/// Permission record for one section of the kernel image.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ElfSection {
    /// Load address (`sh_addr`).
    pub addr: u32,
    /// Size in bytes (`sh_size`).
    pub size: u32,
    /// Alignment constraint (`sh_addralign`).
    pub addralign: u32,
    pub flags: SectionFlags,
}

impl ElfSection {
    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.addr)
    }

    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.flags.write()
    }

    /// Number of pages the section spans, rounding the size up.
    #[must_use]
    pub const fn page_count(&self) -> u32 {
        self.size.div_ceil(PAGE_SIZE)
    }

    /// Whether the section must be write-protected in the kernel address space.
    ///
    /// Only page-aligned sections can be protected without also protecting
    /// their neighbours.
    #[must_use]
    pub const fn is_write_protected(&self) -> bool {
        !self.is_writable() && self.addralign == PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(size: u32, addralign: u32, flags: SectionFlags) -> ElfSection {
        ElfSection {
            addr: 0x0010_0000,
            size,
            addralign,
            flags,
        }
    }

    #[test]
    fn text_section_is_protected() {
        let text = section(0x1801, PAGE_SIZE, SectionFlags::new().with_alloc(true).with_execinstr(true));
        assert!(text.is_write_protected());
        assert_eq!(text.page_count(), 2);
    }

    #[test]
    fn data_and_unaligned_sections_stay_writable() {
        let data = section(0x1000, PAGE_SIZE, SectionFlags::new().with_alloc(true).with_write(true));
        assert!(!data.is_write_protected());

        let rodata = section(0x10, 16, SectionFlags::new().with_alloc(true));
        assert!(!rodata.is_write_protected());
    }

    #[test]
    fn section_flags_match_elf_bits() {
        assert_eq!(SectionFlags::from_bits(0b111).into_bits(), 0b111);
        assert!(SectionFlags::from_bits(1).write());
        assert!(SectionFlags::from_bits(4).execinstr());
    }

    #[test]
    fn available_memory_saturates() {
        assert_eq!(MemoryInfo::new(PhysicalAddress::new(0x1000)).available_memory(), 0);
        assert_eq!(
            MemoryInfo::new(PhysicalAddress::new(FRAME_POOL_BEGIN + 0x10_0000)).available_memory(),
            0x10_0000
        );
    }
}

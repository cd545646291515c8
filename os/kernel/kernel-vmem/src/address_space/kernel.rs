use crate::address_space::{AddressSpace, SpaceKind};
use crate::{FrameAlloc, PageFlags, PhysMapper, VmemError};
use core::ops::{Deref, DerefMut};
use kernel_info::boot::ElfSection;
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::PhysicalAddress;
use log::{debug, info};

/// The kernel's address space, the template of every process space.
///
/// Dereferences to [`AddressSpace`] for mapping and queries, but cannot be
/// destroyed: process spaces alias its page tables for their whole lifetime.
pub struct KernelAddressSpace<'m, M: PhysMapper>(AddressSpace<'m, M>);

impl<'m, M: PhysMapper> KernelAddressSpace<'m, M> {
    /// Create an empty kernel space (a zeroed directory, no tables).
    ///
    /// # Errors
    /// [`VmemError::OutOfMemory`] if no frame is available for the directory.
    pub fn new<A: FrameAlloc>(mapper: &'m M, alloc: &A) -> Result<Self, VmemError> {
        AddressSpace::empty(mapper, alloc, SpaceKind::Kernel).map(Self)
    }

    /// Build the boot-time kernel address space.
    ///
    /// Identity-maps `[PAGE_SIZE, memory_end)` writable and kernel-only, then
    /// maps every page-aligned, non-writable ELF section read-only. Page 0
    /// stays unmapped so null dereferences fault.
    ///
    /// On error every frame taken so far is returned to `alloc`.
    ///
    /// # Errors
    /// [`VmemError::OutOfMemory`] if the tables do not fit.
    pub fn build<A: FrameAlloc>(
        mapper: &'m M,
        alloc: &A,
        memory_end: PhysicalAddress,
        sections: &[ElfSection],
    ) -> Result<Self, VmemError> {
        let mut kernel = Self::new(mapper, alloc)?;
        match kernel.map_boot_image(alloc, memory_end, sections) {
            Ok(()) => {
                info!(
                    "Kernel address space {} built: identity mapped {} to {memory_end}",
                    kernel.directory(),
                    PhysicalAddress::new(PAGE_SIZE)
                );
                Ok(kernel)
            }
            Err(e) => {
                kernel.0.release(alloc);
                Err(e)
            }
        }
    }

    fn map_boot_image<A: FrameAlloc>(
        &mut self,
        alloc: &A,
        memory_end: PhysicalAddress,
        sections: &[ElfSection],
    ) -> Result<(), VmemError> {
        self.identity_map_range(
            alloc,
            PhysicalAddress::new(PAGE_SIZE),
            memory_end,
            PageFlags::PRESENT | PageFlags::WRITABLE,
        )?;

        for section in sections.iter().filter(|s| s.is_write_protected()) {
            let start = section.start();
            let end = start
                .checked_add(section.page_count() * PAGE_SIZE)
                .unwrap_or(PhysicalAddress::new(u32::MAX));
            debug!("Write-protecting kernel section {start}..{end}");
            self.identity_map_range(alloc, start, end, PageFlags::PRESENT)?;
        }
        Ok(())
    }

    /// Create a process address space aliasing this space's tables.
    ///
    /// # Errors
    /// See [`AddressSpace::new`].
    #[inline]
    pub fn new_address_space<A: FrameAlloc>(&self, alloc: &A) -> Result<AddressSpace<'m, M>, VmemError> {
        AddressSpace::new(self, alloc)
    }
}

impl<'m, M: PhysMapper> Deref for KernelAddressSpace<'m, M> {
    type Target = AddressSpace<'m, M>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<M: PhysMapper> DerefMut for KernelAddressSpace<'_, M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

//! # Address Space (IA-32, page-directory rooted)
//!
//! Strongly-typed helpers to build, mutate, clone and tear down a **single**
//! virtual address space (a page directory plus the page tables it points to).
//!
//! ## Highlights
//!
//! - [`AddressSpace::map`] / [`AddressSpace::unmap`] install or clear one 4 KiB mapping.
//! - [`AddressSpace::identity_map_range`] maps `VA == PA` for a range of pages.
//! - [`AddressSpace::resolve`] / [`AddressSpace::translate`] walk both levels.
//! - [`AddressSpace::clone_with`] and [`AddressSpace::destroy`] create and release
//!   process spaces without ever touching a table that is only aliased.
//!
//! ## Design
//!
//! - Page-table frames come from a caller-provided [`FrameAlloc`]; every call
//!   that may allocate takes it explicitly, so the space itself owns no allocator.
//! - The [`Ownership`] tag in each directory entry decides what is copied on
//!   clone, what is freed on destroy and when a table must be privatized
//!   before it is written.
//! - Keeps `unsafe` confined to viewing a physical frame as a typed table
//!   through the [`PhysMapper`].
//!
//! ## Safety
//!
//! - An address space does **not** lock itself. Callers serialize mutations of
//!   one space; the frame allocator is the only shared resource.
//! - The provided [`PhysMapper`] must yield **writable** references to table frames.

mod kernel;

pub use crate::address_space::kernel::KernelAddressSpace;
use crate::page_table::pd::{Ownership, PageDirectory, PdEntry, PdIndex};
use crate::page_table::pt::{PageTable, PtEntry, PtIndex};
use crate::{FrameAlloc, PageFlags, PhysMapper, VmemError};
use kernel_info::memory::{PAGE_SIZE, TABLE_ENTRIES};
use kernel_registers::cr3::Cr3;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};
use log::{debug, warn};

/// Whether a space is the kernel's template or a process space derived from it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum SpaceKind {
    Kernel,
    Process,
}

/// Handle to a single, concrete address space.
///
/// The handle does not free anything when dropped; call
/// [`destroy`](Self::destroy) to return its frames.
pub struct AddressSpace<'m, M: PhysMapper> {
    directory: PhysicalPage,
    mapper: &'m M,
    kind: SpaceKind,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Create a process address space that aliases every page table of `kernel`.
    ///
    /// The directory is a fresh zeroed frame; each present kernel entry is
    /// copied by reference and tagged [`Ownership::Shared`].
    ///
    /// # Errors
    /// [`VmemError::OutOfMemory`] if no frame is available for the directory.
    pub fn new<A: FrameAlloc>(
        kernel: &KernelAddressSpace<'m, M>,
        alloc: &A,
    ) -> Result<Self, VmemError> {
        let mut space = Self::empty(kernel.mapper, alloc, SpaceKind::Process)?;
        let dir = space.directory_mut();
        for (index, entry) in kernel.directory_ref().present() {
            dir.set(index, entry.with_ownership(Ownership::Shared));
        }
        debug!("Created address space {}", space.directory);
        Ok(space)
    }

    /// Allocate and clear a directory frame.
    fn empty<A: FrameAlloc>(mapper: &'m M, alloc: &A, kind: SpaceKind) -> Result<Self, VmemError> {
        let directory = alloc.alloc_4k().ok_or(VmemError::OutOfMemory)?;
        let mut space = Self {
            directory,
            mapper,
            kind,
        };
        space.directory_mut().clear();
        Ok(space)
    }

    /// Physical frame of the page directory (the value loaded into `CR3`).
    #[inline]
    #[must_use]
    pub const fn directory(&self) -> PhysicalPage {
        self.directory
    }

    /// `true` for the kernel's own address space.
    #[inline]
    #[must_use]
    pub const fn is_kernel(&self) -> bool {
        matches!(self.kind, SpaceKind::Kernel)
    }

    /// The `CR3` value that selects this space.
    #[inline]
    #[must_use]
    pub const fn cr3(&self) -> Cr3 {
        Cr3::from_directory(self.directory, false, false)
    }

    /// Load this space into `CR3` and make sure paging is enabled.
    ///
    /// # Safety
    /// - Must run at CPL0.
    /// - The code and stack currently executing, and every table of this
    ///   space, must be mapped in it (the kernel identity mapping covers this).
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    pub unsafe fn activate(&self) {
        use kernel_registers::cr0::Cr0;
        use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};

        unsafe {
            self.cr3().store_unsafe();
            let cr0 = Cr0::load_unsafe();
            if !cr0.pg_paging() {
                cr0.with_pg_paging(true).store_unsafe();
            }
        }
    }

    /// Read the directory entry at `index`.
    #[inline]
    #[must_use]
    pub fn directory_entry(&self, index: PdIndex) -> PdEntry {
        self.directory_ref().get(index)
    }

    /// Ownership of the table behind directory entry `index`, if present.
    #[inline]
    #[must_use]
    pub fn ownership(&self, index: PdIndex) -> Option<Ownership> {
        let entry = self.directory_entry(index);
        entry.is_present().then_some(entry.ownership())
    }

    #[inline]
    fn directory_ref(&self) -> &PageDirectory {
        // SAFETY: the directory frame is owned by this space for its lifetime.
        unsafe { self.mapper.phys_to_mut(self.directory.base()) }
    }

    #[inline]
    fn directory_mut(&mut self) -> &mut PageDirectory {
        // SAFETY: see `directory_ref`; `&mut self` makes the borrow unique.
        unsafe { self.mapper.phys_to_mut(self.directory.base()) }
    }

    #[inline]
    fn table_ref(&self, page: PhysicalPage) -> &PageTable {
        // SAFETY: `page` was read from a present directory entry of this space.
        unsafe { self.mapper.phys_to_mut(page.base()) }
    }

    #[inline]
    fn table_mut(&mut self, page: PhysicalPage) -> &mut PageTable {
        // SAFETY: see `table_ref`.
        unsafe { self.mapper.phys_to_mut(page.base()) }
    }

    /// The page table behind `index`, writable by this space, or `None` if absent.
    ///
    /// A shared table of a process space is privatized first: its content is
    /// copied into a fresh frame and the entry becomes [`Ownership::Owned`].
    fn table_for_write<A: FrameAlloc>(
        &mut self,
        alloc: &A,
        index: PdIndex,
    ) -> Result<Option<PhysicalPage>, VmemError> {
        let entry = self.directory_ref().get(index);
        let Some(table) = entry.table() else {
            return Ok(None);
        };
        if entry.ownership() == Ownership::Owned || self.is_kernel() {
            return Ok(Some(table));
        }

        let private = alloc.alloc_4k().ok_or(VmemError::OutOfMemory)?;
        // SAFETY: `private` was just allocated and is not referenced anywhere else.
        let copy: &mut PageTable = unsafe { self.mapper.phys_to_mut(private.base()) };
        copy.copy_from(self.table_ref(table));
        self.directory_mut().set(
            index,
            entry.with_table(private).with_ownership(Ownership::Owned),
        );
        debug!(
            "Privatized shared page table {table} as {private} for directory entry {}",
            index.as_usize()
        );
        Ok(Some(private))
    }

    /// Like [`table_for_write`](Self::table_for_write), allocating a zeroed table if absent.
    fn ensure_table<A: FrameAlloc>(
        &mut self,
        alloc: &A,
        index: PdIndex,
    ) -> Result<PhysicalPage, VmemError> {
        if let Some(table) = self.table_for_write(alloc, index)? {
            return Ok(table);
        }

        let table = alloc.alloc_4k().ok_or(VmemError::OutOfMemory)?;
        self.table_mut(table).clear();
        self.directory_mut().set(
            index,
            PdEntry::make(table, PageFlags::empty(), Ownership::Owned),
        );
        debug!(
            "Allocated page table {table} for directory entry {}",
            index.as_usize()
        );
        Ok(table)
    }

    /// Map **one** 4 KiB page `va → pa` with `flags`.
    ///
    /// The flags are also added to the directory entry, so the walk grants
    /// at least what the leaf asks for. The leaf becomes `pa | PRESENT | flags`.
    ///
    /// # Errors
    /// - [`VmemError::Unaligned`] if `pa` is not page aligned.
    /// - [`VmemError::OutOfMemory`] if a page table could not be allocated;
    ///   the space is left unchanged.
    pub fn map<A: FrameAlloc>(
        &mut self,
        alloc: &A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), VmemError> {
        if !pa.is_page_aligned() {
            return Err(VmemError::Unaligned(pa));
        }

        let index = PdIndex::from(va);
        let table = self.ensure_table(alloc, index)?;
        let entry = self.directory_ref().get(index);
        self.directory_mut().set(index, entry.with_flags(flags));
        self.table_mut(table)
            .set(PtIndex::from(va), PtEntry::make(pa.page(), flags));
        Ok(())
    }

    /// Map the page containing `page` to itself.
    ///
    /// # Errors
    /// See [`map`](Self::map).
    #[inline]
    pub fn identity_map<A: FrameAlloc>(
        &mut self,
        alloc: &A,
        page: PhysicalPage,
        flags: PageFlags,
    ) -> Result<(), VmemError> {
        let pa = page.base();
        self.map(alloc, VirtualAddress::new(pa.as_u32()), pa, flags)
    }

    /// Identity-map every page from `align_down(from)` up to (excluding) `to`.
    ///
    /// The page tables of the whole range are made present and writable
    /// before any leaf is written. If that fails, the tables allocated by
    /// this call are freed again and no mapping of the space has changed.
    ///
    /// # Errors
    /// [`VmemError::OutOfMemory`] if a page table could not be allocated.
    pub fn identity_map_range<A: FrameAlloc>(
        &mut self,
        alloc: &A,
        from: PhysicalAddress,
        to: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), VmemError> {
        let start = from.page();
        if start.base() >= to {
            return Ok(());
        }

        let first = PdIndex::from(VirtualAddress::new(start.base().as_u32()));
        let last = PdIndex::from(VirtualAddress::new(to.as_u32() - 1));
        if let Err(e) = self.prepare_tables(alloc, first, last) {
            warn!("Identity mapping {} to {to} failed: {e}", start.base());
            return Err(e);
        }

        let mut page = Some(start);
        while let Some(current) = page.filter(|p| p.base() < to) {
            self.identity_map(alloc, current, flags)?;
            page = current.next();
        }
        Ok(())
    }

    /// Make the tables of directory entries `first..=last` present and writable.
    ///
    /// On failure the tables allocated here are released again. Privatized
    /// copies are kept; they map exactly what the shared table did.
    fn prepare_tables<A: FrameAlloc>(
        &mut self,
        alloc: &A,
        first: PdIndex,
        last: PdIndex,
    ) -> Result<(), VmemError> {
        let mut created = [0u32; TABLE_ENTRIES / 32];
        let range = first.as_usize()..=last.as_usize();

        for index in PdIndex::all().filter(|i| range.contains(&i.as_usize())) {
            let absent = !self.directory_ref().get(index).is_present();
            match self.ensure_table(alloc, index) {
                Ok(_) if absent => created[index.as_usize() / 32] |= 1 << (index.as_usize() % 32),
                Ok(_) => {}
                Err(e) => {
                    for index in PdIndex::all() {
                        if created[index.as_usize() / 32] & (1 << (index.as_usize() % 32)) == 0 {
                            continue;
                        }
                        if let Some(table) = self.directory_ref().get(index).table() {
                            self.directory_mut().set(index, PdEntry::zero());
                            alloc.free_4k(table);
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Clear the mapping of the page containing `va`. A missing mapping is a no-op.
    ///
    /// An owned page table of a process space is returned to `alloc` as soon
    /// as its last entry is cleared. Kernel tables are never reclaimed since
    /// process spaces alias them.
    ///
    /// # Errors
    /// [`VmemError::OutOfMemory`] if a shared table had to be privatized first
    /// and no frame was available.
    pub fn unmap<A: FrameAlloc>(&mut self, alloc: &A, va: VirtualAddress) -> Result<(), VmemError> {
        if self.resolve(va).is_none() {
            return Ok(());
        }

        let index = PdIndex::from(va);
        let Some(table) = self.table_for_write(alloc, index)? else {
            return Ok(());
        };

        let pt = self.table_mut(table);
        pt.set(PtIndex::from(va), PtEntry::zero());
        flush_page(va);

        if pt.is_empty() && !self.is_kernel() {
            self.directory_mut().set(index, PdEntry::zero());
            alloc.free_4k(table);
            debug!(
                "Reclaimed empty page table {table} of directory entry {}",
                index.as_usize()
            );
        }
        Ok(())
    }

    /// Unmap every page from `align_down(from)` up to (excluding) `to`.
    ///
    /// # Errors
    /// [`VmemError::OutOfMemory`] if a shared table could not be privatized.
    /// Unmapping stops there; pages from the failing one onward stay mapped.
    pub fn unmap_range<A: FrameAlloc>(
        &mut self,
        alloc: &A,
        from: VirtualAddress,
        to: VirtualAddress,
    ) -> Result<(), VmemError> {
        let mut page = Some(from.page());
        while let Some(current) = page.filter(|p| p.base() < to) {
            if let Err(e) = self.unmap(alloc, current.base()) {
                warn!("Failed to unmap {}: {e}", current.base());
                return Err(e);
            }
            page = current.next();
        }
        Ok(())
    }

    /// Return the leaf entry mapping `va`, if both levels are present.
    #[must_use]
    pub fn resolve(&self, va: VirtualAddress) -> Option<PtEntry> {
        let table = self.directory_ref().get(PdIndex::from(va)).table()?;
        let leaf = self.table_ref(table).get(PtIndex::from(va));
        leaf.is_present().then_some(leaf)
    }

    /// Mutable access to the leaf entry mapping `va`.
    ///
    /// A shared table is privatized first, so the change never reaches the
    /// kernel's tables. The caller is responsible for TLB maintenance.
    ///
    /// # Errors
    /// - [`VmemError::NotMapped`] if `va` is not mapped.
    /// - [`VmemError::OutOfMemory`] if privatizing failed.
    pub fn resolve_mut<A: FrameAlloc>(
        &mut self,
        alloc: &A,
        va: VirtualAddress,
    ) -> Result<&mut PtEntry, VmemError> {
        if self.resolve(va).is_none() {
            return Err(VmemError::NotMapped(va));
        }
        let table = self
            .table_for_write(alloc, PdIndex::from(va))?
            .ok_or(VmemError::NotMapped(va))?;
        Ok(self.table_mut(table).get_mut(PtIndex::from(va)))
    }

    /// Translate a [`VirtualAddress`] to the [`PhysicalAddress`] it maps to.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let page = self.resolve(va)?.page()?;
        Some(page.join(va.page_offset()))
    }

    #[inline]
    #[must_use]
    pub fn is_mapped(&self, va: VirtualAddress) -> bool {
        self.resolve(va).is_some()
    }

    /// `true` if every page touching `[base, base + len)` is mapped.
    ///
    /// An empty range is always contained; a range running past the top of
    /// the 32-bit address space never is.
    #[must_use]
    pub fn contains(&self, base: VirtualAddress, len: u32) -> bool {
        if len == 0 {
            return true;
        }
        let end = u64::from(base.as_u32()) + u64::from(len);
        if end > 1 << 32 {
            return false;
        }

        let mut page = u64::from(base.page().base().as_u32());
        while page < end {
            let Ok(addr) = u32::try_from(page) else {
                return false;
            };
            if !self.is_mapped(VirtualAddress::new(addr)) {
                return false;
            }
            page += u64::from(PAGE_SIZE);
        }
        true
    }

    /// Flag bits of the leaf mapping `va`, or empty if unmapped.
    #[must_use]
    pub fn permission_flags(&self, va: VirtualAddress) -> PageFlags {
        self.resolve(va).map_or(PageFlags::empty(), PtEntry::flags)
    }

    /// Create an independent copy of this space.
    ///
    /// Owned tables of a process space are copied into fresh frames and stay
    /// owned by the clone. Shared tables, and every table of the kernel space,
    /// are aliased and tagged [`Ownership::Shared`].
    ///
    /// # Errors
    /// [`VmemError::OutOfMemory`] if any frame allocation fails. The partial
    /// clone is destroyed before returning.
    pub fn clone_with<A: FrameAlloc>(&self, alloc: &A) -> Result<Self, VmemError> {
        let mut clone = Self::empty(self.mapper, alloc, SpaceKind::Process)?;

        for (index, entry) in self.directory_ref().present() {
            let copy = match (self.kind, entry.ownership(), entry.table()) {
                (SpaceKind::Process, Ownership::Owned, Some(source)) => {
                    let Some(table) = alloc.alloc_4k() else {
                        warn!("Out of memory while cloning address space {}", self.directory);
                        clone.destroy(alloc);
                        return Err(VmemError::OutOfMemory);
                    };
                    clone.table_mut(table).copy_from(self.table_ref(source));
                    entry.with_table(table)
                }
                _ => entry.with_ownership(Ownership::Shared),
            };
            clone.directory_mut().set(index, copy);
        }

        debug!("Cloned address space {} into {}", self.directory, clone.directory);
        Ok(clone)
    }

    /// Release every owned page table, then the directory.
    ///
    /// Shared tables are left alone. Must not be used on the kernel space.
    pub fn destroy<A: FrameAlloc>(self, alloc: &A) {
        debug_assert!(!self.is_kernel(), "the kernel address space is never destroyed");
        self.release(alloc);
    }

    fn release<A: FrameAlloc>(self, alloc: &A) {
        let mut freed = 0usize;
        for (_, entry) in self.directory_ref().present() {
            if let (Ownership::Owned, Some(table)) = (entry.ownership(), entry.table()) {
                alloc.free_4k(table);
                freed += 1;
            }
        }
        alloc.free_4k(self.directory);
        debug!(
            "Destroyed address space {} ({freed} page tables freed)",
            self.directory
        );
    }
}

/// Drop a stale translation of `va` from the local TLB.
#[cfg(all(target_arch = "x86", target_os = "none"))]
#[inline]
fn flush_page(va: VirtualAddress) {
    // SAFETY: `invlpg` only affects the TLB, never memory.
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va.as_u32(), options(nostack, preserves_flags));
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
#[inline]
const fn flush_page(_va: VirtualAddress) {}

//! # Identity PhysMapper for the Kernel
//!
//! The kernel address space maps every usable page to itself (`VA == PA`), so
//! a physical address can be dereferenced directly once paging is on, and
//! trivially before.
//!
//! ## Example
//! ```rust,no_run
//! use kernel_alloc::phys_mapper::IdentityPhysMapper;
//! use kernel_vmem::{PageTable, PhysMapper, PhysicalAddress};
//! let mapper = IdentityPhysMapper;
//! unsafe {
//!     let table: &mut PageTable = mapper.phys_to_mut(PhysicalAddress::new(0x0040_0000));
//!     table.clear();
//! }
//! ```

use kernel_vmem::{PhysMapper, PhysicalAddress};

/// [`PhysMapper`] for an identity-mapped kernel.
///
/// # Safety
/// - The referenced physical range must be identity mapped (or paging disabled).
/// - The returned reference must only be used for valid, writable memory.
#[derive(Debug, Default, Copy, Clone)]
pub struct IdentityPhysMapper;

/// The mapper shared by the process-wide allocator and address spaces.
pub static IDENTITY_MAPPER: IdentityPhysMapper = IdentityPhysMapper;

impl PhysMapper for IdentityPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = pa.as_usize() as *mut T;
        // SAFETY: Caller must ensure the physical address is valid and identity mapped.
        unsafe { &mut *va }
    }
}

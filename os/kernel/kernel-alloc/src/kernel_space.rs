//! Process-wide kernel address space and process address space lifecycle.
//!
//! [`init`] builds the kernel address space once during boot, from the
//! global [frame allocator](crate::frame_alloc). Afterwards process spaces are
//! created, cloned and destroyed against the same allocator.
//!
//! # Example
//! ```ignore
//! use kernel_alloc::{frame_alloc, kernel_space};
//!
//! frame_alloc::init(&memory_info);
//! let kernel = kernel_space::init(&memory_info, &elf_sections);
//! unsafe { kernel.activate() };
//!
//! let mut process = kernel_space::new_address_space()?;
//! let child = kernel_space::clone_address_space(&process)?;
//! kernel_space::destroy_address_space(child)?;
//! ```

use crate::frame_alloc::{self, FrameAllocator};
use crate::phys_mapper::{IDENTITY_MAPPER, IdentityPhysMapper};
use kernel_info::boot::{ElfSection, MemoryInfo};
use kernel_sync::SyncOnceCell;
use kernel_vmem::{AddressSpace, KernelAddressSpace, VmemError};

/// A process address space backed by the global frame allocator.
pub type ProcessAddressSpace = AddressSpace<'static, IdentityPhysMapper>;

static KERNEL_SPACE: SyncOnceCell<KernelAddressSpace<'static, IdentityPhysMapper>> =
    SyncOnceCell::new();

/// Build the kernel address space and publish it.
///
/// # Panics
/// If the frame allocator is not initialized, if the kernel space cannot be
/// built, or if called twice. Boot cannot continue in any of these cases.
pub fn init(
    info: &MemoryInfo,
    sections: &[ElfSection],
) -> &'static KernelAddressSpace<'static, IdentityPhysMapper> {
    let Some(frames) = frame_alloc::global() else {
        panic!("Kernel address space requested before the frame allocator");
    };
    assert!(KERNEL_SPACE.get().is_none(), "Kernel address space built twice");

    let space = match KernelAddressSpace::build(&IDENTITY_MAPPER, frames, info.memory_end, sections) {
        Ok(space) => space,
        Err(e) => panic!("Failed to build the kernel address space: {e}"),
    };
    let Ok(space) = KERNEL_SPACE.set(space) else {
        panic!("Kernel address space built twice");
    };
    space
}

/// The kernel address space, once [`init`] has run.
///
/// # Errors
/// [`VmmError::Uninitialized`] before [`init`].
pub fn kernel_space() -> Result<&'static KernelAddressSpace<'static, IdentityPhysMapper>, VmmError> {
    KERNEL_SPACE.get().ok_or(VmmError::Uninitialized)
}

fn frames() -> Result<&'static FrameAllocator<'static, IdentityPhysMapper>, VmmError> {
    frame_alloc::global().ok_or(VmmError::Uninitialized)
}

/// Create a process address space sharing the kernel's page tables.
///
/// # Errors
/// - [`VmmError::Uninitialized`] before [`init`].
/// - [`VmmError::Vmem`] with [`VmemError::OutOfMemory`] if no frame is free.
pub fn new_address_space() -> Result<ProcessAddressSpace, VmmError> {
    Ok(kernel_space()?.new_address_space(frames()?)?)
}

/// Clone `space` (for `fork`): owned tables are copied, shared ones aliased.
///
/// # Errors
/// As [`new_address_space`]. Nothing is leaked on failure.
pub fn clone_address_space(space: &ProcessAddressSpace) -> Result<ProcessAddressSpace, VmmError> {
    Ok(space.clone_with(frames()?)?)
}

/// Release `space` and every page table it owns.
///
/// # Errors
/// [`VmmError::Uninitialized`] before [`init`]; `space` is leaked then.
pub fn destroy_address_space(space: ProcessAddressSpace) -> Result<(), VmmError> {
    space.destroy(frames()?);
    Ok(())
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmmError {
    #[error("the kernel address space is not initialized")]
    Uninitialized,
    #[error(transparent)]
    Vmem(#[from] VmemError),
}

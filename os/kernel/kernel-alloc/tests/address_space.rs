mod common;

use common::{POOL_BASE, Pool, allocator, states};
use kernel_info::boot::{ElfSection, SectionFlags};
use kernel_vmem::{KernelAddressSpace, Ownership, PageFlags, PdIndex, PhysicalAddress, VirtualAddress, VmemError};

const MEMORY_END: PhysicalAddress = PhysicalAddress::new(0x0080_0000);

fn text_section() -> ElfSection {
    ElfSection {
        addr: 0x0010_0000,
        size: 0x3000,
        addralign: 4096,
        flags: SectionFlags::new().with_alloc(true).with_execinstr(true),
    }
}

#[test]
fn kernel_space_is_built_from_the_buddy_pool() {
    let pool = Pool::new(256);
    let mut states = states(8);
    let frames = allocator(&pool, &mut states, 8);

    let kernel = KernelAddressSpace::build(&pool, &frames, MEMORY_END, &[text_section()]).unwrap();

    // One directory and two tables cover [4 KiB, 8 MiB).
    assert_eq!(frames.allocated_pages(), 3);
    assert_eq!(kernel.directory().base(), POOL_BASE);
    assert!(!kernel.is_mapped(VirtualAddress::new(0)));
    assert_eq!(
        kernel.translate(VirtualAddress::new(0x0050_0123)),
        Some(PhysicalAddress::new(0x0050_0123))
    );
    assert!(!kernel.is_mapped(VirtualAddress::new(0x0080_0000)));
    assert_eq!(kernel.permission_flags(VirtualAddress::new(0x0010_2000)), PageFlags::PRESENT);
    assert_eq!(
        kernel.permission_flags(VirtualAddress::new(0x0010_3000)),
        PageFlags::PRESENT | PageFlags::WRITABLE
    );
    assert_eq!(kernel.ownership(PdIndex::new(1)), Some(Ownership::Owned));
}

#[test]
fn process_lifecycle_returns_every_frame() {
    let pool = Pool::new(256);
    let mut states = states(8);
    let frames = allocator(&pool, &mut states, 8);
    let kernel = KernelAddressSpace::build(&pool, &frames, MEMORY_END, &[]).unwrap();
    let baseline = frames.allocated_pages();

    let mut process = kernel.new_address_space(&frames).unwrap();
    assert_eq!(process.ownership(PdIndex::new(0)), Some(Ownership::Shared));

    let user = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER;
    let data = frames.allocate_zeroed(0).unwrap();
    let stack = VirtualAddress::new(0xBFFF_F000);
    process.map(&frames, stack, data, user).unwrap();

    // Remapping a kernel page privatizes the shared table first.
    let low = VirtualAddress::new(0x1000);
    process.map(&frames, low, data, user).unwrap();
    assert_eq!(process.ownership(PdIndex::new(0)), Some(Ownership::Owned));
    assert_eq!(process.translate(low), Some(data));
    assert_eq!(kernel.translate(low), Some(PhysicalAddress::new(0x1000)));
    assert!(!kernel.permission_flags(low).contains(PageFlags::USER));
    assert_eq!(process.translate(VirtualAddress::new(0x2000)), Some(PhysicalAddress::new(0x2000)));

    let before_clone = frames.allocated_pages();
    let child = process.clone_with(&frames).unwrap();
    // A directory plus copies of the two owned tables.
    assert_eq!(frames.allocated_pages(), before_clone + 3);
    assert_eq!(child.translate(stack), Some(data));
    assert_eq!(child.ownership(PdIndex::new(1)), Some(Ownership::Shared));

    child.destroy(&frames);
    assert_eq!(frames.allocated_pages(), before_clone);
    assert_eq!(process.translate(stack), Some(data));

    process.destroy(&frames);
    frames.free(data).unwrap();
    assert_eq!(frames.allocated_pages(), baseline);
    assert_eq!(kernel.translate(low), Some(PhysicalAddress::new(0x1000)));
    assert_eq!(frames.verify(), Ok(()));
}

#[test]
fn out_of_memory_surfaces_without_leaking() {
    let pool = Pool::new(4);
    let mut states = states(2);
    let frames = allocator(&pool, &mut states, 2);
    let kernel = KernelAddressSpace::build(&pool, &frames, MEMORY_END, &[]).unwrap();
    assert_eq!(frames.allocated_pages(), 3);

    let mut process = kernel.new_address_space(&frames).unwrap();
    assert_eq!(frames.allocated_pages(), 4);

    let user = PageFlags::PRESENT | PageFlags::USER;
    let va = VirtualAddress::new(0x4000_0000);
    assert_eq!(
        process.map(&frames, va, PhysicalAddress::new(0x0090_0000), user),
        Err(VmemError::OutOfMemory)
    );
    assert_eq!(kernel.new_address_space(&frames).err(), Some(VmemError::OutOfMemory));

    process.destroy(&frames);
    assert_eq!(frames.allocated_pages(), 3);
    assert_eq!(frames.verify(), Ok(()));
}

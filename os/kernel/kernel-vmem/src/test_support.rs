//! Simulated physical memory for host tests.

use crate::{FrameAlloc, PhysMapper};
use core::cell::{Cell, RefCell, UnsafeCell};
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};

#[repr(C, align(4096))]
struct Frame([u8; PAGE_SIZE as usize]);

/// A vector of 4 KiB frames; physical address `n * 4096` is frame `n`.
pub struct TestPhys {
    frames: Vec<UnsafeCell<Frame>>,
}

impl TestPhys {
    pub fn new(frames: usize) -> Self {
        Self {
            frames: (0..frames)
                .map(|_| UnsafeCell::new(Frame([0; PAGE_SIZE as usize])))
                .collect(),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl PhysMapper for TestPhys {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let (page, offset) = pa.split();
        let frame = self.frames[page.number() as usize].get().cast::<u8>();
        unsafe { &mut *frame.add(offset as usize).cast::<T>() }
    }
}

/// Hands out the frames of a [`TestPhys`], skipping frame 0.
///
/// Tracks outstanding frames to detect leaks and can be limited to a number
/// of further allocations to provoke out-of-memory paths.
pub struct TestFrames<'p> {
    phys: &'p TestPhys,
    free: RefCell<Vec<PhysicalPage>>,
    outstanding: Cell<usize>,
    budget: Cell<Option<usize>>,
}

impl<'p> TestFrames<'p> {
    pub fn new(phys: &'p TestPhys) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let free = (1..phys.frame_count() as u32)
            .rev()
            .map(PhysicalPage::from_number)
            .collect();
        Self {
            phys,
            free: RefCell::new(free),
            outstanding: Cell::new(0),
            budget: Cell::new(None),
        }
    }

    /// Allow only `n` more successful allocations.
    pub fn set_budget(&self, n: usize) {
        self.budget.set(Some(n));
    }

    pub fn clear_budget(&self) {
        self.budget.set(None);
    }

    /// Frames handed out and not yet returned.
    pub fn outstanding(&self) -> usize {
        self.outstanding.get()
    }
}

impl FrameAlloc for TestFrames<'_> {
    fn alloc_4k(&self) -> Option<PhysicalPage> {
        match self.budget.get() {
            Some(0) => return None,
            Some(n) => self.budget.set(Some(n - 1)),
            None => {}
        }
        let page = self.free.borrow_mut().pop()?;
        let bytes: &mut [u8; PAGE_SIZE as usize] = unsafe { self.phys.phys_to_mut(page.base()) };
        bytes.fill(0);
        self.outstanding.set(self.outstanding.get() + 1);
        Some(page)
    }

    fn free_4k(&self, page: PhysicalPage) {
        let mut free = self.free.borrow_mut();
        assert!(!free.contains(&page), "double free of {page}");
        free.push(page);
        self.outstanding.set(self.outstanding.get() - 1);
    }
}

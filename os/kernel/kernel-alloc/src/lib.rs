//! # Kernel Physical Memory Allocation
//!
//! This crate owns physical memory: it hands out frames to the rest of the
//! kernel and provides the process-wide entry points for address spaces.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │          Kernel Address Space (kernel_space)        │
//! │    • Boot-time identity map of all memory           │
//! │    • Process address space create/clone/destroy     │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ FrameAlloc
//! ┌─────────────────▼───────────────────────────────────┐
//! │           Frame Allocator (frame_alloc)             │
//! │    • Interrupt-safe spin lock                       │
//! │    • Zero-filled allocations                        │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │             Buddy Allocator (buddy)                 │
//! │    • Blocks of 2^order pages                        │
//! │    • Implicit tree of Free/Partial/Full nodes       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! 1. [`frame_alloc::init`] places the buddy tree at the start of the frame
//!    pool and publishes the global allocator.
//! 2. [`kernel_space::init`] builds the kernel address space from it.
//! 3. Process address spaces are created with
//!    [`kernel_space::new_address_space`] and
//!    [`kernel_space::clone_address_space`], and released with
//!    [`kernel_space::destroy_address_space`].
//!
//! Neither singleton is ever re-initialized.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_alloc::buddy::{BuddyAllocator, NodeState, tree};
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! let mut states = vec![NodeState::Free; tree::node_count(8)];
//! let mut buddy = BuddyAllocator::new(&mut states, PhysicalAddress::new(0x40_0000), 8, 256);
//!
//! let block = buddy.allocate(2).unwrap();
//! assert_eq!(block.as_u32() % (4 * 4096), 0);
//! assert_eq!(buddy.free(block), Ok(2));
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod buddy;
pub mod frame_alloc;
pub mod kernel_space;
pub mod phys_mapper;

pub use buddy::{FrameAllocError, MemoryStats};
pub use frame_alloc::FrameAllocator;
pub use kernel_space::VmmError;

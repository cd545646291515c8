//! # Kernel Configuration and Boot Interface
//!
//! This crate defines the memory layout constants and the boot hand-off records
//! that the memory management core consumes. It is the single source of truth
//! for the layout shared by the frame allocator and the address space manager.
//!
//! ## Architecture
//!
//! ### Memory Layout ([`memory`])
//! Compile-time constants for the physical layout:
//! * **Page geometry**: page size and page-table fan-out
//! * **Reserved kernel heap**: the region below the frame pool
//! * **Frame pool**: the first byte handed to the buddy allocator
//!
//! ### Boot Information ([`boot`])
//! Records handed over by the boot sequence:
//! * [`MemoryInfo`](boot::MemoryInfo): end of usable physical memory
//! * [`ElfSection`](boot::ElfSection): kernel image sections and their permissions
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  Low memory, kernel image       │  identity mapped from 0x1000
//! HEAP_BEGIN  ├─────────────────────────────────┤ 0x0020_0000 (2 MiB)
//!             │  Reserved kernel heap           │
//! POOL_BEGIN  ├─────────────────────────────────┤ 0x0030_0000 (3 MiB)
//!             │  Buddy state array (metadata)   │
//!             ├─────────────────────────────────┤ page aligned
//!             │  Frames managed by the buddy    │
//!             │  allocator                      │
//! memory_end  └─────────────────────────────────┘
//! ```
//!
//! Every page from `0x1000` up to `memory_end` is identity mapped in the kernel
//! address space, so physical frames are reachable at their own address once
//! paging is enabled.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;

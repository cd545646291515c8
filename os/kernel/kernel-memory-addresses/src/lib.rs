//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw 32-bit memory addresses and 4 KiB page bases
//! used by the paging and frame allocation code.
//!
//! ## Overview
//!
//! The types prevent mixing virtual and physical addresses at compile time while
//! remaining zero-cost wrappers around `u32` values.
//!
//! | Concept | Description |
//! |----------|-------------|
//! | [`MemoryAddress`] | A raw 32-bit address, either physical or virtual. |
//! | [`PhysicalAddress`] / [`PhysicalPage`] | Physical memory (RAM, MMIO) and 4 KiB frame bases. |
//! | [`VirtualAddress`] / [`VirtualPage`] | Page-table translated memory and 4 KiB page bases. |
//!
//! ## Two-Level Split
//!
//! A 32-bit virtual address is consumed by the MMU in three fields:
//!
//! ```text
//! | 31‒22           | 21‒12       | 11‒0   |
//! | directory index | table index | offset |
//! ```
//!
//! [`VirtualAddress::directory_index`], [`VirtualAddress::table_index`] and
//! [`VirtualAddress::page_offset`] expose these fields.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x0140_1234);
//! assert_eq!(va.directory_index(), 5);
//! assert_eq!(va.table_index(), 1);
//! assert_eq!(va.page_offset(), 0x234);
//!
//! let (page, off) = va.split();
//! assert_eq!(page.base().as_u32(), 0x0140_1000);
//! assert_eq!(page.join(off), va);
//!
//! let pa = PhysicalAddress::new(0x0030_0042);
//! assert_eq!(pa.page().base().as_u32(), 0x0030_0000);
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` and implement `Copy`, `Eq`, `Ord`, and
//!   `Hash`, making them suitable as map keys or for FFI use.
//! - All alignment and offset calculations are `const fn`.
//! - Only 4 KiB pages exist; there is no large-page support.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod memory_address;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use memory_address::MemoryAddress;
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

/// Size of a page (and of a physical frame) in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// `log2(PAGE_SIZE)`, i.e. the number of low bits used for the in-page offset.
pub const PAGE_SHIFT: u32 = 12;

/// Mask selecting the in-page offset bits.
pub const PAGE_OFFSET_MASK: u32 = PAGE_SIZE - 1;

const _: () = assert!(1 << PAGE_SHIFT == PAGE_SIZE);

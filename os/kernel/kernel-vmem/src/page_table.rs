//! # IA-32 Paging Structures
//!
//! - [`pd`]: the page directory (top level, one per address space).
//! - [`pt`]: page tables (second level, leaf mappings).

pub mod pd;
pub mod pt;

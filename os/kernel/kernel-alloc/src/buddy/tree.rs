//! # Implicit Buddy Tree Navigation
//!
//! The buddy tree is a complete binary tree stored breadth-first in an array.
//! Node `0` is the root and covers the whole managed region (order
//! `max_order`); every level below halves the block size, down to single
//! pages (order 0) at the leaves.
//!
//! ```text
//! depth 0                 0                 order = max_order
//!                  ┌──────┴──────┐
//! depth 1          1             2          order = max_order - 1
//!               ┌──┴──┐       ┌──┴──┐
//! depth 2       3     4       5     6       order = max_order - 2
//! ```
//!
//! All navigation is closed-form index arithmetic:
//!
//! | Relation | Formula |
//! |----------|---------|
//! | left child | `2i + 1` |
//! | right child | `2i + 2` |
//! | parent | `(i - 1) / 2` |
//! | buddy | `i + 1` if `i` is odd, `i - 1` otherwise |
//! | depth | `⌊log₂(i + 1)⌋` |
//!
//! Pages are counted relative to the start of the managed region.

/// Number of nodes in a tree whose root has order `max_order`.
///
/// ```rust
/// # use kernel_alloc::buddy::tree::node_count;
/// assert_eq!(node_count(0), 1);
/// assert_eq!(node_count(8), 511);
/// ```
#[inline]
#[must_use]
pub const fn node_count(max_order: u32) -> usize {
    (1 << (max_order + 1)) - 1
}

/// Depth of node `index` (the root has depth 0).
#[inline]
#[must_use]
pub const fn depth(index: usize) -> u32 {
    usize::BITS - 1 - (index + 1).leading_zeros()
}

/// Order (log₂ of the block size in pages) of node `index`.
#[inline]
#[must_use]
pub const fn order_of(index: usize, max_order: u32) -> u32 {
    max_order - depth(index)
}

#[inline]
#[must_use]
pub const fn left(index: usize) -> usize {
    2 * index + 1
}

#[inline]
#[must_use]
pub const fn right(index: usize) -> usize {
    2 * index + 2
}

/// Parent of `index`, or `None` for the root.
#[inline]
#[must_use]
pub const fn parent(index: usize) -> Option<usize> {
    if index == 0 {
        None
    } else {
        Some((index - 1) / 2)
    }
}

/// The other child of `index`'s parent, or `None` for the root.
#[inline]
#[must_use]
pub const fn buddy(index: usize) -> Option<usize> {
    if index == 0 {
        None
    } else if index % 2 == 1 {
        Some(index + 1)
    } else {
        Some(index - 1)
    }
}

/// First page covered by node `index`.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn first_page(index: usize, max_order: u32) -> u32 {
    let level_start = (1usize << depth(index)) - 1;
    ((index - level_start) as u32) << order_of(index, max_order)
}

/// Node of order `order` whose block contains `page`.
#[inline]
#[must_use]
pub const fn node_at(page: u32, order: u32, max_order: u32) -> usize {
    let level_start = (1usize << (max_order - order)) - 1;
    level_start + (page >> order) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_and_parent_are_inverse() {
        for i in 0..node_count(6) / 2 {
            assert_eq!(parent(left(i)), Some(i));
            assert_eq!(parent(right(i)), Some(i));
            assert_eq!(buddy(left(i)), Some(right(i)));
            assert_eq!(buddy(right(i)), Some(left(i)));
        }
        assert_eq!(parent(0), None);
        assert_eq!(buddy(0), None);
    }

    #[test]
    fn order_by_depth() {
        assert_eq!(order_of(0, 8), 8);
        assert_eq!(order_of(1, 8), 7);
        assert_eq!(order_of(2, 8), 7);
        assert_eq!(order_of(3, 8), 6);
        assert_eq!(order_of(255, 8), 0);
        assert_eq!(order_of(510, 8), 0);
    }

    #[test]
    fn first_page_of_nodes() {
        assert_eq!(first_page(0, 8), 0);
        assert_eq!(first_page(1, 8), 0);
        assert_eq!(first_page(2, 8), 128);
        assert_eq!(first_page(6, 8), 192);
        assert_eq!(first_page(255, 8), 0);
        assert_eq!(first_page(510, 8), 255);
    }

    #[test]
    fn node_at_inverts_first_page() {
        let max_order = 5;
        for index in 0..node_count(max_order) {
            let order = order_of(index, max_order);
            let page = first_page(index, max_order);
            assert_eq!(node_at(page, order, max_order), index);
            // Any page inside the block resolves to the same node.
            assert_eq!(node_at(page + (1 << order) - 1, order, max_order), index);
        }
    }
}

//! Internal binary radix tree over the leaves of a cornerstone tree.
//!
//! The binary tree provides the log-time descent that the collision finder
//! needs; it is rebuilt from the flat leaf array in one fully parallel pass
//! whenever the cornerstone tree changes. Nodes reference their children as
//! tagged indices into either the internal node array or the leaf array, so
//! no pointer graph is materialised.

use rayon::prelude::*;

use crate::morton::{common_prefix, zero_low_bits, SfcKey};

/// Reference to a child of a binary tree node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Child {
    /// Index into the internal node array.
    Internal(usize),
    /// Index into the cornerstone leaf array.
    Leaf(usize),
}

/// One internal node of the binary radix tree.
#[derive(Clone, Copy, Debug)]
pub struct BinaryNode<K> {
    /// Common key prefix of all leaves below this node, low bits zeroed.
    pub prefix: K,
    /// Number of significant bits in `prefix`.
    pub prefix_len: u32,
    /// Child covering the lower key range.
    pub left: Child,
    /// Child covering the upper key range.
    pub right: Child,
}

/// Position of the highest differing bit between adjacent leaf intervals
/// within `[first, last]`.
fn find_split<K: SfcKey>(codes: &[K], first: usize, last: usize) -> usize {
    let common = common_prefix(codes[first], codes[last]);

    let mut split = first;
    let mut step = last - first;
    loop {
        step = (step + 1) / 2;
        let probe = split + step;
        if probe < last && common_prefix(codes[first], codes[probe]) > common {
            split = probe;
        }
        if step <= 1 {
            break;
        }
    }

    split
}

fn construct_node<K: SfcKey>(codes: &[K], idx: usize) -> BinaryNode<K> {
    let n = codes.len() as isize;
    let cpr = |j: isize| -> i64 {
        if j < 0 || j >= n {
            -1
        } else {
            common_prefix(codes[idx], codes[j as usize]) as i64
        }
    };

    // Determine the direction in which the node's key range extends by
    // comparing the prefixes shared with both neighbors.
    let mut direction: isize = 1;
    let mut min_prefix: i64 = -1;
    if idx > 0 {
        direction = if cpr(idx as isize + 1) > cpr(idx as isize - 1) {
            1
        } else {
            -1
        };
        min_prefix = cpr(idx as isize - direction);
    }

    // Extend by binary doubling until the shared prefix drops below the
    // one shared with the opposite neighbor.
    let mut search_range: isize = 2;
    while cpr(idx as isize + search_range * direction) > min_prefix {
        search_range *= 2;
    }

    let mut second = idx as isize;
    loop {
        search_range = (search_range + 1) / 2;
        let probe = second + search_range * direction;
        if cpr(probe) > min_prefix {
            second = probe;
        }
        if search_range <= 1 {
            break;
        }
    }
    let second = second as usize;

    let prefix_len = common_prefix(codes[idx], codes[second]);
    let prefix = zero_low_bits(codes[idx.min(second)], prefix_len);

    let first = idx.min(second);
    let last = idx.max(second);
    let split = find_split(codes, first, last);

    let left = if split == first {
        Child::Leaf(split)
    } else {
        Child::Internal(split)
    };
    let right = if split + 1 == last {
        Child::Leaf(split + 1)
    } else {
        Child::Internal(split + 1)
    };

    BinaryNode {
        prefix,
        prefix_len,
        left,
        right,
    }
}

/// Construct the binary radix tree over the given sorted leaf start keys.
///
/// `codes` are the `n` leaf start keys of a cornerstone tree, i.e. the tree
/// array without its sentinel. Returns `n - 1` internal nodes with node 0
/// as the root; an empty result for a single-leaf tree.
pub fn build_binary_tree<K: SfcKey>(codes: &[K]) -> Vec<BinaryNode<K>> {
    debug_assert!(!codes.is_empty());
    debug_assert!(codes.windows(2).all(|w| w[0] < w[1]));

    (0..codes.len().saturating_sub(1))
        .into_par_iter()
        .map(|idx| construct_node(codes, idx))
        .collect()
}

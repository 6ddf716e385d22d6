//! Cornerstone octrees: a sorted, flat array of space-filling-curve keys
//! whose consecutive pairs are the leaves of an adaptive octree.
//!
//! A tree over keys of type `K` is a `Vec<K>` with first element `0` and
//! last element `node_range(0)`, the "one past the end" sentinel. Leaf `i`
//! covers the key interval `[tree[i], tree[i + 1])`. The tree is kept
//! balanced under a per-leaf particle limit by iterating merge/split
//! sweeps until a fixed point is reached.

use itertools::Itertools;
use rayon::prelude::*;

use crate::constants::NSIBLINGS;
use crate::morton::{node_range, octal_digit, tree_level, SfcKey};

/// Number of leaves of a cornerstone tree array.
pub fn num_leaves<K: SfcKey>(tree: &[K]) -> usize {
    debug_assert!(!tree.is_empty());
    tree.len() - 1
}

/// The tree consisting of just the root node.
pub fn root_tree<K: SfcKey>() -> Vec<K> {
    vec![K::from_u64(0), node_range::<K>(0)]
}

/// Check the cornerstone format invariants.
///
/// The tree must start at key zero, end at the root sentinel, be strictly
/// increasing, and every leaf size must be a power of 8 with its start key
/// aligned to that size.
pub fn is_valid_tree<K: SfcKey>(tree: &[K]) -> bool {
    if tree.len() < 2 {
        return false;
    }
    if tree[0].to_u64() != 0 || *tree.last().unwrap() != node_range::<K>(0) {
        return false;
    }

    for (&a, &b) in tree.iter().tuple_windows() {
        if a >= b {
            return false;
        }
        let range = b.to_u64() - a.to_u64();
        if !range.is_power_of_two() || range.trailing_zeros() % 3 != 0 {
            return false;
        }
        if a.to_u64() % range != 0 {
            return false;
        }
    }

    true
}

/// Count the particles in each leaf of `tree`.
///
/// `keys` is the sorted array of particle keys; each per-leaf count
/// saturates at `max_count`, which callers use to detect exhausted
/// resolution without overflowing.
pub fn compute_counts<K: SfcKey>(tree: &[K], keys: &[K], max_count: u32) -> Vec<u32> {
    debug_assert!(keys.windows(2).all(|w| w[0] <= w[1]));

    (0..num_leaves(tree))
        .into_par_iter()
        .map(|i| {
            let start = keys.partition_point(|&k| k < tree[i]);
            let end = keys.partition_point(|&k| k < tree[i + 1]);
            ((end - start) as u64).min(max_count as u64) as u32
        })
        .collect()
}

/// Determine the position of leaf `i` within its group of 8 sibling
/// leaves, together with the leaf's level.
///
/// Returns `-1` for the position if the eight siblings are not all
/// present as adjacent leaves (or the leaf is the root), in which case a
/// merge is impossible.
pub(crate) fn sibling_and_level<K: SfcKey>(tree: &[K], i: usize) -> (i32, u32) {
    let this = tree[i].to_u64();
    let range = tree[i + 1].to_u64() - this;
    let level = tree_level(K::from_u64(range));
    if level == 0 {
        return (-1, 0);
    }

    let digit = octal_digit(tree[i], level) as usize;
    let group = i.wrapping_sub(digit);
    if group > i || group + NSIBLINGS >= tree.len() {
        return (-1, level);
    }

    // the group is mergeable if the eight leaves exactly tile the parent
    let parent_range = node_range::<K>(level - 1).to_u64();
    let tiles = tree[group + NSIBLINGS].to_u64() - tree[group].to_u64() == parent_range
        && tree[group].to_u64() == this - digit as u64 * range;

    if tiles {
        (digit as i32, level)
    } else {
        (-1, level)
    }
}

/// Compute the per-leaf rebalance operations for one sweep.
///
/// The op code of a leaf is `8` to split it into its children, `1` to
/// keep it, and `0` to drop it because it is fused into its parent; the
/// first leaf of a fused group carries `1` and turns into the parent.
/// The second return value is true when every op is "keep", i.e. the
/// tree is converged.
pub fn rebalance_decision<K: SfcKey>(tree: &[K], counts: &[u32], bucket_size: u32) -> (Vec<u32>, bool) {
    debug_assert_eq!(counts.len(), num_leaves(tree));

    let ops: Vec<u32> = (0..num_leaves(tree))
        .into_par_iter()
        .map(|i| {
            let (digit, level) = sibling_and_level(tree, i);
            if digit >= 0 {
                let group = i - digit as usize;
                let group_count: u64 = counts[group..group + NSIBLINGS]
                    .iter()
                    .map(|&c| c as u64)
                    .sum();
                if group_count <= bucket_size as u64 {
                    return if digit == 0 { 1 } else { 0 };
                }
            }

            if counts[i] > bucket_size && level < K::MAX_LEVEL {
                8
            } else {
                1
            }
        })
        .collect();

    let converged = ops.iter().all(|&op| op == 1);

    // A converged tree that still has an over-full leaf has run out of key
    // resolution at the deepest level.
    if converged && counts.iter().any(|&c| c > bucket_size) {
        log::warn!(
            "tree resolution exhausted: a leaf at level {} still exceeds the bucket size of {}",
            K::MAX_LEVEL,
            bucket_size
        );
    }

    (ops, converged)
}

/// Apply one sweep of rebalance operations, returning the new tree.
pub fn rebalance<K: SfcKey>(tree: &[K], ops: &[u32]) -> Vec<K> {
    debug_assert_eq!(ops.len(), num_leaves(tree));

    // exclusive prefix sum of the ops gives each leaf its new position
    let mut offsets = Vec::with_capacity(ops.len() + 1);
    let mut total = 0usize;
    for &op in ops {
        offsets.push(total);
        total += op as usize;
    }
    offsets.push(total);

    let mut new_tree = vec![K::default(); total + 1];
    for i in 0..ops.len() {
        let position = offsets[i];
        match ops[i] {
            0 => {}
            1 => new_tree[position] = tree[i],
            8 => {
                let this = tree[i].to_u64();
                let level = tree_level(K::from_u64(tree[i + 1].to_u64() - this));
                let child_range = node_range::<K>(level + 1).to_u64();
                for sibling in 0..NSIBLINGS as u64 {
                    new_tree[position + sibling as usize] =
                        K::from_u64(this + sibling * child_range);
                }
            }
            _ => unreachable!("invalid rebalance op"),
        }
    }
    new_tree[total] = *tree.last().unwrap();

    debug_assert!(is_valid_tree(&new_tree));
    new_tree
}

/// Build a cornerstone tree from scratch for the given sorted particle
/// keys, iterating rebalance sweeps until convergence. Returns the tree
/// and its leaf counts.
pub fn compute_tree<K: SfcKey>(keys: &[K], bucket_size: u32) -> (Vec<K>, Vec<u32>) {
    let mut tree = root_tree::<K>();
    let mut counts = compute_counts(&tree, keys, u32::MAX);

    loop {
        let (ops, converged) = rebalance_decision(&tree, &counts, bucket_size);
        if converged {
            return (tree, counts);
        }
        tree = rebalance(&tree, &ops);
        counts = compute_counts(&tree, keys, u32::MAX);
    }
}

/// Perform a single rebalance sweep of an existing tree and refresh the
/// counts. Returns true if the tree was already converged.
///
/// After particles have moved, counts may exceed the bucket size until
/// subsequent sweeps catch up; the tree stays structurally valid at all
/// times.
pub fn update_tree<K: SfcKey>(
    keys: &[K],
    bucket_size: u32,
    tree: &mut Vec<K>,
    counts: &mut Vec<u32>,
    max_count: u32,
) -> bool {
    let (ops, converged) = rebalance_decision(tree, counts, bucket_size);
    if !converged {
        *tree = rebalance(tree, &ops);
    }
    *counts = compute_counts(tree, keys, max_count);
    converged
}

/// Build the minimal set of aligned nodes whose union is exactly the
/// interval between the first and last of the given cornerstone keys.
///
/// Proceeds by greedily extracting the largest aligned power-of-8 block
/// between each pair of consecutive cornerstones. The result fulfills the
/// cornerstone invariants whenever the input starts at 0 and ends at the
/// root sentinel.
pub fn spanning_tree<K: SfcKey>(cornerstones: &[K]) -> Vec<K> {
    debug_assert!(cornerstones.len() >= 2);
    debug_assert!(cornerstones.windows(2).all(|w| w[0] < w[1]));

    let mut tree = Vec::new();

    for (&first, &second) in cornerstones.iter().tuple_windows() {
        let mut a = first.to_u64();
        let b = second.to_u64();

        while a < b {
            let alignment = if a == 0 {
                3 * K::MAX_LEVEL
            } else {
                (a.trailing_zeros() / 3 * 3).min(3 * K::MAX_LEVEL)
            };
            let fit = (63 - (b - a).leading_zeros()) / 3 * 3;

            tree.push(K::from_u64(a));
            a += 1u64 << alignment.min(fit);
        }
    }

    tree.push(*cornerstones.last().unwrap());
    tree
}

/// Generate example cornerstone trees by successive subdivision.
///
/// A node is addressed by the sequence of its octal digits; `divide(&[])`
/// splits the root, `divide(&[0, 7])` splits the eighth child of the
/// first child. Mostly used to write down small trees in tests.
pub struct TreeMaker<K> {
    tree: Vec<K>,
}

impl<K: SfcKey> TreeMaker<K> {
    /// Start from the root-only tree.
    pub fn new() -> Self {
        Self {
            tree: root_tree::<K>(),
        }
    }

    /// Introduce all 8 children of the node addressed by `path`.
    pub fn divide(mut self, path: &[u64]) -> Self {
        let level = path.len() as u32;
        debug_assert!(level < K::MAX_LEVEL);

        let mut key = 0u64;
        for (i, &digit) in path.iter().enumerate() {
            debug_assert!(digit < 8);
            key |= digit << (3 * (K::MAX_LEVEL - 1 - i as u32));
        }

        debug_assert!(
            self.tree.contains(&K::from_u64(key)),
            "node to be divided not present in tree"
        );

        let child_range = node_range::<K>(level + 1).to_u64();
        for sibling in 1..8u64 {
            self.tree.push(K::from_u64(key + sibling * child_range));
        }

        self
    }

    /// Return the finished tree, fulfilling the necessary invariants.
    pub fn make(mut self) -> Vec<K> {
        self.tree.sort_unstable();
        debug_assert!(is_valid_tree(&self.tree));
        self.tree
    }
}

impl<K: SfcKey> Default for TreeMaker<K> {
    fn default() -> Self {
        Self::new()
    }
}

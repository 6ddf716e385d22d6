//! Buffer layout for the particles of all nodes present on a rank.
//!
//! Each rank stores the particles of its assigned tree nodes plus those
//! of the incoming halo nodes in the same contiguous attribute buffers
//! (x, y, z, h, ...), ordered by increasing node index, which is the same
//! as increasing key order. The layout records where each node's
//! particles live inside those buffers.

use std::collections::HashMap;

use crate::decomposition::{IndexRanges, SpaceCurveAssignment};
use crate::morton::SfcKey;

/// Per-node offsets into the particle buffers of the executing rank.
///
/// Valid for every attribute array, since all of them share the same
/// ordering.
pub struct ArrayLayout {
    /// Sorted global node indices present on this rank.
    node_list: Vec<usize>,
    /// Buffer offset per node, one extra entry holding the total size.
    offsets: Vec<usize>,
    /// Maps a global node index to its position in `node_list`.
    global_to_local: HashMap<usize, usize>,
    /// Buffer ranges belonging to the local assignment, in buffer offsets.
    local_ranges: IndexRanges<usize>,
}

impl ArrayLayout {
    /// Number of contiguous locally-assigned buffer ranges.
    pub fn n_local_ranges(&self) -> usize {
        self.local_ranges.n_ranges()
    }

    /// Buffer position where local range `i` starts.
    pub fn local_range_position(&self, i: usize) -> usize {
        self.local_ranges.range_start(i)
    }

    /// Number of particles in local range `i`.
    pub fn local_range_count(&self, i: usize) -> usize {
        self.local_ranges.count(i)
    }

    /// Number of particles in all local ranges together.
    pub fn local_count(&self) -> usize {
        self.local_ranges.total_count()
    }

    /// Buffer offset of a node present in the layout.
    pub fn node_position(&self, global_node: usize) -> usize {
        self.offsets[self.global_to_local[&global_node]]
    }

    /// Number of particles of a node present in the layout.
    pub fn node_count(&self, global_node: usize) -> usize {
        let local = self.global_to_local[&global_node];
        self.offsets[local + 1] - self.offsets[local]
    }

    /// True if the given global node is part of the layout.
    pub fn contains(&self, global_node: usize) -> bool {
        self.global_to_local.contains_key(&global_node)
    }

    /// Required buffer size: assigned plus halo particles.
    pub fn total_size(&self) -> usize {
        *self.offsets.last().unwrap()
    }

    /// Sorted global node indices present on this rank.
    pub fn nodes(&self) -> &[usize] {
        &self.node_list
    }
}

/// Locate the ranges of tree node indices assigned to `rank`.
pub fn local_node_ranges<K: SfcKey>(
    tree: &[K],
    assignment: &SpaceCurveAssignment<K>,
    rank: usize,
) -> IndexRanges<usize> {
    let mut result = IndexRanges::new();

    let ranges = assignment.ranges(rank);
    for i in 0..ranges.n_ranges() {
        let first = tree.partition_point(|&k| k < ranges.range_start(i));
        let second = tree.partition_point(|&k| k < ranges.range_end(i));
        result.add_index_range(first, second);
    }

    result
}

/// Compute the buffer layout from the locally assigned node ranges, the
/// incoming halo nodes, and the global per-node particle counts.
pub fn compute_layout(
    local_nodes: &IndexRanges<usize>,
    halo_nodes: Vec<usize>,
    global_counts: &[u32],
) -> ArrayLayout {
    let mut node_list = halo_nodes;

    for i in 0..local_nodes.n_ranges() {
        node_list.extend(local_nodes.range_start(i)..local_nodes.range_end(i));
    }

    node_list.sort_unstable();
    node_list.dedup();

    let mut offsets = Vec::with_capacity(node_list.len() + 1);
    let mut offset = 0;
    for &node in &node_list {
        offsets.push(offset);
        offset += global_counts[node] as usize;
    }
    offsets.push(offset);

    let global_to_local: HashMap<usize, usize> = node_list
        .iter()
        .enumerate()
        .map(|(local, &global)| (global, local))
        .collect();

    // register which buffer ranges belong to the local assignment
    let mut local_ranges = IndexRanges::new();
    for i in 0..local_nodes.n_ranges() {
        if local_nodes.range_start(i) == local_nodes.range_end(i) {
            continue;
        }
        let lower = offsets[global_to_local[&local_nodes.range_start(i)]];
        let upper = offsets[global_to_local[&local_nodes.range_start(i)]
            + (local_nodes.range_end(i) - local_nodes.range_start(i))];
        local_ranges.add_index_range(lower, upper);
    }

    ArrayLayout {
        node_list,
        offsets,
        global_to_local,
        local_ranges,
    }
}

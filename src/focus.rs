//! Locally focused octrees.
//!
//! A focused tree is a cornerstone tree that keeps full, bucket-limited
//! resolution inside a focus key range while the rest of the domain is
//! resolved only as far as a multipole acceptance criterion (MAC) against
//! the focus demands. Peer ranks own parts of the domain outside the
//! focus; their particle counts are authoritative and are merged in
//! through the focus exchange on every refinement pass.

use mpi::traits::{Communicator, CommunicatorCollectives};

use crate::constants::NSIBLINGS;
use crate::decomposition::SpaceCurveAssignment;
use crate::errors::DomainError;
use crate::exchange::exchange_focus;
use crate::geometry::{range_separation, IntBox, PhysicalBox};
use crate::halos::node_int_box;
use crate::morton::{node_range, tree_level, SfcKey};
use crate::tree::{
    compute_counts, is_valid_tree, num_leaves, rebalance, root_tree, sibling_and_level,
    spanning_tree,
};

/// Internal-node view over a cornerstone leaf array.
///
/// Lists every proper ancestor of the leaves, ordered by start key and
/// level with the root first, and maps each leaf to its parent. MAC bits
/// are stored per view node, internal nodes first, then leaves.
pub struct OctreeView<K> {
    /// `(start key, level)` per internal node.
    internal: Vec<(K, u32)>,
    /// Index into `internal` of each leaf's parent.
    leaf_parents: Vec<usize>,
}

impl<K: SfcKey> OctreeView<K> {
    /// Build the ancestor view of a cornerstone tree.
    pub fn build(tree: &[K]) -> Self {
        let n = num_leaves(tree);

        let mut internal: Vec<(K, u32)> = Vec::new();
        for i in 0..n {
            let level = tree_level(K::from_u64(tree[i + 1].to_u64() - tree[i].to_u64()));
            for ancestor_level in 0..level {
                let range = node_range::<K>(ancestor_level).to_u64();
                let start = tree[i].to_u64() / range * range;
                internal.push((K::from_u64(start), ancestor_level));
            }
        }
        internal.sort_unstable();
        internal.dedup();

        let leaf_parents = (0..n)
            .map(|i| {
                let level = tree_level(K::from_u64(tree[i + 1].to_u64() - tree[i].to_u64()));
                if level == 0 {
                    return 0;
                }
                let range = node_range::<K>(level - 1).to_u64();
                let start = tree[i].to_u64() / range * range;
                internal
                    .binary_search(&(K::from_u64(start), level - 1))
                    .expect("every leaf has its parent in the ancestor set")
            })
            .collect();

        Self {
            internal,
            leaf_parents,
        }
    }

    /// Number of internal nodes; leaf MAC bits start at this offset.
    pub fn num_internal(&self) -> usize {
        self.internal.len()
    }

    /// Internal index of a leaf's parent.
    pub fn leaf_parent(&self, leaf: usize) -> usize {
        self.leaf_parents[leaf]
    }
}

/// Squared physical distance between two integer boxes, respecting the
/// per-axis periodicity of the bounding box.
fn box_distance_sq<K: SfcKey>(a: &IntBox, b: &IntBox, bx: &PhysicalBox) -> f64 {
    let max_coord = K::max_coord() as i64;
    let lengths = bx.lengths();
    let pbc = bx.pbc();

    let mut dsq = 0.0;
    for axis in 0..3 {
        let gap = range_separation(
            a.min(axis),
            a.max(axis),
            b.min(axis),
            b.max(axis),
            max_coord,
            pbc[axis],
        );
        let d = gap as f64 * lengths[axis] / max_coord as f64;
        dsq += d * d;
    }
    dsq
}

/// Longest physical edge of an integer box.
fn box_edge<K: SfcKey>(b: &IntBox, bx: &PhysicalBox) -> f64 {
    let max_coord = K::max_coord() as f64;
    let lengths = bx.lengths();

    (0..3)
        .map(|axis| (b.max(axis) - b.min(axis)) as f64 * lengths[axis] / max_coord)
        .fold(0.0, f64::max)
}

/// Acceptance test of a node against one box of the focus volume.
///
/// The opening length is the node's face diagonal: the node is
/// acceptable when `dist * theta >= sqrt(2) * edge`, i.e. when it is far
/// enough from the focus to be summarised instead of resolved.
fn mac_passes<K: SfcKey>(node: &IntBox, focus: &IntBox, bx: &PhysicalBox, theta: f64) -> bool {
    let edge = box_edge::<K>(node, bx);
    let dsq = box_distance_sq::<K>(node, focus, bx);

    dsq * theta * theta >= 2.0 * edge * edge
}

/// Mark every node of the view (internal nodes first, then leaves) that
/// fails the MAC with respect to the focus key range.
///
/// Nodes fully inside the focus never fail; they are governed by the
/// bucket rule alone. The focus volume is represented by the boxes of
/// the spanning nodes of `[focus_start, focus_end)`.
pub fn mark_macs<K: SfcKey>(
    view: &OctreeView<K>,
    tree: &[K],
    bx: &PhysicalBox,
    focus_start: K,
    focus_end: K,
    theta: f64,
) -> Vec<u8> {
    let num_nodes = view.num_internal() + num_leaves(tree);
    if focus_start >= focus_end {
        return vec![0; num_nodes];
    }

    let focus_keys = spanning_tree(&[focus_start, focus_end]);
    let focus_boxes: Vec<IntBox> = focus_keys
        .windows(2)
        .map(|w| node_int_box(w[0], w[1]))
        .collect();

    let mark_node = |start: K, end_value: u64| -> u8 {
        if start >= focus_start && end_value <= focus_end.to_u64() {
            return 0;
        }
        let node_box = node_int_box(start, K::from_u64(end_value));
        let violated = focus_boxes
            .iter()
            .any(|focus| !mac_passes::<K>(&node_box, focus, bx, theta));
        violated as u8
    };

    let mut macs = Vec::with_capacity(num_nodes);
    for &(start, level) in &view.internal {
        macs.push(mark_node(start, start.to_u64() + node_range::<K>(level).to_u64()));
    }
    for i in 0..num_leaves(tree) {
        macs.push(mark_node(tree[i], tree[i + 1].to_u64()));
    }

    macs
}

/// Combined particle-count and MAC rebalance decision for a focused tree.
///
/// Leaves with indices in `[first_focus, last_focus)` follow the plain
/// bucket rule. Outside the focus, the MAC gates both directions: a
/// sibling group whose parent passes the MAC may be fused even when kept
/// by its counts, and an over-full leaf is only split when its own MAC
/// fails. A group fusion by counts always wins, and a group that reaches
/// into the focus is never fused through the MAC, so the tree cannot
/// sever nodes that are still being refined.
pub fn essential_rebalance_decision<K: SfcKey>(
    tree: &[K],
    view: &OctreeView<K>,
    counts: &[u32],
    macs: &[u8],
    first_focus: usize,
    last_focus: usize,
    bucket_size: u32,
) -> (Vec<u32>, bool) {
    debug_assert_eq!(counts.len(), num_leaves(tree));
    debug_assert_eq!(macs.len(), view.num_internal() + num_leaves(tree));

    let ops: Vec<u32> = (0..num_leaves(tree))
        .map(|i| {
            let (digit, level) = sibling_and_level(tree, i);
            if digit >= 0 {
                let group = i - digit as usize;
                let group_in_focus = group < last_focus && group + NSIBLINGS > first_focus;

                let group_count: u64 = counts[group..group + NSIBLINGS]
                    .iter()
                    .map(|&c| c as u64)
                    .sum();
                let count_merge = group_count <= bucket_size as u64;
                let mac_merge = macs[view.leaf_parent(i)] == 0;

                if count_merge || (mac_merge && !group_in_focus) {
                    return if digit == 0 { 1 } else { 0 };
                }
            }

            let in_focus = i >= first_focus && i < last_focus;
            if level < K::MAX_LEVEL
                && counts[i] > bucket_size
                && (in_focus || macs[view.num_internal() + i] != 0)
            {
                8
            } else {
                1
            }
        })
        .collect();

    let converged = ops.iter().all(|&op| op == 1);
    (ops, converged)
}

/// Ranks whose assigned domains fail the mutual MAC against this rank's
/// domain. Those are the ranks that must deliver authoritative particle
/// counts for their part of the focused tree.
///
/// The mutual criterion is symmetric, so the resulting peer relation is
/// identical on both sides.
pub fn find_peers<K: SfcKey>(
    assignment: &SpaceCurveAssignment<K>,
    rank: usize,
    bx: &PhysicalBox,
    theta: f64,
) -> Vec<i32> {
    let boxes_of = |r: usize| -> Vec<IntBox> {
        let ranges = assignment.ranges(r);
        let mut boxes = Vec::new();
        for i in 0..ranges.n_ranges() {
            if ranges.range_start(i) == ranges.range_end(i) {
                continue;
            }
            let keys = spanning_tree(&[ranges.range_start(i), ranges.range_end(i)]);
            boxes.extend(keys.windows(2).map(|w| node_int_box(w[0], w[1])));
        }
        boxes
    };

    let my_boxes = boxes_of(rank);

    (0..assignment.n_ranks())
        .filter(|&r| r != rank)
        .filter(|&r| {
            boxes_of(r).iter().any(|remote| {
                my_boxes.iter().any(|local| {
                    // mutual: the larger of the two nodes sets the opening length
                    let edge = box_edge::<K>(remote, bx).max(box_edge::<K>(local, bx));
                    let dsq = box_distance_sq::<K>(remote, local, bx);
                    dsq * theta * theta < 2.0 * edge * edge
                })
            })
        })
        .map(|r| r as i32)
        .collect()
}

/// Leaf index ranges of the focused tree covered by each peer's
/// assignment; one `(i_lo, i_hi)` pair per peer.
pub fn exchange_ranges<K: SfcKey>(
    focus_tree: &[K],
    assignment: &SpaceCurveAssignment<K>,
    peers: &[i32],
) -> Vec<(usize, usize)> {
    peers
        .iter()
        .map(|&peer| {
            let ranges = assignment.ranges(peer as usize);
            let lo = focus_tree.partition_point(|&k| k < ranges.range_start(0));
            let hi = focus_tree
                .partition_point(|&k| k < ranges.range_end(ranges.n_ranges() - 1));
            (lo, hi)
        })
        .collect()
}

/// A cornerstone tree with full resolution in a focus key range and
/// MAC-bounded resolution elsewhere.
pub struct FocusedTree<K> {
    tree: Vec<K>,
    counts: Vec<u32>,
    macs: Vec<u8>,
    focus_start: K,
    focus_end: K,
    bucket_size: u32,
    theta: f64,
}

impl<K: SfcKey> FocusedTree<K> {
    /// A focused tree consisting of the root node only.
    pub fn new(bucket_size: u32, theta: f64) -> Self {
        Self {
            tree: root_tree::<K>(),
            counts: vec![bucket_size + 1],
            macs: vec![0],
            focus_start: K::from_u64(0),
            focus_end: K::from_u64(0),
            bucket_size,
            theta,
        }
    }

    /// The current leaf array.
    pub fn tree(&self) -> &[K] {
        &self.tree
    }

    /// Per-leaf particle counts of the last update.
    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    /// MAC bits of the last update (internal nodes, then leaves).
    pub fn macs(&self) -> &[u8] {
        &self.macs
    }

    /// Current focus range.
    pub fn focus(&self) -> (K, K) {
        (self.focus_start, self.focus_end)
    }

    /// Leaf indices covered by the focus.
    fn focus_leaf_range(&self) -> (usize, usize) {
        let first = self.tree.partition_point(|&k| k < self.focus_start);
        let last = self.tree.partition_point(|&k| k < self.focus_end);
        (first, last)
    }

    fn refine(
        &mut self,
        keys: &[K],
        peer_counts: Option<&dyn Fn(&mut Vec<u32>) -> Result<(), DomainError>>,
    ) -> Result<bool, DomainError> {
        self.counts = compute_counts(&self.tree, keys, u32::MAX);

        if let Some(exchange) = peer_counts {
            exchange(&mut self.counts)?;
        }

        let view = OctreeView::build(&self.tree);
        debug_assert!(is_valid_tree(&self.tree));

        let (first, last) = self.focus_leaf_range();
        let (ops, converged) = essential_rebalance_decision(
            &self.tree,
            &view,
            &self.counts,
            &self.macs,
            first,
            last,
            self.bucket_size,
        );

        if !converged {
            self.tree = rebalance(&self.tree, &ops);
            self.counts = compute_counts(&self.tree, keys, u32::MAX);
        }

        Ok(converged)
    }

    /// One single-rank refinement pass.
    ///
    /// Returns true if the tree was already converged for the given
    /// focus; call in a loop until that happens. A converged tree stays
    /// untouched under further updates with unchanged inputs.
    pub fn update_local(&mut self, bx: &PhysicalBox, keys: &[K], focus_start: K, focus_end: K) -> bool {
        self.focus_start = focus_start;
        self.focus_end = focus_end;

        let view = OctreeView::build(&self.tree);
        self.macs = mark_macs(&view, &self.tree, bx, focus_start, focus_end, self.theta);

        self.refine(keys, None)
            .expect("single-rank refinement cannot fail")
    }

    /// One distributed refinement pass.
    ///
    /// Counts for the parts of the tree covered by peer assignments are
    /// overwritten with the peers' authoritative counts before the
    /// merge/split decision. Returns true once every rank's tree is
    /// converged; all ranks must keep calling until then.
    pub fn update<C: Communicator + CommunicatorCollectives>(
        &mut self,
        comm: &C,
        assignment: &SpaceCurveAssignment<K>,
        bx: &PhysicalBox,
        keys: &[K],
        focus_start: K,
        focus_end: K,
    ) -> Result<bool, DomainError> {
        self.focus_start = focus_start;
        self.focus_end = focus_end;

        let view = OctreeView::build(&self.tree);
        self.macs = mark_macs(&view, &self.tree, bx, focus_start, focus_end, self.theta);

        let peers = find_peers(assignment, comm.rank() as usize, bx, self.theta);
        let ranges = exchange_ranges(&self.tree, assignment, &peers);

        let tree = self.tree.clone();
        let exchange = move |counts: &mut Vec<u32>| -> Result<(), DomainError> {
            exchange_focus(comm, &peers, &ranges, &tree, counts, keys)
        };
        let converged = self.refine(keys, Some(&exchange))?;

        // all ranks finish together
        let mut globally_converged = false;
        comm.all_reduce_into(
            &converged,
            &mut globally_converged,
            mpi::collective::SystemOperation::logical_and(),
        );

        Ok(globally_converged)
    }
}

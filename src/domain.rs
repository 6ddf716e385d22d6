//! The domain object driving the per-step pipeline.
//!
//! One [`Domain`] per rank owns the global cornerstone tree, the rank
//! assignment, the focused tree and the buffer layout, and advances all
//! of them in [`Domain::sync`]: particle coordinates go in, and
//! afterwards the attribute buffers hold the rank's assigned particles
//! at their layout positions, with halo slots reserved around them and
//! neighbor search ready to run. The communicator is borrowed per call;
//! coordinate arrays stay owned by the caller.

use mpi::traits::{Communicator, CommunicatorCollectives};

use crate::btree::build_binary_tree;
use crate::decomposition::{create_send_list, single_range_split, SpaceCurveAssignment};
use crate::errors::DomainError;
use crate::exchange::exchange_particles;
use crate::focus::FocusedTree;
use crate::geometry::{key_from_point, PhysicalBox};
use crate::halos::{compute_halo_radii, find_halos};
use crate::layout::{compute_layout, local_node_ranges, ArrayLayout};
use crate::morton::SfcKey;
use crate::tools::{argsort, global_counts, global_max, reorder};
use crate::tree::{
    compute_counts, is_valid_tree, num_leaves, rebalance, rebalance_decision, root_tree,
};

/// Buffer positions of the assigned particles after a [`Domain::sync`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncInfo {
    /// First buffer index of the locally assigned particles.
    pub local_start: usize,
    /// One past the last locally assigned particle.
    pub local_end: usize,
    /// Required buffer length, including halo slots.
    pub total_size: usize,
}

/// Distributed domain state of one rank.
pub struct Domain<K> {
    bx: PhysicalBox,
    bucket_size: u32,
    tree: Vec<K>,
    counts: Vec<u32>,
    assignment: SpaceCurveAssignment<K>,
    focused: FocusedTree<K>,
    layout: Option<ArrayLayout>,
    keys: Vec<K>,
    input_offset: usize,
    local_count: Option<usize>,
}

/// Advance the shared global tree to the fixed point for the given keys.
///
/// Counts are summed across all ranks every sweep, so each rank arrives
/// at the identical tree without further agreement.
fn update_global_tree<K: SfcKey, C: CommunicatorCollectives>(
    comm: &C,
    keys: &[K],
    bucket_size: u32,
    tree: &mut Vec<K>,
    counts: &mut Vec<u32>,
) {
    loop {
        let local = compute_counts(tree, keys, u32::MAX);
        *counts = global_counts(&local, comm);

        let (ops, converged) = rebalance_decision(tree, counts, bucket_size);
        if converged {
            return;
        }
        *tree = rebalance(tree, &ops);
    }
}

impl<K: SfcKey> Domain<K> {
    /// Create a domain for the given bounding box.
    ///
    /// `bucket_size` limits the particle count per leaf of the global
    /// tree as well as of the focus region; `theta` is the opening
    /// parameter of the focused tree's acceptance criterion.
    pub fn new(bx: PhysicalBox, bucket_size: u32, theta: f64) -> Self {
        Self {
            bx,
            bucket_size,
            tree: root_tree::<K>(),
            counts: vec![0],
            assignment: SpaceCurveAssignment::new(1),
            focused: FocusedTree::new(bucket_size, theta),
            layout: None,
            keys: Vec::new(),
            input_offset: 0,
            local_count: None,
        }
    }

    /// The global cornerstone tree.
    pub fn global_tree(&self) -> &[K] {
        &self.tree
    }

    /// Global per-leaf particle counts.
    pub fn global_counts(&self) -> &[u32] {
        &self.counts
    }

    /// The current rank assignment.
    pub fn assignment(&self) -> &SpaceCurveAssignment<K> {
        &self.assignment
    }

    /// The locally focused tree.
    pub fn focused(&self) -> &FocusedTree<K> {
        &self.focused
    }

    /// Buffer layout of the last sync.
    pub fn layout(&self) -> Option<&ArrayLayout> {
        self.layout.as_ref()
    }

    /// Sorted keys of the assigned particles, aligned with the buffer
    /// region `[local_start, local_end)` of the last sync.
    pub fn assigned_keys(&self) -> &[K] {
        &self.keys
    }

    /// The bounding box the domain was created with.
    pub fn bounding_box(&self) -> &PhysicalBox {
        &self.bx
    }

    /// Run one domain update over the particle attribute arrays.
    ///
    /// The arrays must all have the same layout: on the first call they
    /// hold the rank's initial particles starting at index 0, afterwards
    /// the assigned particles of the previous sync at its
    /// `[local_start, local_end)`. On success the arrays are resized to
    /// `total_size` and the assigned particles sit at the returned
    /// positions in key order; the halo regions around them are
    /// reserved but not filled.
    pub fn sync<C: CommunicatorCollectives>(
        &mut self,
        comm: &C,
        x: &mut Vec<f64>,
        y: &mut Vec<f64>,
        z: &mut Vec<f64>,
        h: &mut Vec<f64>,
    ) -> Result<SyncInfo, DomainError> {
        let rank = comm.rank() as usize;
        let n_ranks = comm.size() as usize;

        let input_offset = self.input_offset;
        let n_local = self.local_count.unwrap_or(x.len());

        // keys of the current local particles, in attribute order
        let local_keys: Vec<K> = (input_offset..input_offset + n_local)
            .map(|i| key_from_point([x[i], y[i], z[i]], &self.bx))
            .collect();
        let ordering = argsort(&local_keys);
        let sorted_keys = reorder(&local_keys, &ordering);

        update_global_tree(comm, &sorted_keys, self.bucket_size, &mut self.tree, &mut self.counts);

        if !is_valid_tree(&self.tree) {
            return Err(DomainError::InvariantViolation(
                "global tree is not a valid cornerstone tree".to_string(),
            ));
        }
        let counted: u64 = self.counts.iter().map(|&c| c as u64).sum();
        let mut global_particles = 0u64;
        comm.all_reduce_into(
            &(n_local as u64),
            &mut global_particles,
            mpi::collective::SystemOperation::sum(),
        );
        if counted != global_particles {
            return Err(DomainError::InvariantViolation(format!(
                "tree counts cover {} particles, expected {}",
                counted, global_particles
            )));
        }

        self.assignment = single_range_split(&self.tree, &self.counts, n_ranks);
        let send_list = create_send_list(&self.assignment, &sorted_keys);
        let num_assigned = self.assignment.assigned_count(rank);

        let mut arrays: [&mut Vec<f64>; 4] = [x, y, z, h];
        for array in arrays.iter_mut() {
            if array.len() < num_assigned {
                array.resize(num_assigned, 0.0);
            }
        }

        exchange_particles(comm, &send_list, num_assigned, input_offset, 0, &ordering, &mut arrays)?;

        // restore key order among the assigned particles
        let exchanged_keys: Vec<K> = (0..num_assigned)
            .map(|i| key_from_point([arrays[0][i], arrays[1][i], arrays[2][i]], &self.bx))
            .collect();
        let ordering = argsort(&exchanged_keys);
        for array in arrays.iter_mut() {
            let sorted = reorder(&array[..num_assigned], &ordering);
            array[..num_assigned].copy_from_slice(&sorted);
        }
        self.keys = reorder(&exchanged_keys, &ordering);

        // refine the focused tree on the assigned key range
        let my_ranges = self.assignment.ranges(rank);
        let focus_start = my_ranges.range_start(0);
        let focus_end = my_ranges.range_end(my_ranges.n_ranges() - 1);
        while !self
            .focused
            .update(comm, &self.assignment, &self.bx, &self.keys, focus_start, focus_end)?
        {}

        // discover halos of the assignment on the global tree
        let identity: Vec<usize> = (0..num_assigned).collect();
        let radii = compute_halo_radii(&self.tree, &self.keys, &identity, &arrays[3][..num_assigned]);
        let radii = global_max(&radii, comm);

        let node_ranges = local_node_ranges(&self.tree, &self.assignment, rank);
        let first_leaf = node_ranges.range_start(0);
        let last_leaf = node_ranges.range_end(node_ranges.n_ranges() - 1);

        let nodes = build_binary_tree(&self.tree[..num_leaves(&self.tree)]);
        let halos = find_halos(&self.tree, &nodes, &radii, &self.bx, first_leaf, last_leaf);

        let layout = compute_layout(&node_ranges, halos, &self.counts);
        let local_start = if layout.n_local_ranges() > 0 {
            layout.local_range_position(0)
        } else {
            layout.total_size()
        };
        let total_size = layout.total_size();

        debug_assert_eq!(layout.local_count(), num_assigned);

        // move the assigned block to its layout position, leaving halo
        // slots unfilled
        for array in arrays.iter_mut() {
            array.resize(total_size, 0.0);
            array.copy_within(0..num_assigned, local_start);
        }

        self.layout = Some(layout);
        self.input_offset = local_start;
        self.local_count = Some(num_assigned);

        Ok(SyncInfo {
            local_start,
            local_end: local_start + num_assigned,
            total_size,
        })
    }
}

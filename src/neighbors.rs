//! Neighbor search over the octree.
//!
//! For every particle, the leaves overlapping its interaction sphere are
//! enumerated through the collision finder, and the particles inside
//! those leaves are scanned with minimum-image distances on periodic
//! axes. Lists are capped; exceeding the cap aborts the step.

use rayon::prelude::*;

use crate::btree::BinaryNode;
use crate::errors::DomainError;
use crate::geometry::PhysicalBox;
use crate::halos::{find_collisions, halo_box_from_radius, CollisionList};
use crate::morton::SfcKey;
use crate::tree::num_leaves;

/// Fixed-stride per-particle neighbor lists.
pub struct NeighborLists {
    neighbors: Vec<usize>,
    counts: Vec<usize>,
    max_neighbors: usize,
}

impl NeighborLists {
    /// Neighbor indices of particle `i`, in unspecified order.
    pub fn of(&self, i: usize) -> &[usize] {
        &self.neighbors[i * self.max_neighbors..i * self.max_neighbors + self.counts[i]]
    }

    /// Number of neighbors of particle `i`.
    pub fn count(&self, i: usize) -> usize {
        self.counts[i]
    }

    /// Number of particles the lists were built for.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// True if built for zero particles.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Squared distance between two points, wrapping periodic axes by the
/// minimum-image convention.
fn distance_sq(a: [f64; 3], b: [f64; 3], bx: &PhysicalBox) -> f64 {
    let lengths = bx.lengths();
    let pbc = bx.pbc();

    let mut dsq = 0.0;
    for axis in 0..3 {
        let mut d = a[axis] - b[axis];
        if pbc[axis] {
            d -= lengths[axis] * (d / lengths[axis]).round();
        }
        dsq += d * d;
    }
    dsq
}

/// Find all neighbors within `radii[i]` of each particle.
///
/// Coordinates and radii are given in key-sorted order, with `keys` the
/// matching sorted key array. Each list holds at most `max_neighbors`
/// entries; one particle exceeding the cap fails the whole search.
#[allow(clippy::too_many_arguments)]
pub fn find_neighbors<K: SfcKey>(
    tree: &[K],
    nodes: &[BinaryNode<K>],
    keys: &[K],
    x: &[f64],
    y: &[f64],
    z: &[f64],
    radii: &[f64],
    bx: &PhysicalBox,
    max_neighbors: usize,
) -> Result<NeighborLists, DomainError> {
    let n = keys.len();
    debug_assert!(x.len() == n && y.len() == n && z.len() == n && radii.len() == n);

    let mut neighbors = vec![0; n * max_neighbors];
    let mut counts = vec![0; n];

    neighbors
        .par_chunks_mut(max_neighbors)
        .zip(counts.par_iter_mut())
        .enumerate()
        .map_init(
            || CollisionList::new(num_leaves(tree)),
            |collisions, (i, (list, count))| {
                let center = [x[i], y[i], z[i]];
                let radius = radii[i];
                let radius_sq = radius * radius;

                let halo_box = halo_box_from_radius(
                    keys[i],
                    K::from_u64(keys[i].to_u64() + 1),
                    radius,
                    bx,
                );

                collisions.clear();
                find_collisions(nodes, tree, &halo_box, collisions);

                let mut found = 0;
                for &leaf in collisions.as_slice() {
                    let start = keys.partition_point(|&k| k < tree[leaf]);
                    let end = keys.partition_point(|&k| k < tree[leaf + 1]);

                    for j in start..end {
                        if j == i {
                            continue;
                        }
                        if distance_sq(center, [x[j], y[j], z[j]], bx) <= radius_sq {
                            if found == max_neighbors {
                                return Err(DomainError::NeighborOverflow {
                                    particle: i,
                                    max_neighbors,
                                });
                            }
                            list[found] = j;
                            found += 1;
                        }
                    }
                }

                *count = found;
                Ok(())
            },
        )
        .collect::<Result<(), DomainError>>()?;

    Ok(NeighborLists {
        neighbors,
        counts,
        max_neighbors,
    })
}

//! Halo boxes, overlap predicates and the collision finder.
//!
//! A halo box is the integer coordinate box of an octree node enlarged by
//! an interaction radius. Finding all leaves that overlap a halo box is the
//! core operation behind halo discovery and neighbor search; it descends
//! the binary radix tree and prunes subtrees whose coordinate ranges are
//! disjoint from the box. Periodic boundaries are handled by ring
//! arithmetic: a halo box may leave the valid coordinate range, in which
//! case every overlap test wraps around.

use rayon::prelude::*;

use crate::btree::{BinaryNode, Child};
use crate::constants::TRAVERSAL_STACK_SIZE;
use crate::geometry::{overlap_range, IntBox, PhysicalBox};
use crate::morton::{decode, encode, tree_level, SfcKey};
use crate::tree::num_leaves;

/// Integer coordinate box of the node `[start, end)`.
pub fn node_int_box<K: SfcKey>(start: K, end: K) -> IntBox {
    let level = tree_level(K::from_u64(end.to_u64() - start.to_u64()));
    let side = 1i64 << (K::MAX_LEVEL - level);
    let [x, y, z] = decode(start);

    IntBox::new(
        x as i64,
        x as i64 + side,
        y as i64,
        y as i64 + side,
        z as i64,
        z as i64 + side,
    )
}

/// Integer coordinate ranges spanned by all keys sharing the given bit
/// prefix.
///
/// Unlike [`node_int_box`], this also works for prefix lengths that are
/// not a multiple of 3, as they occur in the binary radix tree; the
/// resulting box is then anisotropic.
pub fn prefix_int_box<K: SfcKey>(prefix: K, prefix_len: u32) -> IntBox {
    let [x, y, z] = decode(prefix);

    // number of x/y/z bits among the first prefix_len bits, x comes first
    let nx = (prefix_len + 2) / 3;
    let ny = (prefix_len + 1) / 3;
    let nz = prefix_len / 3;

    IntBox::new(
        x as i64,
        x as i64 + (1i64 << (K::MAX_LEVEL - nx)),
        y as i64,
        y as i64 + (1i64 << (K::MAX_LEVEL - ny)),
        z as i64,
        z as i64 + (1i64 << (K::MAX_LEVEL - nz)),
    )
}

/// Overlap test between the keys sharing `prefix` and a halo box.
///
/// The box may have out-of-range bounds to express a wrap across a
/// periodic boundary; each axis is compared on the coordinate ring.
pub fn node_overlap<K: SfcKey>(prefix: K, prefix_len: u32, halo_box: &IntBox) -> bool {
    let node_box = prefix_int_box::<K>(prefix, prefix_len);
    let r = K::max_coord() as i64;

    (0..3).all(|axis| {
        overlap_range(
            node_box.min(axis),
            node_box.max(axis),
            halo_box.min(axis),
            halo_box.max(axis),
            r,
        )
    })
}

/// Build the halo box of node `[start, end)` from explicit per-axis
/// integer radii.
///
/// Axes without periodicity are clamped to the valid coordinate range;
/// periodic axes keep their out-of-range bounds so that traversal can
/// detect the wrap.
pub fn make_halo_box<K: SfcKey>(start: K, end: K, radii: [i64; 3], pbc: [bool; 3]) -> IntBox {
    let node_box = node_int_box::<K>(start, end);
    let max_coord = K::max_coord() as i64;

    let mut bounds = [0i64; 6];
    for axis in 0..3 {
        let mut lo = node_box.min(axis) - radii[axis];
        let mut hi = node_box.max(axis) + radii[axis];
        if !pbc[axis] {
            lo = lo.max(0);
            hi = hi.min(max_coord);
        }
        bounds[2 * axis] = lo;
        bounds[2 * axis + 1] = hi;
    }

    IntBox::new(bounds[0], bounds[1], bounds[2], bounds[3], bounds[4], bounds[5])
}

/// Build the halo box of node `[start, end)` from a floating-point
/// interaction radius, scaled per axis by the bounding box extents and
/// rounded up to whole grid cells.
pub fn halo_box_from_radius<K: SfcKey>(start: K, end: K, radius: f64, bx: &PhysicalBox) -> IntBox {
    let max_coord = K::max_coord() as f64;
    let lengths = bx.lengths();

    let radii = [
        (radius / lengths[0] * max_coord).ceil() as i64,
        (radius / lengths[1] * max_coord).ceil() as i64,
        (radius / lengths[2] * max_coord).ceil() as i64,
    ];

    make_halo_box(start, end, radii, bx.pbc())
}

/// True if the halo box lies entirely inside the key range `[first, last)`.
///
/// Callers use this to skip nodes whose collision search cannot leave a
/// known key range. A box that wraps around a periodic boundary is never
/// contained.
pub fn box_contained_in<K: SfcKey>(first: K, last: K, halo_box: &IntBox) -> bool {
    if !halo_box.in_range(K::max_coord() as i64) {
        return false;
    }

    let low = encode::<K>(
        halo_box.min(0) as u32,
        halo_box.min(1) as u32,
        halo_box.min(2) as u32,
    );
    let high = encode::<K>(
        (halo_box.max(0) - 1) as u32,
        (halo_box.max(1) - 1) as u32,
        (halo_box.max(2) - 1) as u32,
    )
    .to_u64()
        + 1;

    first <= low && high <= last.to_u64()
}

/// Collects indices of octree leaves colliding with a halo box.
///
/// The capacity is fixed at construction (at most the number of leaves),
/// so a query never allocates; reuse the list across queries via
/// [`CollisionList::clear`].
pub struct CollisionList {
    list: Vec<usize>,
}

impl CollisionList {
    /// Create a list with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            list: Vec::with_capacity(capacity),
        }
    }

    /// Record a colliding leaf index.
    pub fn add(&mut self, leaf: usize) {
        debug_assert!(self.list.len() < self.list.capacity());
        self.list.push(leaf);
    }

    /// Number of recorded collisions.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// True if nothing collided.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Recorded leaf indices in traversal order.
    pub fn as_slice(&self) -> &[usize] {
        &self.list
    }

    /// Forget all recorded collisions, keeping the capacity.
    pub fn clear(&mut self) {
        self.list.clear();
    }
}

fn leaf_overlap<K: SfcKey>(tree: &[K], leaf: usize, halo_box: &IntBox) -> bool {
    let range = K::from_u64(tree[leaf + 1].to_u64() - tree[leaf].to_u64());
    node_overlap(tree[leaf], 3 * tree_level(range), halo_box)
}

/// Find all leaves of `tree` that overlap a halo box.
///
/// Descends the binary radix tree from the root, pruning internal nodes
/// whose coordinate ranges cannot intersect the box.
pub fn find_collisions<K: SfcKey>(
    nodes: &[BinaryNode<K>],
    tree: &[K],
    halo_box: &IntBox,
    collisions: &mut CollisionList,
) {
    // a single-leaf tree has no internal nodes to descend
    if nodes.is_empty() {
        if leaf_overlap(tree, 0, halo_box) {
            collisions.add(0);
        }
        return;
    }

    let mut stack = Vec::with_capacity(TRAVERSAL_STACK_SIZE);
    stack.push(0usize);

    while let Some(index) = stack.pop() {
        for child in [nodes[index].left, nodes[index].right] {
            match child {
                Child::Leaf(leaf) => {
                    if leaf_overlap(tree, leaf, halo_box) {
                        collisions.add(leaf);
                    }
                }
                Child::Internal(internal) => {
                    if node_overlap(nodes[internal].prefix, nodes[internal].prefix_len, halo_box) {
                        stack.push(internal);
                    }
                }
            }
        }
    }
}

/// Naive reference collision finder testing every leaf against the box.
///
/// Exists to validate [`find_collisions`]; both must produce the same
/// set of leaves for any tree and halo box.
pub fn find_collisions_all2all<K: SfcKey>(tree: &[K], halo_box: &IntBox) -> Vec<usize> {
    (0..num_leaves(tree))
        .filter(|&leaf| leaf_overlap(tree, leaf, halo_box))
        .collect()
}

/// Per-leaf interaction radii from per-particle smoothing lengths.
///
/// For each leaf the radius is twice the largest smoothing length of the
/// particles inside, the conventional SPH interaction cutoff. `ordering`
/// maps positions in the sorted key array to positions in `h`.
pub fn compute_halo_radii<K: SfcKey>(
    tree: &[K],
    keys: &[K],
    ordering: &[usize],
    h: &[f64],
) -> Vec<f64> {
    (0..num_leaves(tree))
        .into_par_iter()
        .map(|i| {
            let start = keys.partition_point(|&k| k < tree[i]);
            let end = keys.partition_point(|&k| k < tree[i + 1]);

            2.0 * (start..end)
                .map(|j| h[ordering[j]])
                .fold(0.0, f64::max)
        })
        .collect()
}

/// Discover the halo leaves of the assignment `[first_leaf, last_leaf)`.
///
/// Each assigned leaf is enlarged by its interaction radius; every leaf
/// outside the assignment that collides with one of the resulting halo
/// boxes is a halo and appears in the returned sorted index list.
pub fn find_halos<K: SfcKey>(
    tree: &[K],
    nodes: &[BinaryNode<K>],
    radii: &[f64],
    bx: &PhysicalBox,
    first_leaf: usize,
    last_leaf: usize,
) -> Vec<usize> {
    let n = num_leaves(tree);
    debug_assert_eq!(radii.len(), n);

    let per_leaf: Vec<Vec<usize>> = (first_leaf..last_leaf)
        .into_par_iter()
        .map_init(
            || CollisionList::new(n),
            |collisions, i| {
                if radii[i] == 0.0 {
                    return Vec::new();
                }

                let halo_box = halo_box_from_radius(tree[i], tree[i + 1], radii[i], bx);

                // the search cannot leave the assignment when the halo box
                // is contained in it
                if box_contained_in(tree[first_leaf], tree[last_leaf], &halo_box) {
                    return Vec::new();
                }

                collisions.clear();
                find_collisions(nodes, tree, &halo_box, collisions);

                collisions
                    .as_slice()
                    .iter()
                    .copied()
                    .filter(|&j| j < first_leaf || j >= last_leaf)
                    .collect()
            },
        )
        .collect();

    let mut flags = vec![false; n];
    for list in per_leaf {
        for j in list {
            flags[j] = true;
        }
    }

    flags
        .iter()
        .enumerate()
        .filter_map(|(j, &flag)| flag.then_some(j))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::morton::{code_from_box, node_range, pad};
    use crate::tree::{compute_tree, TreeMaker};
    use rand::prelude::*;

    fn sorted_collisions<K: SfcKey>(tree: &[K], halo_box: &IntBox) -> Vec<usize> {
        let nodes = crate::btree::build_binary_tree(&tree[..num_leaves(tree)]);
        let mut collisions = CollisionList::new(num_leaves(tree));
        find_collisions(&nodes, tree, halo_box, &mut collisions);

        let mut result = collisions.as_slice().to_vec();
        result.sort_unstable();
        result
    }

    fn check_node_overlaps<K: SfcKey>() {
        // a level-2 node with range [r, 2r]^3
        let r = 1i64 << (K::MAX_LEVEL - 2);
        let prefix = pad::<K>(0b000111, 6);
        let prefix_len = 6;

        let bound = pad::<K>(0b001, 3);
        assert_eq!(prefix_len, tree_level(K::from_u64(bound.to_u64() - prefix.to_u64())) * 3);

        let b = |x0, x1, y0, y1, z0, z1| IntBox::new(x0, x1, y0, y1, z0, z1);

        assert!(!node_overlap(prefix, prefix_len, &b(0, r, 0, r, 0, r)));

        // exact match
        assert!(node_overlap(prefix, prefix_len, &b(r, 2 * r, r, 2 * r, r, 2 * r)));
        // contained within the (1,1,1) corner of the node
        assert!(node_overlap(
            prefix,
            prefix_len,
            &b(2 * r - 1, 2 * r, 2 * r - 1, 2 * r, 2 * r - 1, 2 * r)
        ));
        // exceeding the (1,1,1) corner by 1 in all dimensions
        assert!(node_overlap(
            prefix,
            prefix_len,
            &b(2 * r - 1, 2 * r + 1, 2 * r - 1, 2 * r + 1, 2 * r - 1, 2 * r + 1)
        ));

        // missing the (1,1,1) corner by 1 in one of the three dimensions
        assert!(!node_overlap(
            prefix,
            prefix_len,
            &b(2 * r, 2 * r + 1, 2 * r - 1, 2 * r, 2 * r - 1, 2 * r)
        ));
        assert!(!node_overlap(
            prefix,
            prefix_len,
            &b(2 * r - 1, 2 * r, 2 * r, 2 * r + 1, 2 * r - 1, 2 * r)
        ));
        assert!(!node_overlap(
            prefix,
            prefix_len,
            &b(2 * r - 1, 2 * r, 2 * r - 1, 2 * r, 2 * r, 2 * r + 1)
        ));

        // contained within the (0,0,0) corner of the node
        assert!(node_overlap(prefix, prefix_len, &b(r, r + 1, r, r + 1, r, r + 1)));

        // missing the (0,0,0) corner by 1 in one of the three dimensions
        assert!(!node_overlap(prefix, prefix_len, &b(r - 1, r, r, r + 1, r, r + 1)));
        assert!(!node_overlap(prefix, prefix_len, &b(r, r + 1, r - 1, r, r, r + 1)));
        assert!(!node_overlap(prefix, prefix_len, &b(r, r + 1, r, r + 1, r - 1, r)));
    }

    #[test]
    fn node_overlaps() {
        check_node_overlaps::<u32>();
        check_node_overlaps::<u64>();
    }

    fn check_pbc_overlaps<K: SfcKey>() {
        let max_coord = (K::max_coord() - 1) as i64;
        let full_bits = 3 * K::MAX_LEVEL;

        // a box wrapping below zero reaches the first cell
        let halo_box = IntBox::new(-1, 1, 0, 1, 0, 1);
        assert!(node_overlap(K::from_u64(0), full_bits, &halo_box));

        // and also the last cell in x
        let last_x = code_from_box::<K>(max_coord as u32, 0, 0, K::MAX_LEVEL);
        assert!(node_overlap(last_x, full_bits, &halo_box));

        // a box beyond the upper boundary wraps onto the first cell
        let halo_box = IntBox::new(max_coord, max_coord + 2, 0, 1, 0, 1);
        assert!(node_overlap(K::from_u64(0), full_bits, &halo_box));

        // fully wrapped corner box reaches the last cell in all dimensions
        let halo_box = IntBox::new(-1, 1, -1, 1, -1, 1);
        let last = K::from_u64(node_range::<K>(0).to_u64() - 1);
        assert!(node_overlap(last, full_bits, &halo_box));
    }

    #[test]
    fn pbc_overlaps() {
        check_pbc_overlaps::<u32>();
        check_pbc_overlaps::<u64>();
    }

    fn check_halo_box_axes<K: SfcKey>() {
        let r = 1i64 << (K::MAX_LEVEL - 3);
        // node range [r, 2r]^3
        let start = pad::<K>(0b000000111, 9);
        let end = pad::<K>(0b000001000, 9);

        assert_eq!(
            make_halo_box(start, end, [1, 0, 0], [false; 3]),
            IntBox::new(r - 1, 2 * r + 1, r, 2 * r, r, 2 * r)
        );
        assert_eq!(
            make_halo_box(start, end, [0, 1, 0], [false; 3]),
            IntBox::new(r, 2 * r, r - 1, 2 * r + 1, r, 2 * r)
        );
        assert_eq!(
            make_halo_box(start, end, [0, 0, 1], [false; 3]),
            IntBox::new(r, 2 * r, r, 2 * r, r - 1, 2 * r + 1)
        );
    }

    #[test]
    fn halo_box_axes() {
        check_halo_box_axes::<u32>();
        check_halo_box_axes::<u64>();
    }

    fn check_halo_box_underflow_overflow<K: SfcKey>() {
        let r = 1i64 << (K::MAX_LEVEL - 1);

        // first octant: enlargement clamps at zero
        let start = K::from_u64(0);
        let end = pad::<K>(0b001, 3);
        assert_eq!(
            make_halo_box(start, end, [1, 0, 0], [false; 3]),
            IntBox::new(0, r + 1, 0, r, 0, r)
        );

        // last octant: enlargement clamps at the upper boundary
        let start = pad::<K>(0b111, 3);
        let end = node_range::<K>(0);
        assert_eq!(
            make_halo_box(start, end, [0, 1, 0], [false; 3]),
            IntBox::new(r, 2 * r, r - 1, 2 * r, r, 2 * r)
        );
    }

    #[test]
    fn halo_box_underflow_overflow() {
        check_halo_box_underflow_overflow::<u32>();
        check_halo_box_underflow_overflow::<u64>();
    }

    fn check_halo_box_pbc<K: SfcKey>() {
        let r = 1i64 << (K::MAX_LEVEL - 3);
        let start = pad::<K>(0b000000111, 9);
        let end = pad::<K>(0b000001000, 9);

        let bx = PhysicalBox::cube(0.0, 1.0, true);

        // normalize(radius) = 7.992, rounded up to 8 cells
        let radius = 0.999 / r as f64;
        assert_eq!(
            halo_box_from_radius(start, end, radius, &bx),
            IntBox::new(r - 8, 2 * r + 8, r - 8, 2 * r + 8, r - 8, 2 * r + 8)
        );

        // slightly more than one node length: bounds leave the valid range
        let radius = 1.000_001 * (r as f64 / K::max_coord() as f64);
        let d = (radius * K::max_coord() as f64).ceil() as i64;
        assert_eq!(
            halo_box_from_radius(start, end, radius, &bx),
            IntBox::new(r - d, 2 * r + d, r - d, 2 * r + d, r - d, 2 * r + d)
        );
        assert!(r - d < 0);
    }

    #[test]
    fn halo_box_pbc() {
        check_halo_box_pbc::<u32>();
        check_halo_box_pbc::<u64>();
    }

    fn check_box_contained_in<K: SfcKey>() {
        let k = |v: u64| K::from_u64(v);

        assert!(box_contained_in(k(0), k(1), &IntBox::new(0, 1, 0, 1, 0, 1)));
        assert!(!box_contained_in(k(0), k(1), &IntBox::new(0, 1, 0, 1, 0, 2)));
        assert!(box_contained_in(k(0), k(2), &IntBox::new(0, 1, 0, 1, 0, 2)));
        assert!(!box_contained_in(k(0), k(3), &IntBox::new(0, 1, 0, 2, 0, 2)));
        assert!(box_contained_in(k(0), k(4), &IntBox::new(0, 1, 0, 2, 0, 2)));
        assert!(!box_contained_in(k(0), k(7), &IntBox::new(0, 2, 0, 2, 0, 2)));
        assert!(box_contained_in(k(0), k(8), &IntBox::new(0, 2, 0, 2, 0, 2)));

        let max_coord = (K::max_coord() - 1) as i64;
        let corner = code_from_box::<K>(0, 0, max_coord as u32, K::MAX_LEVEL);
        let corner_box = |ymax| IntBox::new(0, 1, 0, ymax, max_coord, max_coord + 1);

        assert!(box_contained_in(corner, K::from_u64(corner.to_u64() + 1), &corner_box(1)));
        assert!(!box_contained_in(corner, K::from_u64(corner.to_u64() + 1), &corner_box(2)));
        assert!(!box_contained_in(corner, K::from_u64(corner.to_u64() + 2), &corner_box(2)));
        assert!(box_contained_in(corner, K::from_u64(corner.to_u64() + 3), &corner_box(2)));

        // a wrapping box is never contained
        assert!(!box_contained_in(k(0), k(1), &IntBox::new(-1, 1, 0, 1, 0, 1)));
        assert!(!box_contained_in(
            corner,
            K::from_u64(corner.to_u64() + 3),
            &IntBox::new(0, 1, 0, 1, max_coord, max_coord + 2)
        ));
    }

    #[test]
    fn halo_box_contained_in() {
        check_box_contained_in::<u32>();
        check_box_contained_in::<u64>();
    }

    /// The halo box of the node `04` (octal) extended by one cell in x
    /// collides with a fixed set of leaves; the query corresponds to the
    /// node `004000000` on the 32-bit curve with a dx=1 halo.
    fn check_collisions_reference<K: SfcKey>() {
        let tree = TreeMaker::<K>::new()
            .divide(&[])
            .divide(&[0])
            .divide(&[0, 7])
            .make();

        let r = 1i64 << (K::MAX_LEVEL - 1);
        let halo_box = IntBox::new(r - 1, 2 * r, 0, r, 0, r);

        let reference: Vec<K> = vec![
            pad(0o04, 6),
            pad(0o05, 6),
            pad(0o06, 6),
            pad(0o074, 9),
            pad(0o075, 9),
            pad(0o076, 9),
            pad(0o077, 9),
            pad(0o4, 3),
        ];

        let naive: Vec<K> = find_collisions_all2all(&tree, &halo_box)
            .iter()
            .map(|&i| tree[i])
            .collect();
        assert_eq!(naive, reference);

        let fast: Vec<K> = sorted_collisions(&tree, &halo_box)
            .iter()
            .map(|&i| tree[i])
            .collect();
        assert_eq!(fast, reference);
    }

    #[test]
    fn collisions_reference() {
        check_collisions_reference::<u32>();
        check_collisions_reference::<u64>();
    }

    /// Anisotropic halo ranges can hit several non-adjacent nodes.
    fn check_anisotropic_halo<K: SfcKey>() {
        // a tree with 4 subdivisions along each dimension, 64 leaves
        let mut maker = TreeMaker::<K>::new().divide(&[]);
        for child in 0..8 {
            maker = maker.divide(&[child]);
        }
        let tree = maker.make();

        let r = 1i64 << (K::MAX_LEVEL - 2);
        let query = 7;
        let halo_box = make_halo_box(tree[query], tree[query + 1], [2 * r, 0, 0], [false; 3]);

        assert_eq!(sorted_collisions(&tree, &halo_box), vec![3, 7, 35, 39]);
    }

    #[test]
    fn anisotropic_halo() {
        check_anisotropic_halo::<u32>();
        check_anisotropic_halo::<u64>();
    }

    /// All-to-all collisions of the node `4` with a 0.1 halo radius,
    /// without periodicity.
    fn check_all2all_radius<K: SfcKey>() {
        let tree = TreeMaker::<K>::new()
            .divide(&[])
            .divide(&[0])
            .divide(&[0, 7])
            .make();

        let bx = PhysicalBox::cube(0.0, 1.0, false);
        let query = 18; // the node {4}
        assert_eq!(tree[query], pad::<K>(0o4, 3));

        let halo_box = halo_box_from_radius(tree[query], tree[query + 1], 0.1, &bx);
        let mut probe: Vec<K> = find_collisions_all2all(&tree, &halo_box)
            .iter()
            .map(|&i| tree[i])
            .collect();
        probe.sort_unstable();

        let reference: Vec<K> = vec![
            pad(0o04, 6),
            pad(0o05, 6),
            pad(0o06, 6),
            pad(0o074, 9),
            pad(0o075, 9),
            pad(0o076, 9),
            pad(0o077, 9),
            pad(0o1, 3),
            pad(0o2, 3),
            pad(0o3, 3),
            pad(0o4, 3),
            pad(0o5, 3),
            pad(0o6, 3),
            pad(0o7, 3),
        ];

        assert_eq!(probe, reference);
        assert_eq!(
            sorted_collisions(&tree, &halo_box)
                .iter()
                .map(|&i| tree[i])
                .collect::<Vec<_>>(),
            reference
        );
    }

    #[test]
    fn all2all_radius() {
        check_all2all_radius::<u32>();
        check_all2all_radius::<u64>();
    }

    /// Same query under x-periodicity: the wrap adds the four leaves at
    /// the opposite x boundary.
    fn check_all2all_radius_pbc_x<K: SfcKey>() {
        let tree = TreeMaker::<K>::new()
            .divide(&[])
            .divide(&[0])
            .divide(&[0, 7])
            .make();

        let bx = PhysicalBox::with_pbc([0.0, 0.0, 0.0, 1.0, 1.0, 1.0], [true, false, false]);
        let query = 18;

        let halo_box = halo_box_from_radius(tree[query], tree[query + 1], 0.1, &bx);
        let mut probe: Vec<K> = find_collisions_all2all(&tree, &halo_box)
            .iter()
            .map(|&i| tree[i])
            .collect();
        probe.sort_unstable();

        let reference: Vec<K> = vec![
            pad(0o00, 6), // reached through the x wrap
            pad(0o01, 6),
            pad(0o02, 6),
            pad(0o03, 6),
            pad(0o04, 6),
            pad(0o05, 6),
            pad(0o06, 6),
            pad(0o074, 9),
            pad(0o075, 9),
            pad(0o076, 9),
            pad(0o077, 9),
            pad(0o1, 3),
            pad(0o2, 3),
            pad(0o3, 3),
            pad(0o4, 3),
            pad(0o5, 3),
            pad(0o6, 3),
            pad(0o7, 3),
        ];

        assert_eq!(probe, reference);
        assert_eq!(
            sorted_collisions(&tree, &halo_box)
                .iter()
                .map(|&i| tree[i])
                .collect::<Vec<_>>(),
            reference
        );
    }

    #[test]
    fn all2all_radius_pbc_x() {
        check_all2all_radius_pbc_x::<u32>();
        check_all2all_radius_pbc_x::<u64>();
    }

    /// The fast and the naive finder agree on random trees and random
    /// halo boxes under every periodicity combination.
    fn check_equivalence<K: SfcKey>(seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);

        let mut keys: Vec<K> = (0..2000)
            .map(|_| K::from_u64(rng.gen_range(0..node_range::<K>(0).to_u64())))
            .collect();
        keys.sort_unstable();
        let (tree, _) = compute_tree(&keys, 16);
        let nodes = crate::btree::build_binary_tree(&tree[..num_leaves(&tree)]);

        for pbc_bits in 0..8u32 {
            let pbc = [pbc_bits & 1 != 0, pbc_bits & 2 != 0, pbc_bits & 4 != 0];

            for _ in 0..50 {
                let leaf = rng.gen_range(0..num_leaves(&tree));
                let radius = rng.gen_range(1..(K::max_coord() / 4) as i64);
                let halo_box =
                    make_halo_box(tree[leaf], tree[leaf + 1], [radius, radius, radius], pbc);

                let mut collisions = CollisionList::new(num_leaves(&tree));
                find_collisions(&nodes, &tree, &halo_box, &mut collisions);
                let mut fast = collisions.as_slice().to_vec();
                fast.sort_unstable();

                assert_eq!(fast, find_collisions_all2all(&tree, &halo_box));
            }
        }
    }

    #[test]
    fn finder_equivalence() {
        check_equivalence::<u32>(7);
        check_equivalence::<u64>(8);
    }

    fn check_halo_radii<K: SfcKey>() {
        let tree: Vec<K> = [0u64, 8, 16, 24, 32].iter().map(|&v| K::from_u64(v)).collect();

        let keys: Vec<K> = [0u64, 4, 8, 14, 20, 24, 25, 26, 31]
            .iter()
            .map(|&v| K::from_u64(v))
            .collect();
        let h = vec![2.0, 1.0, 4.0, 3.0, 5.0, 8.0, 2.0, 1.0, 3.0];
        let ordering: Vec<usize> = (0..keys.len()).collect();

        let probe = compute_halo_radii(&tree, &keys, &ordering, &h);
        assert_eq!(probe, vec![4.0, 8.0, 10.0, 16.0]);
    }

    #[test]
    fn halo_radii() {
        check_halo_radii::<u32>();
        check_halo_radii::<u64>();
    }

    #[test]
    fn halos_of_an_octant_assignment() {
        let tree = TreeMaker::<u32>::new().divide(&[]).make();
        let nodes = crate::btree::build_binary_tree(&tree[..8]);
        let bx = PhysicalBox::cube(0.0, 1.0, false);

        let mut radii = vec![0.0; 8];
        for r in radii.iter_mut().take(4) {
            *r = 0.1;
        }

        // leaves 0..4 are assigned; every other octant touches them
        assert_eq!(find_halos(&tree, &nodes, &radii, &bx, 0, 4), vec![4, 5, 6, 7]);

        // without interaction radii there are no halos
        assert_eq!(find_halos(&tree, &nodes, &vec![0.0; 8], &bx, 0, 4), Vec::<usize>::new());
    }
}

//! Domain decomposition: assignment of space-filling-curve ranges to
//! ranks, and the send lists derived from an assignment.

use crate::morton::SfcKey;
use crate::tree::num_leaves;

/// A list of half-open ranges with an element count per range.
///
/// Used with key ranges (rank assignments) as well as with index ranges
/// into particle arrays (send lists and local node ranges).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexRanges<T> {
    starts: Vec<T>,
    ends: Vec<T>,
    counts: Vec<usize>,
    total_count: usize,
}

impl<T: Copy> IndexRanges<T> {
    /// An empty range list.
    pub fn new() -> Self {
        Self {
            starts: Vec::new(),
            ends: Vec::new(),
            counts: Vec::new(),
            total_count: 0,
        }
    }

    /// Append a range `[start, end)` holding `count` elements.
    pub fn add_range(&mut self, start: T, end: T, count: usize) {
        self.starts.push(start);
        self.ends.push(end);
        self.counts.push(count);
        self.total_count += count;
    }

    /// Number of ranges.
    pub fn n_ranges(&self) -> usize {
        self.starts.len()
    }

    /// Start of range `i`.
    pub fn range_start(&self, i: usize) -> T {
        self.starts[i]
    }

    /// End of range `i`.
    pub fn range_end(&self, i: usize) -> T {
        self.ends[i]
    }

    /// Element count of range `i`.
    pub fn count(&self, i: usize) -> usize {
        self.counts[i]
    }

    /// Sum of the element counts over all ranges.
    pub fn total_count(&self) -> usize {
        self.total_count
    }
}

impl IndexRanges<usize> {
    /// Append an index range whose count is its length.
    pub fn add_index_range(&mut self, start: usize, end: usize) {
        self.add_range(start, end, end - start);
    }
}

/// Assignment of contiguous space-filling-curve key ranges to ranks.
///
/// Across all ranks the ranges tile the root key interval with no
/// overlap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpaceCurveAssignment<K> {
    ranges: Vec<IndexRanges<K>>,
}

impl<K: SfcKey> SpaceCurveAssignment<K> {
    /// An empty assignment for the given number of ranks.
    pub fn new(n_ranks: usize) -> Self {
        Self {
            ranges: vec![IndexRanges::new(); n_ranks],
        }
    }

    /// Number of ranks in the assignment.
    pub fn n_ranks(&self) -> usize {
        self.ranges.len()
    }

    /// Assign the key range `[start, end)` with `count` particles to `rank`.
    pub fn add_range(&mut self, rank: usize, start: K, end: K, count: usize) {
        self.ranges[rank].add_range(start, end, count);
    }

    /// The key ranges of `rank`.
    pub fn ranges(&self, rank: usize) -> &IndexRanges<K> {
        &self.ranges[rank]
    }

    /// Total particle count assigned to `rank`.
    pub fn assigned_count(&self, rank: usize) -> usize {
        self.ranges[rank].total_count()
    }
}

/// Split the global leaf sequence into one contiguous key range per rank.
///
/// Each rank receives close to `ceil(total / n_ranks)` particles, cut only
/// at leaf boundaries; the remainder of the division goes to the lower
/// ranks. A leaf moves to the next rank when taking it would overshoot
/// the target by more than stopping short of it. Deterministic for fixed
/// inputs.
pub fn single_range_split<K: SfcKey>(
    tree: &[K],
    counts: &[u32],
    n_ranks: usize,
) -> SpaceCurveAssignment<K> {
    debug_assert_eq!(counts.len(), num_leaves(tree));

    let total: usize = counts.iter().map(|&c| c as usize).sum();
    let mut assignment = SpaceCurveAssignment::new(n_ranks);

    let mut leaves_done = 0;
    for rank in 0..n_ranks {
        let target = total / n_ranks + usize::from(rank < total % n_ranks);

        let mut split_count = 0;
        let mut j = leaves_done;
        while split_count < target && j < counts.len() {
            let next_count = split_count + counts[j] as usize;
            // take the leaf if that lands closer to the target than stopping
            if next_count < target || next_count - target < target - split_count {
                split_count = next_count;
                j += 1;
            } else {
                break;
            }
        }

        // the last rank absorbs everything that remains
        if rank == n_ranks - 1 {
            split_count += counts[j..].iter().map(|&c| c as usize).sum::<usize>();
            j = counts.len();
        }

        assignment.add_range(rank, tree[leaves_done], tree[j], split_count);
        leaves_done = j;
    }

    assignment
}

/// Per-peer lists of index ranges into the local particle arrays,
/// describing which particles to send where. Indices are counted in the
/// order of the sorted key array, starting at an agreed-upon input
/// offset rather than the raw buffer start.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendList {
    manifests: Vec<IndexRanges<usize>>,
}

impl SendList {
    /// An empty send list for the given number of ranks.
    pub fn new(n_ranks: usize) -> Self {
        Self {
            manifests: vec![IndexRanges::new(); n_ranks],
        }
    }

    /// Number of ranks.
    pub fn n_ranks(&self) -> usize {
        self.manifests.len()
    }

    /// Add the index range `[start, end)` to the manifest of `rank`.
    pub fn add_range(&mut self, rank: usize, start: usize, end: usize) {
        self.manifests[rank].add_index_range(start, end);
    }

    /// The manifest of `rank`.
    pub fn ranges(&self, rank: usize) -> &IndexRanges<usize> {
        &self.manifests[rank]
    }

    /// Number of particles going to `rank`.
    pub fn send_count(&self, rank: usize) -> usize {
        self.manifests[rank].total_count()
    }
}

/// Derive the send list from an assignment by locating each rank's key
/// ranges in the sorted local key array.
pub fn create_send_list<K: SfcKey>(
    assignment: &SpaceCurveAssignment<K>,
    keys: &[K],
) -> SendList {
    debug_assert!(keys.windows(2).all(|w| w[0] <= w[1]));

    let mut send_list = SendList::new(assignment.n_ranks());

    for rank in 0..assignment.n_ranks() {
        let ranges = assignment.ranges(rank);
        for i in 0..ranges.n_ranges() {
            let start = keys.partition_point(|&k| k < ranges.range_start(i));
            let end = keys.partition_point(|&k| k < ranges.range_end(i));
            send_list.add_range(rank, start, end);
        }
    }

    send_list
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::morton::node_range;
    use crate::tree::TreeMaker;

    #[test]
    fn split_uniform_counts() {
        let tree = TreeMaker::<u32>::new().divide(&[]).make();
        let counts = vec![1u32; 8];

        let assignment = single_range_split(&tree, &counts, 4);

        for rank in 0..4 {
            assert_eq!(assignment.assigned_count(rank), 2);
            assert_eq!(assignment.ranges(rank).n_ranges(), 1);
        }

        // the ranges tile the root interval
        assert_eq!(assignment.ranges(0).range_start(0), 0);
        for rank in 1..4 {
            assert_eq!(
                assignment.ranges(rank - 1).range_end(0),
                assignment.ranges(rank).range_start(0)
            );
        }
        assert_eq!(assignment.ranges(3).range_end(0), node_range::<u32>(0));
    }

    #[test]
    fn split_remainder_goes_to_lower_ranks() {
        let tree = TreeMaker::<u32>::new().divide(&[]).make();
        // total of 35 particles over two ranks: targets are 18 and 17
        let counts = vec![5u32, 5, 5, 5, 5, 5, 5, 0];

        let assignment = single_range_split(&tree, &counts, 2);

        assert_eq!(assignment.assigned_count(0) + assignment.assigned_count(1), 35);
        assert!(assignment.assigned_count(0) >= assignment.assigned_count(1));

        // deterministic: a second invocation gives the identical result
        assert_eq!(assignment, single_range_split(&tree, &counts, 2));
    }

    #[test]
    fn split_empty_leaves_land_somewhere() {
        let tree = TreeMaker::<u64>::new().divide(&[]).make();
        let counts = vec![0u32, 0, 0, 0, 0, 0, 0, 4];

        let assignment = single_range_split(&tree, &counts, 2);

        // all particles sit in the last leaf, which belongs to rank 1;
        // the leading empty leaves still tile onto the ranks
        assert_eq!(assignment.ranges(0).range_start(0), 0);
        assert_eq!(assignment.ranges(1).range_end(0), node_range::<u64>(0));
        assert_eq!(
            assignment.assigned_count(0) + assignment.assigned_count(1),
            4
        );
    }

    #[test]
    fn send_list_from_assignment() {
        let tree = TreeMaker::<u32>::new().divide(&[]).make();
        let counts = vec![2u32, 2, 2, 2, 2, 2, 2, 2];
        let assignment = single_range_split(&tree, &counts, 2);

        // two particles per octant, keys at the octant lower corners
        let keys: Vec<u32> = (0..16)
            .map(|i| (i / 2) * node_range::<u32>(1) + i % 2)
            .collect();

        let send_list = create_send_list(&assignment, &keys);

        assert_eq!(send_list.send_count(0), 8);
        assert_eq!(send_list.send_count(1), 8);
        assert_eq!(send_list.ranges(0).range_start(0), 0);
        assert_eq!(send_list.ranges(0).range_end(0), 8);
        assert_eq!(send_list.ranges(1).range_start(0), 8);
        assert_eq!(send_list.ranges(1).range_end(0), 16);
    }
}

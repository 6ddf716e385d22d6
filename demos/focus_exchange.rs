//! Refine a focused tree across ranks and check that peer counts arrive.

use cornerstone::decomposition::single_range_split;
use cornerstone::geometry::key_from_point;
use cornerstone::tools::global_counts;
use cornerstone::tree::{compute_counts, rebalance, rebalance_decision, root_tree};
use cornerstone::{FocusedTree, PhysicalBox};
use mpi::traits::Communicator;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

pub fn main() {
    let universe = mpi::initialize().unwrap();
    let comm = universe.world();
    let rank = comm.rank();
    let n_ranks = comm.size();

    let npoints = 20000;
    let bucket_size = 64;
    let bx = PhysicalBox::cube(-1.0, 1.0, false);

    let mut rng = ChaCha8Rng::seed_from_u64(rank as u64);
    let mut keys: Vec<u64> = (0..npoints)
        .map(|_| {
            let point = [
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            ];
            key_from_point(point, &bx)
        })
        .collect();
    keys.sort_unstable();

    // build the shared global tree and the rank assignment
    let mut tree = root_tree::<u64>();
    let mut counts;
    loop {
        let local = compute_counts(&tree, &keys, u32::MAX);
        counts = global_counts(&local, &comm);
        let (ops, converged) = rebalance_decision(&tree, &counts, bucket_size);
        if converged {
            break;
        }
        tree = rebalance(&tree, &ops);
    }
    let assignment = single_range_split(&tree, &counts, n_ranks as usize);

    // keep only the particles this rank owns, as after a domain exchange
    let my_ranges = assignment.ranges(rank as usize);
    let focus_start = my_ranges.range_start(0);
    let focus_end = my_ranges.range_end(my_ranges.n_ranges() - 1);
    let owned: Vec<u64> = keys
        .iter()
        .copied()
        .filter(|&k| focus_start <= k && k < focus_end)
        .collect();

    let mut focused = FocusedTree::<u64>::new(bucket_size, 1.0);
    let mut passes = 0;
    while !focused
        .update(&comm, &assignment, &bx, &owned, focus_start, focus_end)
        .unwrap()
    {
        passes += 1;
    }

    // inside the focus the counts match the owned particles exactly
    let first = focused.tree().partition_point(|&k| k < focus_start);
    let last = focused.tree().partition_point(|&k| k < focus_end);
    let in_focus: u64 = focused.counts()[first..last].iter().map(|&c| c as u64).sum();
    assert_eq!(in_focus, owned.len() as u64);

    // outside the focus no leaf reports more than the global total
    let global_total: u64 = counts.iter().map(|&c| c as u64).sum();
    let total: u64 = focused.counts().iter().map(|&c| c as u64).sum();
    assert!(total <= global_total);

    // a converged tree is a fixed point
    let before = focused.tree().to_vec();
    assert!(focused
        .update(&comm, &assignment, &bx, &owned, focus_start, focus_end)
        .unwrap());
    assert_eq!(before, focused.tree());

    println!(
        "rank {}: focused tree with {} leaves after {} passes, counts add up",
        rank,
        focused.tree().len() - 1,
        passes
    );
}

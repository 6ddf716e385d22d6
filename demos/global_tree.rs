//! Build a distributed domain from random points and print its shape.

use cornerstone::{Domain, PhysicalBox};
use mpi::collective::SystemOperation;
use mpi::traits::{Communicator, CommunicatorCollectives};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

pub fn main() {
    let universe = mpi::initialize().unwrap();
    let comm = universe.world();
    let rank = comm.rank();

    let npoints = 10000;
    let mut rng = ChaCha8Rng::seed_from_u64(rank as u64);

    let mut x: Vec<f64> = (0..npoints).map(|_| rng.gen()).collect();
    let mut y: Vec<f64> = (0..npoints).map(|_| rng.gen()).collect();
    let mut z: Vec<f64> = (0..npoints).map(|_| rng.gen()).collect();
    let mut h = vec![0.05; npoints];

    let bx = PhysicalBox::cube(0.0, 1.0, false);
    let mut domain = Domain::<u64>::new(bx, 64, 0.5);

    let info = domain.sync(&comm, &mut x, &mut y, &mut z, &mut h).unwrap();

    println!(
        "rank {}: {} assigned particles in [{}, {}), buffer size {}, {} tree leaves",
        rank,
        info.local_end - info.local_start,
        info.local_start,
        info.local_end,
        info.total_size,
        domain.global_tree().len() - 1,
    );

    // no particles are lost: the global counts sum to the global total
    let global_total: u32 = domain.global_counts().iter().sum();
    let mut expected = 0u32;
    comm.all_reduce_into(&(npoints as u32), &mut expected, SystemOperation::sum());
    assert_eq!(global_total, expected);

    // every assigned particle lies in this rank's key ranges
    let ranges = domain.assignment().ranges(rank as usize);
    for &key in domain.assigned_keys() {
        let inside = (0..ranges.n_ranges())
            .any(|i| ranges.range_start(i) <= key && key < ranges.range_end(i));
        assert!(inside);
    }

    if rank == 0 {
        println!("domain sync finished on {} ranks", comm.size());
    }
}

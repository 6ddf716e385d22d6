//! Cyclic particle exchange with buffer offsets.
//!
//! Every rank keeps 54 of its 64 assigned elements and sends the last 10
//! to the next rank, with an input offset of 1 and an output offset of 2.
//! Afterwards the assigned region holds the kept values followed by the
//! predecessor's, and the regions outside it are untouched.

use cornerstone::decomposition::SendList;
use cornerstone::exchange::exchange_particles;
use mpi::traits::Communicator;

pub fn main() {
    let universe = mpi::initialize().unwrap();
    let comm = universe.world();
    let rank = comm.rank();
    let n_ranks = comm.size();

    let original_size = 65;
    let assigned_size = 64;
    let final_size = 70;

    let input_offset = 1;
    let output_offset = 2;

    // x and y hold one value per rank; index 0 is pollution before the
    // input offset
    let pollution = -1412842341.0;
    let mut x = vec![rank as f64; original_size];
    let mut y = vec![-rank as f64; original_size];
    x[0] = pollution;
    y[0] = pollution;

    let ordering: Vec<usize> = (0..assigned_size).collect();

    // keep all but the last 10 elements, send those to the next rank
    let nex = 10;
    let next_rank = ((rank + 1) % n_ranks) as usize;

    let mut send_list = SendList::new(n_ranks as usize);
    send_list.add_range(rank as usize, 0, assigned_size - nex);
    send_list.add_range(next_rank, assigned_size - nex, assigned_size);

    let mut arrays = [&mut x, &mut y];
    for array in arrays.iter_mut() {
        array.resize(final_size, 0.0);
    }

    exchange_particles(
        &comm,
        &send_list,
        assigned_size,
        input_offset,
        output_offset,
        &ordering,
        &mut arrays,
    )
    .unwrap();

    let incoming_rank = ((rank - 1 + n_ranks) % n_ranks) as f64;

    assert_eq!(x.len(), final_size);
    assert_eq!(y.len(), final_size);

    for i in 0..assigned_size - nex {
        assert_eq!(x[output_offset + i], rank as f64);
        assert_eq!(y[output_offset + i], -rank as f64);
    }
    for i in assigned_size - nex..assigned_size {
        assert_eq!(x[output_offset + i], incoming_rank);
        assert_eq!(y[output_offset + i], -incoming_rank);
    }

    // pollution and the tail stay untouched
    assert_eq!(x[0], pollution);
    assert_eq!(y[0], pollution);
    for i in output_offset + assigned_size..final_size {
        assert_eq!(x[i], 0.0);
        assert_eq!(y[i], 0.0);
    }

    println!("rank {}: cyclic exchange with offsets verified", rank);
}

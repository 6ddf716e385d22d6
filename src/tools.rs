//! Utility routines.

use mpi::{collective::SystemOperation, traits::CommunicatorCollectives};

/// Sort indices of an array: `arr[argsort(arr)[i]]` is sorted in `i`.
pub fn argsort<T: Ord>(arr: &[T]) -> Vec<usize> {
    let mut indices = (0..arr.len()).collect::<Vec<_>>();
    indices.sort_unstable_by_key(|&index| &arr[index]);
    indices
}

/// Apply a permutation: `reorder(arr, p)[i] = arr[p[i]]`.
pub fn reorder<T: Copy>(arr: &[T], permutation: &[usize]) -> Vec<T> {
    permutation.iter().map(|&index| arr[index]).collect()
}

/// Element-wise global sum of per-leaf particle counts.
///
/// All ranks must pass arrays of identical length, one entry per leaf of
/// the shared global tree.
pub fn global_counts<C: CommunicatorCollectives>(local_counts: &[u32], comm: &C) -> Vec<u32> {
    let mut result = vec![0u32; local_counts.len()];
    comm.all_reduce_into(local_counts, &mut result[..], SystemOperation::sum());
    result
}

/// Element-wise global maximum, used for per-leaf interaction radii.
pub fn global_max<C: CommunicatorCollectives>(local_values: &[f64], comm: &C) -> Vec<f64> {
    let mut result = vec![0f64; local_values.len()];
    comm.all_reduce_into(local_values, &mut result[..], SystemOperation::max());
    result
}

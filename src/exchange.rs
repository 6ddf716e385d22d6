//! Message exchanges between ranks: focus tree counts and particle
//! redistribution.
//!
//! Both exchanges use non-blocking sends matched by blocking receives and
//! keep traffic apart by tag. The focus exchange answers count requests
//! for the parts of the domain this rank owns; the particle exchange
//! moves attribute arrays to their new owners after a change of the
//! domain decomposition.

use mpi::traits::{Communicator, CommunicatorCollectives, Destination, Equivalence, Source};

use crate::constants::{TAG_FOCUS_REPLY, TAG_FOCUS_REQUEST, TAG_PARTICLE_EXCHANGE};
use crate::decomposition::SendList;
use crate::errors::DomainError;
use crate::morton::SfcKey;

/// Particle counts for a sequence of requested tree nodes, by binary
/// search on the local sorted key array.
///
/// `request` holds `n + 1` keys bounding `n` nodes. A request that is
/// not strictly increasing does not describe tree nodes and is a peer
/// protocol error.
pub fn count_requested<K: SfcKey>(
    local_keys: &[K],
    request: &[K],
    source: i32,
) -> Result<Vec<u32>, DomainError> {
    if request.is_empty() || !request.windows(2).all(|w| w[0] < w[1]) {
        return Err(DomainError::PeerMismatch {
            rank: source,
            detail: "received node keys are not sorted tree boundaries".to_string(),
        });
    }

    Ok(request
        .windows(2)
        .map(|w| {
            let start = local_keys.partition_point(|&k| k < w[0]);
            let end = local_keys.partition_point(|&k| k < w[1]);
            (end - start) as u32
        })
        .collect())
}

/// Exchange focus tree counts with the peer ranks.
///
/// For every peer, the slice `focus_tree[lo..hi + 1]` (one extra key to
/// bound the last leaf) goes out on the request tag. Every incoming
/// request is answered with counts over the local sorted key array on the
/// reply tag; replies are matched to peers by source rank, never by
/// arrival order. On return, `focus_counts[lo..hi]` of every peer range
/// holds the peer's authoritative counts, and all ranks have passed a
/// barrier.
pub fn exchange_focus<K: SfcKey, C: CommunicatorCollectives>(
    comm: &C,
    peers: &[i32],
    exchange_indices: &[(usize, usize)],
    focus_tree: &[K],
    focus_counts: &mut [u32],
    local_keys: &[K],
) -> Result<(), DomainError> {
    debug_assert_eq!(peers.len(), exchange_indices.len());

    let result = mpi::request::scope(|scope| {
        let mut first_error: Result<(), DomainError> = Ok(());

        let mut sends = Vec::with_capacity(peers.len());
        for (&peer, &(lo, hi)) in peers.iter().zip(exchange_indices) {
            sends.push(
                comm.process_at_rank(peer)
                    .immediate_send_with_tag(scope, &focus_tree[lo..hi + 1], TAG_FOCUS_REQUEST),
            );
        }

        // answer one request per peer; a malformed request is recorded
        // but still answered so that no rank hangs in its receive loop
        for _ in 0..peers.len() {
            let (request, status) = comm
                .any_process()
                .receive_vec_with_tag::<K>(TAG_FOCUS_REQUEST);
            let source = status.source_rank();

            let reply = match count_requested(local_keys, &request, source) {
                Ok(counts) => counts,
                Err(error) => {
                    let n = request.len().saturating_sub(1);
                    if first_error.is_ok() {
                        first_error = Err(error);
                    }
                    vec![0; n]
                }
            };
            comm.process_at_rank(source)
                .send_with_tag(&reply[..], TAG_FOCUS_REPLY);
        }

        // collect the answers, matched by source rank
        for _ in 0..peers.len() {
            let status = comm.any_process().probe_with_tag(TAG_FOCUS_REPLY);
            let source = status.source_rank();
            let (reply, _) = comm
                .process_at_rank(source)
                .receive_vec_with_tag::<u32>(TAG_FOCUS_REPLY);

            match peers.iter().position(|&p| p == source) {
                Some(index) => {
                    let (lo, hi) = exchange_indices[index];
                    if reply.len() == hi - lo {
                        focus_counts[lo..hi].copy_from_slice(&reply);
                    } else if first_error.is_ok() {
                        first_error = Err(DomainError::PeerMismatch {
                            rank: source,
                            detail: format!(
                                "reply holds {} counts, expected {}",
                                reply.len(),
                                hi - lo
                            ),
                        });
                    }
                }
                None => {
                    if first_error.is_ok() {
                        first_error = Err(DomainError::PeerMismatch {
                            rank: source,
                            detail: "reply from a rank that is not a peer".to_string(),
                        });
                    }
                }
            }
        }

        for send in sends {
            send.wait();
        }

        first_error
    });

    comm.barrier();
    result
}

/// Redistribute particle attribute arrays according to a send list.
///
/// `ordering` maps positions in key-sorted order, counted from
/// `input_offset`, to the positions where the attributes currently live;
/// the send list indices refer to the same key-sorted order. After the
/// exchange, the slice `[output_offset, output_offset + num_assigned)` of
/// every array holds the kept local elements (in send list order)
/// followed by the received remote elements (in unspecified order).
/// Regions before `output_offset` and past the assigned range are left
/// untouched. The caller resizes all arrays to their final length
/// beforehand.
pub fn exchange_particles<T, C>(
    comm: &C,
    send_list: &SendList,
    num_assigned: usize,
    input_offset: usize,
    output_offset: usize,
    ordering: &[usize],
    arrays: &mut [&mut Vec<T>],
) -> Result<(), DomainError>
where
    T: Equivalence + Copy,
    C: Communicator,
{
    let rank = comm.rank() as usize;
    let n_ranks = comm.size() as usize;
    debug_assert_eq!(send_list.n_ranks(), n_ranks);

    let kept = send_list.send_count(rank);
    let incoming_total = num_assigned - kept;

    let gather = |array: &[T], peer: usize| -> Vec<T> {
        let ranges = send_list.ranges(peer);
        let mut buffer = Vec::with_capacity(send_list.send_count(peer));
        for r in 0..ranges.n_ranges() {
            for i in ranges.range_start(r)..ranges.range_end(r) {
                buffer.push(array[input_offset + ordering[i]]);
            }
        }
        buffer
    };

    // pack one buffer per peer and attribute before any array is written
    let mut send_buffers: Vec<(i32, Vec<Vec<T>>)> = Vec::new();
    for peer in 0..n_ranks {
        if peer == rank || send_list.send_count(peer) == 0 {
            continue;
        }
        let buffers = arrays
            .iter()
            .map(|array| gather(array.as_slice(), peer))
            .collect();
        send_buffers.push((peer as i32, buffers));
    }

    let local: Vec<Vec<T>> = arrays
        .iter()
        .map(|array| gather(array.as_slice(), rank))
        .collect();

    mpi::request::scope(|scope| {
        let mut requests = Vec::new();
        for (peer, buffers) in &send_buffers {
            for (attribute, buffer) in buffers.iter().enumerate() {
                requests.push(comm.process_at_rank(*peer).immediate_send_with_tag(
                    scope,
                    &buffer[..],
                    TAG_PARTICLE_EXCHANGE + attribute as i32,
                ));
            }
        }

        // place the kept elements at the output offset
        for (array, buffer) in arrays.iter_mut().zip(&local) {
            array[output_offset..output_offset + kept].copy_from_slice(buffer);
        }

        // received chunks fill the remainder after the local region
        let mut first_error: Result<(), DomainError> = Ok(());
        let mut received = 0;
        while received < incoming_total {
            let status = comm.any_process().probe_with_tag(TAG_PARTICLE_EXCHANGE);
            let source = status.source_rank();

            let mut chunk_len = 0;
            for (attribute, array) in arrays.iter_mut().enumerate() {
                let (chunk, _) = comm
                    .process_at_rank(source)
                    .receive_vec_with_tag::<T>(TAG_PARTICLE_EXCHANGE + attribute as i32);
                chunk_len = chunk.len();

                if received + chunk_len > incoming_total {
                    if first_error.is_ok() {
                        first_error = Err(DomainError::PeerMismatch {
                            rank: source,
                            detail: "more particles received than assigned".to_string(),
                        });
                    }
                    break;
                }

                let fill = output_offset + kept + received;
                array[fill..fill + chunk_len].copy_from_slice(&chunk);
            }

            if first_error.is_err() {
                break;
            }
            received += chunk_len;
        }

        for request in requests {
            request.wait();
        }

        first_error
    })
}

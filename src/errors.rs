//! Error types surfaced by the domain pipeline.

use std::error::Error;
use std::fmt;

/// Fatal conditions raised by the tree and exchange layers.
///
/// Everything in here aborts the current step. The one recoverable
/// condition, a leaf at the deepest level that still exceeds the bucket
/// size, is reported through `log::warn!` instead and does not appear
/// here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A per-particle neighbor list exceeded its capacity.
    NeighborOverflow {
        /// Index of the offending particle in the local arrays.
        particle: usize,
        /// Configured list capacity.
        max_neighbors: usize,
    },
    /// A focus count request named keys that are not resolved in the
    /// receiver's tree, or a reply did not match the request size.
    PeerMismatch {
        /// Rank of the peer involved in the exchange.
        rank: i32,
        /// Human-readable detail of the mismatch.
        detail: String,
    },
    /// A tree failed its structural invariants; indicates a bug.
    InvariantViolation(String),
    /// An error reported by the message-passing layer.
    Transport(String),
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DomainError::NeighborOverflow {
                particle,
                max_neighbors,
            } => write!(
                f,
                "neighbor list of particle {} exceeded the maximum of {} entries",
                particle, max_neighbors
            ),
            DomainError::PeerMismatch { rank, detail } => {
                write!(f, "focus exchange with rank {} failed: {}", rank, detail)
            }
            DomainError::InvariantViolation(detail) => {
                write!(f, "tree invariant violated: {}", detail)
            }
            DomainError::Transport(detail) => write!(f, "transport error: {}", detail),
        }
    }
}

impl Error for DomainError {}

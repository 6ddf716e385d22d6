//! Distributed cornerstone octrees for particle simulations.
//!
//! This library maintains an adaptive octree over particle positions
//! spread across the ranks of an MPI job. The octree is stored in the
//! cornerstone format: a flat, sorted array of space-filling-curve keys
//! whose consecutive pairs are the tree leaves. On top of it the library
//! provides the pieces a parallel particle code needs between its raw
//! coordinate arrays and its physics kernels:
//!
//! - encoding of 3D coordinates into Morton keys and back
//!   ([morton](crate::morton)),
//! - construction and rebalancing of the global tree under a per-leaf
//!   particle limit ([tree](crate::tree)),
//! - a binary radix tree for log-time range queries
//!   ([btree](crate::btree)),
//! - halo boxes and collision detection with periodic boundary support
//!   ([halos](crate::halos)),
//! - assignment of contiguous key ranges to ranks and the derived send
//!   lists ([decomposition](crate::decomposition)),
//! - locally focused trees refined by particle counts and a multipole
//!   acceptance criterion ([focus](crate::focus)),
//! - count and particle exchanges between ranks
//!   ([exchange](crate::exchange)),
//! - buffer layouts for assigned and halo nodes ([layout](crate::layout)),
//! - and neighbor search over the finished tree
//!   ([neighbors](crate::neighbors)).
//!
//! The [Domain](crate::domain::Domain) object ties these together into a
//! single per-step update:
//!
//! ```no_run
//! use cornerstone::{Domain, PhysicalBox};
//! use mpi::traits::Communicator;
//! use rand::prelude::*;
//! use rand_chacha::ChaCha8Rng;
//!
//! let universe = mpi::initialize().unwrap();
//! let comm = universe.world();
//! let mut rng = ChaCha8Rng::seed_from_u64(comm.rank() as u64);
//!
//! let npoints = 10000;
//! let mut x: Vec<f64> = (0..npoints).map(|_| rng.gen()).collect();
//! let mut y: Vec<f64> = (0..npoints).map(|_| rng.gen()).collect();
//! let mut z: Vec<f64> = (0..npoints).map(|_| rng.gen()).collect();
//! let mut h = vec![0.02; npoints];
//!
//! let bx = PhysicalBox::cube(0.0, 1.0, false);
//! let mut domain = Domain::<u64>::new(bx, 64, 0.5);
//!
//! let info = domain.sync(&comm, &mut x, &mut y, &mut z, &mut h).unwrap();
//! println!(
//!     "rank {} owns particles [{}, {}) of {} slots",
//!     comm.rank(),
//!     info.local_start,
//!     info.local_end,
//!     info.total_size
//! );
//! ```
//!
//! Keys are generic over `u32` (10 octree levels) and `u64` (21 levels)
//! through the [SfcKey](crate::morton::SfcKey) trait. All distributed
//! entry points are generic over the communicator; everything else is
//! plain serial code that can be used and tested without MPI.
#![cfg_attr(feature = "strict", deny(warnings), deny(unused_crate_dependencies))]
#![warn(missing_docs)]

pub mod btree;
pub mod constants;
pub mod decomposition;
pub mod domain;
pub mod errors;
pub mod exchange;
pub mod focus;
pub mod geometry;
pub mod halos;
pub mod layout;
pub mod morton;
pub mod neighbors;
pub mod tools;
pub mod tree;

pub use crate::domain::{Domain, SyncInfo};
pub use crate::errors::DomainError;
pub use crate::focus::FocusedTree;
pub use crate::geometry::{IntBox, PhysicalBox};
pub use crate::morton::SfcKey;

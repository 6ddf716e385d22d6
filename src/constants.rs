//! Constants shared across the library.

/// Number of children of an octree node.
pub const NSIBLINGS: usize = 8;

/// Depth bound for the explicit traversal stack of the binary radix tree.
///
/// A binary radix tree over keys with at most 63 payload bits cannot be
/// deeper than 64 levels, so a stack of this size never overflows.
pub const TRAVERSAL_STACK_SIZE: usize = 64;

/// Message tag for focus tree count requests.
pub const TAG_FOCUS_REQUEST: i32 = 0;

/// Message tag for focus tree count replies.
pub const TAG_FOCUS_REPLY: i32 = 1;

/// Base message tag for the particle exchange. Attribute array `i`
/// travels with tag `TAG_PARTICLE_EXCHANGE + i`.
pub const TAG_PARTICLE_EXCHANGE: i32 = 10;

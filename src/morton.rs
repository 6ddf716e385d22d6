//! Routines for working with Morton-ordered space-filling-curve keys.
//!
//! A key is a plain unsigned integer whose low `3 * MAX_LEVEL` bits carry
//! the bit-interleaved integer coordinates of a point, with the x bit
//! occupying the highest position of each 3-bit triplet. A pair of adjacent
//! keys `(k, k + 8^(MAX_LEVEL - l))` with `k` aligned to that granularity
//! describes an octree node of level `l`, so all octree manipulations reduce
//! to integer arithmetic on keys.

use mpi::traits::Equivalence;

/// An unsigned integer type usable as a space-filling-curve key.
///
/// Implemented for `u32` (10 octree levels) and `u64` (21 octree levels).
/// All arithmetic goes through `u64` so that the encoding and decoding
/// routines can be shared between the two widths.
pub trait SfcKey:
    Copy
    + Clone
    + Default
    + std::fmt::Debug
    + std::fmt::Display
    + std::hash::Hash
    + PartialEq
    + Eq
    + PartialOrd
    + Ord
    + Equivalence
    + Send
    + Sync
    + 'static
{
    /// Number of octree subdivision levels that fit into the key.
    const MAX_LEVEL: u32;

    /// Create a key from the common `u64` representation.
    fn from_u64(value: u64) -> Self;

    /// Widen the key to `u64`.
    fn to_u64(self) -> u64;

    /// Number of integer coordinates per axis, `2^MAX_LEVEL`.
    fn max_coord() -> u64 {
        1 << Self::MAX_LEVEL
    }
}

macro_rules! impl_sfc_key {
    ($type:ty, $max_level:expr) => {
        impl SfcKey for $type {
            const MAX_LEVEL: u32 = $max_level;

            fn from_u64(value: u64) -> Self {
                value as $type
            }

            fn to_u64(self) -> u64 {
                self as u64
            }
        }
    };
}

impl_sfc_key!(u32, 10);
impl_sfc_key!(u64, 21);

/// Spread the low 21 bits of a coordinate three positions apart.
///
/// Works for both key widths; a 10-bit coordinate simply leaves the
/// upper groups empty.
fn spread_bits(mut v: u64) -> u64 {
    v &= 0x1f_ffff;
    v = (v | v << 32) & 0x001f_0000_0000_ffff;
    v = (v | v << 16) & 0x001f_0000_ff00_00ff;
    v = (v | v << 8) & 0x100f_00f0_0f00_f00f;
    v = (v | v << 4) & 0x10c3_0c30_c30c_30c3;
    v = (v | v << 2) & 0x1249_2492_4924_9249;
    v
}

/// Inverse of [`spread_bits`]: collect every third bit.
fn compact_bits(mut v: u64) -> u64 {
    v &= 0x1249_2492_4924_9249;
    v = (v | v >> 2) & 0x10c3_0c30_c30c_30c3;
    v = (v | v >> 4) & 0x100f_00f0_0f00_f00f;
    v = (v | v >> 8) & 0x001f_0000_ff00_00ff;
    v = (v | v >> 16) & 0x001f_0000_0000_ffff;
    v = (v | v >> 32) & 0x001f_ffff;
    v
}

/// Encode integer coordinates in `[0, 2^MAX_LEVEL)` into a key.
pub fn encode<K: SfcKey>(ix: u32, iy: u32, iz: u32) -> K {
    debug_assert!((ix as u64) < K::max_coord());
    debug_assert!((iy as u64) < K::max_coord());
    debug_assert!((iz as u64) < K::max_coord());

    K::from_u64(spread_bits(ix as u64) << 2 | spread_bits(iy as u64) << 1 | spread_bits(iz as u64))
}

/// Decode a key back into its integer coordinates. Exact inverse of [`encode`].
pub fn decode<K: SfcKey>(key: K) -> [u32; 3] {
    let v = key.to_u64();
    [
        compact_bits(v >> 2) as u32,
        compact_bits(v >> 1) as u32,
        compact_bits(v) as u32,
    ]
}

/// Key of the node with lower corner `(ix, iy, iz) * 2^(MAX_LEVEL - level)`.
pub fn code_from_box<K: SfcKey>(ix: u32, iy: u32, iz: u32, level: u32) -> K {
    debug_assert!(level <= K::MAX_LEVEL);

    let shift = K::MAX_LEVEL - level;
    encode::<K>(ix << shift, iy << shift, iz << shift)
}

/// Number of keys covered by a node of the given level.
pub fn node_range<K: SfcKey>(level: u32) -> K {
    debug_assert!(level <= K::MAX_LEVEL);

    K::from_u64(1 << (3 * (K::MAX_LEVEL - level)))
}

/// Level of a node that covers `range` keys. Inverse of [`node_range`].
pub fn tree_level<K: SfcKey>(range: K) -> u32 {
    debug_assert!(range.to_u64().is_power_of_two());
    debug_assert_eq!(range.to_u64().trailing_zeros() % 3, 0);

    K::MAX_LEVEL - range.to_u64().trailing_zeros() / 3
}

/// Number of leading identical bits of two keys, capped at `3 * MAX_LEVEL`.
pub fn common_prefix<K: SfcKey>(a: K, b: K) -> u32 {
    let diff = a.to_u64() ^ b.to_u64();
    if diff == 0 {
        3 * K::MAX_LEVEL
    } else {
        (diff.leading_zeros() - (64 - 3 * K::MAX_LEVEL)).min(3 * K::MAX_LEVEL)
    }
}

/// Octal digit of a key at the given level, i.e. the child index that the
/// containing level-`level` node has within its parent.
pub fn octal_digit<K: SfcKey>(key: K, level: u32) -> u32 {
    debug_assert!(level >= 1 && level <= K::MAX_LEVEL);

    ((key.to_u64() >> (3 * (K::MAX_LEVEL - level))) & 7) as u32
}

/// Zero out all but the first `prefix_len` payload bits of a key.
pub fn zero_low_bits<K: SfcKey>(key: K, prefix_len: u32) -> K {
    let kept = 3 * K::MAX_LEVEL - prefix_len;
    K::from_u64(key.to_u64() >> kept << kept)
}

/// Pad a bit pattern of `len` bits out with zeros to form a full key.
///
/// Handy to write down node keys by their octal path, e.g.
/// `pad::<u32>(0o004, 9)` is the third-level node `004` in octal notation.
pub fn pad<K: SfcKey>(prefix: u64, len: u32) -> K {
    K::from_u64(prefix << (3 * K::MAX_LEVEL - len))
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::prelude::*;

    #[test]
    fn pad_utility() {
        assert_eq!(pad::<u32>(0b011, 3), 0b011 << 27);
        assert_eq!(pad::<u64>(0b011, 3), 0b011 << 60);
    }

    #[test]
    fn encode_corners() {
        assert_eq!(encode::<u32>(0, 0, 0), 0);
        assert_eq!(encode::<u64>(0, 0, 0), 0);

        // The uppermost cell in each dimension maps to the last key.
        let m32 = (u32::max_coord() - 1) as u32;
        assert_eq!(encode::<u32>(m32, m32, m32), node_range::<u32>(0) - 1);

        let m64 = (u64::max_coord() - 1) as u32;
        assert_eq!(encode::<u64>(m64, m64, m64), node_range::<u64>(0) - 1);

        // x occupies the top bit of each triplet.
        assert_eq!(encode::<u32>(1, 0, 0), 0b100);
        assert_eq!(encode::<u32>(0, 1, 0), 0b010);
        assert_eq!(encode::<u32>(0, 0, 1), 0b001);
    }

    #[test]
    fn encode_decode_bijection() {
        let mut rng = StdRng::seed_from_u64(0);

        for _ in 0..1000 {
            let coords32: [u32; 3] = [
                rng.gen_range(0..1024),
                rng.gen_range(0..1024),
                rng.gen_range(0..1024),
            ];
            let key: u32 = encode(coords32[0], coords32[1], coords32[2]);
            assert_eq!(decode(key), coords32);

            let max = u64::max_coord() as u32;
            let coords64: [u32; 3] = [
                rng.gen_range(0..max),
                rng.gen_range(0..max),
                rng.gen_range(0..max),
            ];
            let key: u64 = encode(coords64[0], coords64[1], coords64[2]);
            assert_eq!(decode(key), coords64);
        }
    }

    #[test]
    fn node_range_and_level() {
        assert_eq!(node_range::<u32>(0), 1 << 30);
        assert_eq!(node_range::<u32>(10), 1);
        assert_eq!(node_range::<u64>(0), 1 << 63);
        assert_eq!(node_range::<u64>(21), 1);

        for level in 0..=u32::MAX_LEVEL {
            assert_eq!(tree_level(node_range::<u32>(level)), level);
        }
        for level in 0..=u64::MAX_LEVEL {
            assert_eq!(tree_level(node_range::<u64>(level)), level);
        }
    }

    #[test]
    fn common_prefix_basics() {
        assert_eq!(common_prefix(0u32, 0u32), 30);
        assert_eq!(common_prefix(0u64, 0u64), 63);

        // Keys differing in the top triplet share no bits.
        assert_eq!(common_prefix(0u32, pad::<u32>(0b100, 3)), 0);
        assert_eq!(common_prefix(0u32, pad::<u32>(0b010, 3)), 1);
        assert_eq!(common_prefix(0u32, pad::<u32>(0b001, 3)), 2);
        assert_eq!(common_prefix(0u64, pad::<u64>(0b001, 3)), 2);
    }

    #[test]
    fn octal_digits() {
        let key = pad::<u32>(0o1234, 12);
        assert_eq!(octal_digit(key, 1), 1);
        assert_eq!(octal_digit(key, 2), 2);
        assert_eq!(octal_digit(key, 3), 3);
        assert_eq!(octal_digit(key, 4), 4);
        assert_eq!(octal_digit(key, 5), 0);
    }

    #[test]
    fn code_from_box_matches_pad() {
        // lower corner of the (1,1,1) octant
        let half32 = 1u32 << (u32::MAX_LEVEL - 1);
        assert_eq!(
            code_from_box::<u32>(half32, half32, half32, u32::MAX_LEVEL),
            pad::<u32>(7, 3)
        );
        assert_eq!(code_from_box::<u32>(1, 1, 1, 1), pad::<u32>(7, 3));

        let half64 = 1u32 << (u64::MAX_LEVEL - 1);
        assert_eq!(
            code_from_box::<u64>(half64, half64, half64, u64::MAX_LEVEL),
            pad::<u64>(7, 3)
        );
    }

    #[test]
    fn zero_low_bits_truncates() {
        let key = pad::<u32>(0o1234, 12);
        assert_eq!(zero_low_bits(key, 6), pad::<u32>(0o12, 6));
        assert_eq!(zero_low_bits(key, 12), key);
    }
}

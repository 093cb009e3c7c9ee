//! Seeded structural hashing.
//!
//! Leaves are hashed with xxh3; composites fold their children's hashes with
//! `mix` and finish with `mash`, so equal trees hash equally regardless of how
//! they were built.

use std::hash::{Hash, Hasher};
use xxhash_rust::xxh3::{xxh3_64_with_seed, Xxh3};

pub(crate) const SEED: u64 = 0x5741_5250_5245_434f;

const PRIME_1: u64 = 0x9e37_79b1_85eb_ca87;
const PRIME_2: u64 = 0xc2b2_ae3d_27d4_eb4f;

/// Seeds for each kind of node so that, say, the text `"1"` and the number
/// `1` land in different buckets.
pub(crate) mod kind {
    pub const ABSENT: u64 = 0x01;
    pub const EXTANT: u64 = 0x02;
    pub const BOOL: u64 = 0x03;
    pub const NUM: u64 = 0x04;
    pub const TEXT: u64 = 0x05;
    pub const DATA: u64 = 0x06;
    pub const RECORD: u64 = 0x07;
    pub const EXPR: u64 = 0x08;
    pub const ATTR: u64 = 0x09;
    pub const SLOT: u64 = 0x0a;
}

pub(crate) fn mix(hash: u64, value: u64) -> u64 {
    let k = value.wrapping_mul(PRIME_2).rotate_left(31).wrapping_mul(PRIME_1);
    (hash ^ k).rotate_left(27).wrapping_mul(PRIME_1).wrapping_add(PRIME_2)
}

pub(crate) fn mash(hash: u64) -> u64 {
    let mut h = hash;
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^ (h >> 33)
}

pub(crate) fn bytes(kind: u64, data: &[u8]) -> u64 {
    xxh3_64_with_seed(data, SEED ^ kind)
}

/// Hashes anything with a derived `Hash` through a seeded xxh3 stream.
pub(crate) fn derived<T: Hash + ?Sized>(kind: u64, value: &T) -> u64 {
    let mut hasher = Xxh3::with_seed(SEED ^ kind);
    value.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_is_order_sensitive() {
        let a = mix(mix(SEED, 1), 2);
        let b = mix(mix(SEED, 2), 1);
        assert_ne!(mash(a), mash(b));
    }

    #[test]
    fn test_kind_separates_leaves() {
        assert_ne!(bytes(kind::TEXT, b"1"), bytes(kind::DATA, b"1"));
    }
}

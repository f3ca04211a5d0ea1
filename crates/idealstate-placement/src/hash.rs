//! Seed derivation for placement scoring.
//!
//! Every scoring pass starts a [`RandomSequence`](crate::RandomSequence) from
//! a 32-bit seed derived from the bucket. The derivations must be:
//! - Deterministic: same bucket and cluster state always give the same seed
//! - Identical on every node, whatever build it runs
//! - Cheap: computed for every placement query

use idealstate_core::{BucketId, ClusterState};

/// Parent hash used when hashing the root group.
pub const ROOT_GROUP_SEED: u32 = 0x8bad_f00d;

const GROUP_HASH_MULTIPLIER: u32 = 1_664_525;
const GROUP_HASH_INCREMENT: u32 = 1_013_904_223;

const DISK_SEED_MULTIPLIER: u32 = 1_664_525;
const DISK_SEED_INCREMENT: u32 = 0xdead_beef;

const GOLDEN_RATIO: u32 = 0x9e37_79b9;

/// Returns a mask of the `bits` lowest bits, for `bits` in `0..=32`.
#[inline]
#[must_use]
pub const fn distribution_bit_mask(bits: u32) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1 << bits) - 1
    }
}

/// Hash of a group given its parent's hash and its index among siblings.
#[inline]
#[must_use]
pub const fn group_hash(parent_hash: u32, index: u16) -> u32 {
    parent_hash
        ^ GROUP_HASH_MULTIPLIER.wrapping_mul(index as u32).wrapping_add(GROUP_HASH_INCREMENT)
}

#[inline]
fn bucket_seed(bucket: BucketId, state: &ClusterState) -> u32 {
    (bucket.raw_id() as u32) & distribution_bit_mask(state.distribution_bit_count())
}

/// Seed for scoring the children of a group.
#[inline]
#[must_use]
pub fn group_seed(bucket: BucketId, state: &ClusterState, distribution_hash: u32) -> u32 {
    bucket_seed(bucket, state) ^ distribution_hash
}

/// Seed for scoring distributor candidates inside a leaf group.
#[inline]
#[must_use]
pub fn distributor_seed(bucket: BucketId, state: &ClusterState) -> u32 {
    bucket_seed(bucket, state)
}

/// Seed for scoring storage candidates inside a leaf group.
///
/// Buckets using more than 33 bits fold their upper id bits into the seed so
/// that split buckets sharing the low bits still spread out.
#[must_use]
pub fn storage_seed(bucket: BucketId, state: &ClusterState) -> u32 {
    let mut seed = bucket_seed(bucket, state);
    let used_bits = bucket.used_bits();
    if used_bits > 33 {
        let high = (bucket.raw_id() >> 32) as u32;
        seed ^= (distribution_bit_mask(used_bits - 32) & high) << 6;
    }
    seed
}

/// Seed for picking a disk on a node.
#[must_use]
pub fn disk_seed(bucket: BucketId, node_index: u16) -> u32 {
    let initial = DISK_SEED_MULTIPLIER.wrapping_mul(u32::from(node_index)).wrapping_add(DISK_SEED_INCREMENT);
    lookup2(&bucket.id_without_count_bits().to_le_bytes(), initial)
}

/// Bob Jenkins' lookup2 hash of `key`, starting from `initial`.
#[must_use]
pub fn lookup2(key: &[u8], initial: u32) -> u32 {
    let mut a = GOLDEN_RATIO;
    let mut b = GOLDEN_RATIO;
    let mut c = initial;

    let mut chunks = key.chunks_exact(12);
    for chunk in &mut chunks {
        a = a.wrapping_add(le_word(&chunk[0..4]));
        b = b.wrapping_add(le_word(&chunk[4..8]));
        c = c.wrapping_add(le_word(&chunk[8..12]));
        mix(&mut a, &mut b, &mut c);
    }

    // The lowest byte of c is reserved for the length.
    c = c.wrapping_add(key.len() as u32);
    let tail = chunks.remainder();
    for (i, &byte) in tail.iter().enumerate() {
        let byte = u32::from(byte);
        match i {
            0..=3 => a = a.wrapping_add(byte << (8 * i)),
            4..=7 => b = b.wrapping_add(byte << (8 * (i - 4))),
            _ => c = c.wrapping_add(byte << (8 * (i - 7))),
        }
    }
    mix(&mut a, &mut b, &mut c);
    c
}

#[inline]
fn le_word(bytes: &[u8]) -> u32 {
    bytes.iter().rev().fold(0, |acc, &b| (acc << 8) | u32::from(b))
}

#[inline]
fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*b).wrapping_sub(*c) ^ (*c >> 13);
    *b = b.wrapping_sub(*c).wrapping_sub(*a) ^ (*a << 8);
    *c = c.wrapping_sub(*a).wrapping_sub(*b) ^ (*b >> 13);
    *a = a.wrapping_sub(*b).wrapping_sub(*c) ^ (*c >> 12);
    *b = b.wrapping_sub(*c).wrapping_sub(*a) ^ (*a << 16);
    *c = c.wrapping_sub(*a).wrapping_sub(*b) ^ (*b >> 5);
    *a = a.wrapping_sub(*b).wrapping_sub(*c) ^ (*c >> 3);
    *b = b.wrapping_sub(*c).wrapping_sub(*a) ^ (*a << 10);
    *c = c.wrapping_sub(*a).wrapping_sub(*b) ^ (*b >> 15);
}

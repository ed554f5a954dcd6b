// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Per-node fingerprints (spec §3.1, §3.2 invariant 4): a salted,
//! incrementally-maintained checksum distinct from the block-level
//! [`crate::checksum::Checksum`]. Where the block checksum detects bit
//! rot in the serialized bytes, the fingerprint detects a node being
//! silently swapped for a stale or unrelated one — e.g. a dangling
//! blocknum pointing at the wrong generation of a node after a split.
//!
//! XOR is used as the combining operator because it is its own
//! inverse: applying a pair's fingerprint contribution twice (once on
//! insert, again on delete) returns the node to its prior fingerprint
//! without needing a separate "subtract" path.

use crate::message::MessageKind;
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// A per-node or per-subtree fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// The fingerprint of an empty node or subtree.
    pub const ZERO: Self = Self(0);

    /// Returns the raw value, e.g. for storage in a serialized node header.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Wraps a raw value, e.g. one read back from a serialized node.
    #[must_use]
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// The contribution of a single `(kind, key, val)` pair under a
    /// node's salt (`rand4fingerprint`).
    #[must_use]
    pub fn of_pair(salt: u32, kind: MessageKind, key: &[u8], val: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(key.len() + val.len() + 1);
        buf.push(kind as u8);
        buf.extend_from_slice(key);
        buf.extend_from_slice(val);
        Self(xxh3_64_with_seed(&buf, u64::from(salt)))
    }

    /// XORs `other` into `self` in place — applying the same pair
    /// fingerprint twice cancels it back out, which is how leaf and
    /// nonleaf message application keep `local_fingerprint` correct
    /// incrementally (spec §4.2.1: "Each application updates
    /// `local_fingerprint`").
    pub fn toggle(&mut self, other: Self) {
        self.0 ^= other.0;
    }

    /// Combines two fingerprints (associative, commutative, own
    /// inverse). Used to fold a nonleaf's own fingerprint together
    /// with its children's recorded subtree fingerprints.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        Self(self.0 ^ other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_is_its_own_inverse() {
        let mut fp = Fingerprint::ZERO;
        let contribution = Fingerprint::of_pair(7, MessageKind::Insert, b"k", b"v");
        fp.toggle(contribution);
        assert_ne!(Fingerprint::ZERO, fp);
        fp.toggle(contribution);
        assert_eq!(Fingerprint::ZERO, fp);
    }

    #[test]
    fn combine_is_order_independent() {
        let a = Fingerprint::of_pair(1, MessageKind::Insert, b"a", b"1");
        let b = Fingerprint::of_pair(1, MessageKind::Insert, b"b", b"2");
        assert_eq!(a.combine(b), b.combine(a));
    }

    #[test]
    fn different_salts_diverge() {
        let a = Fingerprint::of_pair(1, MessageKind::Insert, b"k", b"v");
        let b = Fingerprint::of_pair(2, MessageKind::Insert, b"k", b"v");
        assert_ne!(a, b);
    }
}

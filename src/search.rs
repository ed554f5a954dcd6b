// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Node-local search helpers (spec §4.2.3) shared by point lookup,
//! cursor positioning, and the descent that precedes every put/delete:
//! locating which child of a nonleaf a key belongs under, and scanning
//! a leaf's packed array for the pair a given bound names.
//!
//! Everything here is pure and I/O-free, exactly like [`crate::node::put`]
//! and [`crate::node::split`] — the descent that walks from one node to
//! the next, holding cachetable pins and flushing buffers along the
//! way, is orchestrated in [`crate::brt`].

use crate::dbt::Comparator;
use crate::node::{LeafEntry, Pivot};
use crate::pma::Gpma;
use std::cmp::Ordering;

/// Index of the child that must contain `key` (spec §3.2 invariant 1:
/// `max(child[i]) <= pivot[i] < min(child[i+1])`): the first pivot
/// `>= key`, or `pivots.len()` if `key` exceeds every pivot.
pub(crate) fn locate_child(pivots: &Gpma<Pivot>, key: &[u8], cmp: &dyn Comparator) -> usize {
    for (rank, (_, pivot)) in pivots.iter().enumerate() {
        if cmp.compare(key, &pivot.key) != Ordering::Greater {
            return rank;
        }
    }
    pivots.len()
}

/// Which pair, relative to `(key, val)`, a leaf scan should return
/// (spec §4.2.3 and §6's cursor operation list).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Bound {
    /// The smallest pair in the tree.
    First,
    /// The largest pair in the tree.
    Last,
    /// The smallest pair strictly greater than `(key, val)`.
    NextAfter,
    /// The largest pair strictly less than `(key, val)`.
    PrevBefore,
    /// The pair whose key equals `key` exactly.
    SetExact,
    /// The smallest pair with key `>= key`.
    SetRangeFrom,
    /// The pair whose key and value both equal `(key, val)`.
    GetBoth,
    /// The smallest pair with the same key as `key` and a value `> val`.
    NextDup,
    /// The largest pair with the same key as `key` and a value `< val`.
    PrevDup,
}

fn compound_cmp(e: &LeafEntry, key: &[u8], val: &[u8], cmp: &dyn Comparator) -> Ordering {
    match cmp.compare(&e.key, key) {
        Ordering::Equal => cmp.compare(&e.val, val),
        other => other,
    }
}

/// Scans a leaf's live pairs (already in ascending sorted order via
/// [`Gpma::iter`]) for the one `bound` names.
///
/// A plain in-order scan rather than a bessel lookup: a cursor
/// positions at most once per call, so an O(n) walk over a single
/// leaf's pairs is not worth the extra direction bookkeeping a bessel
/// search would need here.
pub(crate) fn scan_leaf(
    pairs: &Gpma<LeafEntry>,
    bound: Bound,
    key: &[u8],
    val: &[u8],
    cmp: &dyn Comparator,
) -> Option<LeafEntry> {
    match bound {
        Bound::First => pairs.iter().next().map(|(_, e)| e.clone()),
        Bound::Last => pairs.iter().last().map(|(_, e)| e.clone()),
        Bound::NextAfter => pairs
            .iter()
            .find(|(_, e)| compound_cmp(e, key, val, cmp) == Ordering::Greater)
            .map(|(_, e)| e.clone()),
        Bound::PrevBefore => {
            let mut best = None;
            for (_, e) in pairs.iter() {
                if compound_cmp(e, key, val, cmp) == Ordering::Less {
                    best = Some(e.clone());
                } else {
                    break;
                }
            }
            best
        }
        Bound::SetExact => pairs
            .iter()
            .find(|(_, e)| cmp.compare(&e.key, key) == Ordering::Equal)
            .map(|(_, e)| e.clone()),
        Bound::SetRangeFrom => pairs
            .iter()
            .find(|(_, e)| cmp.compare(&e.key, key) != Ordering::Less)
            .map(|(_, e)| e.clone()),
        Bound::GetBoth => pairs
            .iter()
            .find(|(_, e)| cmp.compare(&e.key, key) == Ordering::Equal && cmp.compare(&e.val, val) == Ordering::Equal)
            .map(|(_, e)| e.clone()),
        Bound::NextDup => pairs
            .iter()
            .find(|(_, e)| cmp.compare(&e.key, key) == Ordering::Equal && cmp.compare(&e.val, val) == Ordering::Greater)
            .map(|(_, e)| e.clone()),
        Bound::PrevDup => {
            let mut best = None;
            for (_, e) in pairs.iter() {
                match cmp.compare(&e.key, key) {
                    Ordering::Less => {}
                    Ordering::Equal => {
                        if cmp.compare(&e.val, val) == Ordering::Less {
                            best = Some(e.clone());
                        }
                    }
                    Ordering::Greater => break,
                }
            }
            best
        }
    }
}

/// `true` if this bound only ever wants a pair from within the single
/// subtree that `key` (and, for `*Dup` bounds, `val`) descends into —
/// as opposed to [`Bound::NextAfter`]/[`Bound::PrevBefore`]/
/// [`Bound::SetRangeFrom`], which may have to continue into a sibling
/// subtree if the starting one has nothing past/before the target.
#[must_use]
pub(crate) fn stays_within_subtree(bound: Bound) -> bool {
    matches!(bound, Bound::SetExact | Bound::GetBoth | Bound::NextDup | Bound::PrevDup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbt::LexicographicComparator;
    use crate::node::Pivot;
    use crate::Slice;

    fn pivots(keys: &[&str]) -> Gpma<Pivot> {
        let mut g = Gpma::new();
        for k in keys {
            let key = Slice::from(*k);
            g.insert_bessel(Pivot { key: key.clone() }, |p| p.key.as_ref().cmp(key.as_ref()));
        }
        g
    }

    fn leaf(pairs: &[(&str, &str)]) -> Gpma<LeafEntry> {
        Gpma::from_sorted_vec(
            pairs
                .iter()
                .map(|(k, v)| LeafEntry { key: Slice::from(*k), val: Slice::from(*v) })
                .collect(),
        )
    }

    #[test]
    fn locate_child_picks_first_pivot_not_less_than_key() {
        let p = pivots(&["g", "m", "t"]);
        let cmp = LexicographicComparator;
        assert_eq!(0, locate_child(&p, b"a", &cmp));
        assert_eq!(1, locate_child(&p, b"h", &cmp));
        assert_eq!(1, locate_child(&p, b"m", &cmp));
        assert_eq!(3, locate_child(&p, b"z", &cmp));
    }

    #[test]
    fn scan_leaf_first_and_last() {
        let pairs = leaf(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let cmp = LexicographicComparator;
        assert_eq!(Slice::from("a"), scan_leaf(&pairs, Bound::First, b"", b"", &cmp).unwrap().key);
        assert_eq!(Slice::from("c"), scan_leaf(&pairs, Bound::Last, b"", b"", &cmp).unwrap().key);
    }

    #[test]
    fn scan_leaf_next_and_prev() {
        let pairs = leaf(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let cmp = LexicographicComparator;
        assert_eq!(Slice::from("b"), scan_leaf(&pairs, Bound::NextAfter, b"a", b"1", &cmp).unwrap().key);
        assert_eq!(Slice::from("b"), scan_leaf(&pairs, Bound::PrevBefore, b"c", b"3", &cmp).unwrap().key);
        assert!(scan_leaf(&pairs, Bound::NextAfter, b"c", b"3", &cmp).is_none());
        assert!(scan_leaf(&pairs, Bound::PrevBefore, b"a", b"1", &cmp).is_none());
    }

    #[test]
    fn scan_leaf_set_range_from_finds_ceiling() {
        let pairs = leaf(&[("a", "1"), ("c", "3")]);
        let cmp = LexicographicComparator;
        assert_eq!(Slice::from("c"), scan_leaf(&pairs, Bound::SetRangeFrom, b"b", b"", &cmp).unwrap().key);
    }

    #[test]
    fn scan_leaf_dup_bounds_stay_within_key() {
        let pairs = leaf(&[("k", "1"), ("k", "2"), ("k", "3")]);
        let cmp = LexicographicComparator;
        assert_eq!(Slice::from("2"), scan_leaf(&pairs, Bound::NextDup, b"k", b"1", &cmp).unwrap().val);
        assert_eq!(Slice::from("2"), scan_leaf(&pairs, Bound::PrevDup, b"k", b"3", &cmp).unwrap().val);
    }
}

// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Generalized Packed Memory Array (spec §4.3), grounded on
//! `original_source/newbrt/gpma.c`/`gpma.h`: a sorted sequence of
//! generic items held in an array with bounded density, leaving gaps
//! ("holes") so that nearby insertions and deletions usually only
//! shift a small local window instead of the whole array.
//!
//! The C original moves memory around in place and reports what moved
//! through a `renumber_callback`. This crate has no stable addresses
//! to invalidate, so instead every mutating operation returns the set
//! of `(old_index, new_index)` moves directly — a caller that keeps an
//! external index (e.g. an open cursor's last position) applies them
//! the same way it would have applied the callback.

mod density;

use std::cmp::Ordering;

pub use density::window_upper_bound;

/// Which zero-crossing of a bessel function a lookup should return
/// (spec §4.3, "bessel search").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BesselDirection {
    /// The leftmost item for which the bessel function is zero.
    Zero,
    /// The last item for which the bessel function is negative.
    Negative,
    /// The first item for which the bessel function is positive.
    Positive,
}

/// A record of where items moved to during a rebalance, in the order
/// the moves happened.
pub type Renumbering = Vec<(usize, usize)>;

const MIN_CAPACITY: usize = 8;

/// A sorted, gapped array of `T`.
///
/// Order is maintained by the caller's comparison closures, not by any
/// `Ord` bound on `T` — this mirrors the original's `compare`/`bessel`
/// function pointers, and lets the same structure back both the
/// `(key, value)`-ordered leaf basement and a plain pivot-ordered
/// nonleaf pivot table.
#[derive(Debug, Clone)]
pub struct Gpma<T> {
    slots: Vec<Option<T>>,
    n_entries: usize,
}

impl<T> Default for Gpma<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Gpma<T> {
    /// Creates an empty array. No backing storage is allocated until
    /// the first insertion.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            n_entries: 0,
        }
    }

    /// Builds an array directly from items already in ascending sorted
    /// order, spreading them evenly across a freshly sized backing
    /// array instead of inserting one at a time.
    ///
    /// Used by node deserialisation (spec §4.2.4): a serialized node
    /// only records live entries, not holes, so reloading it is a bulk
    /// load rather than a sequence of individual inserts.
    #[must_use]
    pub fn from_sorted_vec(items: Vec<T>) -> Self {
        if items.is_empty() {
            return Self::new();
        }

        let n_entries = items.len();
        let mut capacity = MIN_CAPACITY;
        while (n_entries as f64) > density::window_upper_bound(capacity, capacity) * capacity as f64 {
            capacity *= 2;
        }

        let mut slots: Vec<Option<T>> = (0..capacity).map(|_| None).collect();
        let k = items.len();
        for (j, value) in items.into_iter().enumerate() {
            let idx = (j * capacity) / k;
            slots[idx] = Some(value);
        }

        Self { slots, n_entries }
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.n_entries
    }

    /// `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.n_entries == 0
    }

    /// Size of the backing array, including holes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Borrows the item at a physical slot index, if any.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Mutably borrows the item at a physical slot index, if any.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Iterates occupied slots in ascending physical (= logical sorted)
    /// index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (i, v)))
    }

    /// Looks up an item by a bessel function: `besself(item)` should
    /// return `Ordering::Less` for items that sort before the target,
    /// `Greater` for items after, and `Equal` for a match.
    ///
    /// Returns `Ok((index, item))` per `direction`'s rule (spec §4.3),
    /// or `Err(insertion_index)` — the physical index a new matching
    /// item would be inserted at — when nothing satisfies it.
    pub fn lookup_bessel(
        &self,
        direction: BesselDirection,
        mut besself: impl FnMut(&T) -> Ordering,
    ) -> Result<(usize, &T), usize> {
        let mut last_negative = None;
        let mut first_positive = None;
        let mut leftmost_zero = None;

        for (i, v) in self.iter() {
            match besself(v) {
                Ordering::Less => last_negative = Some(i),
                Ordering::Greater => {
                    if first_positive.is_none() {
                        first_positive = Some(i);
                    }
                }
                Ordering::Equal => {
                    if leftmost_zero.is_none() {
                        leftmost_zero = Some(i);
                    }
                }
            }
        }

        match direction {
            BesselDirection::Zero => leftmost_zero
                .map(|i| (i, self.get(i).expect("index from iter is occupied")))
                .ok_or_else(|| first_positive.unwrap_or(self.slots.len())),
            BesselDirection::Negative => last_negative
                .map(|i| (i, self.get(i).expect("index from iter is occupied")))
                .ok_or(0),
            BesselDirection::Positive => first_positive
                .map(|i| (i, self.get(i).expect("index from iter is occupied")))
                .ok_or(self.slots.len()),
        }
    }

    /// Inserts a new item located by a bessel function.
    ///
    /// # Panics
    ///
    /// Panics if `besself` reports an existing item as equal to the
    /// one being inserted (spec §4.3: "requires nothing in the array
    /// already compares equal").
    pub fn insert_bessel(
        &mut self,
        value: T,
        mut besself: impl FnMut(&T) -> Ordering,
    ) -> (usize, Renumbering) {
        if self.slots.is_empty() {
            self.slots.resize_with(MIN_CAPACITY, || None);
        }

        let mut last_negative = None;
        let mut first_positive = None;
        for (i, v) in self.iter() {
            match besself(v) {
                Ordering::Less => last_negative = Some(i),
                Ordering::Greater => {
                    if first_positive.is_none() {
                        first_positive = Some(i);
                    }
                }
                Ordering::Equal => panic!("insert_bessel: item already present"),
            }
        }

        let lower = last_negative.map_or(0, |i| i + 1);
        let upper = first_positive.unwrap_or(self.slots.len());
        self.insert_between(lower, upper, value)
    }

    /// Inserts a value known to belong strictly between physical slots
    /// `lower` (inclusive) and `upper` (exclusive), rebalancing the
    /// smallest enclosing window whose resulting density stays within
    /// bounds, or the whole array (growing it) if even that overflows.
    fn insert_between(&mut self, lower: usize, upper: usize, value: T) -> (usize, Renumbering) {
        if let Some(hole) = (lower..upper).find(|&i| self.slots[i].is_none()) {
            self.slots[hole] = Some(value);
            self.n_entries += 1;
            return (hole, self.rebalance_around(hole));
        }

        let anchor = lower.midpoint(upper).min(self.slots.len().saturating_sub(1));
        let mut window = density::smallest_window(anchor, self.slots.len());
        loop {
            let (start, end) = window;
            let occupied_in_window = self.slots[start..end].iter().filter(|s| s.is_some()).count();
            let bound = density::window_upper_bound(end - start, self.slots.len());
            if (occupied_in_window + 1) as f64 <= bound * (end - start) as f64 {
                let local_rank = self.slots[start..anchor.max(start)]
                    .iter()
                    .filter(|s| s.is_some())
                    .count();
                return self.redistribute_window(start, end, Some((local_rank, value)));
            }
            if start == 0 && end == self.slots.len() {
                let new_cap = (self.slots.len() * 2).max(MIN_CAPACITY);
                let rank = self.slots[..lower.min(self.slots.len())]
                    .iter()
                    .filter(|s| s.is_some())
                    .count();
                return self.resize_and_splice(new_cap, rank, value);
            }
            window = density::widen_window(window, self.slots.len());
        }
    }

    /// Resizes the backing array to `new_cap`, evenly respreading the
    /// existing items together with one freshly spliced-in `value` at
    /// logical rank `rank`. Used when even the whole array is too
    /// dense to absorb an insertion.
    fn resize_and_splice(&mut self, new_cap: usize, rank: usize, value: T) -> (usize, Renumbering) {
        let mut items: Vec<(usize, T)> = self
            .slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.take().map(|v| (i, v)))
            .collect();
        items.insert(rank, (usize::MAX, value));
        self.n_entries += 1;

        self.slots = (0..new_cap).map(|_| None).collect();
        let k = items.len();
        let mut moves = Renumbering::new();
        let mut spliced_at = usize::MAX;
        for (j, (old_idx, v)) in items.into_iter().enumerate() {
            let new_idx = (j * new_cap) / k;
            if old_idx == usize::MAX {
                spliced_at = new_idx;
            } else if old_idx != new_idx {
                moves.push((old_idx, new_idx));
            }
            self.slots[new_idx] = Some(v);
        }
        (spliced_at, moves)
    }

    /// Spreads the occupied items of `[start, end)` evenly across that
    /// same range, optionally splicing in one new `(local_rank, value)`
    /// pair first. Returns the physical index the spliced value landed
    /// at (or `usize::MAX` if none was spliced) together with every
    /// move that happened.
    fn redistribute_window(
        &mut self,
        start: usize,
        end: usize,
        splice: Option<(usize, T)>,
    ) -> (usize, Renumbering) {
        let mut items: Vec<(usize, T)> = self.slots[start..end]
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.take().map(|v| (start + i, v)))
            .collect();

        let mut spliced_at = usize::MAX;
        if let Some((rank, value)) = splice {
            items.insert(rank, (usize::MAX, value));
            self.n_entries += 1;
        }

        let k = items.len();
        let w = end - start;
        let mut moves = Renumbering::new();

        for (j, (old_idx, value)) in items.into_iter().enumerate() {
            let new_idx = start + (j * w) / k.max(1);
            if old_idx == usize::MAX {
                spliced_at = new_idx;
            } else if old_idx != new_idx {
                moves.push((old_idx, new_idx));
            }
            self.slots[new_idx] = Some(value);
        }

        (spliced_at, moves)
    }

    /// Checks the density of the smallest window around a just-touched
    /// physical index and redistributes the smallest enclosing window
    /// that is back within bounds, or grows/shrinks the whole array if
    /// even that isn't enough (used after a direct hole fill, which
    /// skips the window search an overflow insert would otherwise do,
    /// and after every delete).
    fn rebalance_around(&mut self, index: usize) -> Renumbering {
        let (s0, e0) = density::smallest_window(index, self.slots.len());
        if self.window_density_ok(s0, e0) {
            return Renumbering::new();
        }

        let mut window = (s0, e0);
        loop {
            let (start, end) = window;
            let full = start == 0 && end == self.slots.len();
            if self.window_density_ok(start, end) {
                if full {
                    return Renumbering::new();
                }
                let (_, moves) = self.redistribute_window(start, end, None);
                return moves;
            }
            if full {
                let occupied = self.slots.iter().filter(|s| s.is_some()).count();
                let upper = density::window_upper_bound(end - start, self.slots.len());
                if occupied as f64 > upper * (end - start) as f64 {
                    self.grow();
                } else {
                    self.shrink();
                }
                return Renumbering::new();
            }
            window = density::widen_window(window, self.slots.len());
        }
    }

    fn window_density_ok(&self, start: usize, end: usize) -> bool {
        let occupied = self.slots[start..end].iter().filter(|s| s.is_some()).count();
        let upper = density::window_upper_bound(end - start, self.slots.len());
        let lower = density::window_lower_bound(end - start, self.slots.len());
        let density = occupied as f64 / (end - start) as f64;
        let full = start == 0 && end == self.slots.len();
        density <= upper && (density >= lower || full)
    }

    fn grow(&mut self) {
        let new_cap = (self.slots.len() * 2).max(MIN_CAPACITY);
        self.resize_to(new_cap);
    }

    fn shrink(&mut self) {
        let new_cap = (self.slots.len() / 2).max(MIN_CAPACITY);
        if new_cap < self.slots.len() {
            self.resize_to(new_cap);
        }
    }

    fn resize_to(&mut self, new_cap: usize) {
        let items: Vec<T> = self.slots.iter_mut().filter_map(Option::take).collect();
        let k = items.len();
        self.slots = (0..new_cap).map(|_| None).collect();
        for (j, value) in items.into_iter().enumerate() {
            let idx = if k == 0 { 0 } else { (j * new_cap) / k };
            self.slots[idx] = Some(value);
        }
    }

    /// Removes the item at a physical slot index, rebalancing (and
    /// possibly shrinking) the surrounding window.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range or the slot is already empty.
    pub fn delete_at(&mut self, index: usize) -> (T, Renumbering) {
        let value = self.slots[index].take().expect("delete_at: slot is empty");
        self.n_entries -= 1;
        let moves = self.rebalance_around(index);
        (value, moves)
    }

    /// Removes every item for which `besself` returns `Ordering::Equal`.
    /// `besself` must be monotone with respect to sort order (spec
    /// §4.3: all `Less` results precede all `Equal` results, which
    /// precede all `Greater` results).
    pub fn delete_bessel(&mut self, mut besself: impl FnMut(&T) -> Ordering) -> (Vec<T>, Renumbering) {
        let matches: Vec<usize> = self
            .iter()
            .filter(|(_, v)| besself(v) == Ordering::Equal)
            .map(|(i, _)| i)
            .collect();

        let mut removed = Vec::with_capacity(matches.len());
        let mut moves = Renumbering::new();
        for idx in matches {
            let (value, mut m) = self.delete_at(idx);
            removed.push(value);
            moves.append(&mut m);
        }
        (removed, moves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn besself_for(target: i32) -> impl FnMut(&i32) -> Ordering {
        move |v: &i32| v.cmp(&target)
    }

    #[test]
    fn insert_then_lookup_roundtrips() {
        let mut pma = Gpma::new();
        for v in [5, 1, 9, 3, 7, 2, 8, 4, 6] {
            pma.insert_bessel(v, besself_for(v));
        }
        assert_eq!(9, pma.len());

        let mut sorted: Vec<i32> = pma.iter().map(|(_, v)| *v).collect();
        sorted.sort_unstable();
        assert_eq!(vec![1, 2, 3, 4, 5, 6, 7, 8, 9], sorted);

        let (_, v) = pma.lookup_bessel(BesselDirection::Zero, besself_for(5)).unwrap();
        assert_eq!(5, *v);
    }

    #[test]
    fn lookup_directions_match_spec_semantics() {
        let mut pma = Gpma::new();
        for v in [10, 20, 30, 40] {
            pma.insert_bessel(v, besself_for(v));
        }

        let cmp = |target: i32| move |v: &i32| v.cmp(&target);

        // Negative direction: last item less than 25 is 20.
        let (_, v) = pma.lookup_bessel(BesselDirection::Negative, cmp(25)).unwrap();
        assert_eq!(20, *v);

        // Positive direction: first item greater than 25 is 30.
        let (_, v) = pma.lookup_bessel(BesselDirection::Positive, cmp(25)).unwrap();
        assert_eq!(30, *v);

        // Zero direction with no match reports an insertion point.
        let err = pma.lookup_bessel(BesselDirection::Zero, cmp(25)).unwrap_err();
        let (_, v) = pma.lookup_bessel(BesselDirection::Positive, cmp(25)).unwrap();
        assert_eq!(Some(v), pma.get(err));
    }

    #[test]
    fn delete_bessel_removes_matches_and_keeps_order() {
        let mut pma = Gpma::new();
        for v in 0..50 {
            pma.insert_bessel(v, besself_for(v));
        }
        let (removed, _) = pma.delete_bessel(|v| v.cmp(&25));
        assert_eq!(vec![25], removed);
        assert_eq!(49, pma.len());

        let mut sorted: Vec<i32> = pma.iter().map(|(_, v)| *v).collect();
        sorted.sort_unstable();
        let expected: Vec<i32> = (0..50).filter(|&v| v != 25).collect();
        assert_eq!(expected, sorted);
    }

    #[test]
    fn many_insertions_trigger_growth_without_losing_items() {
        let mut pma = Gpma::new();
        for v in 0..500 {
            pma.insert_bessel(v, besself_for(v));
        }
        assert_eq!(500, pma.len());
        assert!(pma.capacity() >= 500);

        let mut sorted: Vec<i32> = pma.iter().map(|(_, v)| *v).collect();
        sorted.sort_unstable();
        let expected: Vec<i32> = (0..500).collect();
        assert_eq!(expected, sorted);
    }

    #[test]
    fn deleting_most_items_shrinks_capacity() {
        let mut pma = Gpma::new();
        for v in 0..200 {
            pma.insert_bessel(v, besself_for(v));
        }
        let cap_full = pma.capacity();
        for v in 0..190 {
            let (idx, _) = pma.lookup_bessel(BesselDirection::Zero, besself_for(v)).unwrap();
            pma.delete_at(idx);
        }
        assert_eq!(10, pma.len());
        assert!(pma.capacity() < cap_full);
    }

    #[test]
    fn from_sorted_vec_preserves_order_and_is_searchable() {
        let items: Vec<i32> = (0..100).collect();
        let pma = Gpma::from_sorted_vec(items.clone());
        assert_eq!(100, pma.len());

        let collected: Vec<i32> = pma.iter().map(|(_, v)| *v).collect();
        assert_eq!(items, collected);

        let (_, v) = pma.lookup_bessel(BesselDirection::Zero, besself_for(42)).unwrap();
        assert_eq!(42, *v);
    }

    #[test]
    fn from_sorted_vec_of_empty_input_is_empty() {
        let pma: Gpma<i32> = Gpma::from_sorted_vec(Vec::new());
        assert!(pma.is_empty());
    }
}

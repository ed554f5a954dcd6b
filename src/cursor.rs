// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Cursors (spec §4.2.3, §6): a pointer into a tree with an
//! independent view, positioned by [`Bound`]-driven descents run
//! through [`crate::brt::Brt::locked_search`].
//!
//! The source keeps a cursor linked into its leaf's cursor list so a
//! mutation that moves the leaf can invalidate every cursor pointing
//! into it (spec §3.2 invariant 6). This crate has no such intrusive
//! link: every cursor operation re-descends from the root rather than
//! caching a pinned leaf, so there is nothing to invalidate — the
//! remembered `(key, val)` below is only ever used as a comparison
//! bound for the next descent, never dereferenced directly.

use crate::brt::Brt;
use crate::error::CursorError;
use crate::node::LeafEntry;
use crate::search::Bound;
use crate::{Result, Slice};

/// The operation a [`Cursor::get`] call names (spec §6,
/// `cursor_get(cursor, key, val, op, txn)`).
///
/// Mirrors [`Bound`] one-to-one; kept as a separate, `pub` enum so the
/// crate's external cursor API doesn't leak the internal search
/// module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOp {
    /// Leftmost live pair in the tree.
    First,
    /// Rightmost live pair in the tree.
    Last,
    /// Next pair strictly greater than the cursor's current position.
    Next,
    /// Previous pair strictly less than the cursor's current position.
    Prev,
    /// Exact key match.
    Set,
    /// Smallest key `>=` the given key.
    SetRange,
    /// Exact `(key, val)` match, required when duplicates are allowed.
    GetBoth,
    /// Next pair sharing the current key.
    NextDup,
    /// Previous pair sharing the current key.
    PrevDup,
}

impl From<CursorOp> for Bound {
    fn from(op: CursorOp) -> Self {
        match op {
            CursorOp::First => Self::First,
            CursorOp::Last => Self::Last,
            CursorOp::Next => Self::NextAfter,
            CursorOp::Prev => Self::PrevBefore,
            CursorOp::Set => Self::SetExact,
            CursorOp::SetRange => Self::SetRangeFrom,
            CursorOp::GetBoth => Self::GetBoth,
            CursorOp::NextDup => Self::NextDup,
            CursorOp::PrevDup => Self::PrevDup,
        }
    }
}

/// A cursor into one sub-database (spec §3.1, "Cursor"; spec §6,
/// `brt_cursor`).
///
/// Owned by the [`Brt`] handle it was opened from in spirit only:
/// this crate doesn't track a live set of open cursors per handle
/// (closing a `Brt` simply leaves any outstanding cursors able to keep
/// reading/writing through their cloned handle), since nothing in
/// SPEC_FULL.md requires enforcing close-order across the two.
pub struct Cursor {
    brt: Brt,
    /// The last pair this cursor found, used as the comparison bound
    /// for a subsequent `Next`/`Prev`/`NextDup`/`PrevDup`. `None`
    /// before the first successful positioning call.
    position: Option<(Slice, Slice)>,
    /// Set by [`Cursor::delete`]; cleared by the next successful
    /// positioning call. Lets [`Cursor::current`] report `KEYEMPTY`
    /// (spec §4.2.3) instead of silently returning stale data.
    slot_emptied: bool,
}

impl Cursor {
    pub(crate) fn new(brt: Brt) -> Self {
        Self { brt, position: None, slot_emptied: false }
    }

    /// Positions the cursor per `op` (spec §6, `cursor_get`) and
    /// returns the pair found.
    ///
    /// `key`/`val` are the comparison arguments `op` needs ([`CursorOp::First`]
    /// and [`CursorOp::Last`] ignore both; [`CursorOp::Next`],
    /// [`CursorOp::Prev`], [`CursorOp::NextDup`], [`CursorOp::PrevDup`]
    /// use the cursor's remembered position instead when `key`/`val`
    /// are empty).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Cursor`] wrapping [`CursorError::NotFound`]
    /// if no pair matches.
    pub fn get(&mut self, op: CursorOp, key: impl AsRef<[u8]>, val: impl AsRef<[u8]>) -> Result<(Slice, Slice)> {
        let (key, val) = self.resolve_bound_args(op, key.as_ref(), val.as_ref())?;
        self.locate(op.into(), &key, &val)
    }

    /// Leftmost live pair in the tree (spec §4.2.3, `FIRST`).
    pub fn first(&mut self) -> Result<(Slice, Slice)> {
        self.locate(Bound::First, &[], &[])
    }

    /// Rightmost live pair in the tree (spec §4.2.3, `LAST`).
    pub fn last(&mut self) -> Result<(Slice, Slice)> {
        self.locate(Bound::Last, &[], &[])
    }

    /// Next pair strictly greater than the cursor's current position
    /// (spec §4.2.3, `NEXT`).
    ///
    /// # Errors
    ///
    /// [`CursorError::NotFound`] if the cursor isn't yet positioned, or
    /// if the current position is already the last pair in the tree.
    pub fn next(&mut self) -> Result<(Slice, Slice)> {
        let (key, val) = self.require_position()?;
        self.locate(Bound::NextAfter, &key, &val)
    }

    /// Previous pair strictly less than the cursor's current position
    /// (spec §4.2.3, `PREV`).
    pub fn prev(&mut self) -> Result<(Slice, Slice)> {
        let (key, val) = self.require_position()?;
        self.locate(Bound::PrevBefore, &key, &val)
    }

    /// Exact key match (spec §4.2.3, `SET`).
    pub fn set(&mut self, key: impl AsRef<[u8]>) -> Result<(Slice, Slice)> {
        self.locate(Bound::SetExact, key.as_ref(), &[])
    }

    /// Smallest key `>=` `key` (spec §4.2.3, `SET_RANGE`).
    pub fn set_range(&mut self, key: impl AsRef<[u8]>) -> Result<(Slice, Slice)> {
        self.locate(Bound::SetRangeFrom, key.as_ref(), &[])
    }

    /// Exact `(key, val)` match (spec §4.2.3, `GET_BOTH`).
    pub fn get_both(&mut self, key: impl AsRef<[u8]>, val: impl AsRef<[u8]>) -> Result<(Slice, Slice)> {
        self.locate(Bound::GetBoth, key.as_ref(), val.as_ref())
    }

    /// Next pair with the same key as the cursor's current position
    /// (spec §4.2.3, `NEXT_DUP`).
    pub fn next_dup(&mut self) -> Result<(Slice, Slice)> {
        let (key, val) = self.require_position()?;
        self.locate(Bound::NextDup, &key, &val)
    }

    /// Previous pair with the same key as the cursor's current
    /// position (spec §4.2.3, `PREV_DUP`).
    pub fn prev_dup(&mut self) -> Result<(Slice, Slice)> {
        let (key, val) = self.require_position()?;
        self.locate(Bound::PrevDup, &key, &val)
    }

    /// Deletes the pair the cursor currently sits on (spec §4.2.3,
    /// `DELETE (under cursor)`). Leaves the cursor positioned at the
    /// now-empty slot, so a following [`Cursor::next`] returns the
    /// deleted pair's successor (spec Testable Property 7) — the
    /// remembered key/val isn't cleared, only flagged emptied.
    ///
    /// # Errors
    ///
    /// [`CursorError::NotFound`] if the cursor isn't positioned, or if
    /// the pair it's positioned on was already removed by another
    /// operation since.
    pub fn delete(&mut self) -> Result<()> {
        let (key, val) = self.require_position()?;
        self.brt.cursor_delete(&key, &val)?;
        self.slot_emptied = true;
        Ok(())
    }

    /// Reports the cursor's current position without moving it.
    ///
    /// # Errors
    ///
    /// [`CursorError::NotFound`] if never positioned;
    /// [`CursorError::KeyEmpty`] if positioned but the last
    /// [`Cursor::delete`] emptied this slot (spec §4.2.3, `KEYEMPTY`).
    pub fn current(&self) -> Result<(Slice, Slice)> {
        if self.slot_emptied {
            return Err(CursorError::KeyEmpty.into());
        }
        self.position.clone().ok_or_else(|| CursorError::NotFound.into())
    }

    /// Closes the cursor (spec §6, `cursor_close`). A no-op beyond
    /// dropping `self`: see the struct doc for why there's no cursor
    /// set to unlink from.
    pub fn close(self) {}

    fn require_position(&self) -> Result<(Slice, Slice)> {
        self.position.clone().ok_or_else(|| CursorError::NotFound.into())
    }

    fn resolve_bound_args(&self, op: CursorOp, key: &[u8], val: &[u8]) -> Result<(Slice, Slice)> {
        match op {
            CursorOp::Next | CursorOp::Prev | CursorOp::NextDup | CursorOp::PrevDup if key.is_empty() && val.is_empty() => {
                self.require_position()
            }
            _ => Ok((Slice::from(key), Slice::from(val))),
        }
    }

    fn locate(&mut self, bound: Bound, key: &[u8], val: &[u8]) -> Result<(Slice, Slice)> {
        let found: Option<LeafEntry> = self.brt.locked_search(bound, key, val)?;
        match found {
            Some(entry) => {
                self.position = Some((entry.key.clone(), entry.val.clone()));
                self.slot_emptied = false;
                Ok((entry.key, entry.val))
            }
            None => Err(CursorError::NotFound.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Config, DuplicatePolicy};

    fn tiny_tree(dir: &tempfile::TempDir) -> Brt {
        Config::new(dir.path().join("cursor.brt")).nodesize(4096).cachesize(8).open().unwrap()
    }

    #[test]
    fn scenario_a_ordered_walk() {
        let dir = tempfile::tempdir().unwrap();
        let brt = tiny_tree(&dir);
        for i in 0..10 {
            brt.insert(format!("{i:04}"), format!("v{i}"), 0).unwrap();
        }

        let mut cursor = brt.cursor().unwrap();
        let (k, v) = cursor.first().unwrap();
        assert_eq!((Slice::from("0000"), Slice::from("v0")), (k, v));

        for i in 1..10 {
            let (k, v) = cursor.next().unwrap();
            assert_eq!((Slice::from(format!("{i:04}")), Slice::from(format!("v{i}"))), (k, v));
        }
        assert!(cursor.next().is_err());
    }

    #[test]
    fn scenario_c_delete_then_cursor_first() {
        let dir = tempfile::tempdir().unwrap();
        let brt = tiny_tree(&dir);
        for i in 0..1000u32 {
            brt.insert(i.to_be_bytes(), i.to_be_bytes(), 0).unwrap();
        }
        for i in 0..999u32 {
            brt.delete(i.to_be_bytes(), 0).unwrap();
        }

        let mut cursor = brt.cursor().unwrap();
        let (k, _) = cursor.first().unwrap();
        assert_eq!(999u32.to_be_bytes().to_vec(), k.as_ref());
    }

    #[test]
    fn scenario_c_reverse_walk_from_last_down_to_first() {
        let dir = tempfile::tempdir().unwrap();
        let brt = tiny_tree(&dir);
        for i in 0..1000u32 {
            brt.insert(i.to_be_bytes(), i.to_be_bytes(), 0).unwrap();
        }

        let mut cursor = brt.cursor().unwrap();
        let (k, v) = cursor.last().unwrap();
        assert_eq!((999u32.to_be_bytes().to_vec(), 999u32.to_be_bytes().to_vec()), (k.as_ref().to_vec(), v.as_ref().to_vec()));

        for i in (0..999u32).rev() {
            let (k, v) = cursor.prev().unwrap();
            assert_eq!(
                (i.to_be_bytes().to_vec(), i.to_be_bytes().to_vec()),
                (k.as_ref().to_vec(), v.as_ref().to_vec()),
                "expected key {i} walking backwards from the last pair"
            );
        }
        assert!(cursor.prev().is_err());
    }

    #[test]
    fn cursor_delete_leaves_next_pointing_at_successor() {
        let dir = tempfile::tempdir().unwrap();
        let brt = tiny_tree(&dir);
        brt.insert(b"a", b"1", 0).unwrap();
        brt.insert(b"b", b"2", 0).unwrap();
        brt.insert(b"c", b"3", 0).unwrap();

        let mut cursor = brt.cursor().unwrap();
        cursor.set(b"b").unwrap();
        cursor.delete().unwrap();
        assert_eq!(Err(CursorError::KeyEmpty), cursor.current().map_err(|e| match e {
            crate::Error::Cursor(c) => c,
            _ => unreachable!(),
        }));

        let (k, v) = cursor.next().unwrap();
        assert_eq!((Slice::from("c"), Slice::from("3")), (k, v));
    }

    #[test]
    fn sorted_duplicates_next_dup_and_prev_dup() {
        let dir = tempfile::tempdir().unwrap();
        let brt = Config::new(dir.path().join("dup.brt"))
            .nodesize(4096)
            .duplicate_policy(DuplicatePolicy::SortedDuplicates)
            .open()
            .unwrap();
        brt.insert(b"k", b"1", 0).unwrap();
        brt.insert(b"k", b"2", 0).unwrap();
        brt.insert(b"k", b"3", 0).unwrap();

        let mut cursor = brt.cursor().unwrap();
        cursor.set(b"k").unwrap();
        let (_, v) = cursor.next_dup().unwrap();
        assert_eq!(Slice::from("2"), v);
        let (_, v) = cursor.prev_dup().unwrap();
        assert_eq!(Slice::from("1"), v);
    }

    #[test]
    fn get_both_requires_exact_value_match() {
        let dir = tempfile::tempdir().unwrap();
        let brt = Config::new(dir.path().join("getboth.brt"))
            .nodesize(4096)
            .duplicate_policy(DuplicatePolicy::SortedDuplicates)
            .open()
            .unwrap();
        brt.insert(b"k", b"1", 0).unwrap();
        brt.insert(b"k", b"2", 0).unwrap();

        let mut cursor = brt.cursor().unwrap();
        assert!(cursor.get_both(b"k", b"2").is_ok());
        assert!(cursor.get_both(b"k", b"9").is_err());
    }
}

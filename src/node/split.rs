// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Node and buffer splitting (spec §4.2.2).
//!
//! Splitting a single node (leaf or nonleaf) in half is node-local and
//! lives here. Everything that needs more than one node at a time —
//! choosing the heaviest child, deciding whether to cascade into a
//! grandchild, replacing a parent's pointer after a root split — is
//! orchestrated in [`crate::brt`], which alone holds the cachetable
//! pins to reach more than one node safely.

use super::{BlockNum, ChildSlot, LeafEntry, Node, NodeBody, Pivot};
use crate::dbt::{Comparator, Dbt};
use crate::fingerprint::Fingerprint;
use crate::message::{Message, MessageKind};
use crate::pma::Gpma;

/// Default fan-out bound (spec §3.1: "implementation-defined, e.g.
/// 16"): the most children a nonleaf may hold before
/// [`Node::overflows_with_fanout`](super::Node::overflows_with_fanout)
/// forces a split regardless of serialized size.
/// [`crate::config::Config::fanout`] overrides it.
pub const DEFAULT_FANOUT: usize = 16;

/// What to do with a 2-child nonleaf that must split but whose halves
/// would each be left with a single child, violating the `n_children
/// >= 2` invariant (spec §9, "fan-out bound" open question).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutPolicy {
    /// Leave the node oversized rather than produce an invalid split;
    /// it grows past `nodesize` until a third child arrives and a
    /// regular split becomes possible.
    GrowBeyondNodesize,
    /// Splice the node out of the tree, promoting its two children to
    /// take its place directly under its own parent.
    PromoteChildren,
}

fn pair_fingerprint(salt: u32, key: &[u8], val: &[u8]) -> Fingerprint {
    Fingerprint::of_pair(salt, MessageKind::Insert, key, val)
}

/// The new right-hand sibling produced by a split, together with the
/// pivot key that now separates it from the original (left) node.
pub struct SplitResult {
    /// The freshly allocated right-hand node.
    pub right: Node,
    /// Separator key: every key on the left is `<= pivot`, every key
    /// on the right is `> pivot`.
    pub pivot: Dbt,
}

/// Splits an overflowing leaf (spec §4.2.2, "Leaf split"): each side
/// ends up at least half full, the original blocknum stays with the
/// left side "for log-friendly recovery", and the returned pivot is
/// the greatest key now on the left.
///
/// # Panics
///
/// Panics if `node` is not a leaf or holds fewer than two entries
/// (nothing meaningful to split).
pub fn split_leaf(node: &mut Node, new_blocknum: BlockNum) -> SplitResult {
    let NodeBody::Leaf(pairs) = &node.body else {
        panic!("split_leaf called on a nonleaf");
    };

    let entries: Vec<LeafEntry> = pairs.iter().map(|(_, e)| e.clone()).collect();
    assert!(entries.len() >= 2, "cannot split a leaf with fewer than two entries");

    let mid = entries.len() / 2;
    let (left_entries, right_entries) = entries.split_at(mid);
    let pivot = left_entries
        .last()
        .expect("mid >= 1 since entries.len() >= 2")
        .key
        .clone();

    let salt = node.rand4fingerprint;
    let left_fp = left_entries
        .iter()
        .fold(Fingerprint::ZERO, |fp, e| fp.combine(pair_fingerprint(salt, &e.key, &e.val)));
    let right_fp = right_entries
        .iter()
        .fold(Fingerprint::ZERO, |fp, e| fp.combine(pair_fingerprint(salt, &e.key, &e.val)));

    node.body = NodeBody::Leaf(Gpma::from_sorted_vec(left_entries.to_vec()));
    node.local_fingerprint = left_fp;
    node.dirty = true;

    let mut right = Node::new_leaf(new_blocknum, node.nodesize, node.flags, node.rand4fingerprint);
    right.body = NodeBody::Leaf(Gpma::from_sorted_vec(right_entries.to_vec()));
    right.local_fingerprint = right_fp;

    SplitResult { right, pivot }
}

/// Outcome of attempting to split a nonleaf (spec §4.2.2, "Nonleaf
/// split", and §9's fan-out edge case).
pub enum NonleafSplitOutcome {
    /// A regular structural split.
    Split(SplitResult),
    /// The node had exactly two children; per [`FanoutPolicy`], it was
    /// left as-is (oversized) rather than split.
    DeferredOverflow,
    /// The node had exactly two children; per [`FanoutPolicy`], both
    /// should be promoted in its place. Carries the two children
    /// (with their buffers already flushed empty by the caller) and
    /// the pivot that separated them.
    Promote {
        /// The node's original two children, left to right.
        children: [ChildSlot; 2],
        /// The single pivot that separated them.
        pivot: Dbt,
    },
}

/// Splits an overflowing nonleaf at child index `floor(n/2)` (spec
/// §4.2.2, "Nonleaf split"): the pivot separating the two halves is
/// promoted to the parent, and every child keeps its buffer untouched
/// (buffers belong to children, not to the split boundary).
///
/// # Panics
///
/// Panics if `node` is a leaf or has fewer than two children.
pub fn split_nonleaf(node: &mut Node, new_blocknum: BlockNum, policy: FanoutPolicy) -> NonleafSplitOutcome {
    let NodeBody::Nonleaf { pivots, children } = &mut node.body else {
        panic!("split_nonleaf called on a leaf");
    };

    let n = children.len();
    assert!(n >= 2, "a nonleaf always has at least two children");

    if n == 2 {
        return match policy {
            FanoutPolicy::GrowBeyondNodesize => NonleafSplitOutcome::DeferredOverflow,
            FanoutPolicy::PromoteChildren => {
                let pivot = pivots
                    .iter()
                    .next()
                    .map(|(_, p)| p.key.clone())
                    .expect("a 2-child nonleaf has exactly one pivot");
                let taken: Vec<ChildSlot> = children.drain(..).collect();
                let [left, right]: [ChildSlot; 2] =
                    taken.try_into().unwrap_or_else(|_| panic!("exactly two children"));
                NonleafSplitOutcome::Promote { children: [left, right], pivot }
            }
        };
    }

    let mid = n / 2;
    let all_pivots: Vec<Pivot> = pivots.iter().map(|(_, p)| p.clone()).collect();
    let all_children: Vec<ChildSlot> = children.drain(..).collect();

    let promoted_pivot = all_pivots[mid - 1].key.clone();

    let left_pivots = all_pivots[..mid - 1].to_vec();
    let right_pivots = all_pivots[mid..].to_vec();
    let (left_children, right_children) = {
        let mut all = all_children;
        let right = all.split_off(mid);
        (all, right)
    };

    *pivots = Gpma::from_sorted_vec(left_pivots);
    *children = left_children;
    node.dirty = true;

    let mut right = Node::new_nonleaf(
        new_blocknum,
        node.nodesize,
        node.flags,
        node.height,
        node.rand4fingerprint,
        BlockNum::NULL,
        BlockNum::NULL,
    );
    right.body = NodeBody::Nonleaf {
        pivots: Gpma::from_sorted_vec(right_pivots),
        children: right_children,
    };

    NonleafSplitOutcome::Split(SplitResult { right, pivot: promoted_pivot })
}

/// After a child splits into `(child, new_sibling)` separated by
/// `pivot`, inserts the sibling into the parent and redistributes the
/// messages that were buffered for the old, wider child between the
/// two (spec §4.2.2: "dequeue each message from the original child
/// buffer and re-enqueue it ... based on comparison against the new
/// pivots; in a duplicate-key tree a `DELETE` is enqueued into every
/// straddling child").
pub fn route_buffer_after_child_split(
    node: &mut Node,
    child_index: usize,
    new_sibling: BlockNum,
    pivot: Dbt,
    cmp: &dyn Comparator,
    duplicates_sorted: bool,
) {
    let NodeBody::Nonleaf { pivots, children } = &mut node.body else {
        panic!("route_buffer_after_child_split called on a leaf");
    };

    let mut old_buffer = std::mem::take(&mut children[child_index].buffer);
    let mut left_buffer = crate::message::MessageBuffer::new();
    let mut right_buffer = crate::message::MessageBuffer::new();

    while let Some(msg) = old_buffer.pop_front() {
        let on_pivot = cmp.compare(&msg.key, &pivot) == std::cmp::Ordering::Equal;
        let goes_left = cmp.compare(&msg.key, &pivot) != std::cmp::Ordering::Greater;

        if duplicates_sorted && on_pivot && msg.kind.replicates_in_duplicate_mode() {
            left_buffer.push(msg.clone());
            right_buffer.push(msg);
        } else if goes_left {
            left_buffer.push(msg);
        } else {
            right_buffer.push(msg);
        }
    }

    children[child_index].buffer = left_buffer;

    let sibling_slot = ChildSlot {
        child: new_sibling,
        subtree_fingerprint: Fingerprint::ZERO,
        buffer: right_buffer,
    };
    children.insert(child_index + 1, sibling_slot);

    let rank = pivots.iter().filter(|(_, p)| cmp.compare(&p.key, &pivot) == std::cmp::Ordering::Less).count();
    pivots.insert_bessel(Pivot { key: pivot.clone() }, |p| cmp.compare(&p.key, &pivot));
    let _ = rank;

    node.dirty = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbt::LexicographicComparator;
    use crate::node::put::{brtnode_put, PutMode};
    use crate::Slice;

    fn insert(key: &str, val: &str) -> Message {
        Message {
            kind: MessageKind::Insert,
            txn_id: crate::TxnId::ROOT,
            key: Slice::from(key),
            val: Slice::from(val),
        }
    }

    #[test]
    fn leaf_split_halves_keep_original_blocknum_on_the_left() {
        let cmp = LexicographicComparator;
        let mut leaf = Node::new_leaf(BlockNum::new(1), 4096, 0, 3);
        for i in 0..10u32 {
            brtnode_put(&mut leaf, &insert(&format!("k{i:02}"), "v"), PutMode::Strong, &cmp, false).unwrap();
        }

        let result = split_leaf(&mut leaf, BlockNum::new(99));

        assert_eq!(BlockNum::new(1), leaf.blocknum);
        assert_eq!(BlockNum::new(99), result.right.blocknum);

        let NodeBody::Leaf(left_pairs) = &leaf.body else { unreachable!() };
        let NodeBody::Leaf(right_pairs) = &result.right.body else { unreachable!() };
        assert_eq!(5, left_pairs.len());
        assert_eq!(5, right_pairs.len());

        let last_left = left_pairs.iter().last().unwrap().1.key.clone();
        assert_eq!(last_left, result.pivot);

        let first_right = right_pairs.iter().next().unwrap().1.key.clone();
        assert_eq!(std::cmp::Ordering::Less, cmp.compare(&result.pivot, &first_right));
    }

    #[test]
    fn nonleaf_split_with_four_children_promotes_middle_pivot() {
        let mut nonleaf = Node::new_nonleaf(BlockNum::new(1), 4096, 0, 1, 1, BlockNum::new(10), BlockNum::new(11));
        if let NodeBody::Nonleaf { pivots, children } = &mut nonleaf.body {
            pivots.insert_bessel(Pivot { key: Slice::from("m") }, |p| p.key.as_ref().cmp(b"m"));
            pivots.insert_bessel(Pivot { key: Slice::from("g") }, |p| p.key.as_ref().cmp(b"g"));
            pivots.insert_bessel(Pivot { key: Slice::from("t") }, |p| p.key.as_ref().cmp(b"t"));
            children.push(ChildSlot { child: BlockNum::new(12), subtree_fingerprint: Fingerprint::ZERO, buffer: Default::default() });
            children.push(ChildSlot { child: BlockNum::new(13), subtree_fingerprint: Fingerprint::ZERO, buffer: Default::default() });
        }

        let outcome = split_nonleaf(&mut nonleaf, BlockNum::new(99), FanoutPolicy::GrowBeyondNodesize);
        let NonleafSplitOutcome::Split(result) = outcome else { panic!("expected a structural split") };

        let NodeBody::Nonleaf { children: left_children, pivots: left_pivots } = &nonleaf.body else { unreachable!() };
        let NodeBody::Nonleaf { children: right_children, .. } = &result.right.body else { unreachable!() };

        assert_eq!(2, left_children.len());
        assert_eq!(1, left_pivots.len());
        assert_eq!(2, right_children.len());
        assert_eq!(Slice::from("m"), result.pivot);
    }

    #[test]
    fn two_child_nonleaf_under_grow_policy_defers_rather_than_splits() {
        let mut nonleaf = Node::new_nonleaf(BlockNum::new(1), 4096, 0, 1, 1, BlockNum::new(10), BlockNum::new(11));
        if let NodeBody::Nonleaf { pivots, .. } = &mut nonleaf.body {
            pivots.insert_bessel(Pivot { key: Slice::from("m") }, |p| p.key.as_ref().cmp(b"m"));
        }

        let outcome = split_nonleaf(&mut nonleaf, BlockNum::new(99), FanoutPolicy::GrowBeyondNodesize);
        assert!(matches!(outcome, NonleafSplitOutcome::DeferredOverflow));
    }

    #[test]
    fn two_child_nonleaf_under_promote_policy_yields_both_children() {
        let mut nonleaf = Node::new_nonleaf(BlockNum::new(1), 4096, 0, 1, 1, BlockNum::new(10), BlockNum::new(11));
        if let NodeBody::Nonleaf { pivots, .. } = &mut nonleaf.body {
            pivots.insert_bessel(Pivot { key: Slice::from("m") }, |p| p.key.as_ref().cmp(b"m"));
        }

        let outcome = split_nonleaf(&mut nonleaf, BlockNum::new(99), FanoutPolicy::PromoteChildren);
        let NonleafSplitOutcome::Promote { children, pivot } = outcome else { panic!("expected a promotion") };
        assert_eq!(BlockNum::new(10), children[0].child);
        assert_eq!(BlockNum::new(11), children[1].child);
        assert_eq!(Slice::from("m"), pivot);
    }

    #[test]
    fn buffer_routes_to_correct_side_of_new_pivot() {
        let cmp = LexicographicComparator;
        let mut parent = Node::new_nonleaf(BlockNum::new(1), 4096, 0, 1, 1, BlockNum::new(10), BlockNum::new(11));
        if let NodeBody::Nonleaf { children, .. } = &mut parent.body {
            children[0].buffer.push(insert("a", "1"));
            children[0].buffer.push(insert("z", "2"));
        }

        route_buffer_after_child_split(&mut parent, 0, BlockNum::new(20), Slice::from("m"), &cmp, false);

        let NodeBody::Nonleaf { children, pivots } = &parent.body else { unreachable!() };
        assert_eq!(1, pivots.len());
        assert_eq!(3, children.len());
        assert_eq!(1, children[0].buffer.len());
        assert_eq!(1, children[1].buffer.len());
        assert_eq!(BlockNum::new(20), children[1].child);
    }
}

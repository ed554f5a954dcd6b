// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! BRT nodes (spec §3.1, §4.2): the on-disk page format, shared by
//! leaves (a packed array of live pairs) and nonleaves (a pivot table
//! plus per-child message buffers).

mod put;
mod serde;
mod split;

pub use put::PutOutcome;
pub use split::FanoutPolicy;
pub(crate) use put::{brtnode_put, PutMode};
pub(crate) use serde::{decode_node, encode_node};
pub(crate) use split::{
    route_buffer_after_child_split, split_leaf, split_nonleaf, NonleafSplitOutcome,
    SplitResult, DEFAULT_FANOUT,
};

use crate::dbt::Dbt;
use crate::fingerprint::Fingerprint;
use crate::message::MessageBuffer;
use crate::pma::Gpma;

/// A logical node identifier, mapped to a byte offset by the header's
/// allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockNum(u64);

impl BlockNum {
    /// Sentinel for "no block" (e.g. an as-yet-unassigned child slot).
    pub const NULL: Self = Self(u64::MAX);

    /// Wraps a raw block number.
    #[must_use]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw block number.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// `true` for [`BlockNum::NULL`].
    #[must_use]
    pub fn is_null(self) -> bool {
        *self == Self::NULL
    }
}

/// A separator key between two children of a nonleaf (spec §3.1,
/// "pivot").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pivot {
    /// The separator key itself.
    pub key: Dbt,
}

/// One live pair stored in a leaf's packed array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry {
    /// The key.
    pub key: Dbt,
    /// The value.
    pub val: Dbt,
}

impl LeafEntry {
    /// Bytes this entry occupies once serialized.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        4 + self.key.len() + 4 + self.val.len()
    }
}

/// A nonleaf's per-child bookkeeping (spec §3.1: "for each child:
/// `{child blocknum, subtree fingerprint, message buffer, bytes in
/// buffer}`").
#[derive(Debug, Clone)]
pub struct ChildSlot {
    /// The child's block number.
    pub child: BlockNum,
    /// The fingerprint this parent last recorded for that child's
    /// subtree (spec §3.2 invariant 4).
    pub subtree_fingerprint: Fingerprint,
    /// Messages buffered for this child, not yet applied.
    pub buffer: MessageBuffer,
}

impl ChildSlot {
    fn new(child: BlockNum) -> Self {
        Self {
            child,
            subtree_fingerprint: Fingerprint::ZERO,
            buffer: MessageBuffer::new(),
        }
    }
}

/// The variant-specific contents of a node.
#[derive(Debug, Clone)]
pub enum NodeBody {
    /// A leaf: a density-bounded array of live pairs.
    Leaf(Gpma<LeafEntry>),
    /// A nonleaf: a pivot table plus one buffered child per pivot gap.
    Nonleaf {
        /// `n_children - 1` separator keys.
        pivots: Gpma<Pivot>,
        /// `n_children` child slots, indexed by the gap the pivots
        /// define: `children[0]` covers keys `< pivots[0]`,
        /// `children[i]` covers `pivots[i-1] <= key < pivots[i]`, and
        /// the last covers `key >= pivots[n-2]`.
        children: Vec<ChildSlot>,
    },
}

/// A BRT node (spec §3.1, "BRT node").
#[derive(Debug, Clone)]
pub struct Node {
    /// This node's own block number.
    pub blocknum: BlockNum,
    /// Configured maximum serialized size.
    pub nodesize: u32,
    /// Opaque per-tree flags (duplicate-key mode, etc.).
    pub flags: u32,
    /// Tree height: `0` for a leaf, `>= 1` for a nonleaf.
    pub height: u32,
    /// On-disk layout version, for forward compatibility.
    pub layout_version: u32,
    /// Per-node salt mixed into every fingerprint contribution.
    pub rand4fingerprint: u32,
    /// XOR-combined fingerprint of everything this node currently holds.
    pub local_fingerprint: Fingerprint,
    /// LSN of the last flush of this node to disk.
    pub disk_lsn: u64,
    /// LSN of the last log record describing a mutation to this node.
    pub log_lsn: u64,
    /// `true` if this node has unflushed in-memory changes.
    pub dirty: bool,
    /// The leaf/nonleaf contents.
    pub body: NodeBody,
}

impl Node {
    /// Creates a freshly allocated empty leaf.
    #[must_use]
    pub fn new_leaf(blocknum: BlockNum, nodesize: u32, flags: u32, rand4fingerprint: u32) -> Self {
        Self {
            blocknum,
            nodesize,
            flags,
            height: 0,
            layout_version: 1,
            rand4fingerprint,
            local_fingerprint: Fingerprint::ZERO,
            disk_lsn: 0,
            log_lsn: 0,
            dirty: true,
            body: NodeBody::Leaf(Gpma::new()),
        }
    }

    /// Creates a freshly allocated nonleaf with two children and no
    /// pivots (the minimal legal nonleaf shape).
    #[must_use]
    pub fn new_nonleaf(
        blocknum: BlockNum,
        nodesize: u32,
        flags: u32,
        height: u32,
        rand4fingerprint: u32,
        left: BlockNum,
        right: BlockNum,
    ) -> Self {
        Self {
            blocknum,
            nodesize,
            flags,
            height,
            layout_version: 1,
            rand4fingerprint,
            local_fingerprint: Fingerprint::ZERO,
            disk_lsn: 0,
            log_lsn: 0,
            dirty: true,
            body: NodeBody::Nonleaf {
                pivots: Gpma::new(),
                children: vec![ChildSlot::new(left), ChildSlot::new(right)],
            },
        }
    }

    /// `true` for a leaf (`height == 0`).
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self.body, NodeBody::Leaf(_))
    }

    /// Number of children, or `1` for a leaf (so callers can treat a
    /// leaf uniformly as "one region").
    #[must_use]
    pub fn n_children(&self) -> usize {
        match &self.body {
            NodeBody::Leaf(_) => 1,
            NodeBody::Nonleaf { children, .. } => children.len(),
        }
    }

    /// An approximate serialized size, used to decide when a node
    /// must split (spec §3.2 invariant 2) without paying for a full
    /// encode on every mutation.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        let header = 64;
        header
            + match &self.body {
                NodeBody::Leaf(pairs) => pairs.iter().map(|(_, e)| e.serialized_size()).sum(),
                NodeBody::Nonleaf { pivots, children } => {
                    let pivots_size: usize = pivots.iter().map(|(_, p)| 4 + p.key.len()).sum();
                    let children_size: usize = children
                        .iter()
                        .map(|c| {
                            16 + c
                                .buffer
                                .iter()
                                .map(crate::message::Message::serialized_size)
                                .sum::<usize>()
                        })
                        .sum();
                    pivots_size + children_size
                }
            }
    }

    /// `true` if this node currently exceeds its configured size and
    /// must split before admitting another message (spec §3.2
    /// invariant 2).
    #[must_use]
    pub fn overflows(&self) -> bool {
        self.estimated_size() > self.nodesize as usize
    }

    /// `true` if this node must split before admitting another
    /// message: either it exceeds its configured byte size, or (spec
    /// §4.2.2, "Fan-out bound") a nonleaf's child count exceeds
    /// `fanout`.
    #[must_use]
    pub fn overflows_with_fanout(&self, fanout: usize) -> bool {
        self.overflows() || self.n_children() > fanout
    }

    /// The heaviest child by buffered bytes (spec §4.2.1,
    /// "push_down_if_buffers_too_full"), or `None` for a leaf or an
    /// empty nonleaf.
    #[must_use]
    pub fn heaviest_child(&self) -> Option<usize> {
        match &self.body {
            NodeBody::Leaf(_) => None,
            NodeBody::Nonleaf { children, .. } => children
                .iter()
                .enumerate()
                .max_by_key(|(_, c)| c.buffer.bytes_in_buffer())
                .map(|(i, _)| i),
        }
    }

    /// This node's contribution to the fingerprint its parent records
    /// for it (spec §3.2 invariant 4): a leaf's own `local_fingerprint`,
    /// or a nonleaf's `local_fingerprint` combined with every child
    /// slot's already-recorded `subtree_fingerprint`.
    #[must_use]
    pub fn subtree_fingerprint(&self) -> Fingerprint {
        match &self.body {
            NodeBody::Leaf(_) => self.local_fingerprint,
            NodeBody::Nonleaf { children, .. } => children
                .iter()
                .fold(self.local_fingerprint, |fp, c| fp.combine(c.subtree_fingerprint)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_leaf_is_empty_and_dirty() {
        let leaf = Node::new_leaf(BlockNum::new(1), 4096, 0, 42);
        assert!(leaf.is_leaf());
        assert!(leaf.dirty);
        assert_eq!(1, leaf.n_children());
    }

    #[test]
    fn new_nonleaf_has_two_children_and_no_pivots() {
        let nonleaf = Node::new_nonleaf(
            BlockNum::new(1),
            4096,
            0,
            1,
            7,
            BlockNum::new(2),
            BlockNum::new(3),
        );
        assert!(!nonleaf.is_leaf());
        assert_eq!(2, nonleaf.n_children());
    }

    #[test]
    fn block_num_null_roundtrips() {
        assert!(BlockNum::NULL.is_null());
        assert!(!BlockNum::new(0).is_null());
    }

    #[test]
    fn overflows_with_fanout_trips_on_child_count_even_when_small() {
        let nonleaf = Node::new_nonleaf(
            BlockNum::new(1),
            1024 * 1024,
            0,
            1,
            7,
            BlockNum::new(2),
            BlockNum::new(3),
        );
        assert!(!nonleaf.overflows());
        assert!(!nonleaf.overflows_with_fanout(2));
        assert!(nonleaf.overflows_with_fanout(1));
    }
}

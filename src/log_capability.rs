// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The log capability (spec §4.4): the core never writes a
//! write-ahead log itself, it only *describes* mutations by calling
//! into this capability. The outer redo log is out of scope (spec
//! §1); what's in scope is the set of record kinds the core must be
//! able to emit, and the guarantee (spec §4.4) that a record is
//! emitted before the node it describes can be flushed dirty.

use crate::node::BlockNum;
use crate::TxnId;

/// One record describing a single local node mutation (spec §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// A fresh node was allocated.
    NewBrtNode {
        /// The node's block number.
        blocknum: BlockNum,
        /// `0` for a leaf, `>=1` for a nonleaf.
        height: u32,
    },
    /// A child was added to a nonleaf's child list.
    AddChild {
        /// The nonleaf's block number.
        parent: BlockNum,
        /// Index the child was inserted at.
        index: usize,
        /// The new child's block number.
        child: BlockNum,
    },
    /// A child was removed from a nonleaf's child list.
    DelChild {
        /// The nonleaf's block number.
        parent: BlockNum,
        /// Index the child was removed from.
        index: usize,
    },
    /// A pivot key was set or replaced.
    SetPivot {
        /// The nonleaf's block number.
        parent: BlockNum,
        /// Pivot index.
        index: usize,
        /// The new pivot key.
        key: crate::Slice,
    },
    /// A message was dequeued from a child's buffer (about to be
    /// applied, forwarded, or discarded).
    BrtDeq {
        /// The nonleaf's block number.
        parent: BlockNum,
        /// Which child's buffer.
        child_index: usize,
    },
    /// A message was enqueued into a child's buffer.
    BrtEnq {
        /// The nonleaf's block number.
        parent: BlockNum,
        /// Which child's buffer.
        child_index: usize,
        /// The transaction that issued the message.
        txn_id: TxnId,
    },
    /// A child's recorded subtree fingerprint changed.
    ChangeChildFingerprint {
        /// The nonleaf's block number.
        parent: BlockNum,
        /// Which child.
        child_index: usize,
        /// The new fingerprint, as a raw value (see [`crate::fingerprint::Fingerprint`]).
        new_fingerprint: u64,
    },
    /// The header's root block pointer changed (root split, or a
    /// different sub-database's root was swapped in).
    ChangeRoot {
        /// Which root pointer (index into the header's root list).
        which: usize,
        /// The new root block number.
        new_root: BlockNum,
    },
    /// The header's unused-memory watermark advanced.
    ChangeUnusedMemory {
        /// The new watermark, in bytes from the start of the file.
        new_watermark: u64,
    },
}

/// The capability the core calls into to describe mutations, so an
/// outer write-ahead log can replay them (spec §4.4).
///
/// The core's only obligation to this trait is ordering: every record
/// describing a mutation to a node must be passed to
/// [`LogCapability::log`] before that node's `dirty` page can be
/// flushed by the cachetable. Everything else — what `log` does with
/// the record, whether it's durable, whether it's even used — is the
/// outer layer's business.
pub trait LogCapability: Send + Sync {
    /// Records a single mutation. Must not fail in a way that leaves
    /// the in-memory node mutation half-applied; a logger that can
    /// fail should buffer and report failures out of band.
    fn log(&self, record: LogRecord);

    /// The highest LSN this capability has assigned so far, used to
    /// stamp `log_lsn` on the node a record describes.
    fn current_lsn(&self) -> u64;
}

/// A capability that records nothing, for embedding contexts that
/// don't need redo logging (read-only opens, crate-internal tests).
#[derive(Debug, Default)]
pub struct NoopLogCapability {
    lsn: std::sync::atomic::AtomicU64,
}

impl NoopLogCapability {
    /// Creates a fresh no-op logger starting at LSN 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogCapability for NoopLogCapability {
    fn log(&self, record: LogRecord) {
        log::trace!("noop log capability discarding record: {record:?}");
        self.lsn
            .fetch_add(1, std::sync::atomic::Ordering::AcqRel);
    }

    fn current_lsn(&self) -> u64 {
        self.lsn.load(std::sync::atomic::Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_capability_advances_lsn_on_every_log_call() {
        let cap = NoopLogCapability::new();
        assert_eq!(0, cap.current_lsn());
        cap.log(LogRecord::ChangeUnusedMemory { new_watermark: 4096 });
        assert_eq!(1, cap.current_lsn());
        cap.log(LogRecord::ChangeRoot {
            which: 0,
            new_root: BlockNum::new(1),
        });
        assert_eq!(2, cap.current_lsn());
    }
}

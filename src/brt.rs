// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The tree handle (spec §4.2): orchestration that needs more than one
//! node at a time — descending through buffered messages, pushing a
//! nonleaf's heaviest child down, splitting an overflowing node and
//! patching its parent, and growing a new root — all of which is
//! deliberately kept out of [`crate::node::put`] and
//! [`crate::node::split`] since those only ever touch one [`Node`] at
//! a time.
//!
//! [`BrtFile`] owns the open file: its [`Header`], its [`Cachetable`],
//! and the policies configured by [`crate::config::Config`]. [`Brt`]
//! is a thin handle onto one sub-database within that file, cheap to
//! clone (it's just an `Arc` and a name).

use crate::cachetable::{Cachetable, FileId, PageStore, PinnedPage};
use crate::dbt::{check_pair_size, Comparator};
use crate::header::Header;
use crate::log_capability::{LogCapability, LogRecord};
use crate::message::{Message, MessageKind};
use crate::node::{
    self, brtnode_put, route_buffer_after_child_split, split_leaf, split_nonleaf, BlockNum,
    ChildSlot, FanoutPolicy, Node, NodeBody, NonleafSplitOutcome, PutMode, PutOutcome,
};
use crate::search::{self, Bound};
use crate::{Config, CursorError, DuplicatePolicy, Error, Result, Slice, TxnId};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard};

static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(1);

/// Backs a [`Cachetable<Node>`] by the node block format (spec §4.2.4)
/// framed per [`crate::block_io`] and addressed through the [`Header`]'s
/// allocator.
struct NodeIo {
    file: Mutex<std::fs::File>,
    header: Mutex<Header>,
}

impl NodeIo {
    fn header(&self) -> MutexGuard<'_, Header> {
        self.header.lock().expect("header lock is poisoned")
    }

    fn file(&self) -> MutexGuard<'_, std::fs::File> {
        self.file.lock().expect("file lock is poisoned")
    }
}

impl PageStore<Node> for NodeIo {
    fn fetch(&self, key: (FileId, BlockNum)) -> Result<Node> {
        let (offset, len) = self
            .header()
            .location_of(key.1)
            .ok_or(Error::BadFormat("block has no recorded location"))?;

        let mut block = vec![0u8; len as usize];
        let mut file = self.file();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut block)?;
        drop(file);

        let body = crate::block_io::split_and_verify_checksum(&block)?;
        let raw = crate::block_io::decode_frame(body)?;
        node::decode_node(&raw)
    }

    fn flush(&self, key: (FileId, BlockNum), value: &Node) -> Result<()> {
        let raw = node::encode_node(value)?;
        let compression = self.header().compression();
        let frame = crate::block_io::encode_frame(&raw, compression)?;
        let block = crate::block_io::append_checksum(frame);

        let mut header = self.header();
        header.free_block(key.1);
        let offset = header.allocate_space(block.len() as u32);
        header.record_location(key.1, offset, block.len() as u32);
        drop(header);

        let mut file = self.file();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&block)?;
        Ok(())
    }
}

/// One open BRT file, shared by every [`Brt`] handle onto one of its
/// sub-databases.
///
/// Structural tree mutations (split, push-down, root change) and the
/// mandatory pre-descent buffer flush (spec §4.2.3) are serialized by
/// `structure_lock` — a single coarse lock rather than per-subtree
/// locking, since nothing in spec §1 requires concurrent writers and
/// the cachetable's own pin-counted `RwLock`s already give concurrent
/// *readers* of already-resident pages. See DESIGN.md.
pub(crate) struct BrtFile {
    io: std::sync::Arc<NodeIo>,
    cache: Cachetable<Node>,
    structure_lock: Mutex<()>,
    file_id: FileId,
    comparator: std::sync::Arc<dyn Comparator>,
    duplicate_policy: DuplicatePolicy,
    fanout_policy: FanoutPolicy,
    fanout: usize,
    log_capability: std::sync::Arc<dyn LogCapability>,
    next_salt: AtomicU64,
}

impl BrtFile {
    pub(crate) fn open(config: Config) -> Result<std::sync::Arc<Self>> {
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(config.create)
            .truncate(false)
            .open(&config.path)?;

        let is_new = file.metadata()?.len() == 0;
        let header = if is_new {
            log::debug!("creating new BRT file at {}", config.path.display());
            let header = Header::create(config.nodesize, 0, config.compression);
            header.write_to(&mut file)?;
            header
        } else {
            log::debug!("opening existing BRT file at {}", config.path.display());
            Header::read_from(&mut file)?
        };

        let io = std::sync::Arc::new(NodeIo {
            file: Mutex::new(file),
            header: Mutex::new(header),
        });

        let cache: Cachetable<Node> = Cachetable::new(config.cachesize, io.clone());

        Ok(std::sync::Arc::new(Self {
            io,
            cache,
            structure_lock: Mutex::new(()),
            file_id: FileId::new(NEXT_FILE_ID.fetch_add(1, AtomicOrdering::Relaxed)),
            comparator: config.comparator,
            duplicate_policy: config.duplicate_policy,
            fanout_policy: config.fanout_policy,
            fanout: config.fanout,
            log_capability: config.log_capability,
            next_salt: AtomicU64::new(0x9E37_79B9),
        }))
    }

    /// Opens (and, if `create`, lazily creates) a sub-database within
    /// this file (spec §6, `brt_open`; spec §8, Scenario E).
    pub(crate) fn open_db(self: &std::sync::Arc<Self>, name: Option<&str>, create: bool) -> Result<Brt> {
        let existing = self.io.header().db_root(name);

        if existing.is_none() {
            if !create {
                return Err(Error::DbNotFound);
            }

            let _lock = self.structure_lock.lock().expect("structure lock is poisoned");
            // Re-check under the lock: another thread may have created it first.
            if self.io.header().db_root(name).is_none() {
                let blocknum = self.io.header().new_blocknum();
                let salt = self.next_salt.fetch_add(1, AtomicOrdering::Relaxed) as u32;
                let root = Node::new_leaf(blocknum, self.nodesize(), 0, salt);
                self.cache.put((self.file_id, blocknum), root)?;
                self.log(LogRecord::NewBrtNode { blocknum, height: 0 });
                self.io.header().create_db(name, blocknum)?;
            }
        }

        Ok(Brt {
            file: std::sync::Arc::clone(self),
            db_name: name.map(str::to_owned),
        })
    }

    fn nodesize(&self) -> u32 {
        self.io.header().nodesize()
    }

    fn comparator(&self) -> &dyn Comparator {
        &*self.comparator
    }

    fn duplicates_sorted(&self) -> bool {
        self.duplicate_policy.duplicates_sorted()
    }

    fn log(&self, record: LogRecord) {
        self.log_capability.log(record);
    }

    fn pin(&self, block: BlockNum) -> Result<PinnedPage<Node>> {
        self.cache.get_and_pin((self.file_id, block))
    }

    fn new_blocknum(&self) -> BlockNum {
        self.io.header().new_blocknum()
    }

    fn next_salt(&self) -> u32 {
        self.next_salt.fetch_add(1, AtomicOrdering::Relaxed) as u32
    }

    fn db_root(&self, name: Option<&str>) -> BlockNum {
        self.io
            .header()
            .db_root(name)
            .expect("sub-database root must exist once Brt is constructed")
    }

    fn set_db_root(&self, name: Option<&str>, root: BlockNum) {
        self.io.header().set_db_root(name, root);
        self.log(LogRecord::ChangeRoot { which: 0, new_root: root });
    }
}

/// A handle onto one sub-database of an open BRT file (spec §6,
/// `brt`).
///
/// Cheap to clone: cloning shares the same underlying file, cache, and
/// structural lock.
#[derive(Clone)]
pub struct Brt {
    file: std::sync::Arc<BrtFile>,
    db_name: Option<String>,
}

impl Brt {
    /// Inserts `(key, val)`, replacing any existing value for `key`
    /// (spec §4.1, `insert`) unless the tree allows sorted duplicates,
    /// in which case this adds another pair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PairTooLarge`] if the pair exceeds half the
    /// configured node size (spec §1).
    pub fn insert(&self, key: impl AsRef<[u8]>, val: impl AsRef<[u8]>, txn: u64) -> Result<()> {
        let (key, val) = (key.as_ref(), val.as_ref());
        check_pair_size(key, val, self.file.nodesize())?;
        self.put_message(Message {
            kind: MessageKind::Insert,
            txn_id: TxnId::new(txn),
            key: Slice::from(key),
            val: Slice::from(val),
        })
    }

    /// Removes every pair matching `key` (every duplicate, in a
    /// sorted-duplicates tree; the single pair otherwise) (spec §4.1,
    /// `delete`).
    pub fn delete(&self, key: impl AsRef<[u8]>, txn: u64) -> Result<()> {
        self.put_message(Message {
            kind: MessageKind::Delete,
            txn_id: TxnId::new(txn),
            key: Slice::from(key.as_ref()),
            val: Slice::from(&b""[..]),
        })
    }

    /// Removes only the pair matching both `key` and `val` (spec §4.1,
    /// `delete_both`) — the operation a sorted-duplicates tree needs to
    /// remove one duplicate without disturbing the others.
    pub fn delete_both(&self, key: impl AsRef<[u8]>, val: impl AsRef<[u8]>, txn: u64) -> Result<()> {
        self.put_message(Message {
            kind: MessageKind::DeleteBoth,
            txn_id: TxnId::new(txn),
            key: Slice::from(key.as_ref()),
            val: Slice::from(val.as_ref()),
        })
    }

    /// Looks up the value for `key` (spec §4.1, `lookup`). In a
    /// sorted-duplicates tree this returns the smallest matching
    /// value.
    pub fn lookup(&self, key: impl AsRef<[u8]>) -> Result<Option<Slice>> {
        let _lock = self.file.structure_lock.lock().expect("structure lock is poisoned");
        let root = self.file.db_root(self.db_name.as_deref());
        let found = self.search_subtree(root, Bound::SetExact, key.as_ref(), &[])?;
        Ok(found.map(|e| e.val))
    }

    /// Estimates, without an exact count, how many keys fall strictly
    /// below, equal to, and strictly above `key` (spec §4.1,
    /// `keyrange`) — derived from the rank the root's pivot table
    /// assigns `key`, scaled by the fraction of the tree each pivot gap
    /// represents. Approximate by construction: buffered messages not
    /// yet pushed down are not reflected.
    pub fn keyrange(&self, key: impl AsRef<[u8]>) -> Result<(u64, u64, u64)> {
        let _lock = self.file.structure_lock.lock().expect("structure lock is poisoned");
        let root_block = self.file.db_root(self.db_name.as_deref());
        let pin = self.file.pin(root_block)?;
        let node = pin.read();

        match &node.body {
            NodeBody::Leaf(pairs) => {
                let less = pairs
                    .iter()
                    .filter(|(_, e)| self.file.comparator().compare(&e.key, key.as_ref()) == std::cmp::Ordering::Less)
                    .count() as u64;
                let equal = pairs
                    .iter()
                    .filter(|(_, e)| self.file.comparator().compare(&e.key, key.as_ref()) == std::cmp::Ordering::Equal)
                    .count() as u64;
                let total = pairs.len() as u64;
                Ok((less, equal, total - less - equal))
            }
            NodeBody::Nonleaf { pivots, children } => {
                // Each child gap is treated as an equally likely share of
                // the tree's keys; a real count would require descending
                // every child, which defeats the point of a cheap estimate.
                let n = children.len() as u64;
                let rank = search::locate_child(pivots, key.as_ref(), self.file.comparator()) as u64;
                Ok((rank, 1, n.saturating_sub(rank).saturating_sub(1)))
            }
        }
    }

    /// Opens a cursor over this sub-database (spec §4.2.3).
    pub fn cursor(&self) -> Result<crate::Cursor> {
        Ok(crate::Cursor::new(self.clone()))
    }

    /// Flushes every dirty resident page belonging to this file back
    /// to disk, including the header (spec §3.3, "written ... on every
    /// clean close").
    pub fn close(&self) -> Result<()> {
        self.file.cache.flush_all()?;
        let mut file = self.file.io.file();
        self.file.io.header().write_to(&mut file)
    }

    pub(crate) fn file(&self) -> &std::sync::Arc<BrtFile> {
        &self.file
    }

    pub(crate) fn db_name(&self) -> Option<&str> {
        self.db_name.as_deref()
    }

    fn put_message(&self, cmd: Message) -> Result<()> {
        let _lock = self.file.structure_lock.lock().expect("structure lock is poisoned");
        let root_block = self.file.db_root(self.db_name.as_deref());

        {
            let pin = self.file.pin(root_block)?;
            let mut node = pin.write();
            brtnode_put(&mut node, &cmd, PutMode::Strong, self.file.comparator(), self.file.duplicates_sorted())?;
        }

        self.maybe_split_root(root_block)?;
        let root_block = self.file.db_root(self.db_name.as_deref());
        self.push_down_if_too_full(root_block)?;
        Ok(())
    }

    /// Splits the root if it overflows, growing the tree by one level
    /// (spec §4.2.2, "Root split").
    fn maybe_split_root(&self, root_block: BlockNum) -> Result<()> {
        let pin = self.file.pin(root_block)?;
        let overflows = pin.read().overflows_with_fanout(self.file.fanout);
        if !overflows {
            return Ok(());
        }

        let is_leaf = pin.read().is_leaf();
        let new_blocknum = self.file.new_blocknum();
        log::debug!("root {root_block:?} overflowed, splitting (is_leaf={is_leaf})");

        let right = if is_leaf {
            if pin.read().n_children() < 1 {
                return Ok(());
            }
            let mut node = pin.write();
            let NodeBody::Leaf(pairs) = &node.body else { unreachable!() };
            if pairs.len() < 2 {
                // Nothing to split yet; it'll shrink below nodesize once
                // delete messages downstream are applied, or grow enough
                // to split meaningfully on the next insert.
                return Ok(());
            }
            let result = split_leaf(&mut node, new_blocknum);
            self.file.log(LogRecord::NewBrtNode { blocknum: new_blocknum, height: 0 });
            result
        } else {
            let mut node = pin.write();
            match split_nonleaf(&mut node, new_blocknum, self.file.fanout_policy) {
                NonleafSplitOutcome::Split(result) => {
                    self.file.log(LogRecord::NewBrtNode { blocknum: new_blocknum, height: node.height });
                    result
                }
                NonleafSplitOutcome::DeferredOverflow => return Ok(()),
                NonleafSplitOutcome::Promote { .. } => {
                    // A root never has a parent to splice into, so a
                    // 2-child overflowing root always defers rather than
                    // promotes, regardless of the configured policy.
                    return Ok(());
                }
            }
        };

        let height = pin.read().height + 1;
        let left_fp = pin.read().subtree_fingerprint();
        let right_fp = right.right.subtree_fingerprint();
        self.file.cache.put((self.file.file_id, new_blocknum), right.right)?;
        drop(pin);

        let new_root_block = self.file.new_blocknum();
        let mut new_root = Node::new_nonleaf(
            new_root_block,
            self.file.nodesize(),
            0,
            height,
            self.file.next_salt(),
            root_block,
            new_blocknum,
        );
        if let NodeBody::Nonleaf { pivots, children } = &mut new_root.body {
            let cmp = self.file.comparator();
            pivots.insert_bessel(crate::node::Pivot { key: right.pivot.clone() }, |p| {
                cmp.compare(&p.key, &right.pivot)
            });
            children[0].subtree_fingerprint = left_fp;
            children[1].subtree_fingerprint = right_fp;
        }
        self.file.cache.put((self.file.file_id, new_root_block), new_root)?;
        self.file.log(LogRecord::NewBrtNode { blocknum: new_root_block, height });

        log::info!("tree grew to height {height}, new root {new_root_block:?}");
        self.file.set_db_root(self.db_name.as_deref(), new_root_block);
        Ok(())
    }

    /// Pushes messages from a node's heaviest child buffer down into
    /// that child, splitting it if that makes it overflow, until the
    /// node no longer overflows or the heaviest child has nothing left
    /// queued (spec §4.2.1, `push_down_if_buffers_too_full`).
    fn push_down_if_too_full(&self, node_block: BlockNum) -> Result<()> {
        loop {
            let pin = self.file.pin(node_block)?;
            if !pin.read().overflows_with_fanout(self.file.fanout) {
                return Ok(());
            }
            let Some(child_index) = pin.read().heaviest_child() else {
                return Ok(());
            };
            let empty = {
                let node = pin.read();
                let NodeBody::Nonleaf { children, .. } = &node.body else { unreachable!() };
                children[child_index].buffer.is_empty()
            };
            drop(pin);
            if empty {
                // Nothing left to relieve the overflow with right now;
                // it shrinks once enough deletes flow through, or a
                // future insert pushes it over the fan-out split edge.
                return Ok(());
            }

            self.apply_one_buffered_message(node_block, child_index)?;
        }
    }

    /// Pops exactly one message from `parent.children[child_index]`'s
    /// buffer and applies it to that child, splitting the child (and
    /// patching the parent) if a weak put declines and the subsequent
    /// strong put leaves it oversized.
    fn apply_one_buffered_message(&self, parent_block: BlockNum, child_index: usize) -> Result<()> {
        let parent_pin = self.file.pin(parent_block)?;
        let child_block = {
            let node = parent_pin.read();
            let NodeBody::Nonleaf { children, .. } = &node.body else { unreachable!() };
            children[child_index].child
        };

        let msg = {
            let mut node = parent_pin.write();
            let NodeBody::Nonleaf { children, .. } = &mut node.body else { unreachable!() };
            children[child_index].buffer.pop_front()
        };
        let Some(msg) = msg else { return Ok(()) };
        self.file.log(LogRecord::BrtDeq { parent: parent_block, child_index });

        let child_pin = self.file.pin(child_block)?;
        let weak_outcome = {
            let mut child = child_pin.write();
            brtnode_put(&mut child, &msg, PutMode::Weak, self.file.comparator(), self.file.duplicates_sorted())?
        };
        if weak_outcome == PutOutcome::Applied {
            self.update_child_fingerprint(&parent_pin, child_index, &child_pin);
            return Ok(());
        }

        {
            let mut child = child_pin.write();
            brtnode_put(&mut child, &msg, PutMode::Strong, self.file.comparator(), self.file.duplicates_sorted())?;
        }
        self.update_child_fingerprint(&parent_pin, child_index, &child_pin);

        let needs_split = child_pin.read().overflows_with_fanout(self.file.fanout);
        drop(child_pin);
        drop(parent_pin);

        if needs_split {
            self.split_child(parent_block, child_index)?;
        }
        Ok(())
    }

    fn update_child_fingerprint(&self, parent_pin: &PinnedPage<Node>, child_index: usize, child_pin: &PinnedPage<Node>) {
        let new_fp = child_pin.read().subtree_fingerprint();
        let mut parent = parent_pin.write();
        let NodeBody::Nonleaf { children, .. } = &mut parent.body else { unreachable!() };
        children[child_index].subtree_fingerprint = new_fp;
        parent.dirty = true;
        self.file.log(LogRecord::ChangeChildFingerprint {
            parent: parent_pin.key().1,
            child_index,
            new_fingerprint: new_fp.as_u64(),
        });
    }

    /// Splits `parent.children[child_index]` in place (spec §4.2.2),
    /// installing the new sibling (or, for a 2-child nonleaf child
    /// under [`FanoutPolicy::PromoteChildren`], splicing both of its
    /// children directly into `parent`).
    fn split_child(&self, parent_block: BlockNum, child_index: usize) -> Result<()> {
        let parent_pin = self.file.pin(parent_block)?;
        let child_block = {
            let node = parent_pin.read();
            let NodeBody::Nonleaf { children, .. } = &node.body else { unreachable!() };
            children[child_index].child
        };

        let child_pin = self.file.pin(child_block)?;
        let is_leaf = child_pin.read().is_leaf();
        let new_blocknum = self.file.new_blocknum();
        log::debug!("splitting child {child_block:?} of parent {parent_block:?} (is_leaf={is_leaf})");

        if is_leaf {
            let too_small = {
                let node = child_pin.read();
                let NodeBody::Leaf(pairs) = &node.body else { unreachable!() };
                pairs.len() < 2
            };
            if too_small {
                return Ok(());
            }

            let result = {
                let mut node = child_pin.write();
                split_leaf(&mut node, new_blocknum)
            };
            self.file.log(LogRecord::NewBrtNode { blocknum: new_blocknum, height: 0 });
            self.file.cache.put((self.file.file_id, new_blocknum), result.right)?;

            let mut parent = parent_pin.write();
            route_buffer_after_child_split(
                &mut parent,
                child_index,
                new_blocknum,
                result.pivot.clone(),
                self.file.comparator(),
                self.file.duplicates_sorted(),
            );
            self.file.log(LogRecord::AddChild { parent: parent_block, index: child_index + 1, child: new_blocknum });
            self.file.log(LogRecord::SetPivot { parent: parent_block, index: child_index, key: result.pivot });
            drop(parent);
            self.update_child_fingerprint(&parent_pin, child_index, &child_pin);
            let sibling_pin = self.file.pin(new_blocknum)?;
            self.update_child_fingerprint(&parent_pin, child_index + 1, &sibling_pin);
            return Ok(());
        }

        let outcome = {
            let mut node = child_pin.write();
            split_nonleaf(&mut node, new_blocknum, self.file.fanout_policy)
        };

        match outcome {
            NonleafSplitOutcome::Split(result) => {
                self.file.log(LogRecord::NewBrtNode { blocknum: new_blocknum, height: child_pin.read().height });
                self.file.cache.put((self.file.file_id, new_blocknum), result.right)?;

                let mut parent = parent_pin.write();
                route_buffer_after_child_split(
                    &mut parent,
                    child_index,
                    new_blocknum,
                    result.pivot.clone(),
                    self.file.comparator(),
                    self.file.duplicates_sorted(),
                );
                self.file.log(LogRecord::AddChild { parent: parent_block, index: child_index + 1, child: new_blocknum });
                self.file.log(LogRecord::SetPivot { parent: parent_block, index: child_index, key: result.pivot });
                drop(parent);
                self.update_child_fingerprint(&parent_pin, child_index, &child_pin);
                let sibling_pin = self.file.pin(new_blocknum)?;
                self.update_child_fingerprint(&parent_pin, child_index + 1, &sibling_pin);
            }
            NonleafSplitOutcome::DeferredOverflow => {}
            NonleafSplitOutcome::Promote { children, pivot } => {
                drop(child_pin);
                self.file.cache.discard((self.file.file_id, child_block));
                self.file.io.header().free_block(child_block);

                let mut parent = parent_pin.write();
                let NodeBody::Nonleaf { pivots, children: parent_children } = &mut parent.body else {
                    unreachable!()
                };
                let [left, right]: [ChildSlot; 2] = children;
                parent_children.remove(child_index);
                parent_children.insert(child_index, right);
                parent_children.insert(child_index, left);
                let cmp = self.file.comparator();
                pivots.insert_bessel(crate::node::Pivot { key: pivot.clone() }, |p| cmp.compare(&p.key, &pivot));
                parent.dirty = true;
                drop(parent);
                self.file.log(LogRecord::DelChild { parent: parent_block, index: child_index });
                self.file.log(LogRecord::SetPivot { parent: parent_block, index: child_index, key: pivot });
            }
        }
        Ok(())
    }

    /// Drains every message buffered for `parent.children[child_index]`
    /// into it (spec §4.2.3: "all buffered messages for the chosen
    /// child are flushed into that child" before a search descends),
    /// recursing into both halves if the drain splits the child.
    fn flush_child_buffer_fully(&self, parent_block: BlockNum, child_index: usize) -> Result<()> {
        loop {
            let pin = self.file.pin(parent_block)?;
            let buffer_empty = {
                let node = pin.read();
                let NodeBody::Nonleaf { children, .. } = &node.body else { unreachable!() };
                children.get(child_index).map_or(true, |c| c.buffer.is_empty())
            };
            let n_children_before = pin.read().n_children();
            drop(pin);
            if buffer_empty {
                return Ok(());
            }

            self.apply_one_buffered_message(parent_block, child_index)?;

            let n_children_after = self.file.pin(parent_block)?.read().n_children();
            if n_children_after > n_children_before {
                // The child split: finish draining the left half, then
                // the new right sibling.
                self.flush_child_buffer_fully(parent_block, child_index)?;
                self.flush_child_buffer_fully(parent_block, child_index + 1)?;
                return Ok(());
            }
        }
    }

    /// Picks which child of a nonleaf to descend into for `bound`.
    /// `Bound::First`/`Bound::Last` ignore `key` entirely and go
    /// straight to the leftmost/rightmost child — routing them through
    /// [`search::locate_child`] on an empty `key` would always resolve
    /// to child 0, since an empty key sorts before every pivot.
    fn initial_child_index(
        bound: Bound,
        pivots: &crate::pma::Gpma<crate::node::Pivot>,
        key: &[u8],
        comparator: &dyn Comparator,
        n_children: usize,
    ) -> usize {
        match bound {
            Bound::First => 0,
            Bound::Last => n_children.saturating_sub(1),
            _ => search::locate_child(pivots, key, comparator),
        }
    }

    /// Descends from `block` looking for the pair `bound` names,
    /// flushing each nonleaf's chosen child buffer before descending
    /// into it, and continuing into a sibling subtree when `bound`
    /// allows it and nothing was found in the first one tried (spec
    /// §4.2.3).
    pub(crate) fn search_subtree(
        &self,
        block: BlockNum,
        bound: Bound,
        key: &[u8],
        val: &[u8],
    ) -> Result<Option<crate::node::LeafEntry>> {
        let pin = self.file.pin(block)?;
        let is_leaf = pin.read().is_leaf();

        if is_leaf {
            let node = pin.read();
            let NodeBody::Leaf(pairs) = &node.body else { unreachable!() };
            return Ok(search::scan_leaf(pairs, bound, key, val, self.file.comparator()));
        }

        let child_index = {
            let node = pin.read();
            let NodeBody::Nonleaf { pivots, children } = &node.body else { unreachable!() };
            Self::initial_child_index(bound, pivots, key, self.file.comparator(), children.len())
        };
        drop(pin);

        self.flush_child_buffer_fully(block, child_index)?;

        // The flush may have split the child (or even its neighbors via
        // the recursive drain), so relocate rather than trust the index
        // computed before the flush.
        let pin = self.file.pin(block)?;
        let (child_index, child_block, n_children) = {
            let node = pin.read();
            let NodeBody::Nonleaf { pivots, children } = &node.body else { unreachable!() };
            let idx =
                Self::initial_child_index(bound, pivots, key, self.file.comparator(), children.len());
            (idx, children[idx].child, children.len())
        };
        drop(pin);

        let found = self.search_subtree(child_block, bound, key, val)?;
        if found.is_some() || search::stays_within_subtree(bound) {
            return Ok(found);
        }

        match bound {
            Bound::NextAfter | Bound::SetRangeFrom => {
                for i in (child_index + 1)..n_children {
                    let sibling = self.sibling_block(block, i)?;
                    if let Some(found) = self.search_subtree(sibling, Bound::First, &[], &[])? {
                        return Ok(Some(found));
                    }
                }
                Ok(None)
            }
            Bound::PrevBefore => {
                for i in (0..child_index).rev() {
                    let sibling = self.sibling_block(block, i)?;
                    if let Some(found) = self.search_subtree(sibling, Bound::Last, &[], &[])? {
                        return Ok(Some(found));
                    }
                }
                Ok(None)
            }
            Bound::First => {
                for i in (child_index + 1)..n_children {
                    let sibling = self.sibling_block(block, i)?;
                    if let Some(found) = self.search_subtree(sibling, Bound::First, &[], &[])? {
                        return Ok(Some(found));
                    }
                }
                Ok(None)
            }
            Bound::Last => {
                for i in (0..child_index).rev() {
                    let sibling = self.sibling_block(block, i)?;
                    if let Some(found) = self.search_subtree(sibling, Bound::Last, &[], &[])? {
                        return Ok(Some(found));
                    }
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn sibling_block(&self, parent_block: BlockNum, index: usize) -> Result<BlockNum> {
        let pin = self.file.pin(parent_block)?;
        let node = pin.read();
        let NodeBody::Nonleaf { children, .. } = &node.body else { unreachable!() };
        Ok(children[index].child)
    }

    /// Deletes the single pair `(key, val)`, surfacing
    /// [`CursorError::NotFound`] if it isn't present — the semantics a
    /// positioned cursor delete needs, as opposed to [`Brt::delete`],
    /// which succeeds unconditionally (spec §4.1).
    pub(crate) fn cursor_delete(&self, key: &[u8], val: &[u8]) -> Result<()> {
        let existing = self.lookup_exact(key, val)?;
        if existing.is_none() {
            return Err(Error::Cursor(CursorError::NotFound));
        }
        self.delete_both(key, val, TxnId::ROOT)
    }

    fn lookup_exact(&self, key: &[u8], val: &[u8]) -> Result<Option<crate::node::LeafEntry>> {
        let _lock = self.file.structure_lock.lock().expect("structure lock is poisoned");
        let root = self.file.db_root(self.db_name.as_deref());
        self.search_subtree(root, Bound::GetBoth, key, val)
    }

    pub(crate) fn locked_search(&self, bound: Bound, key: &[u8], val: &[u8]) -> Result<Option<crate::node::LeafEntry>> {
        let _lock = self.file.structure_lock.lock().expect("structure lock is poisoned");
        let root = self.file.db_root(self.db_name.as_deref());
        self.search_subtree(root, bound, key, val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbt::LexicographicComparator;

    fn tiny_config(dir: &tempfile::TempDir) -> Config {
        Config::new(dir.path().join("tree.brt")).nodesize(4096).cachesize(8)
    }

    #[test]
    fn scenario_a_insert_lookup_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let brt = tiny_config(&dir).open().unwrap();

        brt.insert(b"hello", b"world", 0).unwrap();
        assert_eq!(Some(Slice::from("world")), brt.lookup(b"hello").unwrap());

        brt.delete(b"hello", 0).unwrap();
        assert_eq!(None, brt.lookup(b"hello").unwrap());
    }

    #[test]
    fn scenario_b_many_inserts_force_splits_and_stay_findable() {
        let dir = tempfile::tempdir().unwrap();
        let brt = tiny_config(&dir).open().unwrap();

        for i in 0..500u32 {
            brt.insert(format!("key{i:05}"), format!("val{i}"), 0).unwrap();
        }

        for i in 0..500u32 {
            let expected = Slice::from(format!("val{i}"));
            assert_eq!(Some(expected), brt.lookup(format!("key{i:05}")).unwrap(), "key{i:05}");
        }

        for i in (0..500u32).step_by(2) {
            brt.delete(format!("key{i:05}"), 0).unwrap();
        }
        for i in 0..500u32 {
            let expected = if i % 2 == 0 { None } else { Some(Slice::from(format!("val{i}"))) };
            assert_eq!(expected, brt.lookup(format!("key{i:05}")).unwrap(), "key{i:05}");
        }
    }

    #[test]
    fn scenario_c_sorted_duplicates_keep_all_values() {
        let dir = tempfile::tempdir().unwrap();
        let brt = tiny_config(&dir)
            .duplicate_policy(DuplicatePolicy::SortedDuplicates)
            .open()
            .unwrap();

        brt.insert(b"k", b"1", 0).unwrap();
        brt.insert(b"k", b"2", 0).unwrap();
        brt.insert(b"k", b"3", 0).unwrap();

        assert_eq!(Some(Slice::from("1")), brt.lookup(b"k").unwrap());

        brt.delete_both(b"k", b"2", 0).unwrap();
        let mut cursor = brt.cursor().unwrap();
        let first = cursor.set(b"k").unwrap();
        assert_eq!((Slice::from("k"), Slice::from("1")), first);
        let next = cursor.next_dup().unwrap();
        assert_eq!((Slice::from("k"), Slice::from("3")), next);
    }

    #[test]
    fn scenario_e_multiple_sub_databases_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("multi.brt");

        let widgets = Config::new(&path).sub_db("widgets").nodesize(4096).open().unwrap();
        let gadgets = Config::new(&path).sub_db("gadgets").nodesize(4096).open().unwrap();

        widgets.insert(b"a", b"1", 0).unwrap();
        gadgets.insert(b"a", b"2", 0).unwrap();

        assert_eq!(Some(Slice::from("1")), widgets.lookup(b"a").unwrap());
        assert_eq!(Some(Slice::from("2")), gadgets.lookup(b"a").unwrap());

        assert!(Config::new(&path).sub_db("missing").create(false).open().is_err());
    }

    #[test]
    fn scenario_f_custom_comparator_orders_by_reversed_bytes() {
        #[derive(Debug)]
        struct ReverseBytes;
        impl Comparator for ReverseBytes {
            fn compare(&self, a: &[u8], b: &[u8]) -> std::cmp::Ordering {
                let ra: Vec<u8> = a.iter().rev().copied().collect();
                let rb: Vec<u8> = b.iter().rev().copied().collect();
                ra.cmp(&rb)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let brt = tiny_config(&dir).comparator(ReverseBytes).open().unwrap();
        brt.insert(b"abc", b"1", 0).unwrap();
        brt.insert(b"abd", b"2", 0).unwrap();
        assert_eq!(Some(Slice::from("1")), brt.lookup(b"abc").unwrap());
    }

    #[test]
    fn reopen_after_close_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persist.brt");

        {
            let brt = Config::new(&path).nodesize(4096).open().unwrap();
            brt.insert(b"durable", b"yes", 0).unwrap();
            brt.close().unwrap();
        }

        let brt = Config::new(&path).nodesize(4096).create(false).open().unwrap();
        assert_eq!(Some(Slice::from("yes")), brt.lookup(b"durable").unwrap());
    }

    #[test]
    fn lexicographic_comparator_is_the_default() {
        let dir = tempfile::tempdir().unwrap();
        let brt = tiny_config(&dir).open().unwrap();
        brt.insert(b"b", b"2", 0).unwrap();
        brt.insert(b"a", b"1", 0).unwrap();
        let cmp = LexicographicComparator;
        assert_eq!(std::cmp::Ordering::Less, cmp.compare(b"a", b"b"));
        assert_eq!(Some(Slice::from("1")), brt.lookup(b"a").unwrap());
    }

    #[test]
    fn small_fanout_splits_nonleaves_before_they_ever_fill_nodesize() {
        let dir = tempfile::tempdir().unwrap();
        let brt = Config::new(dir.path().join("fanout.brt"))
            .nodesize(4096)
            .cachesize(64)
            .fanout(3)
            .open()
            .unwrap();

        for i in 0..300u32 {
            brt.insert(format!("key{i:05}"), format!("val{i}"), 0).unwrap();
        }

        fn walk(brt: &Brt, block: BlockNum, saw_a_nonleaf: &mut bool) {
            let pin = brt.file().pin(block).unwrap();
            let node = pin.read();
            if let NodeBody::Nonleaf { children, .. } = &node.body {
                *saw_a_nonleaf = true;
                assert!(
                    children.len() <= 3,
                    "nonleaf {block:?} has {} children, over the configured fanout of 3",
                    children.len()
                );
                let children: Vec<BlockNum> = children.iter().map(|c| c.child).collect();
                drop(node);
                drop(pin);
                for child in children {
                    walk(brt, child, saw_a_nonleaf);
                }
            }
        }

        let root = brt.file().db_root(brt.db_name());
        let mut saw_a_nonleaf = false;
        walk(&brt, root, &mut saw_a_nonleaf);
        assert!(saw_a_nonleaf, "expected the tree to have grown past a single leaf");

        for i in 0..300u32 {
            let expected = Slice::from(format!("val{i}"));
            assert_eq!(Some(expected), brt.lookup(format!("key{i:05}")).unwrap(), "key{i:05}");
        }
    }

    #[test]
    fn scenario_d_tree_grows_past_one_level_and_every_node_fits_nodesize() {
        let dir = tempfile::tempdir().unwrap();
        let brt = tiny_config(&dir).open().unwrap();

        for i in 0..2000u32 {
            brt.insert(format!("key{i:06}"), format!("value-{i:06}-padding"), 0).unwrap();
        }

        fn walk(brt: &Brt, block: BlockNum, depth: u32, max_depth: &mut u32) {
            *max_depth = (*max_depth).max(depth);
            let pin = brt.file().pin(block).unwrap();
            let node = pin.read();
            let encoded = crate::node::encode_node(&node).unwrap();
            assert!(
                encoded.len() <= node.nodesize as usize,
                "node {block:?} serialized to {} bytes, over its {}-byte nodesize",
                encoded.len(),
                node.nodesize
            );

            if let crate::node::NodeBody::Nonleaf { children, .. } = &node.body {
                let children: Vec<BlockNum> = children.iter().map(|c| c.child).collect();
                drop(node);
                drop(pin);
                for child in children {
                    walk(brt, child, depth + 1, max_depth);
                }
            }
        }

        let root = brt.file().db_root(brt.db_name());
        let mut max_depth = 0;
        walk(&brt, root, 0, &mut max_depth);

        assert!(max_depth > 1, "expected the tree to grow past a single level, got depth {max_depth}");
    }
}

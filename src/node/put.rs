// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The put algorithm for a single node (spec §4.2.1): applying a
//! message directly at a leaf, or routing it into the right child
//! buffer (or buffers, for a duplicate-key delete that straddles a
//! pivot) at a nonleaf.
//!
//! This module only ever touches one node at a time. Forwarding a
//! message straight into a resident child, cascading a flush, and
//! splitting are all orchestrated one level up in [`crate::brt`],
//! which is the layer that holds the cachetable pins needed to reach
//! more than one node.

use super::{LeafEntry, Node, NodeBody, Pivot};
use crate::dbt::Comparator;
use crate::fingerprint::Fingerprint;
use crate::message::{Message, MessageKind};
use crate::pma::BesselDirection;
use std::cmp::Ordering;

/// Whether a put is optimistic (fails fast rather than doing I/O or
/// overfilling a node) or guaranteed to succeed (spec §4.2.1: "weak /
/// strong put").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    /// Fails with [`PutOutcome::EAgain`] rather than overfilling the node.
    Weak,
    /// Always records the message, even if the node temporarily
    /// exceeds `nodesize` (the caller is responsible for then
    /// splitting it).
    Strong,
}

/// The result of [`brtnode_put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The message was recorded.
    Applied,
    /// A [`PutMode::Weak`] put declined rather than overflow the node.
    /// Never escapes the core as an [`crate::Error`] (spec §7,
    /// "Transient").
    EAgain,
}

fn pair_fingerprint(salt: u32, key: &[u8], val: &[u8]) -> Fingerprint {
    // Every live leaf pair contributes the same way regardless of which
    // message kind most recently touched it, so insert and delete of
    // the identical pair toggle the identical bit pattern.
    Fingerprint::of_pair(salt, MessageKind::Insert, key, val)
}

/// Finds the pivot index `i` such that `key <= pivots[i]` (the child
/// that must contain `key` under invariant 1: `max(child[i]) <=
/// pivot[i] < min(child[i+1])`), or `n_pivots` if `key` is greater
/// than every pivot. Also reports whether `key` matched a pivot
/// exactly, which callers need for the duplicate-delete-on-pivot rule.
fn locate_child(
    pivots: &crate::pma::Gpma<Pivot>,
    key: &[u8],
    cmp: &dyn Comparator,
) -> (usize, bool) {
    for (rank, (_, pivot)) in pivots.iter().enumerate() {
        match cmp.compare(key, &pivot.key) {
            Ordering::Less => return (rank, false),
            Ordering::Equal => return (rank, true),
            Ordering::Greater => {}
        }
    }
    (pivots.len(), false)
}

/// The children a message must be enqueued into (spec §4.2.1,
/// "replicating command" and the duplicate-delete-on-pivot open
/// question resolved in DESIGN.md: a delete whose key equals pivot
/// `p[i]` targets both child `i` and child `i+1`).
fn target_children(
    pivots: &crate::pma::Gpma<Pivot>,
    cmd: &Message,
    cmp: &dyn Comparator,
    duplicates_sorted: bool,
) -> Vec<usize> {
    let (idx, exact_pivot_match) = locate_child(pivots, &cmd.key, cmp);

    if duplicates_sorted && cmd.kind.replicates_in_duplicate_mode() && exact_pivot_match {
        vec![idx, idx + 1]
    } else {
        vec![idx]
    }
}

/// Applies or enqueues `cmd` against a single node (spec §4.2.1,
/// `brtnode_put`).
pub fn brtnode_put(
    node: &mut Node,
    cmd: &Message,
    mode: PutMode,
    cmp: &dyn Comparator,
    duplicates_sorted: bool,
) -> crate::Result<PutOutcome> {
    match &mut node.body {
        NodeBody::Leaf(_) => leaf_put(node, cmd, mode, cmp, duplicates_sorted),
        NodeBody::Nonleaf { .. } => nonleaf_put(node, cmd, mode, cmp, duplicates_sorted),
    }
}

fn leaf_put(
    node: &mut Node,
    cmd: &Message,
    mode: PutMode,
    cmp: &dyn Comparator,
    duplicates_sorted: bool,
) -> crate::Result<PutOutcome> {
    let salt = node.rand4fingerprint;
    let nodesize = node.nodesize;

    let NodeBody::Leaf(pairs) = &mut node.body else {
        unreachable!("leaf_put called on a nonleaf");
    };

    match cmd.kind {
        MessageKind::Insert => {
            if duplicates_sorted {
                let exists = pairs.iter().any(|(_, e)| {
                    cmp.compare(&e.key, &cmd.key) == Ordering::Equal
                        && cmp.compare(&e.val, &cmd.val) == Ordering::Equal
                });
                if exists {
                    return Ok(PutOutcome::Applied);
                }

                if mode == PutMode::Weak {
                    let additional = 8 + cmd.key.len() + cmd.val.len();
                    if node.estimated_size() + additional > nodesize as usize {
                        return Ok(PutOutcome::EAgain);
                    }
                }

                let key = cmd.key.clone();
                let val = cmd.val.clone();
                pairs.insert_bessel(LeafEntry { key: cmd.key.clone(), val: cmd.val.clone() }, |e| {
                    match cmp.compare(&e.key, &key) {
                        Ordering::Equal => cmp.compare(&e.val, &val),
                        other => other,
                    }
                });
                node.local_fingerprint.toggle(pair_fingerprint(salt, &cmd.key, &cmd.val));
            } else if let Ok((idx, _)) =
                pairs.lookup_bessel(BesselDirection::Zero, |e| cmp.compare(&e.key, &cmd.key))
            {
                if mode == PutMode::Weak {
                    let existing = pairs.get(idx).expect("index from lookup_bessel is occupied");
                    let delta = cmd.val.len() as isize - existing.val.len() as isize;
                    if delta > 0 && node.estimated_size() + delta as usize > nodesize as usize {
                        return Ok(PutOutcome::EAgain);
                    }
                }

                let entry = pairs.get_mut(idx).expect("index from lookup_bessel is occupied");
                node.local_fingerprint
                    .toggle(pair_fingerprint(salt, &entry.key, &entry.val));
                entry.val = cmd.val.clone();
                node.local_fingerprint.toggle(pair_fingerprint(salt, &cmd.key, &cmd.val));
            } else {
                if mode == PutMode::Weak {
                    let additional = 8 + cmd.key.len() + cmd.val.len();
                    if node.estimated_size() + additional > nodesize as usize {
                        return Ok(PutOutcome::EAgain);
                    }
                }

                let key = cmd.key.clone();
                pairs.insert_bessel(LeafEntry { key: cmd.key.clone(), val: cmd.val.clone() }, |e| {
                    cmp.compare(&e.key, &key)
                });
                node.local_fingerprint.toggle(pair_fingerprint(salt, &cmd.key, &cmd.val));
            }
        }
        MessageKind::Delete => {
            let key = cmd.key.clone();
            let (removed, _) = pairs.delete_bessel(|e| cmp.compare(&e.key, &key));
            for e in removed {
                node.local_fingerprint.toggle(pair_fingerprint(salt, &e.key, &e.val));
            }
            let _ = duplicates_sorted;
        }
        MessageKind::DeleteBoth => {
            let key = cmd.key.clone();
            let val = cmd.val.clone();
            let (removed, _) = pairs.delete_bessel(|e| match cmp.compare(&e.key, &key) {
                Ordering::Equal => cmp.compare(&e.val, &val),
                other => other,
            });
            for e in removed {
                node.local_fingerprint.toggle(pair_fingerprint(salt, &e.key, &e.val));
            }
        }
        MessageKind::None => {}
    }

    node.dirty = true;
    Ok(PutOutcome::Applied)
}

fn nonleaf_put(
    node: &mut Node,
    cmd: &Message,
    mode: PutMode,
    cmp: &dyn Comparator,
    duplicates_sorted: bool,
) -> crate::Result<PutOutcome> {
    let nodesize = node.nodesize;

    let NodeBody::Nonleaf { pivots, children } = &mut node.body else {
        unreachable!("nonleaf_put called on a leaf");
    };

    let targets = target_children(pivots, cmd, cmp, duplicates_sorted);

    if mode == PutMode::Weak {
        let additional_per_target = cmd.serialized_size();
        let total_additional = additional_per_target * targets.len();
        let current = node.estimated_size();
        if current + total_additional > nodesize as usize {
            return Ok(PutOutcome::EAgain);
        }
    }

    for &t in &targets {
        children[t].buffer.push(cmd.clone());
    }
    node.dirty = true;
    Ok(PutOutcome::Applied)
}

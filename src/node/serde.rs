// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Node serialisation (spec §4.2.4): the fixed node header followed by
//! either a leaf's live pairs or a nonleaf's pivot table and per-child
//! message buffers. This module produces/consumes the *uncompressed*
//! byte representation; [`crate::block_io`] handles compression
//! framing and the checksum trailer around it.

use super::{BlockNum, ChildSlot, LeafEntry, Node, NodeBody, Pivot};
use crate::coding::{Decode, Encode};
use crate::fingerprint::Fingerprint;
use crate::message::Message;
use crate::pma::Gpma;
use crate::Slice;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

const TAG_LEAF: u8 = 0;
const TAG_NONLEAF: u8 = 1;

/// Keys and values are overwhelmingly short (node-size-bounded, spec
/// §1), so their length prefix is varint-coded rather than a fixed
/// `u32` — the same shrink-the-common-case tradeoff the length
/// prefixes in a leaf's live pairs get from it.
fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    w.write_u32_varint(bytes.len() as u32)?;
    w.write_all(bytes)
}

fn read_bytes<R: Read>(r: &mut R) -> std::io::Result<Slice> {
    let len = r.read_u32_varint()? as usize;
    let mut buf = vec![0; len];
    r.read_exact(&mut buf)?;
    Ok(Slice::from(buf))
}

/// Serializes a node's header and body into its uncompressed on-disk
/// representation (spec §4.2.4).
pub fn encode_node(node: &Node) -> crate::Result<Vec<u8>> {
    let mut out = Vec::new();

    out.write_u32::<BigEndian>(crate::block_io::MAGIC)?;
    out.write_u32::<BigEndian>(node.nodesize)?;
    out.write_u32::<BigEndian>(node.flags)?;
    out.write_u64::<BigEndian>(node.blocknum.as_u64())?;
    out.write_u32::<BigEndian>(node.layout_version)?;
    out.write_u32::<BigEndian>(node.height)?;
    out.write_u32::<BigEndian>(node.rand4fingerprint)?;
    out.write_u64::<BigEndian>(node.local_fingerprint.as_u64())?;
    out.write_u64::<BigEndian>(node.disk_lsn)?;

    match &node.body {
        NodeBody::Leaf(entries) => {
            out.write_u8(TAG_LEAF)?;
            out.write_u32::<BigEndian>(entries.len() as u32)?;
            for (_, entry) in entries.iter() {
                write_bytes(&mut out, &entry.key)?;
                write_bytes(&mut out, &entry.val)?;
            }
        }
        NodeBody::Nonleaf { pivots, children } => {
            out.write_u8(TAG_NONLEAF)?;
            out.write_u32::<BigEndian>(pivots.len() as u32)?;
            for (_, pivot) in pivots.iter() {
                write_bytes(&mut out, &pivot.key)?;
            }

            out.write_u32::<BigEndian>(children.len() as u32)?;
            for child in children {
                out.write_u64::<BigEndian>(child.child.as_u64())?;
                out.write_u64::<BigEndian>(child.subtree_fingerprint.as_u64())?;
                out.write_u32::<BigEndian>(child.buffer.len() as u32)?;
                for msg in child.buffer.iter() {
                    msg.encode_into(&mut out).map_err(crate::Error::from)?;
                }
            }
        }
    }

    Ok(out)
}

/// Deserializes a node's header and body from its uncompressed
/// on-disk representation. The node's `dirty` bit is cleared, and
/// `log_lsn` is initialized to `disk_lsn` (the log record describing
/// the most recent change is, by definition, no later than the flush
/// that wrote this block).
pub fn decode_node(bytes: &[u8]) -> crate::Result<Node> {
    let mut r = bytes;

    let magic = r.read_u32::<BigEndian>()?;
    if magic != crate::block_io::MAGIC {
        return Err(crate::Error::BadFormat("node block magic number mismatch"));
    }

    let nodesize = r.read_u32::<BigEndian>()?;
    let flags = r.read_u32::<BigEndian>()?;
    let blocknum = BlockNum::new(r.read_u64::<BigEndian>()?);
    let layout_version = r.read_u32::<BigEndian>()?;
    let height = r.read_u32::<BigEndian>()?;
    let rand4fingerprint = r.read_u32::<BigEndian>()?;
    let local_fingerprint = Fingerprint::from_raw(r.read_u64::<BigEndian>()?);
    let disk_lsn = r.read_u64::<BigEndian>()?;

    let tag = r.read_u8()?;
    let body = match tag {
        TAG_LEAF => {
            let n = r.read_u32::<BigEndian>()? as usize;
            let mut entries = Vec::with_capacity(n);
            for _ in 0..n {
                let key = read_bytes(&mut r)?;
                let val = read_bytes(&mut r)?;
                entries.push(LeafEntry { key, val });
            }
            NodeBody::Leaf(Gpma::from_sorted_vec(entries))
        }
        TAG_NONLEAF => {
            let n_pivots = r.read_u32::<BigEndian>()? as usize;
            let mut pivots = Vec::with_capacity(n_pivots);
            for _ in 0..n_pivots {
                pivots.push(Pivot { key: read_bytes(&mut r)? });
            }

            let n_children = r.read_u32::<BigEndian>()? as usize;
            let mut children = Vec::with_capacity(n_children);
            for _ in 0..n_children {
                let child = BlockNum::new(r.read_u64::<BigEndian>()?);
                let subtree_fingerprint = Fingerprint::from_raw(r.read_u64::<BigEndian>()?);
                let n_messages = r.read_u32::<BigEndian>()? as usize;
                let mut buffer = crate::message::MessageBuffer::new();
                for _ in 0..n_messages {
                    buffer.push(Message::decode_from(&mut r).map_err(crate::Error::from)?);
                }
                children.push(ChildSlot {
                    child,
                    subtree_fingerprint,
                    buffer,
                });
            }

            NodeBody::Nonleaf {
                pivots: Gpma::from_sorted_vec(pivots),
                children,
            }
        }
        _ => return Err(crate::Error::BadFormat("unrecognized node body tag")),
    };

    Ok(Node {
        blocknum,
        nodesize,
        flags,
        height,
        layout_version,
        rand4fingerprint,
        local_fingerprint,
        disk_lsn,
        log_lsn: disk_lsn,
        dirty: false,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::BlockNum;

    #[test]
    fn leaf_roundtrips_through_encode_decode() {
        let mut leaf = Node::new_leaf(BlockNum::new(1), 4096, 0, 7);
        if let NodeBody::Leaf(pairs) = &mut leaf.body {
            for i in 0..10u32 {
                let key = Slice::from(format!("k{i:04}"));
                pairs.insert_bessel(
                    LeafEntry {
                        key: key.clone(),
                        val: Slice::from(format!("v{i}")),
                    },
                    |e| e.key.as_ref().cmp(key.as_ref()),
                );
            }
        }

        let encoded = encode_node(&leaf).unwrap();
        let decoded = decode_node(&encoded).unwrap();

        assert_eq!(leaf.blocknum, decoded.blocknum);
        assert_eq!(leaf.nodesize, decoded.nodesize);
        assert!(decoded.is_leaf());
        assert!(!decoded.dirty);

        let NodeBody::Leaf(decoded_pairs) = &decoded.body else {
            panic!("expected leaf body");
        };
        assert_eq!(10, decoded_pairs.len());
        let keys: Vec<Vec<u8>> = decoded_pairs.iter().map(|(_, e)| e.key.to_vec()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(sorted, keys, "decoded entries should be in key order");
    }

    #[test]
    fn nonleaf_roundtrips_pivots_and_buffered_messages() {
        let mut nonleaf = Node::new_nonleaf(
            BlockNum::new(1),
            4096,
            0,
            1,
            3,
            BlockNum::new(2),
            BlockNum::new(3),
        );

        if let NodeBody::Nonleaf { pivots, children } = &mut nonleaf.body {
            pivots.insert_bessel(
                Pivot { key: Slice::from("m") },
                |p| p.key.as_ref().cmp(b"m"),
            );
            children[0].buffer.push(Message {
                kind: crate::message::MessageKind::Insert,
                txn_id: crate::TxnId::ROOT,
                key: Slice::from("a"),
                val: Slice::from("1"),
            });
        }

        let encoded = encode_node(&nonleaf).unwrap();
        let decoded = decode_node(&encoded).unwrap();

        let NodeBody::Nonleaf { pivots, children } = &decoded.body else {
            panic!("expected nonleaf body");
        };
        assert_eq!(1, pivots.len());
        assert_eq!(2, children.len());
        assert_eq!(1, children[0].buffer.len());
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut bytes = vec![0u8; 64];
        bytes[0..4].copy_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
        assert!(decode_node(&bytes).is_err());
    }
}

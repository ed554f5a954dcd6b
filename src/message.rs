// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Messages (`BRT_CMD` in spec §3.1): the tagged mutations queued in a
//! nonleaf's per-child buffers and eventually applied at a leaf.

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::{Slice, TxnId};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::VecDeque;
use std::io::{Read, Write};

/// The kind of mutation a [`Message`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// Insert, replacing any existing value for the key (non-duplicate
    /// mode) or adding another `(key, value)` pair (duplicate mode).
    Insert = 0,
    /// Remove every pair matching the key (duplicate mode: every
    /// duplicate; non-duplicate mode: the single pair).
    Delete = 1,
    /// Remove only the pair matching both key and value.
    DeleteBoth = 2,
    /// A no-op placeholder, never applied; used by cursor-delete to
    /// mark a request that resolved to nothing because of a prior
    /// successful cascade.
    None = 3,
}

impl MessageKind {
    /// `true` for commands whose effect on a duplicate-key tree may
    /// span more than one child of a nonleaf (spec §4.2.1,
    /// "replicating command").
    #[must_use]
    pub fn replicates_in_duplicate_mode(self) -> bool {
        matches!(self, Self::Delete)
    }
}

impl Encode for MessageKind {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u8(*self as u8)?;
        Ok(())
    }
}

impl Decode for MessageKind {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        match reader.read_u8()? {
            0 => Ok(Self::Insert),
            1 => Ok(Self::Delete),
            2 => Ok(Self::DeleteBoth),
            3 => Ok(Self::None),
            tag => Err(DecodeError::InvalidTag(("MessageKind", tag))),
        }
    }
}

/// A pending mutation, immutable once enqueued (spec §3.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// What kind of mutation this is.
    pub kind: MessageKind,
    /// The transaction that issued this mutation.
    pub txn_id: TxnId,
    /// The target key.
    pub key: Slice,
    /// The value (meaningful for `Insert` and `DeleteBoth`; empty for `Delete`).
    pub val: Slice,
}

impl Message {
    /// Serialized size on disk/in a buffer: kind tag + txn id + two
    /// length-prefixed byte strings.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        1 + 8 + 4 + self.key.len() + 4 + self.val.len()
    }
}

impl Encode for Message {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        self.kind.encode_into(writer)?;
        writer.write_u64::<BigEndian>(self.txn_id.as_u64())?;
        writer.write_u32::<BigEndian>(self.key.len() as u32)?;
        writer.write_all(&self.key)?;
        writer.write_u32::<BigEndian>(self.val.len() as u32)?;
        writer.write_all(&self.val)?;
        Ok(())
    }
}

impl Decode for Message {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let kind = MessageKind::decode_from(reader)?;
        let txn_id = TxnId::new(reader.read_u64::<BigEndian>()?);

        let key_len = reader.read_u32::<BigEndian>()? as usize;
        let mut key = vec![0; key_len];
        reader.read_exact(&mut key)?;

        let val_len = reader.read_u32::<BigEndian>()? as usize;
        let mut val = vec![0; val_len];
        reader.read_exact(&mut val)?;

        Ok(Self {
            kind,
            txn_id,
            key: Slice::from(key),
            val: Slice::from(val),
        })
    }
}

/// A FIFO queue of messages destined for one child, plus its byte
/// accounting (`bytes_in_buffer` in spec §3.1).
///
/// Message order within one buffer is delivery order (spec §3.2
/// invariant 3): pushing always appends, draining always pops from
/// the front.
#[derive(Debug, Clone, Default)]
pub struct MessageBuffer {
    messages: VecDeque<Message>,
    bytes: usize,
}

impl MessageBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// `true` if no messages are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Total serialized bytes of the queued messages.
    #[must_use]
    pub fn bytes_in_buffer(&self) -> usize {
        self.bytes
    }

    /// Appends a message to the back of the queue.
    pub fn push(&mut self, msg: Message) {
        self.bytes += msg.serialized_size();
        self.messages.push_back(msg);
    }

    /// Removes and returns the oldest queued message.
    pub fn pop_front(&mut self) -> Option<Message> {
        let msg = self.messages.pop_front()?;
        self.bytes -= msg.serialized_size();
        Some(msg)
    }

    /// Iterates messages in FIFO (delivery) order without draining them.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Drains every queued message in FIFO order.
    pub fn drain(&mut self) -> impl Iterator<Item = Message> + '_ {
        self.bytes = 0;
        self.messages.drain(..)
    }
}

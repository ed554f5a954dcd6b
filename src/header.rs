// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The BRT header block (spec §3.1, §6): root block number(s), the
//! block allocator's freelist and watermark, node size, flags, and the
//! optional sub-database name table. Persisted at file offset 0,
//! written at creation and on every clean close (spec §3.3).
//!
//! The allocator never reuses a [`BlockNum`]: rewriting a node always
//! assigns a fresh logical number (spec §6, "Node rewrites may allocate
//! a new block rather than overwrite in place"), while the *physical*
//! byte ranges old blocks occupied are tracked in a reusable free list
//! so a long-lived file doesn't grow without bound. Sub-database names
//! are kept in an [`Arena`] rather than as individually heap-allocated
//! `String`s, and the block-to-offset map is a [`HashTable`] — the same
//! two small containers the cachetable and node engine already depend
//! on, reused here for the header's own bookkeeping.

use crate::arena::{Arena, ArenaHandle};
use crate::hashtable::HashTable;
use crate::node::BlockNum;
use crate::CompressionType;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Magic number stamped at the front of the header block (ASCII "BRTH").
pub const MAGIC: u32 = 0x4252_5448;

struct SubDbEntry {
    name: Option<ArenaHandle>,
    root: BlockNum,
}

/// The header block persisted at file offset 0.
pub struct Header {
    nodesize: u32,
    flags: u32,
    compression: CompressionType,
    names: Arena,
    dbs: Vec<SubDbEntry>,
    next_blocknum: u64,
    locations: HashTable<BlockNum, (u64, u32)>,
    free: Vec<(u64, u32)>,
    watermark: u64,
}

impl Header {
    /// Creates a fresh header for a brand-new file: no sub-databases
    /// yet, space for real nodes starting at `2 * nodesize` (spec §6:
    /// "Node blocks at positions assigned by the allocator starting at
    /// `2 * nodesize`"), reserving room for the header itself to grow.
    #[must_use]
    pub fn create(nodesize: u32, flags: u32, compression: CompressionType) -> Self {
        Self {
            nodesize,
            flags,
            compression,
            names: Arena::new(),
            dbs: Vec::new(),
            next_blocknum: 1,
            locations: HashTable::new(),
            free: Vec::new(),
            watermark: 2 * u64::from(nodesize),
        }
    }

    /// Configured maximum serialized node size.
    #[must_use]
    pub fn nodesize(&self) -> u32 {
        self.nodesize
    }

    /// Opaque per-tree flags.
    #[must_use]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Compression method new nodes are written with.
    #[must_use]
    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    fn db_index(&self, name: Option<&str>) -> Option<usize> {
        self.dbs.iter().position(|entry| match (&entry.name, name) {
            (None, None) => true,
            (Some(handle), Some(name)) => self.names.get(handle) == name.as_bytes(),
            _ => false,
        })
    }

    /// The root block number for a named (or, if `name` is `None`, the
    /// default) sub-database, if it has been created.
    #[must_use]
    pub fn db_root(&self, name: Option<&str>) -> Option<BlockNum> {
        self.db_index(name).map(|i| self.dbs[i].root)
    }

    /// Creates a new sub-database entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::AlreadyThere`] if a sub-database of this
    /// name already exists (spec §7, "Duplicate").
    pub fn create_db(&mut self, name: Option<&str>, root: BlockNum) -> crate::Result<()> {
        if self.db_index(name).is_some() {
            return Err(crate::Error::AlreadyThere);
        }
        let handle = name.map(|n| self.names.alloc_copy(n.as_bytes()));
        self.dbs.push(SubDbEntry { name: handle, root });
        Ok(())
    }

    /// Updates the root block number of an existing sub-database (spec
    /// §4.2.2, "Root split"; spec §4.4, `change_root`).
    ///
    /// # Panics
    ///
    /// Panics if no sub-database of this name has been created yet.
    pub fn set_db_root(&mut self, name: Option<&str>, root: BlockNum) {
        let idx = self
            .db_index(name)
            .expect("set_db_root: sub-database does not exist");
        self.dbs[idx].root = root;
    }

    /// Assigns a fresh, never-before-used block number.
    pub fn new_blocknum(&mut self) -> BlockNum {
        let n = self.next_blocknum;
        self.next_blocknum += 1;
        BlockNum::new(n)
    }

    /// Reserves `len` bytes of file space, preferring a first-fit
    /// region from the freed-space list before extending the
    /// watermark (spec §6, "Freelist / block allocator").
    pub fn allocate_space(&mut self, len: u32) -> u64 {
        if let Some(i) = self.free.iter().position(|&(_, l)| l >= len) {
            let (offset, free_len) = self.free.remove(i);
            if free_len > len {
                self.free.push((offset + u64::from(len), free_len - len));
            }
            return offset;
        }

        let offset = self.watermark;
        self.watermark += u64::from(len);
        offset
    }

    /// Records where a block's bytes live, so a later fetch can find
    /// them.
    pub fn record_location(&mut self, blocknum: BlockNum, offset: u64, len: u32) {
        self.locations.insert(blocknum, (offset, len));
    }

    /// The `(offset, len)` a block was last recorded at.
    #[must_use]
    pub fn location_of(&self, blocknum: BlockNum) -> Option<(u64, u32)> {
        self.locations.get(&blocknum).copied()
    }

    /// Forgets a block's location and returns its old space to the
    /// free list for reuse, without retiring the logical block number
    /// itself (the caller decides whether it's ever assigned again —
    /// in practice it never is, since `new_blocknum` always advances).
    pub fn free_block(&mut self, blocknum: BlockNum) {
        if let Some((offset, len)) = self.locations.remove(&blocknum) {
            self.free.push((offset, len));
        }
    }

    /// Serializes the header to bytes (spec §6: "All multi-byte
    /// integers big-endian").
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::BadFormat`] if the encoded header would
    /// not fit in its reserved region before the watermark.
    pub fn encode(&self) -> crate::Result<Vec<u8>> {
        let mut out = Vec::new();
        out.write_u32::<BigEndian>(MAGIC)?;
        out.write_u32::<BigEndian>(self.nodesize)?;
        out.write_u32::<BigEndian>(self.flags)?;
        self.compression.encode_into(&mut out).map_err(crate::Error::from)?;
        out.write_u64::<BigEndian>(self.next_blocknum)?;
        out.write_u64::<BigEndian>(self.watermark)?;

        out.write_u32::<BigEndian>(self.dbs.len() as u32)?;
        for entry in &self.dbs {
            match &entry.name {
                Some(handle) => {
                    let bytes = self.names.get(handle);
                    out.write_u32::<BigEndian>(bytes.len() as u32)?;
                    out.write_all(bytes)?;
                }
                None => out.write_u32::<BigEndian>(u32::MAX)?,
            }
            out.write_u64::<BigEndian>(entry.root.as_u64())?;
        }

        let locations: Vec<(BlockNum, (u64, u32))> =
            self.locations.iter().map(|(k, v)| (*k, *v)).collect();
        out.write_u32::<BigEndian>(locations.len() as u32)?;
        for (blocknum, (offset, len)) in locations {
            out.write_u64::<BigEndian>(blocknum.as_u64())?;
            out.write_u64::<BigEndian>(offset)?;
            out.write_u32::<BigEndian>(len)?;
        }

        out.write_u32::<BigEndian>(self.free.len() as u32)?;
        for (offset, len) in &self.free {
            out.write_u64::<BigEndian>(*offset)?;
            out.write_u32::<BigEndian>(*len)?;
        }

        if (out.len() as u64) > 2 * u64::from(self.nodesize) {
            return Err(crate::Error::BadFormat(
                "header grew past its reserved region before the watermark",
            ));
        }

        Ok(out)
    }

    /// Deserializes a header previously produced by [`Header::encode`].
    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        let mut r = bytes;

        let magic = r.read_u32::<BigEndian>()?;
        if magic != MAGIC {
            return Err(crate::Error::BadFormat("header magic number mismatch"));
        }

        let nodesize = r.read_u32::<BigEndian>()?;
        let flags = r.read_u32::<BigEndian>()?;
        let compression = CompressionType::decode_from(&mut r).map_err(crate::Error::from)?;
        let next_blocknum = r.read_u64::<BigEndian>()?;
        let watermark = r.read_u64::<BigEndian>()?;

        let mut names = Arena::new();
        let n_dbs = r.read_u32::<BigEndian>()? as usize;
        let mut dbs = Vec::with_capacity(n_dbs);
        for _ in 0..n_dbs {
            let name_len = r.read_u32::<BigEndian>()?;
            let name = if name_len == u32::MAX {
                None
            } else {
                let mut buf = vec![0; name_len as usize];
                r.read_exact(&mut buf)?;
                Some(names.alloc_copy(&buf))
            };
            let root = BlockNum::new(r.read_u64::<BigEndian>()?);
            dbs.push(SubDbEntry { name, root });
        }

        let mut locations = HashTable::new();
        let n_locations = r.read_u32::<BigEndian>()? as usize;
        for _ in 0..n_locations {
            let blocknum = BlockNum::new(r.read_u64::<BigEndian>()?);
            let offset = r.read_u64::<BigEndian>()?;
            let len = r.read_u32::<BigEndian>()?;
            locations.insert(blocknum, (offset, len));
        }

        let n_free = r.read_u32::<BigEndian>()? as usize;
        let mut free = Vec::with_capacity(n_free);
        for _ in 0..n_free {
            let offset = r.read_u64::<BigEndian>()?;
            let len = r.read_u32::<BigEndian>()?;
            free.push((offset, len));
        }

        Ok(Self {
            nodesize,
            flags,
            compression,
            names,
            dbs,
            next_blocknum,
            locations,
            free,
            watermark,
        })
    }

    /// Writes the header at file offset 0, preceded by a 4-byte length
    /// prefix so [`Header::read_from`] doesn't need to guess its size.
    pub fn write_to(&self, file: &mut std::fs::File) -> crate::Result<()> {
        use std::io::{Seek, SeekFrom};

        let encoded = self.encode()?;
        file.seek(SeekFrom::Start(0))?;
        file.write_u32::<BigEndian>(encoded.len() as u32)?;
        file.write_all(&encoded)?;
        file.flush()?;
        Ok(())
    }

    /// Reads the header back from file offset 0.
    pub fn read_from(file: &mut std::fs::File) -> crate::Result<Self> {
        use std::io::{Seek, SeekFrom};

        file.seek(SeekFrom::Start(0))?;
        let len = file.read_u32::<BigEndian>()?;
        let mut buf = vec![0; len as usize];
        file.read_exact(&mut buf)?;
        Self::decode(&buf)
    }
}

use crate::coding::{Decode, Encode};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrips_through_encode_decode() {
        let mut header = Header::create(4096, 0, CompressionType::None);
        let root = header.new_blocknum();
        header.create_db(None, root).unwrap();

        let db1_root = header.new_blocknum();
        header.create_db(Some("db1"), db1_root).unwrap();

        header.record_location(root, 8192, 512);

        let encoded = header.encode().unwrap();
        let decoded = Header::decode(&encoded).unwrap();

        assert_eq!(4096, decoded.nodesize());
        assert_eq!(Some(root), decoded.db_root(None));
        assert_eq!(Some(db1_root), decoded.db_root(Some("db1")));
        assert_eq!(None, decoded.db_root(Some("nope")));
        assert_eq!(Some((8192, 512)), decoded.location_of(root));
    }

    #[test]
    fn create_db_rejects_duplicate_names() {
        let mut header = Header::create(4096, 0, CompressionType::None);
        header.create_db(Some("db1"), BlockNum::new(1)).unwrap();
        assert!(header.create_db(Some("db1"), BlockNum::new(2)).is_err());
    }

    #[test]
    fn allocate_space_reuses_freed_regions_first_fit() {
        let mut header = Header::create(64, 0, CompressionType::None);
        let base = header.allocate_space(100);
        assert_eq!(128, base); // 2 * nodesize

        header.free.push((base, 100));
        let reused = header.allocate_space(50);
        assert_eq!(base, reused);
        assert_eq!(vec![(base + 50, 50)], header.free);
    }

    #[test]
    fn new_blocknum_is_monotonic_and_never_repeats() {
        let mut header = Header::create(4096, 0, CompressionType::None);
        let a = header.new_blocknum();
        let b = header.new_blocknum();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn write_then_read_from_file_roundtrips() {
        let mut file = tempfile::tempfile().unwrap();
        let mut header = Header::create(4096, 0, CompressionType::Dictionary);
        let root = header.new_blocknum();
        header.create_db(None, root).unwrap();
        header.write_to(&mut file).unwrap();

        let reopened = Header::read_from(&mut file).unwrap();
        assert_eq!(Some(root), reopened.db_root(None));
        assert_eq!(CompressionType::Dictionary, reopened.compression());
    }
}

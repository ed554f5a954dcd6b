// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A write-optimized, transactional, embedded key/value storage engine
//! core: a **Buffered Repository Tree** (BRT).
//!
//! A BRT is a B-tree variant in which interior nodes carry message
//! buffers, so that insertions and deletions are first recorded at the
//! root and lazily cascade toward the leaves in batches. This crate
//! exposes an ordered key→value map supporting point lookup, ordered
//! cursors, insert, and delete, backed by a single file per tree.
//!
//! ##### NOTE
//!
//! > This crate is the storage core only. It does not ship a
//! > write-ahead log, lock manager, or transaction manager — it emits
//! > redo hooks and accepts an opaque transaction id, and expects a
//! > serializing outer layer to own everything else (see `SPEC_FULL.md`
//! > §1 for the exact boundary).
//!
//! # Example usage
//!
//! ```
//! use brt_core::Config;
//! # let folder = tempfile::tempdir()?;
//!
//! let brt = Config::new(folder.path()).open()?;
//!
//! brt.insert(b"my_key", b"my_value", 0)?;
//! assert_eq!(Some(b"my_value".to_vec()), brt.lookup(b"my_key")?.map(|v| v.to_vec()));
//!
//! let mut cursor = brt.cursor()?;
//! cursor.first()?;
//!
//! brt.delete(b"my_key", 0)?;
//! assert_eq!(None, brt.lookup(b"my_key")?);
//! #
//! # Ok::<(), brt_core::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::option_if_let_else)]

mod arena;
pub mod block_io;
mod bread;
pub mod brt;
mod cachetable;
mod checksum;
pub mod coding;
mod compression;
pub mod config;
mod cursor;
mod dbt;
mod error;
mod fingerprint;
mod hashtable;
mod header;
mod log_capability;
mod message;
pub mod node;
mod omt;
pub mod pma;
mod search;
mod slice;
mod txn;

pub use {
    brt::Brt,
    cachetable::{Cachetable, FileId},
    checksum::Checksum,
    compression::CompressionType,
    config::{Config, DuplicatePolicy, FanoutPolicy},
    cursor::{Cursor, CursorOp},
    dbt::{Comparator, Dbt, LexicographicComparator},
    error::{CursorError, Error, Result},
    log_capability::{LogCapability, LogRecord, NoopLogCapability},
    node::BlockNum,
    slice::Slice,
    txn::TxnId,
};

/// A key or value held by the tree. Cheap to clone (see [`Slice`]).
pub type UserKey = Slice;

/// A value held by the tree. Cheap to clone (see [`Slice`]).
pub type UserValue = Slice;

/// A key/value pair, as returned by cursor iteration.
pub type KvPair = (UserKey, UserValue);

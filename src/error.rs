// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{checksum::Checksum, compression::CompressionType};

/// Errors that can occur while operating on a [`crate::brt::Brt`].
///
/// Corruption and resource errors are returned to the caller; transient
/// conditions (`EAGAIN` from a weak put) never escape the core as an
/// `Error` variant — they are represented internally by
/// [`crate::node::put::PutOutcome`] instead.
#[derive(Debug)]
pub enum Error {
    /// I/O error talking to the backing file.
    Io(std::io::Error),

    /// Serialization of a node or header failed.
    Encode(crate::coding::EncodeError),

    /// Deserialization of a node or header failed.
    Decode(crate::coding::DecodeError),

    /// Decompression of a node's payload failed.
    Decompress(CompressionType),

    /// A block's on-disk checksum did not match the recomputed one.
    ///
    /// The tree that produced this error must be considered unusable
    /// until repaired out of band (see spec §7, "Corruption").
    ChecksumMismatch {
        /// Checksum recomputed from the bytes actually read off disk.
        got: Checksum,
        /// Checksum recorded in the block trailer.
        expected: Checksum,
    },

    /// A nonleaf's recorded subtree fingerprint didn't match the
    /// fingerprint recomputed from the child (spec §3.2 invariant 4).
    FingerprintMismatch {
        /// Recomputed fingerprint.
        got: u64,
        /// Fingerprint recorded in the parent.
        expected: u64,
    },

    /// The header's magic number or layout version could not be parsed.
    BadFormat(&'static str),

    /// A key/value pair exceeds half the configured node size.
    PairTooLarge {
        /// Size of the offending pair, in bytes.
        size: usize,
        /// Configured node size.
        nodesize: u32,
    },

    /// `INSERT_NO_OVERWRITE` collided with an existing key.
    KeyExist,

    /// A named sub-database of the same name already exists.
    AlreadyThere,

    /// `brt_open` was called with `create = false` against a
    /// sub-database that hasn't been created yet.
    DbNotFound,

    /// The cachetable or allocator ran out of resources.
    OutOfMemory,

    /// Propagated from an external lock manager via the `txn` capability;
    /// the core never generates this itself.
    Deadlock,

    /// A cursor operation found nothing matching (spec §7, "Not-found").
    ///
    /// Wrapped here only so the top-level [`crate::Brt`]/[`crate::Cursor`]
    /// API can use a single `?`-propagated error type; code that needs to
    /// treat "not found" as routine rather than exceptional should match
    /// on [`CursorError`] before it reaches this point.
    Cursor(CursorError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Encode(e) => write!(f, "encode error: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::Decompress(c) => write!(f, "decompression failed ({c})"),
            Self::ChecksumMismatch { got, expected } => {
                write!(f, "checksum mismatch: got {got}, expected {expected}")
            }
            Self::FingerprintMismatch { got, expected } => {
                write!(f, "fingerprint mismatch: got {got:#x}, expected {expected:#x}")
            }
            Self::BadFormat(msg) => write!(f, "bad format: {msg}"),
            Self::PairTooLarge { size, nodesize } => {
                write!(f, "pair of {size} bytes exceeds half of nodesize {nodesize}")
            }
            Self::KeyExist => write!(f, "key already exists"),
            Self::AlreadyThere => write!(f, "entry already there"),
            Self::DbNotFound => write!(f, "sub-database does not exist"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::Deadlock => write!(f, "deadlock detected by lock manager"),
            Self::Cursor(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::Cursor(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<CursorError> for Error {
    fn from(value: CursorError) -> Self {
        Self::Cursor(value)
    }
}

impl From<crate::coding::EncodeError> for Error {
    fn from(value: crate::coding::EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<crate::coding::DecodeError> for Error {
    fn from(value: crate::coding::DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// A [`Result`](std::result::Result) specialized to [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned from a positioned cursor operation.
///
/// These are distinct from [`Error`] because `NOTFOUND`/`KEYEMPTY` are
/// routine outcomes of a search, not failures (spec §7, "Not-found").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorError {
    /// No matching pair exists for the requested operation.
    NotFound,
    /// The cursor is positioned at a slot that a prior delete emptied.
    KeyEmpty,
}

impl std::fmt::Display for CursorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "NOTFOUND"),
            Self::KeyEmpty => write!(f, "KEYEMPTY"),
        }
    }
}

impl std::error::Error for CursorError {}

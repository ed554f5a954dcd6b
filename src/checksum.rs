// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Block-level checksum used by node serialisation (spec §4.2.4) and
//! the on-disk block framing (spec §6). Distinct from the per-node
//! `local_fingerprint` (see [`crate::fingerprint`]), which detects a
//! different class of corruption (a stale or mis-wired child) rather
//! than bit rot in the serialized bytes.

use xxhash_rust::xxh3::Xxh3Default;

/// A 64-bit block checksum.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Checksum(u64);

impl Checksum {
    /// Wraps a raw checksum value, e.g. one read back off disk.
    #[must_use]
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw 64-bit integer.
    #[must_use]
    pub fn into_u64(self) -> u64 {
        self.0
    }

    /// Computes the checksum of a byte slice.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Xxh3Default::new();
        hasher.update(bytes);
        Self(hasher.digest())
    }

    pub(crate) fn check(&self, expected: Self) -> crate::Result<()> {
        if *self == expected {
            Ok(())
        } else {
            Err(crate::Error::ChecksumMismatch {
                got: *self,
                expected,
            })
        }
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A `Write` adapter that accumulates an xxh3 checksum of everything
/// written through it, so a node can be serialized and checksummed in
/// a single pass.
pub struct ChecksummedWriter<W: std::io::Write> {
    inner: W,
    hasher: Xxh3Default,
}

impl<W: std::io::Write> ChecksummedWriter<W> {
    /// Wraps `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            inner: writer,
            hasher: Xxh3Default::new(),
        }
    }

    /// Returns the checksum of everything written so far.
    #[must_use]
    pub fn checksum(&self) -> Checksum {
        Checksum::from_raw(self.hasher.digest())
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: std::io::Write> std::io::Write for ChecksummedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.hasher.update(buf);
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_deterministic() {
        assert_eq!(Checksum::of(b"hello"), Checksum::of(b"hello"));
        assert_ne!(Checksum::of(b"hello"), Checksum::of(b"hellp"));
    }

    #[test]
    fn checksummed_writer_matches_direct_checksum() {
        let mut w = ChecksummedWriter::new(Vec::new());
        std::io::Write::write_all(&mut w, b"buffered tree").unwrap();
        assert_eq!(Checksum::of(b"buffered tree"), w.checksum());
    }

    #[test]
    fn check_rejects_mismatch() {
        let got = Checksum::of(b"a");
        let expected = Checksum::of(b"b");
        assert!(got.check(expected).is_err());
        assert!(got.check(got).is_ok());
    }
}

// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Backwards buffered reader (`BREAD`, spec §6), grounded on
//! `original_source/newbrt/bread.c`: walks any file built from
//! [`crate::block_io`] frames tail-first, refilling a buffer in large
//! chunks instead of seeking per frame. Used by out-of-core recovery
//! and repair tools that need to scan a tree's blocks (or an external
//! log built on the same framing) from the end without a forward
//! index — the core itself never needs to read backward, it's purely
//! a service this crate exposes per spec §6.

use std::io::{Read, Seek, SeekFrom};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1_024;

/// Reads [`crate::block_io`] frames from the tail of a seekable stream
/// towards its head, one frame at a time.
pub struct Bread<R> {
    reader: R,
    buf: Vec<u8>,
    /// File offset of `buf[0]`.
    buf_start: u64,
    /// File offset of the next frame's end (exclusive); the read
    /// cursor, counting down towards zero.
    pos: u64,
    chunk_size: usize,
}

impl<R: Read + Seek> Bread<R> {
    /// Starts a reader positioned at the end of a stream of known
    /// length (typically `stream.seek(SeekFrom::End(0))`).
    #[must_use]
    pub fn new(reader: R, stream_len: u64) -> Self {
        Self::with_chunk_size(reader, stream_len, DEFAULT_CHUNK_SIZE)
    }

    /// As [`Self::new`], with an explicit read-chunk size (mainly for tests).
    #[must_use]
    pub fn with_chunk_size(reader: R, stream_len: u64, chunk_size: usize) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            buf_start: stream_len,
            pos: stream_len,
            chunk_size: chunk_size.max(16),
        }
    }

    /// Current read cursor: no frame at or after this offset remains unread.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.pos
    }

    fn ensure_buffered_from(&mut self, offset: u64) -> std::io::Result<()> {
        if offset >= self.buf_start {
            return Ok(());
        }

        let wanted = self.buf_start - offset;
        let read_len = wanted.max(self.chunk_size as u64).min(self.buf_start);
        let new_start = self.buf_start - read_len;

        let mut chunk = vec![0u8; read_len as usize];
        self.reader.seek(SeekFrom::Start(new_start))?;
        self.reader.read_exact(&mut chunk)?;

        chunk.extend_from_slice(&self.buf);
        self.buf = chunk;
        self.buf_start = new_start;
        Ok(())
    }

    fn slice(&mut self, start: u64, end: u64) -> std::io::Result<&[u8]> {
        self.ensure_buffered_from(start)?;
        let lo = (start - self.buf_start) as usize;
        let hi = (end - self.buf_start) as usize;
        Ok(&self.buf[lo..hi])
    }

    /// Reads and decodes the frame immediately before the current
    /// cursor, moving the cursor to that frame's start.
    ///
    /// Returns `Ok(None)` once the cursor reaches offset `0`.
    pub fn prev_frame(&mut self) -> crate::Result<Option<Vec<u8>>> {
        if self.pos == 0 {
            return Ok(None);
        }
        if self.pos < 12 {
            return Err(crate::Error::BadFormat("dangling bytes before start of stream"));
        }

        let trailer = self.slice(self.pos - 4, self.pos)?;
        let compressed_len = u32::from_be_bytes(trailer.try_into().expect("slice of len 4"));
        let frame_len = crate::block_io::frame_total_len(compressed_len);

        if frame_len > self.pos {
            return Err(crate::Error::BadFormat("frame length runs past start of stream"));
        }

        let frame_start = self.pos - frame_len;
        let frame = self.slice(frame_start, self.pos)?.to_vec();
        let decoded = crate::block_io::decode_frame(&frame)?;

        self.pos = frame_start;
        Ok(Some(decoded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_io::encode_frame;
    use crate::compression::CompressionType;
    use std::io::Cursor;

    fn build_stream(payloads: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for p in payloads {
            out.extend(encode_frame(p, CompressionType::None).unwrap());
        }
        out
    }

    #[test]
    fn walks_frames_in_reverse_order() {
        let stream = build_stream(&[b"first", b"second", b"third"]);
        let len = stream.len() as u64;
        let mut bread = Bread::new(Cursor::new(stream), len);

        assert_eq!(Some(b"third".to_vec()), bread.prev_frame().unwrap());
        assert_eq!(Some(b"second".to_vec()), bread.prev_frame().unwrap());
        assert_eq!(Some(b"first".to_vec()), bread.prev_frame().unwrap());
        assert_eq!(None, bread.prev_frame().unwrap());
    }

    #[test]
    fn small_chunk_size_still_finds_every_frame() {
        let stream = build_stream(&[b"alpha", b"beta", b"gamma", b"delta"]);
        let len = stream.len() as u64;
        let mut bread = Bread::with_chunk_size(Cursor::new(stream), len, 16);

        let mut out = Vec::new();
        while let Some(frame) = bread.prev_frame().unwrap() {
            out.push(frame);
        }
        assert_eq!(
            vec![b"delta".to_vec(), b"gamma".to_vec(), b"beta".to_vec(), b"alpha".to_vec()],
            out
        );
    }

    #[test]
    fn empty_stream_yields_no_frames() {
        let mut bread = Bread::new(Cursor::new(Vec::new()), 0);
        assert_eq!(None, bread.prev_frame().unwrap());
    }
}

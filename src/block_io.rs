// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! On-disk block framing (spec §6): every node block is a fixed
//! [`crate::node::serde`] header followed by a compressed payload
//! framed with its length written *twice* — once before the
//! compressed bytes, once after — "so the block is readable both
//! forward and backward" (spec §6), which is what lets [`crate::bread`]
//! walk a file tail-first without a separate index. A block-level
//! [`Checksum`] trails the whole thing.

use crate::checksum::Checksum;
use crate::compression::CompressionType;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Write;

/// Magic number stamped at the front of every node block (ASCII "BRT0").
pub const MAGIC: u32 = 0x4252_5430;

/// Frames `raw` (already-encoded, uncompressed node bytes) as
/// `[compressed_len][method_byte ++ compressed][uncompressed_len][compressed_len]`.
///
/// `compressed_len` covers the method byte plus the compressed bytes,
/// so a backward reader (spec §6, "readable ... backward") only ever
/// needs the trailing four bytes to find the frame's start.
pub fn encode_frame(raw: &[u8], compression: CompressionType) -> crate::Result<Vec<u8>> {
    let compressed = compression.compress(raw)?;

    let mut payload = Vec::with_capacity(1 + compressed.len());
    compression.encode_into(&mut payload).map_err(crate::Error::from)?;
    payload.extend_from_slice(&compressed);

    let compressed_len = payload.len() as u32;
    let uncompressed_len = raw.len() as u32;

    let mut out = Vec::with_capacity(4 + payload.len() + 8);
    out.write_u32::<BigEndian>(compressed_len)?;
    out.write_all(&payload)?;
    out.write_u32::<BigEndian>(uncompressed_len)?;
    out.write_u32::<BigEndian>(compressed_len)?;
    Ok(out)
}

/// Total on-disk length of a frame whose leading `compressed_len`
/// field reads `compressed_len`.
#[must_use]
pub fn frame_total_len(compressed_len: u32) -> u64 {
    u64::from(compressed_len) + 12
}

/// Parses a complete frame (as produced by [`encode_frame`]) back into
/// the original uncompressed bytes.
///
/// Validates that the leading and trailing `compressed_len` fields
/// agree and that the frame's total length matches `frame.len()`
/// exactly (spec §7, "Corruption ... bad magic" — the same class of
/// error covers a malformed frame).
pub fn decode_frame(frame: &[u8]) -> crate::Result<Vec<u8>> {
    if frame.len() < 12 {
        return Err(crate::Error::BadFormat("frame shorter than minimum framing overhead"));
    }

    let mut head = &frame[0..4];
    let compressed_len = head.read_u32::<BigEndian>()?;

    let expected_total = frame_total_len(compressed_len);
    if expected_total != frame.len() as u64 {
        return Err(crate::Error::BadFormat("frame length does not match compressed_len field"));
    }

    let payload = &frame[4..4 + compressed_len as usize];
    let mut tail = &frame[4 + compressed_len as usize..];
    let uncompressed_len = tail.read_u32::<BigEndian>()?;
    let repeated_len = tail.read_u32::<BigEndian>()?;

    if repeated_len != compressed_len {
        return Err(crate::Error::BadFormat("frame's two compressed_len fields disagree"));
    }

    let mut method_reader = payload;
    let method = CompressionType::decode_from(&mut method_reader).map_err(crate::Error::from)?;
    let compressed = &payload[payload.len() - method_reader.len()..];

    let raw = method.decompress(compressed)?;
    if raw.len() != uncompressed_len as usize {
        return Err(crate::Error::BadFormat("decompressed length does not match frame header"));
    }

    Ok(raw)
}

/// Appends an 8-byte big-endian [`Checksum`] computed over `body`.
pub fn append_checksum(mut body: Vec<u8>) -> Vec<u8> {
    let checksum = Checksum::of(&body);
    body.extend_from_slice(&checksum.into_u64().to_be_bytes());
    body
}

/// Splits a trailing 8-byte checksum off `block` and verifies it
/// against the rest of the bytes.
pub fn split_and_verify_checksum(block: &[u8]) -> crate::Result<&[u8]> {
    if block.len() < 8 {
        return Err(crate::Error::BadFormat("block shorter than checksum trailer"));
    }
    let (body, trailer) = block.split_at(block.len() - 8);
    let expected = Checksum::from_raw(u64::from_be_bytes(
        trailer.try_into().expect("split_at(len-8) yields 8 bytes"),
    ));
    Checksum::of(body).check(expected)?;
    Ok(body)
}

use crate::coding::{Decode, Encode};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrips_through_encode_decode() {
        let raw = b"hello buffered repository tree".repeat(8);
        let frame = encode_frame(&raw, CompressionType::None).unwrap();
        assert_eq!(raw, decode_frame(&frame).unwrap());
    }

    #[test]
    fn frame_roundtrips_with_dictionary_compression() {
        let raw = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaabbbbbbbbbbbbbbbbb".to_vec();
        let frame = encode_frame(&raw, CompressionType::Dictionary).unwrap();
        assert_eq!(raw, decode_frame(&frame).unwrap());
    }

    #[test]
    fn decode_rejects_mismatched_trailing_length() {
        let raw = b"some bytes".to_vec();
        let mut frame = encode_frame(&raw, CompressionType::None).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(decode_frame(&frame).is_err());
    }

    #[test]
    fn checksum_roundtrips_and_detects_corruption() {
        let body = b"node payload bytes".to_vec();
        let mut block = append_checksum(body.clone());
        assert_eq!(body, split_and_verify_checksum(&block).unwrap());

        let mutate_at = 0;
        block[mutate_at] ^= 0xFF;
        assert!(split_and_verify_checksum(&block).is_err());
    }

    #[test]
    fn frame_total_len_matches_encoded_length() {
        let raw = b"0123456789".to_vec();
        let frame = encode_frame(&raw, CompressionType::None).unwrap();
        let compressed_len = u32::from_be_bytes(frame[0..4].try_into().unwrap());
        assert_eq!(frame.len() as u64, frame_total_len(compressed_len));
    }
}

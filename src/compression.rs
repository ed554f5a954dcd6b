// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Per-block compression (spec §4.2.4: "Data in a node is compressed
//! page-by-page using a chosen method ... a single header byte
//! identifies the method so old and new methods coexist in one
//! database").

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Compression algorithm used for a single node's serialized payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[allow(clippy::module_name_repetitions)]
pub enum CompressionType {
    /// No compression. Not recommended outside of tests.
    None,

    /// LZ4 compression — favors speed over ratio.
    #[cfg(feature = "lz4")]
    Lz4,

    /// A small dictionary (LZSS-style) coder with no external
    /// dependency, favoring ratio on highly repetitive pivot/key
    /// tables over raw speed.
    Dictionary,
}

impl Encode for CompressionType {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        match self {
            Self::None => writer.write_u8(0)?,

            #[cfg(feature = "lz4")]
            Self::Lz4 => writer.write_u8(1)?,

            Self::Dictionary => writer.write_u8(2)?,
        }

        Ok(())
    }
}

impl Decode for CompressionType {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let tag = reader.read_u8()?;

        match tag {
            0 => Ok(Self::None),

            #[cfg(feature = "lz4")]
            1 => Ok(Self::Lz4),

            2 => Ok(Self::Dictionary),

            tag => Err(DecodeError::InvalidTag(("CompressionType", tag))),
        }
    }
}

impl std::fmt::Display for CompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::None => "no compression",

                #[cfg(feature = "lz4")]
                Self::Lz4 => "lz4",

                Self::Dictionary => "dictionary",
            }
        )
    }
}

impl CompressionType {
    /// Compresses `raw` according to this method.
    pub fn compress(self, raw: &[u8]) -> crate::Result<Vec<u8>> {
        match self {
            Self::None => Ok(raw.to_vec()),

            #[cfg(feature = "lz4")]
            Self::Lz4 => Ok(lz4_flex::compress_prepend_size(raw)),

            Self::Dictionary => Ok(dictionary::compress(raw)),
        }
    }

    /// Decompresses `compressed`, which must have been produced by
    /// [`CompressionType::compress`] with the same variant.
    pub fn decompress(self, compressed: &[u8]) -> crate::Result<Vec<u8>> {
        match self {
            Self::None => Ok(compressed.to_vec()),

            #[cfg(feature = "lz4")]
            Self::Lz4 => {
                lz4_flex::decompress_size_prepended(compressed).map_err(|_| Self::Lz4.into_error())
            }

            Self::Dictionary => dictionary::decompress(compressed).ok_or(Self::Dictionary.into_error()),
        }
    }

    fn into_error(self) -> crate::Error {
        crate::Error::Decompress(self)
    }
}

/// A minimal LZSS-style coder: a hash-chained match finder over a
/// small sliding window, encoding literals and (distance, length)
/// backreferences. Intentionally simple — it exists to give the node
/// format a second, dependency-free codec, not to compete with lz4 on
/// speed or ratio.
mod dictionary {
    const MIN_MATCH: usize = 4;
    const MAX_MATCH: usize = 255 + MIN_MATCH;
    const WINDOW: usize = 1 << 15;

    pub(super) fn compress(input: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(input.len());
        out.extend_from_slice(&(input.len() as u32).to_be_bytes());

        let mut chains: rustc_hash::FxHashMap<[u8; MIN_MATCH], Vec<usize>> =
            rustc_hash::FxHashMap::default();

        let mut i = 0;
        while i < input.len() {
            let mut best: Option<(usize, usize)> = None; // (distance, length)

            if i + MIN_MATCH <= input.len() {
                let mut key = [0u8; MIN_MATCH];
                key.copy_from_slice(&input[i..i + MIN_MATCH]);

                if let Some(positions) = chains.get(&key) {
                    for &cand in positions.iter().rev() {
                        if i - cand > WINDOW {
                            break;
                        }
                        let max_len = (input.len() - i).min(MAX_MATCH);
                        let mut len = 0;
                        while len < max_len && input[cand + len] == input[i + len] {
                            len += 1;
                        }
                        if len >= MIN_MATCH && best.map(|(_, l)| len > l).unwrap_or(true) {
                            best = Some((i - cand, len));
                        }
                    }
                }
            }

            if let Some((distance, length)) = best {
                out.push(0x01);
                out.extend_from_slice(&(distance as u32).to_be_bytes());
                out.push((length - MIN_MATCH) as u8);

                for off in 0..length {
                    if i + off + MIN_MATCH <= input.len() {
                        let mut key = [0u8; MIN_MATCH];
                        key.copy_from_slice(&input[i + off..i + off + MIN_MATCH]);
                        chains.entry(key).or_default().push(i + off);
                    }
                }
                i += length;
            } else {
                out.push(0x00);
                out.push(input[i]);

                if i + MIN_MATCH <= input.len() {
                    let mut key = [0u8; MIN_MATCH];
                    key.copy_from_slice(&input[i..i + MIN_MATCH]);
                    chains.entry(key).or_default().push(i);
                }
                i += 1;
            }
        }

        out
    }

    pub(super) fn decompress(input: &[u8]) -> Option<Vec<u8>> {
        if input.len() < 4 {
            return None;
        }
        let expected_len = u32::from_be_bytes(input[0..4].try_into().ok()?) as usize;
        let mut out = Vec::with_capacity(expected_len);
        let mut pos = 4;

        while pos < input.len() {
            match *input.get(pos)? {
                0x00 => {
                    out.push(*input.get(pos + 1)?);
                    pos += 2;
                }
                0x01 => {
                    let distance = u32::from_be_bytes(input.get(pos + 1..pos + 5)?.try_into().ok()?)
                        as usize;
                    let length = *input.get(pos + 5)? as usize + MIN_MATCH;
                    pos += 6;

                    if distance == 0 || distance > out.len() {
                        return None;
                    }
                    let start = out.len() - distance;
                    for k in 0..length {
                        let byte = out[start + k];
                        out.push(byte);
                    }
                }
                _ => return None,
            }
        }

        if out.len() == expected_len {
            Some(out)
        } else {
            None
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn roundtrips_repetitive_data() {
            let input = b"the quick brown fox the quick brown fox the quick brown fox".repeat(4);
            let compressed = compress(&input);
            assert!(compressed.len() < input.len());
            assert_eq!(Some(input), decompress(&compressed));
        }

        #[test]
        fn roundtrips_empty_and_tiny_input() {
            assert_eq!(Some(Vec::new()), decompress(&compress(&[])));
            assert_eq!(Some(vec![7u8]), decompress(&compress(&[7])));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn compression_serialize_none() {
        let serialized = CompressionType::None.encode_into_vec();
        assert_eq!(1, serialized.len());
    }

    #[test]
    fn compression_roundtrip_none() {
        let raw = b"hello world".to_vec();
        let compressed = CompressionType::None.compress(&raw).unwrap();
        assert_eq!(raw, CompressionType::None.decompress(&compressed).unwrap());
    }

    #[test]
    fn compression_roundtrip_dictionary() {
        let raw = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaabbbbbbbbbbbbbbbbb".to_vec();
        let compressed = CompressionType::Dictionary.compress(&raw).unwrap();
        assert_eq!(
            raw,
            CompressionType::Dictionary.decompress(&compressed).unwrap()
        );
    }

    #[cfg(feature = "lz4")]
    mod lz4 {
        use super::*;
        use test_log::test;

        #[test]
        fn compression_serialize_lz4() {
            let serialized = CompressionType::Lz4.encode_into_vec();
            assert_eq!(1, serialized.len());
        }

        #[test]
        fn compression_roundtrip_lz4() {
            let raw = b"hello world hello world hello world".to_vec();
            let compressed = CompressionType::Lz4.compress(&raw).unwrap();
            assert_eq!(raw, CompressionType::Lz4.decompress(&compressed).unwrap());
        }
    }
}

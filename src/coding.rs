// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Serialization primitives shared by the node, header, and block-io
//! layers. All multi-byte integers on disk are big-endian (spec §6).

use std::io::{Read, Write};

/// Error during serialization.
#[derive(Debug)]
pub enum EncodeError {
    /// I/O error.
    Io(std::io::Error),
    /// A compression level outside the codec's valid range.
    InvalidCompressionLevel((crate::compression::CompressionType, i32)),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "EncodeError::Io({e})"),
            Self::InvalidCompressionLevel((c, l)) => {
                write!(f, "EncodeError::InvalidCompressionLevel({c:?}, {l})")
            }
        }
    }
}

impl From<std::io::Error> for EncodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::error::Error for EncodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::InvalidCompressionLevel(_) => None,
        }
    }
}

/// Error during deserialization.
#[derive(Debug)]
pub enum DecodeError {
    /// I/O error.
    Io(std::io::Error),
    /// An enum tag byte that doesn't correspond to any known variant.
    InvalidTag((&'static str, u8)),
    /// A compression level outside the codec's valid range.
    InvalidCompressionLevel((crate::compression::CompressionType, i32)),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "DecodeError::Io({e})"),
            Self::InvalidTag((ty, tag)) => write!(f, "DecodeError::InvalidTag({ty}, {tag})"),
            Self::InvalidCompressionLevel((c, l)) => {
                write!(f, "DecodeError::InvalidCompressionLevel({c:?}, {l})")
            }
        }
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// Trait to serialize stuff into a big-endian byte stream.
pub trait Encode {
    /// Serializes into a writer.
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError>;

    /// Serializes into a freshly allocated vector.
    fn encode_into_vec(&self) -> Vec<u8> {
        let mut v = vec![];
        self.encode_into(&mut v).expect("Vec<u8> writer cannot fail");
        v
    }
}

/// Trait to deserialize stuff from a big-endian byte stream.
pub trait Decode {
    /// Deserializes from a reader.
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError>
    where
        Self: Sized;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_into_vec_roundtrips_io_error_free() {
        struct Marker(u8);

        impl Encode for Marker {
            fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
                writer.write_all(&[self.0])?;
                Ok(())
            }
        }

        assert_eq!(vec![42], Marker(42).encode_into_vec());
    }
}

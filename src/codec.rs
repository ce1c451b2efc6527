//! Compact storage codec for numeric tag sets.
//!
//! A comma-joined list of numeric tags is packed as a little-endian `u32`
//! count followed by `count` little-endian `u32` values, gzipped, then
//! base64 encoded (standard alphabet, padded). Only numeric tags can take
//! this path; anything else is rejected up front instead of being mangled.
//!
//! The same gzip + base64 wrapping is used for whole sync payloads via
//! [`compress_text`] / [`decompress_text`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("tag {0:?} is not a non-negative 32-bit integer")]
    NonNumericTag(String),

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("gzip failure: {0}")]
    Gzip(#[from] std::io::Error),

    #[error("packed tag array is truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Pack a comma-joined list of numeric tags into the compressed form.
pub fn compress_tags(joined: &str) -> Result<String, CodecError> {
    let values = joined
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse::<u32>()
                .map_err(|_| CodecError::NonNumericTag(t.to_string()))
        })
        .collect::<Result<Vec<u32>, _>>()?;

    let mut packed = Vec::with_capacity(4 + values.len() * 4);
    packed.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for v in &values {
        packed.extend_from_slice(&v.to_le_bytes());
    }

    Ok(STANDARD.encode(gzip(&packed)?))
}

/// Reverse of [`compress_tags`]. Callers that fail here should treat the
/// stored value as literal text.
pub fn decompress_tags(encoded: &str) -> Result<String, CodecError> {
    let packed = gunzip(&STANDARD.decode(encoded.trim())?)?;

    if packed.len() < 4 {
        return Err(CodecError::Truncated { expected: 4, actual: packed.len() });
    }
    let count = u32::from_le_bytes([packed[0], packed[1], packed[2], packed[3]]) as usize;
    let expected = 4 + count * 4;
    if packed.len() != expected {
        return Err(CodecError::Truncated { expected, actual: packed.len() });
    }

    let tags: Vec<String> = packed[4..]
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]).to_string())
        .collect();
    Ok(tags.join(","))
}

/// Gzip + base64 an arbitrary UTF-8 payload.
pub fn compress_text(text: &str) -> Result<String, CodecError> {
    Ok(STANDARD.encode(gzip(text.as_bytes())?))
}

pub fn decompress_text(encoded: &str) -> Result<String, CodecError> {
    let raw = gunzip(&STANDARD.decode(encoded.trim())?)?;
    String::from_utf8(raw).map_err(|e| {
        CodecError::Gzip(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })
}

fn gzip(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity((bytes.len() / 2).max(64)), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

fn gunzip(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

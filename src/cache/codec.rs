//! CacheMap Codec
//!
//! Encodes the whole key -> entry map into the blob kept in the segment.
//!
//! ```text
//! offset 0  4 bytes  magic  "SHMC"
//! offset 4  1 byte   format version
//! offset 5  4 bytes  body length (u32, little-endian)
//! offset 9  n bytes  CBOR body
//! ```
//!
//! Everything after the body is segment padding and is ignored.

use std::collections::HashMap;

use thiserror::Error;

use crate::cache::Entry;
use crate::error::{CacheError, Result};

/// The logical content of a segment.
pub type CacheMap = HashMap<String, Entry>;

/// Leading bytes of every encoded map.
pub const MAGIC: [u8; 4] = *b"SHMC";

/// Current format version.
pub const FORMAT_VERSION: u8 = 1;

/// Size of the envelope that precedes the CBOR body.
pub const HEADER_LEN: usize = 9;

/// Reasons a blob could not be turned back into a map.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The blob does not start with the expected magic bytes
    #[error("unrecognised segment header")]
    BadMagic,

    /// The blob was written by an unknown format version
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),

    /// The blob ends before the length its header announces
    #[error("truncated blob: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes the header requires
        needed: usize,
        /// Bytes actually present
        available: usize,
    },

    /// The CBOR body is malformed
    #[error("malformed body: {0}")]
    Body(String),
}

/// Encodes a map into its envelope.
pub fn encode(map: &CacheMap) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    ciborium::into_writer(map, &mut body).map_err(|e| CacheError::Encode(e.to_string()))?;

    let body_len = u32::try_from(body.len())
        .map_err(|_| CacheError::Encode(format!("body of {} bytes is too large", body.len())))?;

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&MAGIC);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&body_len.to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decodes a segment blob.
///
/// An empty or all-zero blob is a freshly created segment and decodes to an
/// empty map.
pub fn decode(bytes: &[u8]) -> std::result::Result<CacheMap, CodecError> {
    if is_blank(bytes) {
        return Ok(CacheMap::new());
    }

    if bytes.len() < HEADER_LEN {
        return Err(CodecError::Truncated {
            needed: HEADER_LEN,
            available: bytes.len(),
        });
    }

    if bytes[..4] != MAGIC {
        return Err(CodecError::BadMagic);
    }

    let version = bytes[4];
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&bytes[5..HEADER_LEN]);
    let body_len = u32::from_le_bytes(len_bytes) as usize;

    let needed = HEADER_LEN.saturating_add(body_len);
    if needed > bytes.len() {
        return Err(CodecError::Truncated {
            needed,
            available: bytes.len(),
        });
    }

    ciborium::from_reader(&bytes[HEADER_LEN..needed]).map_err(|e| CodecError::Body(e.to_string()))
}

/// True when the blob holds nothing but zero padding.
pub fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| *b == 0)
}

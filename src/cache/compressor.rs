//! On-disk record encoding for cache entries.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic "DPC1" | flags u8 | stored_at u64 | key_len u32 | key bytes | payload
//! ```
//!
//! Flag bit 0 marks a zstd-compressed payload.

use bytes::Bytes;
use thiserror::Error;

use crate::cache::{CacheEntry, DocumentReference};
use crate::config::CacheConfig;

const MAGIC: &[u8; 4] = b"DPC1";
const FLAG_ZSTD: u8 = 0b0000_0001;
/// Fixed prefix: magic, flags, stored_at, key_len.
pub const HEADER_LEN: usize = 4 + 1 + 8 + 4;
const MAX_KEY_LEN: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Zstd compression failed: {0}")]
    ZstdError(#[from] std::io::Error),

    #[error("record truncated: {0} bytes")]
    Truncated(usize),

    #[error("bad record magic")]
    BadMagic,

    #[error("record key is not valid")]
    InvalidKey,
}

/// Encodes and decodes cache records, compressing payloads when enabled.
#[derive(Debug, Clone)]
pub struct Compressor {
    compress: bool,
    zstd_level: i32,
}

impl Compressor {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            compress: config.compress,
            zstd_level: config.zstd_level,
        }
    }

    pub fn encode(&self, entry: &CacheEntry) -> Result<Vec<u8>, CompressionError> {
        let key = entry.key.as_str().as_bytes();
        let (flags, payload) = if self.compress {
            (FLAG_ZSTD, zstd::encode_all(&entry.blob[..], self.zstd_level)?)
        } else {
            (0, entry.blob.to_vec())
        };

        let mut out = Vec::with_capacity(HEADER_LEN + key.len() + payload.len());
        out.extend_from_slice(MAGIC);
        out.push(flags);
        out.extend_from_slice(&entry.stored_at.to_le_bytes());
        out.extend_from_slice(&(key.len() as u32).to_le_bytes());
        out.extend_from_slice(key);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Decode a record. Payload compression is read from the record flags, so
    /// files written with a different `compress` setting still decode.
    pub fn decode(&self, data: &[u8]) -> Result<CacheEntry, CompressionError> {
        let header = decode_header(data)?;
        let payload = &data[header.payload_offset..];
        let blob = if header.compressed {
            Bytes::from(zstd::decode_all(payload)?)
        } else {
            Bytes::copy_from_slice(payload)
        };

        Ok(CacheEntry::new(header.key, blob, header.stored_at))
    }
}

/// Key and timestamp of a record, without its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub key: DocumentReference,
    pub stored_at: u64,
    pub compressed: bool,
    /// Byte offset where the payload starts.
    pub payload_offset: usize,
}

/// Length of the key that follows the fixed `HEADER_LEN` prefix.
pub fn key_len(prefix: &[u8]) -> Result<usize, CompressionError> {
    if prefix.len() < HEADER_LEN {
        return Err(CompressionError::Truncated(prefix.len()));
    }
    if &prefix[0..4] != MAGIC {
        return Err(CompressionError::BadMagic);
    }
    let raw: [u8; 4] = prefix[13..17]
        .try_into()
        .map_err(|_| CompressionError::Truncated(prefix.len()))?;
    let len = u32::from_le_bytes(raw) as usize;
    if len > MAX_KEY_LEN {
        return Err(CompressionError::InvalidKey);
    }
    Ok(len)
}

/// Decode the header of a record. `data` needs the fixed prefix and the key;
/// the payload may be absent.
pub fn decode_header(data: &[u8]) -> Result<RecordHeader, CompressionError> {
    let key_len = key_len(data)?;
    let flags = data[4];
    let stored_at = u64::from_le_bytes(
        data[5..13]
            .try_into()
            .map_err(|_| CompressionError::Truncated(data.len()))?,
    );

    let key_end = HEADER_LEN + key_len;
    if key_end > data.len() {
        return Err(CompressionError::Truncated(data.len()));
    }
    let key = std::str::from_utf8(&data[HEADER_LEN..key_end])
        .ok()
        .and_then(DocumentReference::parse)
        .ok_or(CompressionError::InvalidKey)?;

    Ok(RecordHeader {
        key,
        stored_at,
        compressed: flags & FLAG_ZSTD != 0,
        payload_offset: key_end,
    })
}

//! Block layout of a partition file.
//!
//! A partition file is a sequence of blocks:
//! [ magic: u32 ][ version: u16 ][ codec: u8 ][ reserved: u8 ]
//! [ uncompressed_len: u64 ][ compressed_len: u64 ]
//! [ payload bytes … ][ checksum: 32 bytes ]
//!
//! The payload is a JSON array of items, compressed with `codec`. The checksum
//! is blake3 over (header || payload). All integers are little endian.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::codec::{self, Codec};
use super::Storage;
use crate::error::{Error, Result};

pub const MAGIC: u32 = 0x4453_424B; // "DSBK"
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 4 + 2 + 1 + 1 + 8 + 8;
pub const CHECKSUM_LEN: usize = 32;

/// Upper bound on a single block, checked before allocating read buffers.
pub const MAX_BLOCK_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub codec: Codec,
    pub uncompressed_len: u64,
    pub compressed_len: u64,
}

impl BlockHeader {
    pub fn new(codec: Codec, uncompressed_len: u64, compressed_len: u64) -> Self {
        Self {
            codec,
            uncompressed_len,
            compressed_len,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        out[4..6].copy_from_slice(&VERSION.to_le_bytes());
        out[6] = self.codec as u8;
        // out[7] reserved
        out[8..16].copy_from_slice(&self.uncompressed_len.to_le_bytes());
        out[16..24].copy_from_slice(&self.compressed_len.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header: &[u8; HEADER_LEN] = bytes
            .get(..HEADER_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::Corrupt("short header".into()))?;

        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let version = u16::from_le_bytes([header[4], header[5]]);
        if magic != MAGIC || version != VERSION {
            return Err(Error::Corrupt("bad magic/version".into()));
        }
        let codec = Codec::from_u8(header[6])?;
        let uncompressed_len = le_u64(&header[8..16]);
        let compressed_len = le_u64(&header[16..24]);

        Ok(Self::new(codec, uncompressed_len, compressed_len))
    }

    /// Validate that the sizes in the header are reasonable.
    /// This prevents excessive allocations from corrupted data.
    pub fn validate_sizes(&self, max_len: u64) -> Result<()> {
        if self.uncompressed_len > max_len {
            return Err(Error::Corrupt(format!(
                "uncompressed_len {} exceeds max {}",
                self.uncompressed_len, max_len
            )));
        }
        if self.compressed_len > max_len {
            return Err(Error::Corrupt(format!(
                "compressed_len {} exceeds max {}",
                self.compressed_len, max_len
            )));
        }
        if self.codec == Codec::None && self.compressed_len != self.uncompressed_len {
            return Err(Error::Corrupt("length mismatch for uncompressed block".into()));
        }
        Ok(())
    }

    /// Bytes following the header: payload and checksum.
    pub fn body_len(&self) -> usize {
        self.compressed_len as usize + CHECKSUM_LEN
    }
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

/// Serialize, compress and checksum one block of items.
pub fn encode_block<T: Serialize>(items: &[T], codec: Codec) -> Result<Vec<u8>> {
    let uncompressed =
        serde_json::to_vec(items).map_err(|e| Error::Codec(format!("json serialize: {e}")))?;
    let compressed = codec::compress(codec, &uncompressed)?;

    let header = BlockHeader::new(codec, uncompressed.len() as u64, compressed.len() as u64);
    let header_bytes = header.to_bytes();

    let mut hasher = blake3::Hasher::new();
    hasher.update(&header_bytes);
    hasher.update(&compressed);
    let checksum: [u8; 32] = hasher.finalize().into();

    let mut block = Vec::with_capacity(HEADER_LEN + compressed.len() + CHECKSUM_LEN);
    block.extend_from_slice(&header_bytes);
    block.extend_from_slice(&compressed);
    block.extend_from_slice(&checksum);
    Ok(block)
}

/// Verify and decode one complete block that started at `offset`.
pub fn decode_block<T: DeserializeOwned>(block: &[u8], offset: u64) -> Result<Vec<T>> {
    let header = BlockHeader::from_bytes(block)?;
    header.validate_sizes(MAX_BLOCK_BYTES)?;
    if block.len() != HEADER_LEN + header.body_len() {
        return Err(Error::Corrupt(format!(
            "block at offset {offset} has {} bytes, header announces {}",
            block.len(),
            HEADER_LEN + header.body_len()
        )));
    }

    let (covered, checksum) = block.split_at(block.len() - CHECKSUM_LEN);
    let computed: [u8; 32] = blake3::hash(covered).into();
    if computed.as_slice() != checksum {
        return Err(Error::ChecksumMismatch { offset });
    }

    let uncompressed = codec::decompress(header.codec, &covered[HEADER_LEN..])?;
    if uncompressed.len() as u64 != header.uncompressed_len {
        return Err(Error::Corrupt(format!(
            "block at offset {offset} decompressed to {} bytes, expected {}",
            uncompressed.len(),
            header.uncompressed_len
        )));
    }
    serde_json::from_slice(&uncompressed).map_err(|e| Error::Codec(format!("json deserialize: {e}")))
}

/// Read the raw block starting at `offset`; `None` past the end of the file.
///
/// Returns the block bytes and the offset of the next block.
pub fn read_block(storage: &dyn Storage, path: &str, offset: u64) -> Result<Option<(Vec<u8>, u64)>> {
    let size = storage.size(path)?;
    if offset >= size {
        return Ok(None);
    }
    let mut block = storage.read_range(path, offset, HEADER_LEN)?;
    let header = BlockHeader::from_bytes(&block)?;
    header.validate_sizes(MAX_BLOCK_BYTES)?;

    let body_len = header.body_len();
    let body = storage.read_range(path, offset + HEADER_LEN as u64, body_len)?;
    if body.len() != body_len {
        return Err(Error::Corrupt(format!(
            "truncated block at offset {offset} in {path}"
        )));
    }
    block.extend_from_slice(&body);
    let next = offset + block.len() as u64;
    Ok(Some((block, next)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_24_bytes_le() {
        let header = BlockHeader::new(Codec::None, 7, 7);
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[0..4], &MAGIC.to_le_bytes());
        assert_eq!(bytes[6], 0);
        assert_eq!(BlockHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn encoded_block_decodes() {
        let block = encode_block(&[3u32, 1, 2], Codec::None).unwrap();
        let items: Vec<u32> = decode_block(&block, 0).unwrap();
        assert_eq!(items, vec![3, 1, 2]);
    }

    #[test]
    fn flipped_payload_bit_fails_checksum() {
        let mut block = encode_block(&["alpha", "beta"], Codec::None).unwrap();
        block[HEADER_LEN + 2] ^= 0x01;
        let err = decode_block::<String>(&block, 128).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { offset: 128 }));
    }

    #[test]
    fn truncated_block_is_corrupt() {
        let block = encode_block(&[1u8, 2, 3], Codec::None).unwrap();
        let err = decode_block::<u8>(&block[..block.len() - 1], 0).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = BlockHeader::new(Codec::None, 0, 0).to_bytes();
        bytes[0] = 0;
        assert!(BlockHeader::from_bytes(&bytes).is_err());
    }
}

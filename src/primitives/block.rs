// Data Structures: Block
//
// A block is transmitted and stored as its canonical 8-byte encoding, so
// the bytes on the wire are identical to what sits in the tree and in the
// dedup cache. The id is deliberately truncated to 16 bits; collisions are
// an accepted part of the simulation.

use sha2::{Digest, Sha256};

use crate::config::BLOCK_BYTES;

/// Canonical wire form of a block
pub type RawBlock = [u8; BLOCK_BYTES];

/// Strict 8-byte record: u16 prev_id || u16 nonce || u32 timestamp, little-endian
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub prev_id: u16,
    pub nonce: u16,
    pub timestamp: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed block: expected {BLOCK_BYTES} bytes, got {0}")]
    MalformedBlock(usize),
}

impl Block {
    pub fn encode(&self) -> RawBlock {
        let mut buf = [0u8; BLOCK_BYTES];
        buf[0..2].copy_from_slice(&self.prev_id.to_le_bytes());
        buf[2..4].copy_from_slice(&self.nonce.to_le_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_le_bytes());
        buf
    }

    pub fn decode(raw: &[u8]) -> Result<Block, CodecError> {
        if raw.len() != BLOCK_BYTES {
            return Err(CodecError::MalformedBlock(raw.len()));
        }
        Ok(Block {
            prev_id: u16::from_le_bytes(raw[0..2].try_into().unwrap()),
            nonce: u16::from_le_bytes(raw[2..4].try_into().unwrap()),
            timestamp: u32::from_le_bytes(raw[4..8].try_into().unwrap()),
        })
    }

    /// Id of this block, as every peer computes it
    pub fn id(&self) -> u16 {
        block_id(&self.encode())
    }
}

/// Low 16 bits of SHA-256 over the 8-byte encoding.
/// The digest is read as a big-endian integer, so the last two digest
/// bytes form the id with digest[30] as the high byte.
pub fn block_id(raw: &[u8]) -> u16 {
    let mut hasher = Sha256::new();
    hasher.update(raw);
    let digest = hasher.finalize();
    u16::from_be_bytes([digest[30], digest[31]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let b = Block {
            prev_id: 0x9E1C,
            nonce: 0x1234,
            timestamp: 0x0506_0708,
        };
        let raw = b.encode();
        assert_eq!(raw, [0x1C, 0x9E, 0x34, 0x12, 0x08, 0x07, 0x06, 0x05]);
    }

    #[test]
    fn test_roundtrip() {
        let b = Block {
            prev_id: 0xBEEF,
            nonce: 0x0042,
            timestamp: 1_700_000_000,
        };
        assert_eq!(Block::decode(&b.encode()).unwrap(), b);
    }

    #[test]
    fn test_id_deterministic() {
        let b = Block {
            prev_id: 1,
            nonce: 2,
            timestamp: 3,
        };
        assert_eq!(b.id(), b.id());
        assert_eq!(block_id(&b.encode()), b.id());
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        assert!(matches!(
            Block::decode(&[0u8; 7]),
            Err(CodecError::MalformedBlock(7))
        ));
        assert!(matches!(
            Block::decode(&[0u8; 9]),
            Err(CodecError::MalformedBlock(9))
        ));
    }
}

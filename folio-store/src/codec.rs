//! Structured value codec and fixed-width number encoding.
//!
//! Records are bincode-encoded (serde mode, standard config). Values above
//! [`COMPRESS_THRESHOLD`] bytes are LZ4-compressed, which pays off for article
//! bodies and their rendered HTML. The first byte of every value tags the
//! representation:
//!
//! ```text
//! ┌──────┬──────────────────────────────┐
//! │ 0x00 │ bincode payload               │
//! ├──────┼──────────────────────────────┤
//! │ 0x01 │ lz4(size-prepended) payload   │
//! └──────┴──────────────────────────────┘
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StoreError};

/// Payloads larger than this are compressed.
pub const COMPRESS_THRESHOLD: usize = 512;

const TAG_RAW: u8 = 0x00;
const TAG_LZ4: u8 = 0x01;

/// Encode a record.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let payload = bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Codec(e.to_string()))?;

    if payload.len() > COMPRESS_THRESHOLD {
        let compressed = lz4_flex::compress_prepend_size(&payload);
        let mut out = Vec::with_capacity(compressed.len() + 1);
        out.push(TAG_LZ4);
        out.extend_from_slice(&compressed);
        Ok(out)
    } else {
        let mut out = Vec::with_capacity(payload.len() + 1);
        out.push(TAG_RAW);
        out.extend_from_slice(&payload);
        Ok(out)
    }
}

/// Decode a record produced by [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (tag, body) = bytes
        .split_first()
        .ok_or_else(|| StoreError::Codec("empty value".into()))?;

    let decompressed;
    let payload = match *tag {
        TAG_RAW => body,
        TAG_LZ4 => {
            decompressed = lz4_flex::decompress_size_prepended(body)
                .map_err(|e| StoreError::Codec(e.to_string()))?;
            &decompressed[..]
        }
        other => return Err(StoreError::Codec(format!("unknown value tag {other:#04x}"))),
    };

    let (value, _) = bincode::serde::decode_from_slice(payload, bincode::config::standard())
        .map_err(|e| StoreError::Codec(e.to_string()))?;
    Ok(value)
}

/// Encode an id as 4 big-endian bytes, so byte order equals numeric order.
pub fn id_to_bytes(id: u32) -> [u8; 4] {
    id.to_be_bytes()
}

/// Decode the first 4 bytes of a key as a big-endian id.
pub fn id_from_bytes(bytes: &[u8]) -> Option<u32> {
    let buf: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(buf))
}

pub fn u64_to_bytes(n: u64) -> [u8; 8] {
    n.to_be_bytes()
}

pub fn u64_from_bytes(bytes: &[u8]) -> Option<u64> {
    let buf: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
    Some(u64::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        tags: Vec<String>,
        score: Option<u32>,
    }

    #[test]
    fn test_small_value_stays_raw() {
        let s = Sample { name: "go".into(), tags: vec![], score: Some(3) };
        let bytes = encode(&s).unwrap();
        assert_eq!(bytes[0], TAG_RAW);
        assert_eq!(decode::<Sample>(&bytes).unwrap(), s);
    }

    #[test]
    fn test_large_value_is_compressed() {
        let s = Sample {
            name: "The quick brown fox jumps over the lazy dog. ".repeat(100),
            tags: vec!["rust".into(); 20],
            score: None,
        };
        let bytes = encode(&s).unwrap();
        assert_eq!(bytes[0], TAG_LZ4);
        assert!(bytes.len() < s.name.len());
        assert_eq!(decode::<Sample>(&bytes).unwrap(), s);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode::<Sample>(&[]).is_err());
        assert!(decode::<Sample>(&[0x7f, 1, 2, 3]).is_err());
    }

    #[test]
    fn test_id_bytes_order() {
        let mut ids = vec![300u32, 2, 65_536, 1, 255];
        let mut keys: Vec<[u8; 4]> = ids.iter().map(|id| id_to_bytes(*id)).collect();
        keys.sort();
        ids.sort();
        let decoded: Vec<u32> = keys.iter().map(|k| id_from_bytes(k).unwrap()).collect();
        assert_eq!(decoded, ids);
        assert_eq!(id_from_bytes(&[1, 2]), None);
    }
}

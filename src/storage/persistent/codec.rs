//! Frame codec for the evaluation log.
//!
//! Frames are JSON payloads wrapped in a fixed envelope:
//!
//! ```text
//! [version: 1 byte][length: 4 bytes LE][payload: N bytes JSON][crc32: 4 bytes LE]
//! ```
//!
//! The checksum covers the payload only; the version byte lets the envelope
//! evolve without breaking old readers.

use std::io::{Read, Write};

use crc32fast::Hasher;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::storage::StorageError;

/// Magic bytes identifying a Kestrel evaluation log.
pub const MAGIC: [u8; 4] = *b"KEVL";

/// Current envelope version.
pub const CODEC_VERSION: u8 = 1;

/// Upper bound on a single frame's payload; anything larger is corruption.
const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Encodes a value into a framed byte vector.
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let payload =
        serde_json::to_vec(value).map_err(|e| StorageError::Codec(format!("encode: {e}")))?;

    let mut hasher = Hasher::new();
    hasher.update(&payload);
    let crc = hasher.finalize();

    #[allow(clippy::cast_possible_truncation)]
    let len = payload.len() as u32;

    let mut out = Vec::with_capacity(1 + 4 + payload.len() + 4);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// Decodes the next frame from a reader.
///
/// Returns `Ok(None)` on a clean end of stream (no bytes left at a frame
/// boundary). A frame cut short, an unknown version, a length past the
/// sanity bound, or a checksum mismatch are all reported as errors; the
/// caller decides whether to truncate or abort.
pub fn decode_frame<T: DeserializeOwned>(
    reader: &mut impl Read,
) -> Result<Option<T>, StorageError> {
    let mut version = [0u8; 1];
    match reader.read(&mut version) {
        Ok(0) => return Ok(None),
        Ok(_) => {}
        Err(e) => return Err(StorageError::Io(e.to_string())),
    }

    if version[0] != CODEC_VERSION {
        return Err(StorageError::Codec(format!(
            "unsupported frame version {} (expected {})",
            version[0], CODEC_VERSION
        )));
    }

    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .map_err(|_| StorageError::Codec("truncated frame length".to_string()))?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(StorageError::Codec(format!(
            "frame length {len} exceeds maximum {MAX_FRAME_SIZE}"
        )));
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .map_err(|_| StorageError::Codec("truncated frame payload".to_string()))?;

    let mut crc_bytes = [0u8; 4];
    reader
        .read_exact(&mut crc_bytes)
        .map_err(|_| StorageError::Codec("truncated frame checksum".to_string()))?;
    let stored = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&payload);
    let computed = hasher.finalize();
    if stored != computed {
        return Err(StorageError::Codec(format!(
            "crc mismatch: stored {stored:08x}, computed {computed:08x}"
        )));
    }

    serde_json::from_slice(&payload)
        .map(Some)
        .map_err(|e| StorageError::Codec(format!("decode: {e}")))
}

/// Writes the file header (magic + version).
pub fn write_header(writer: &mut impl Write) -> Result<(), StorageError> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])?;
    Ok(())
}

/// Reads and validates the file header, returning the version byte.
pub fn read_header(reader: &mut impl Read) -> Result<u8, StorageError> {
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|_| StorageError::Codec("missing log header".to_string()))?;
    if magic != MAGIC {
        return Err(StorageError::Codec(format!(
            "bad magic: expected {MAGIC:?}, got {magic:?}"
        )));
    }

    let mut version = [0u8; 1];
    reader
        .read_exact(&mut version)
        .map_err(|_| StorageError::Codec("missing log version".to_string()))?;
    if version[0] != CODEC_VERSION {
        return Err(StorageError::Codec(format!(
            "unsupported log version {}",
            version[0]
        )));
    }
    Ok(version[0])
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let value = vec![1.5f64, -2.5];
        let encoded = encode_frame(&value).unwrap();
        let mut cursor = Cursor::new(encoded);
        let decoded: Vec<f64> = decode_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(decoded, value);
        // Stream is exhausted cleanly.
        let next: Option<Vec<f64>> = decode_frame(&mut cursor).unwrap();
        assert!(next.is_none());
    }

    #[test]
    fn test_detects_payload_corruption() {
        let mut encoded = encode_frame(&"frame data".to_string()).unwrap();
        let mid = encoded.len() / 2;
        encoded[mid] ^= 0xFF;

        let mut cursor = Cursor::new(encoded);
        let result: Result<Option<String>, _> = decode_frame(&mut cursor);
        assert!(result.is_err());
    }

    #[test]
    fn test_detects_truncation() {
        let encoded = encode_frame(&"frame data".to_string()).unwrap();
        let cut = &encoded[..encoded.len() - 3];

        let mut cursor = Cursor::new(cut.to_vec());
        let result: Result<Option<String>, _> = decode_frame(&mut cursor);
        assert!(matches!(result, Err(StorageError::Codec(_))));
    }

    #[test]
    fn test_rejects_oversized_length() {
        let mut bad = vec![CODEC_VERSION];
        bad.extend_from_slice(&(u32::MAX).to_le_bytes());
        let mut cursor = Cursor::new(bad);
        let result: Result<Option<String>, _> = decode_frame(&mut cursor);
        assert!(result.is_err());
    }

    #[test]
    fn test_header_roundtrip() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_header(&mut cursor).unwrap(), CODEC_VERSION);
    }

    #[test]
    fn test_header_rejects_foreign_magic() {
        let mut cursor = Cursor::new(b"NOPE\x01".to_vec());
        assert!(read_header(&mut cursor).is_err());
    }
}

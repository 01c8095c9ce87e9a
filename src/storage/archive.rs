//! Archive blob format
//!
//! ```text
//! {"uid":..., "ticks":..., ...}\n
//! base64( u32 BE uncompressed length | zlib(raw capture) )
//! ```
//! The `Raw` encoding skips the base64 wrapping and the length prefix.

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::metadata::GameInfo;
use crate::error::StorageError;

/// Body encoding after the metadata line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveEncoding {
    /// Base64 of a length-prefixed zlib stream
    #[default]
    Legacy,
    /// Bare zlib stream
    Raw,
}

/// Encode a capture and its metadata into one archive blob
pub fn encode_archive(
    info: &GameInfo,
    capture: &[u8],
    encoding: ArchiveEncoding,
) -> Result<Vec<u8>, StorageError> {
    let mut blob = serde_json::to_vec(info)?;
    blob.push(b'\n');

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(capture)?;
    let compressed = encoder.finish()?;

    match encoding {
        ArchiveEncoding::Legacy => {
            let mut body = Vec::with_capacity(4 + compressed.len());
            body.extend_from_slice(&(capture.len() as u32).to_be_bytes());
            body.extend_from_slice(&compressed);
            blob.extend_from_slice(BASE64.encode(body).as_bytes());
        }
        ArchiveEncoding::Raw => blob.extend_from_slice(&compressed),
    }

    Ok(blob)
}

/// Metadata line of an archive blob
pub fn read_archive_info(blob: &[u8]) -> Result<GameInfo, StorageError> {
    let (line, _) = split_line(blob)?;
    Ok(serde_json::from_slice(line)?)
}

/// Decode an archive blob into its metadata and raw capture
pub fn decode_archive(
    blob: &[u8],
    encoding: ArchiveEncoding,
) -> Result<(GameInfo, Vec<u8>), StorageError> {
    let (line, body) = split_line(blob)?;
    let info: GameInfo = serde_json::from_slice(line)?;

    let (expected_len, compressed) = match encoding {
        ArchiveEncoding::Legacy => {
            let body = BASE64
                .decode(body)
                .map_err(|e| StorageError::Corrupt(format!("base64: {}", e)))?;
            if body.len() < 4 {
                return Err(StorageError::Corrupt("missing length prefix".into()));
            }
            let len = u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
            (Some(len), body[4..].to_vec())
        }
        ArchiveEncoding::Raw => (None, body.to_vec()),
    };

    let mut capture = Vec::with_capacity(expected_len.unwrap_or(compressed.len() * 4));
    ZlibDecoder::new(&compressed[..]).read_to_end(&mut capture)?;

    if let Some(len) = expected_len {
        if capture.len() != len {
            return Err(StorageError::Corrupt(format!(
                "length prefix {} does not match {} decoded bytes",
                len,
                capture.len()
            )));
        }
    }

    Ok((info, capture))
}

fn split_line(blob: &[u8]) -> Result<(&[u8], &[u8]), StorageError> {
    let pos = blob
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| StorageError::Corrupt("missing metadata line".into()))?;
    Ok((&blob[..pos], &blob[pos + 1..]))
}

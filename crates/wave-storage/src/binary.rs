//! `.wrec`: the default single-file container.
//!
//! ```text
//! magic "WAVEREC\x01" | u32 LE meta_len | meta JSON | u64 LE n_samples |
//! u64 LE n_channels | f32 LE payload [samples × channels] | sha256 (32 bytes)
//! ```

use std::fs;
use std::path::Path;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, info, warn};
use wave_core::{WaveError, WaveResult};

use crate::digest::{self, DIGEST_LEN};
use crate::record::{Record, RecordMetadata, SampleMatrix};
use crate::store::RecordStore;

/// File signature, version byte last.
pub const MAGIC: &[u8; 8] = b"WAVEREC\x01";

/// File extension.
pub const EXTENSION: &str = "wrec";

const HEADER_LEN: usize = MAGIC.len() + 4;
const SHAPE_LEN: usize = 16;

/// Sections of a `.wrec` file whose digest has been checked.
struct Verified {
    metadata_json: Bytes,
    n_samples: usize,
    n_channels: usize,
    payload: Bytes,
    sha256: [u8; DIGEST_LEN],
}

fn corrupt(message: impl Into<String>) -> WaveError {
    WaveError::Integrity(message.into())
}

/// Split and check a whole file image. Nothing is decoded until the digest
/// matches.
fn verify_image(mut buf: Bytes) -> WaveResult<Verified> {
    if buf.len() < HEADER_LEN + SHAPE_LEN + DIGEST_LEN {
        return Err(corrupt(format!("file is truncated ({} bytes)", buf.len())));
    }
    if &buf[..MAGIC.len()] != MAGIC {
        return Err(corrupt("not a wave record (bad magic)"));
    }
    buf.advance(MAGIC.len());

    let meta_len = buf.get_u32_le() as usize;
    if buf.remaining() < meta_len + SHAPE_LEN + DIGEST_LEN {
        return Err(corrupt("file is truncated inside the metadata"));
    }
    let metadata_json = buf.split_to(meta_len);
    let n_samples = buf.get_u64_le();
    let n_channels = buf.get_u64_le();

    let payload_len = usize::try_from(n_samples)
        .ok()
        .zip(usize::try_from(n_channels).ok())
        .and_then(|(s, c)| s.checked_mul(c))
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| corrupt(format!("implausible shape {} × {}", n_samples, n_channels)))?;
    if buf.remaining() != payload_len + DIGEST_LEN {
        return Err(corrupt(format!(
            "payload is {} bytes, shape {} × {} needs {}",
            buf.remaining().saturating_sub(DIGEST_LEN),
            n_samples,
            n_channels,
            payload_len
        )));
    }
    let payload = buf.split_to(payload_len);
    let mut stored = [0u8; DIGEST_LEN];
    buf.copy_to_slice(&mut stored);

    let computed = digest::digest_parts(&metadata_json, n_samples, n_channels, &payload);
    if computed != stored {
        return Err(corrupt(format!(
            "digest mismatch: stored {}, computed {}",
            digest::to_hex(&stored),
            digest::to_hex(&computed)
        )));
    }

    Ok(Verified {
        metadata_json,
        n_samples: n_samples as usize,
        n_channels: n_channels as usize,
        payload,
        sha256: stored,
    })
}

/// Checksummed binary container.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryStore;

impl BinaryStore {
    /// Encode a record to its file image.
    pub fn encode(data: &SampleMatrix, metadata: &RecordMetadata) -> WaveResult<(Bytes, String)> {
        metadata.validate_for(data)?;
        let metadata_json = digest::canonical_metadata(metadata)?;
        let meta_len = u32::try_from(metadata_json.len())
            .map_err(|_| WaveError::config("record metadata exceeds 4 GiB"))?;
        let payload = digest::payload_bytes(data.values());
        let sha = digest::digest_parts(
            &metadata_json,
            data.n_samples() as u64,
            data.n_channels() as u64,
            &payload,
        );

        let mut buf = BytesMut::with_capacity(
            HEADER_LEN + metadata_json.len() + SHAPE_LEN + payload.len() + DIGEST_LEN,
        );
        buf.put_slice(MAGIC);
        buf.put_u32_le(meta_len);
        buf.put_slice(&metadata_json);
        buf.put_u64_le(data.n_samples() as u64);
        buf.put_u64_le(data.n_channels() as u64);
        buf.put_slice(&payload);
        buf.put_slice(&sha);
        Ok((buf.freeze(), digest::to_hex(&sha)))
    }

    /// Verify and decode a file image.
    pub fn decode(image: Bytes) -> WaveResult<Record> {
        let verified = verify_image(image)?;
        let metadata: RecordMetadata = serde_json::from_slice(&verified.metadata_json)
            .map_err(|e| corrupt(format!("metadata is not valid JSON: {}", e)))?;

        let mut payload = verified.payload;
        let mut values = Vec::with_capacity(verified.n_samples * verified.n_channels);
        while payload.has_remaining() {
            values.push(payload.get_f32_le());
        }
        let data = SampleMatrix::new(verified.n_samples, verified.n_channels, values)
            .map_err(|e| corrupt(e.to_string()))?;
        metadata
            .validate_for(&data)
            .map_err(|e| corrupt(e.to_string()))?;

        Ok(Record {
            data,
            metadata,
            sha256: digest::to_hex(&verified.sha256),
        })
    }
}

impl RecordStore for BinaryStore {
    fn extension(&self) -> &'static str {
        EXTENSION
    }

    fn write(&self, path: &Path, data: &SampleMatrix, metadata: &RecordMetadata) -> WaveResult<String> {
        let (image, sha256) = Self::encode(data, metadata)?;
        // Write beside the target and rename so readers never see half a file
        let partial = path.with_extension(format!("{}.partial", EXTENSION));
        if let Err(e) = fs::write(&partial, &image).and_then(|()| fs::rename(&partial, path)) {
            if let Err(cleanup) = fs::remove_file(&partial) {
                debug!(path = %partial.display(), error = %cleanup, "No partial record to remove");
            }
            return Err(e.into());
        }
        info!(
            path = %path.display(),
            samples = data.n_samples(),
            channels = data.n_channels(),
            bytes = image.len(),
            sha256 = %sha256,
            "Wrote wave record"
        );
        Ok(sha256)
    }

    fn read(&self, path: &Path) -> WaveResult<Record> {
        let image = Bytes::from(fs::read(path)?);
        let record = Self::decode(image)?;
        debug!(
            path = %path.display(),
            samples = record.data.n_samples(),
            "Read wave record"
        );
        Ok(record)
    }

    fn verify_integrity(&self, path: &Path) -> WaveResult<bool> {
        let image = Bytes::from(fs::read(path)?);
        match verify_image(image) {
            Ok(_) => Ok(true),
            Err(WaveError::Integrity(reason)) => {
                warn!(path = %path.display(), %reason, "Record failed integrity check");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (SampleMatrix, RecordMetadata) {
        let data = SampleMatrix::new(3, 2, vec![0.5, -1.25, 2.0, f32::MIN_POSITIVE, -0.0, 7.75])
            .unwrap();
        let meta = RecordMetadata::new(100.0, vec!["WG1".into(), "WG2".into()])
            .with_attribute("operator", "alice");
        (data, meta)
    }

    #[test]
    fn test_image_layout() {
        let (data, meta) = sample();
        let (image, sha) = BinaryStore::encode(&data, &meta).unwrap();
        assert_eq!(&image[..8], MAGIC);
        assert_eq!(sha.len(), 64);
        let meta_len = u32::from_le_bytes([image[8], image[9], image[10], image[11]]) as usize;
        assert_eq!(image.len(), 12 + meta_len + 16 + 6 * 4 + 32);
        assert_eq!(digest::to_hex(&image[image.len() - 32..]), sha);
    }

    #[test]
    fn test_decode_is_bit_identical() {
        let (data, meta) = sample();
        let (image, sha) = BinaryStore::encode(&data, &meta).unwrap();
        let record = BinaryStore::decode(image).unwrap();
        let bits: Vec<u32> = record.data.values().iter().map(|v| v.to_bits()).collect();
        let expected: Vec<u32> = data.values().iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits, expected);
        assert_eq!(record.metadata, meta);
        assert_eq!(record.sha256, sha);
    }

    #[test]
    fn test_every_single_byte_flip_is_detected() {
        let (data, meta) = sample();
        let (image, _) = BinaryStore::encode(&data, &meta).unwrap();
        for i in 0..image.len() {
            let mut corrupted = image.to_vec();
            corrupted[i] ^= 0x40;
            assert!(
                matches!(
                    BinaryStore::decode(Bytes::from(corrupted)),
                    Err(WaveError::Integrity(_))
                ),
                "flip at byte {} went unnoticed",
                i
            );
        }
    }

    #[test]
    fn test_truncation_is_detected() {
        let (data, meta) = sample();
        let (image, _) = BinaryStore::encode(&data, &meta).unwrap();
        for len in [0, 7, 20, image.len() - 33, image.len() - 1] {
            assert!(matches!(
                BinaryStore::decode(image.slice(..len)),
                Err(WaveError::Integrity(_))
            ));
        }
    }

    #[test]
    fn test_failed_rename_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.wrec");
        // A directory in the way makes the final rename fail
        fs::create_dir(&path).unwrap();
        let (data, meta) = sample();

        assert!(BinaryStore.write(&path, &data, &meta).is_err());
        assert!(!dir.path().join("run.wrec.partial").exists());
        assert!(path.is_dir());
    }

    #[test]
    fn test_encode_rejects_mismatched_metadata() {
        let (data, _) = sample();
        let meta = RecordMetadata::new(100.0, vec!["only".into()]);
        assert!(matches!(
            BinaryStore::encode(&data, &meta),
            Err(WaveError::Configuration(_))
        ));
    }
}

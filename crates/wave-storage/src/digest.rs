//! Canonical byte representation and its SHA-256.
//!
//! `u64 LE metadata length ‖ metadata JSON ‖ u64 LE n_samples ‖
//! u64 LE n_channels ‖ f32 LE payload`. The metadata JSON is produced once at
//! write time and stored verbatim, so readers hash exactly what was hashed.

use sha2::{Digest, Sha256};
use wave_core::{WaveError, WaveResult};

use crate::record::{RecordMetadata, SampleMatrix};

/// Trailer length in bytes.
pub const DIGEST_LEN: usize = 32;

/// Serialize metadata once, in its canonical form.
pub fn canonical_metadata(metadata: &RecordMetadata) -> WaveResult<Vec<u8>> {
    Ok(serde_json::to_vec(metadata)?)
}

/// Little-endian payload bytes.
pub fn payload_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Digest over already-encoded parts.
pub fn digest_parts(
    metadata_json: &[u8],
    n_samples: u64,
    n_channels: u64,
    payload_le: &[u8],
) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update((metadata_json.len() as u64).to_le_bytes());
    hasher.update(metadata_json);
    hasher.update(n_samples.to_le_bytes());
    hasher.update(n_channels.to_le_bytes());
    hasher.update(payload_le);
    hasher.finalize().into()
}

/// Digest of a matrix with its encoded metadata.
pub fn digest(metadata_json: &[u8], matrix: &SampleMatrix) -> [u8; DIGEST_LEN] {
    digest_parts(
        metadata_json,
        matrix.n_samples() as u64,
        matrix.n_channels() as u64,
        &payload_bytes(matrix.values()),
    )
}

/// Lowercase hex.
pub fn to_hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Parse lowercase or uppercase hex of exactly [`DIGEST_LEN`] bytes.
pub fn from_hex(hex: &str) -> WaveResult<[u8; DIGEST_LEN]> {
    let bytes = hex.as_bytes();
    if bytes.len() != DIGEST_LEN * 2 {
        return Err(WaveError::Integrity(format!(
            "digest has {} hex digits, expected {}",
            bytes.len(),
            DIGEST_LEN * 2
        )));
    }
    let mut out = [0u8; DIGEST_LEN];
    for (i, pair) in bytes.chunks(2).enumerate() {
        let text = std::str::from_utf8(pair)
            .map_err(|_| WaveError::Integrity("digest is not hex".into()))?;
        out[i] = u8::from_str_radix(text, 16)
            .map_err(|_| WaveError::Integrity(format!("invalid hex digit pair '{}'", text)))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let d = digest_parts(b"{}", 0, 1, &[]);
        let hex = to_hex(&d);
        assert_eq!(hex.len(), 64);
        assert_eq!(from_hex(&hex).unwrap(), d);
        assert_eq!(from_hex(&hex.to_uppercase()).unwrap(), d);
        assert!(from_hex("abc").is_err());
        assert!(from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_digest_covers_shape_and_metadata() {
        let payload = payload_bytes(&[1.0, 2.0, 3.0, 4.0]);
        let base = digest_parts(b"{\"a\":1}", 2, 2, &payload);
        assert_ne!(base, digest_parts(b"{\"a\":1}", 4, 1, &payload));
        assert_ne!(base, digest_parts(b"{\"a\":2}", 2, 2, &payload));
        let mut flipped = payload.clone();
        flipped[5] ^= 0x01;
        assert_ne!(base, digest_parts(b"{\"a\":1}", 2, 2, &flipped));
    }

    #[test]
    fn test_payload_is_little_endian() {
        assert_eq!(payload_bytes(&[1.0]), 1.0f32.to_le_bytes().to_vec());
    }
}

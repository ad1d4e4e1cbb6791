//! Calibration certificates: a set of results with a SHA-256 checksum.
//!
//! The checksum covers the canonical JSON of everything except the checksum
//! itself (issue time, operator, results in order). Serialization of a
//! certificate is deterministic, so a certificate read back from disk hashes
//! to the same digest unless it was altered.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use wave_core::{WaveError, WaveResult};

use crate::regression::CalibrationResult;

/// Issued calibration results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationCertificate {
    /// Issue time
    pub issued_at: DateTime<Utc>,
    /// Who ran the calibration
    pub operator: String,
    /// One result per sensor
    pub results: Vec<CalibrationResult>,
    /// Hex SHA-256 over the other fields
    pub sha256: String,
}

#[derive(Serialize)]
struct CertificateBody<'a> {
    issued_at: &'a DateTime<Utc>,
    operator: &'a str,
    results: &'a [CalibrationResult],
}

impl CalibrationCertificate {
    /// Issue a certificate for `results` now.
    pub fn issue(
        operator: impl Into<String>,
        results: Vec<CalibrationResult>,
    ) -> WaveResult<Self> {
        if results.is_empty() {
            return Err(WaveError::config("A certificate needs at least one result"));
        }
        let mut certificate = Self {
            issued_at: Utc::now(),
            operator: operator.into(),
            results,
            sha256: String::new(),
        };
        certificate.sha256 = certificate.compute_checksum()?;

        let warned = certificate
            .results
            .iter()
            .filter(|r| !r.meets_threshold())
            .count();
        info!(
            operator = %certificate.operator,
            n_results = certificate.results.len(),
            below_threshold = warned,
            "Issued calibration certificate"
        );
        Ok(certificate)
    }

    /// Recompute the checksum over the current contents.
    pub fn compute_checksum(&self) -> WaveResult<String> {
        let body = CertificateBody {
            issued_at: &self.issued_at,
            operator: &self.operator,
            results: &self.results,
        };
        let bytes = serde_json::to_vec(&body)?;
        Ok(format!("{:x}", Sha256::digest(&bytes)))
    }

    /// Whether the stored checksum matches the contents.
    pub fn verify(&self) -> bool {
        self.compute_checksum()
            .map(|sum| sum == self.sha256)
            .unwrap_or(false)
    }

    /// Result for one sensor.
    pub fn result_for(&self, sensor_id: &str) -> Option<&CalibrationResult> {
        self.results.iter().find(|r| r.sensor_id() == sensor_id)
    }

    /// Pretty JSON.
    pub fn to_json(&self) -> WaveResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and verify. A checksum mismatch is an [`WaveError::Integrity`].
    pub fn from_json(json: &str) -> WaveResult<Self> {
        let certificate: Self = serde_json::from_str(json)?;
        if !certificate.verify() {
            warn!(operator = %certificate.operator, "Calibration certificate checksum mismatch");
            return Err(WaveError::Integrity(
                "calibration certificate checksum mismatch".to_string(),
            ));
        }
        Ok(certificate)
    }

    /// Write as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> WaveResult<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read and verify a certificate written by [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> WaveResult<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}

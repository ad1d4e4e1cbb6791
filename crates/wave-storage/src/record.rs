//! In-memory form of a stored record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wave_core::{WaveError, WaveResult};

/// Row-major `[samples × channels]` float32 matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleMatrix {
    n_samples: usize,
    n_channels: usize,
    values: Vec<f32>,
}

impl SampleMatrix {
    /// Wrap row-major values.
    pub fn new(n_samples: usize, n_channels: usize, values: Vec<f32>) -> WaveResult<Self> {
        let expected = n_samples.checked_mul(n_channels).ok_or_else(|| {
            WaveError::config(format!("{} × {} matrix is too large", n_samples, n_channels))
        })?;
        if n_channels == 0 {
            return Err(WaveError::config("a record needs at least one channel"));
        }
        if values.len() != expected {
            return Err(WaveError::config(format!(
                "{} values for a {} × {} matrix",
                values.len(),
                n_samples,
                n_channels
            )));
        }
        Ok(Self {
            n_samples,
            n_channels,
            values,
        })
    }

    /// Interleave per-channel columns, narrowing to f32.
    pub fn from_channels<C: AsRef<[f64]>>(channels: &[C]) -> WaveResult<Self> {
        let n_channels = channels.len();
        let n_samples = channels.first().map_or(0, |c| c.as_ref().len());
        if let Some(i) = channels.iter().position(|c| c.as_ref().len() != n_samples) {
            return Err(WaveError::config(format!(
                "channel {} has {} samples, expected {}",
                i,
                channels[i].as_ref().len(),
                n_samples
            )));
        }
        let mut values = Vec::with_capacity(n_samples * n_channels);
        for s in 0..n_samples {
            values.extend(channels.iter().map(|c| c.as_ref()[s] as f32));
        }
        Self::new(n_samples, n_channels, values)
    }

    /// Number of rows.
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Number of columns.
    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    /// Row-major values.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// One scan across all channels.
    pub fn row(&self, sample: usize) -> Option<&[f32]> {
        let start = sample.checked_mul(self.n_channels)?;
        self.values.get(start..start + self.n_channels)
    }

    /// One value.
    pub fn get(&self, sample: usize, channel: usize) -> Option<f32> {
        if channel >= self.n_channels {
            return None;
        }
        self.row(sample).map(|r| r[channel])
    }

    /// Copy of one column.
    pub fn channel(&self, channel: usize) -> Option<Vec<f32>> {
        if channel >= self.n_channels {
            return None;
        }
        Some(
            self.values
                .iter()
                .skip(channel)
                .step_by(self.n_channels)
                .copied()
                .collect(),
        )
    }

    /// Columns widened back to f64, as the analysis functions take them.
    pub fn to_channels(&self) -> Vec<Vec<f64>> {
        (0..self.n_channels)
            .map(|c| {
                self.values
                    .iter()
                    .skip(c)
                    .step_by(self.n_channels)
                    .map(|&v| f64::from(v))
                    .collect()
            })
            .collect()
    }

    /// Consume into the row-major values.
    pub fn into_values(self) -> Vec<f32> {
        self.values
    }
}

/// Metadata attached to a record and covered by its digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Column names, in matrix order
    pub channel_names: Vec<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Free-form extras, keys sorted
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl RecordMetadata {
    /// Metadata stamped with the current time.
    pub fn new(sample_rate: f64, channel_names: Vec<String>) -> Self {
        Self {
            sample_rate,
            channel_names,
            created_at: Utc::now(),
            attributes: BTreeMap::new(),
        }
    }

    /// Attach one attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Attach an acquisition session summary.
    pub fn with_session_summary(
        self,
        session_id: impl ToString,
        total_samples: u64,
        overflow_count: u64,
        actual_sample_rate: f64,
    ) -> Self {
        self.with_attribute("session_id", session_id.to_string())
            .with_attribute("total_samples", total_samples)
            .with_attribute("overflow_count", overflow_count)
            .with_attribute("actual_sample_rate", actual_sample_rate)
    }

    /// Check the metadata describes `matrix`.
    pub fn validate_for(&self, matrix: &SampleMatrix) -> WaveResult<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(WaveError::config(format!(
                "record sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.channel_names.len() != matrix.n_channels() {
            return Err(WaveError::config(format!(
                "{} channel names for {} channels",
                self.channel_names.len(),
                matrix.n_channels()
            )));
        }
        Ok(())
    }
}

/// A record read back and verified.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Sample matrix
    pub data: SampleMatrix,
    /// Attached metadata
    pub metadata: RecordMetadata,
    /// Hex SHA-256 that was verified
    pub sha256: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_channels_interleaves() {
        let m = SampleMatrix::from_channels(&[vec![1.0, 2.0, 3.0], vec![10.0, 20.0, 30.0]]).unwrap();
        assert_eq!(m.n_samples(), 3);
        assert_eq!(m.n_channels(), 2);
        assert_eq!(m.values(), &[1.0, 10.0, 2.0, 20.0, 3.0, 30.0]);
        assert_eq!(m.row(1), Some(&[2.0f32, 20.0][..]));
        assert_eq!(m.get(2, 1), Some(30.0));
        assert_eq!(m.get(0, 2), None);
        assert_eq!(m.channel(1), Some(vec![10.0, 20.0, 30.0]));
        assert_eq!(m.to_channels()[0], vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_shape_checks() {
        assert!(SampleMatrix::from_channels(&[vec![1.0], vec![1.0, 2.0]]).is_err());
        assert!(SampleMatrix::new(2, 2, vec![0.0; 3]).is_err());
        let none: [Vec<f64>; 0] = [];
        assert!(SampleMatrix::from_channels(&none).is_err());
        assert_eq!(SampleMatrix::new(0, 3, Vec::new()).unwrap().n_samples(), 0);
    }

    #[test]
    fn test_metadata_validation() {
        let m = SampleMatrix::new(1, 2, vec![0.0, 1.0]).unwrap();
        let meta = RecordMetadata::new(100.0, vec!["WG1".into(), "WG2".into()]);
        assert!(meta.validate_for(&m).is_ok());
        let short = RecordMetadata::new(100.0, vec!["WG1".into()]);
        assert!(short.validate_for(&m).is_err());
        let bad_rate = RecordMetadata::new(0.0, vec!["a".into(), "b".into()]);
        assert!(bad_rate.validate_for(&m).is_err());
    }

    #[test]
    fn test_session_summary_attributes() {
        let meta = RecordMetadata::new(100.0, vec!["WG1".into()])
            .with_session_summary("abc", 1000, 3, 99.5);
        assert_eq!(meta.attributes["total_samples"], 1000);
        assert_eq!(meta.attributes["overflow_count"], 3);
        assert_eq!(meta.attributes["session_id"], "abc");
        let keys: Vec<_> = meta.attributes.keys().cloned().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}

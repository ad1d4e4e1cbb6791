//! Sample containers passed between backends and the acquisition loop.
//!
//! Backends hand back a [`SampleBlock`]: a channel-major matrix holding every
//! scan completed since the previous read. The ring buffer turns blocks into
//! timestamped [`SampleFrame`]s, one per scan, where the timestamp is derived
//! from the scan's index and the hardware rate rather than from wall-clock
//! time.

use serde::{Deserialize, Serialize};

use crate::error::{WaveError, WaveResult};

/// One scan: a value per channel at a hardware timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleFrame {
    /// Seconds since the start of the session
    pub timestamp: f64,
    /// One value per channel, in channel order
    pub values: Vec<f64>,
}

/// Channel-major block of samples, `channels × samples`.
///
/// Every channel always holds the same number of samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBlock {
    channels: Vec<Vec<f64>>,
}

impl SampleBlock {
    /// Empty block for `n_channels` channels.
    pub fn new(n_channels: usize) -> Self {
        Self {
            channels: vec![Vec::new(); n_channels],
        }
    }

    /// Empty block with room for `n_samples` per channel.
    pub fn with_capacity(n_channels: usize, n_samples: usize) -> Self {
        Self {
            channels: (0..n_channels)
                .map(|_| Vec::with_capacity(n_samples))
                .collect(),
        }
    }

    /// Build from per-channel vectors of equal length.
    pub fn from_channels(channels: Vec<Vec<f64>>) -> WaveResult<Self> {
        if let Some(first) = channels.first() {
            let n = first.len();
            if let Some(bad) = channels.iter().position(|c| c.len() != n) {
                return Err(WaveError::config(format!(
                    "Channel {} has {} samples, expected {}",
                    bad,
                    channels[bad].len(),
                    n
                )));
            }
        }
        Ok(Self { channels })
    }

    /// Deinterleave `[scan0_ch0, scan0_ch1, ..., scan1_ch0, ...]`.
    ///
    /// A trailing partial scan is ignored.
    pub fn from_interleaved(data: &[f64], n_channels: usize) -> Self {
        if n_channels == 0 {
            return Self::default();
        }
        let n_scans = data.len() / n_channels;
        let mut block = Self::with_capacity(n_channels, n_scans);
        for scan in data.chunks_exact(n_channels) {
            for (channel, &value) in block.channels.iter_mut().zip(scan) {
                channel.push(value);
            }
        }
        block
    }

    /// Number of channels.
    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of samples per channel.
    pub fn n_samples(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// True when no samples are held.
    pub fn is_empty(&self) -> bool {
        self.n_samples() == 0
    }

    /// Samples of one channel.
    pub fn channel(&self, index: usize) -> Option<&[f64]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// All channels.
    pub fn channels(&self) -> &[Vec<f64>] {
        &self.channels
    }

    /// Consume into per-channel vectors.
    pub fn into_channels(self) -> Vec<Vec<f64>> {
        self.channels
    }

    /// Values of one scan across channels.
    pub fn scan(&self, index: usize) -> Option<Vec<f64>> {
        if index >= self.n_samples() {
            return None;
        }
        Some(self.channels.iter().map(|c| c[index]).collect())
    }

    /// Append one scan.
    pub fn push_scan(&mut self, values: &[f64]) -> WaveResult<()> {
        if values.len() != self.channels.len() {
            return Err(WaveError::config(format!(
                "Scan has {} values, block has {} channels",
                values.len(),
                self.channels.len()
            )));
        }
        for (channel, &value) in self.channels.iter_mut().zip(values) {
            channel.push(value);
        }
        Ok(())
    }

    /// Move all samples of `other` onto the end of this block.
    pub fn append(&mut self, other: SampleBlock) -> WaveResult<()> {
        if other.is_empty() {
            return Ok(());
        }
        if self.channels.is_empty() {
            *self = other;
            return Ok(());
        }
        if other.n_channels() != self.n_channels() {
            return Err(WaveError::config(format!(
                "Cannot append a {}-channel block to a {}-channel block",
                other.n_channels(),
                self.n_channels()
            )));
        }
        for (dst, src) in self.channels.iter_mut().zip(other.channels) {
            dst.extend(src);
        }
        Ok(())
    }

    /// Timestamped frames, where sample `i` of this block is scan
    /// `start_index + i` of a session running at `sample_rate`.
    pub fn frames(&self, start_index: u64, sample_rate: f64) -> Vec<SampleFrame> {
        (0..self.n_samples())
            .map(|i| SampleFrame {
                timestamp: (start_index + i as u64) as f64 / sample_rate,
                values: self.channels.iter().map(|c| c[i]).collect(),
            })
            .collect()
    }
}

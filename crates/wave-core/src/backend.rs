//! The device backend contract.
//!
//! Every acquisition source (the synthetic demo board, a Comedi-driven DAQ
//! card) implements [`DeviceBackend`]. The acquisition controller only ever
//! talks to this trait, which is what lets the whole pipeline run and be
//! tested without hardware.
//!
//! # Lifecycle
//!
//! ```text
//! open() -> configure_channels() -> configure_acquisition() -> start()
//!        -> read()* -> stop() -> read() (flushed remainder) -> close()
//! ```
//!
//! `read()` never blocks for longer than the backend's read timeout, returns
//! every completed scan exactly once, and may return an empty block. The
//! first `read()` after `stop()` returns whatever the hardware finished
//! between the last read and the stop.

use serde::{Deserialize, Serialize};

use crate::channel::{validate_channel_list, ChannelConfig, VoltageRange};
use crate::error::{WaveError, WaveResult};
use crate::frame::SampleBlock;
use crate::limits;

/// A board known to the driver layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardInfo {
    /// Driver-level identifier (e.g. "/dev/comedi0")
    pub id: String,
    /// Board name reported by the driver
    pub name: String,
}

impl BoardInfo {
    /// Create a board descriptor.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// What a backend can do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendCapabilities {
    /// Maximum number of simultaneously scanned channels
    pub max_channels: usize,
    /// Lowest supported per-channel sample rate (Hz)
    pub min_sample_rate: f64,
    /// Highest supported per-channel sample rate (Hz)
    pub max_sample_rate: f64,
    /// Input ranges the board can be programmed with
    pub voltage_ranges: Vec<VoltageRange>,
    /// Boards visible to the driver
    pub boards: Vec<BoardInfo>,
}

impl BackendCapabilities {
    /// Check a channel list against these limits.
    pub fn validate_channels(&self, channels: &[ChannelConfig]) -> WaveResult<()> {
        validate_channel_list(channels)?;

        let max = self.max_channels.min(limits::MAX_CHANNELS);
        if channels.len() > max {
            return Err(WaveError::config(format!(
                "{} channels requested, backend supports at most {}",
                channels.len(),
                max
            )));
        }

        for channel in channels {
            if channel.id as usize >= self.max_channels {
                return Err(WaveError::config(format!(
                    "Channel '{}' uses hardware channel {}, backend has {}",
                    channel.name, channel.id, self.max_channels
                )));
            }
            if !self.voltage_ranges.contains(&channel.voltage_range) {
                return Err(WaveError::config(format!(
                    "Channel '{}': voltage range {} not supported",
                    channel.name, channel.voltage_range
                )));
            }
        }
        Ok(())
    }

    /// Check a per-channel sample rate against these limits.
    pub fn validate_rate(&self, sample_rate: f64) -> WaveResult<()> {
        if !sample_rate.is_finite()
            || sample_rate < self.min_sample_rate
            || sample_rate > self.max_sample_rate
        {
            return Err(WaveError::config(format!(
                "Sample rate {} Hz outside supported range {}-{} Hz",
                sample_rate, self.min_sample_rate, self.max_sample_rate
            )));
        }
        Ok(())
    }
}

/// Uniform contract over real and simulated acquisition hardware.
///
/// Implementations are driven from a single thread at a time. They must be
/// `Send` so the acquisition worker can take ownership while running.
pub trait DeviceBackend: Send {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &str;

    /// Whether the driver layer is present. Never fails.
    fn is_available(&self) -> bool;

    /// Boards known to the driver. Empty, not an error, when there are none.
    fn detect_devices(&self) -> Vec<BoardInfo>;

    /// Limits used to validate channel and acquisition setup.
    fn capabilities(&self) -> BackendCapabilities;

    /// Claim the device. Returns false if it is claimed elsewhere or
    /// unreachable. Opening an open backend returns true.
    fn open(&mut self) -> bool;

    /// Release the device. Closing a closed backend is a no-op.
    fn close(&mut self);

    /// Whether [`open`](Self::open) has succeeded and not been undone.
    fn is_open(&self) -> bool;

    /// Select the channels to scan, in order.
    fn configure_channels(&mut self, channels: &[ChannelConfig]) -> WaveResult<()>;

    /// Set the per-channel rate and the read chunk size in scans.
    fn configure_acquisition(&mut self, sample_rate: f64, buffer_size: usize) -> WaveResult<()>;

    /// Begin continuous hardware-timed sampling.
    fn start(&mut self) -> WaveResult<()>;

    /// Halt sampling. Scans completed before the stop stay readable.
    fn stop(&mut self) -> WaveResult<()>;

    /// Every scan completed since the previous call, in volts.
    fn read(&mut self) -> WaveResult<SampleBlock>;

    /// One software-timed sample of a configured channel, in volts.
    fn read_single(&mut self, channel_index: usize) -> WaveResult<f64>;

    /// Rate the hardware actually runs at once configured.
    fn actual_sample_rate(&self) -> Option<f64>;
}

//! Session configuration and metadata.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wave_core::channel::validate_channel_list;
use wave_core::config::AcquisitionSettings;
use wave_core::limits::MAX_RING_FRAMES;
use wave_core::{ChannelConfig, WaveError, WaveResult};

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session
    Idle,
    /// Validated and ready to start
    Configured,
    /// Worker is acquiring
    Running,
    /// Stopped cleanly; data and metadata final
    Stopped,
    /// Stopped by an unrecoverable error; captured data still readable
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// What to acquire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Channels, in scan order
    pub channels: Vec<ChannelConfig>,
    /// Requested per-channel rate in Hz
    pub sample_rate: f64,
    /// Scans per backend read
    pub buffer_size: usize,
    /// Ring capacity in frames
    pub ring_capacity: usize,
}

impl SessionConfig {
    /// Session over `channels` at `sample_rate` with default chunking and a
    /// ten minute ring.
    pub fn new(channels: Vec<ChannelConfig>, sample_rate: f64) -> Self {
        let settings = AcquisitionSettings {
            sample_rate,
            ..AcquisitionSettings::default()
        };
        Self::from_settings(channels, &settings)
    }

    /// Session using configured acquisition settings.
    pub fn from_settings(channels: Vec<ChannelConfig>, settings: &AcquisitionSettings) -> Self {
        Self {
            channels,
            sample_rate: settings.sample_rate,
            buffer_size: settings.buffer_size,
            ring_capacity: settings.ring_capacity().min(MAX_RING_FRAMES),
        }
    }

    /// Override the read chunk.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Override the ring capacity.
    pub fn with_ring_capacity(mut self, frames: usize) -> Self {
        self.ring_capacity = frames;
        self
    }

    /// Backend-independent checks.
    pub fn validate(&self) -> WaveResult<()> {
        validate_channel_list(&self.channels)?;
        for channel in &self.channels {
            channel.validate()?;
        }
        if !(self.sample_rate > 0.0 && self.sample_rate.is_finite()) {
            return Err(WaveError::config(format!(
                "Invalid sample rate: {}",
                self.sample_rate
            )));
        }
        if self.buffer_size == 0 {
            return Err(WaveError::config("Buffer size must be greater than 0"));
        }
        if self.ring_capacity == 0 || self.ring_capacity > MAX_RING_FRAMES {
            return Err(WaveError::config(format!(
                "Ring capacity {} outside 1-{} frames",
                self.ring_capacity, MAX_RING_FRAMES
            )));
        }
        Ok(())
    }
}

/// One acquisition run and its metadata.
///
/// Only the controller mutates it; callers get clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSession {
    /// Session id
    pub id: Uuid,
    /// Channels, fixed for the life of the session
    pub channels: Vec<ChannelConfig>,
    /// Requested rate in Hz
    pub sample_rate: f64,
    /// Rate the hardware runs at, once started
    pub actual_sample_rate: Option<f64>,
    /// Scans per backend read
    pub buffer_size: usize,
    /// Ring capacity in frames
    pub ring_capacity: usize,
    /// Current state
    pub state: SessionState,
    /// Wall-clock start
    pub started_at: Option<DateTime<Utc>>,
    /// Wall-clock stop
    pub stopped_at: Option<DateTime<Utc>>,
    /// Scans acquired per channel, overwritten ones included
    pub total_samples: u64,
    /// Frames overwritten in the ring
    pub overflow_count: u64,
    /// Error that ended the session, if any
    pub last_error: Option<String>,
}

impl AcquisitionSession {
    pub(crate) fn new(config: &SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            channels: config.channels.clone(),
            sample_rate: config.sample_rate,
            actual_sample_rate: None,
            buffer_size: config.buffer_size,
            ring_capacity: config.ring_capacity,
            state: SessionState::Configured,
            started_at: None,
            stopped_at: None,
            total_samples: 0,
            overflow_count: 0,
            last_error: None,
        }
    }

    /// Rate to timestamp samples with: actual if known, else requested.
    pub fn effective_sample_rate(&self) -> f64 {
        self.actual_sample_rate.unwrap_or(self.sample_rate)
    }

    /// Wall-clock duration, up to now while running.
    pub fn duration(&self) -> Option<Duration> {
        let start = self.started_at?;
        let end = self.stopped_at.unwrap_or_else(Utc::now);
        (end - start).to_std().ok()
    }

    /// Duration implied by the sample count at the hardware rate.
    pub fn acquired_duration(&self) -> Duration {
        Duration::from_secs_f64(self.total_samples as f64 / self.effective_sample_rate())
    }

    /// Channel names in scan order.
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels() -> Vec<ChannelConfig> {
        vec![ChannelConfig::new(0, "WG1"), ChannelConfig::new(1, "WG2")]
    }

    #[test]
    fn test_defaults_from_settings() {
        let config = SessionConfig::new(channels(), 50.0);
        assert_eq!(config.buffer_size, 10);
        assert_eq!(config.ring_capacity, 30_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(SessionConfig::new(Vec::new(), 10.0).validate().is_err());
        assert!(SessionConfig::new(channels(), -1.0).validate().is_err());
        assert!(SessionConfig::new(channels(), 10.0)
            .with_buffer_size(0)
            .validate()
            .is_err());
        assert!(SessionConfig::new(channels(), 10.0)
            .with_ring_capacity(0)
            .validate()
            .is_err());

        let dup = vec![ChannelConfig::new(0, "WG1"), ChannelConfig::new(0, "WG2")];
        assert!(SessionConfig::new(dup, 10.0).validate().is_err());
    }

    #[test]
    fn test_session_metadata() {
        let mut session = AcquisitionSession::new(&SessionConfig::new(channels(), 100.0));
        assert_eq!(session.state, SessionState::Configured);
        assert!(session.duration().is_none());
        assert_eq!(session.channel_names(), vec!["WG1", "WG2"]);

        session.actual_sample_rate = Some(200.0);
        session.total_samples = 500;
        assert_eq!(session.acquired_duration(), Duration::from_millis(2500));
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&SessionState::Configured).unwrap();
        assert_eq!(json, "\"configured\"");
        assert_eq!(SessionState::Error.to_string(), "error");
    }
}

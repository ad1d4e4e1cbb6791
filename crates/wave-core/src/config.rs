//! Layered configuration using figment.
//!
//! Configuration is resolved from, in increasing priority:
//! 1. Built-in defaults
//! 2. A TOML file (by default `config/wavelab.toml`, missing file is fine)
//! 3. Environment variables prefixed with `WAVELAB_`, `__` separating sections
//!
//! # Example
//! ```no_run
//! use wave_core::config::WaveConfig;
//!
//! // WAVELAB_ANALYSIS__CONDITION_THRESHOLD=8 overrides analysis.condition_threshold
//! let config = WaveConfig::load()?;
//! println!("Default rate: {} Hz", config.acquisition.sample_rate);
//! # Ok::<(), wave_core::WaveError>(())
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{WaveError, WaveResult};
use crate::retry::RetryPolicy;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/wavelab.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "WAVELAB_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveConfig {
    /// Acquisition loop settings
    pub acquisition: AcquisitionSettings,
    /// Transient failure handling
    pub retry: RetrySettings,
    /// Spectral and reflection analysis
    pub analysis: AnalysisSettings,
    /// Calibration regression
    pub calibration: CalibrationSettings,
    /// Persistence
    pub storage: StorageSettings,
}

/// Acquisition loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Per-channel sample rate in Hz
    pub sample_rate: f64,
    /// Scans per backend read; with the rate this sets the loop cadence
    pub buffer_size: usize,
    /// Ring buffer capacity in seconds of data
    pub ring_capacity_secs: f64,
    /// Bound on a single hardware read in milliseconds
    pub read_timeout_ms: u64,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            sample_rate: 100.0,
            buffer_size: 10,
            ring_capacity_secs: 600.0,
            read_timeout_ms: 1000,
        }
    }
}

impl AcquisitionSettings {
    /// Ring capacity in frames at the configured rate.
    pub fn ring_capacity(&self) -> usize {
        (self.ring_capacity_secs * self.sample_rate).ceil() as usize
    }

    /// Read timeout as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Transient failure handling, durations in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Consecutive failures before a session-fatal error
    pub max_consecutive_failures: u32,
    /// Consecutive timeouts before a session-fatal error
    pub max_consecutive_timeouts: u32,
    /// First backoff delay
    pub initial_backoff_ms: u64,
    /// Backoff ceiling
    pub max_backoff_ms: u64,
    /// Backoff growth factor
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_consecutive_failures: policy.max_consecutive_failures,
            max_consecutive_timeouts: policy.max_consecutive_timeouts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            multiplier: policy.multiplier,
        }
    }
}

impl RetrySettings {
    /// Build the runtime policy.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_consecutive_failures: self.max_consecutive_failures,
            max_consecutive_timeouts: self.max_consecutive_timeouts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.multiplier,
        }
    }
}

/// Spectral and reflection analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Window name: hann, hamming, blackman or rectangular
    pub window: String,
    /// Noise floor relative to the strongest incident bin energy
    pub noise_floor_ratio: f64,
    /// Largest acceptable transfer-matrix condition number
    pub condition_threshold: f64,
    /// Gravitational acceleration in m/s²
    pub gravity: f64,
    /// Largest probe spacing as a fraction of the shortest wavelength
    pub max_spacing_ratio: f64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            window: "hann".to_string(),
            noise_floor_ratio: 1e-3,
            condition_threshold: 10.0,
            gravity: 9.80665,
            max_spacing_ratio: 0.5,
        }
    }
}

/// Calibration regression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// R² below this attaches a quality warning
    pub r_squared_threshold: f64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            r_squared_threshold: 0.98,
        }
    }
}

/// Persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory for recorded sessions
    pub output_dir: PathBuf,
    /// Container format: wrec or hdf5
    pub default_format: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            default_format: "wrec".to_string(),
        }
    }
}

const VALID_WINDOWS: [&str; 4] = ["hann", "hamming", "blackman", "rectangular"];
const VALID_FORMATS: [&str; 2] = ["wrec", "hdf5"];

impl WaveConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> WaveResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific TOML file and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> WaveResult<Self> {
        let config: Self = Self::figment(path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// The provider stack, exposed so embedders can merge their own layers.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Reject values that parse but make no sense.
    pub fn validate(&self) -> WaveResult<()> {
        let acq = &self.acquisition;
        if !(acq.sample_rate.is_finite() && acq.sample_rate > 0.0) {
            return Err(WaveError::config(format!(
                "acquisition.sample_rate must be positive, got {}",
                acq.sample_rate
            )));
        }
        if acq.buffer_size == 0 {
            return Err(WaveError::config("acquisition.buffer_size must be at least 1"));
        }
        if !(acq.ring_capacity_secs.is_finite() && acq.ring_capacity_secs > 0.0) {
            return Err(WaveError::config(format!(
                "acquisition.ring_capacity_secs must be positive, got {}",
                acq.ring_capacity_secs
            )));
        }
        if acq.read_timeout_ms == 0 {
            return Err(WaveError::config("acquisition.read_timeout_ms must be at least 1"));
        }

        let retry = &self.retry;
        if retry.max_consecutive_failures == 0 {
            return Err(WaveError::config(
                "retry.max_consecutive_failures must be at least 1",
            ));
        }
        if retry.max_consecutive_timeouts < 2 {
            return Err(WaveError::config(
                "retry.max_consecutive_timeouts must be at least 2",
            ));
        }
        if retry.multiplier < 1.0 || !retry.multiplier.is_finite() {
            return Err(WaveError::config(format!(
                "retry.multiplier must be >= 1, got {}",
                retry.multiplier
            )));
        }
        if retry.initial_backoff_ms > retry.max_backoff_ms {
            return Err(WaveError::config(
                "retry.initial_backoff_ms exceeds retry.max_backoff_ms",
            ));
        }

        let analysis = &self.analysis;
        if !VALID_WINDOWS.contains(&analysis.window.as_str()) {
            return Err(WaveError::config(format!(
                "Invalid analysis.window '{}'. Must be one of: {}",
                analysis.window,
                VALID_WINDOWS.join(", ")
            )));
        }
        if !(analysis.noise_floor_ratio >= 0.0 && analysis.noise_floor_ratio < 1.0) {
            return Err(WaveError::config(format!(
                "analysis.noise_floor_ratio must be in [0, 1), got {}",
                analysis.noise_floor_ratio
            )));
        }
        if !(analysis.condition_threshold >= 1.0) {
            return Err(WaveError::config(format!(
                "analysis.condition_threshold must be >= 1, got {}",
                analysis.condition_threshold
            )));
        }
        if !(analysis.gravity > 0.0) {
            return Err(WaveError::config("analysis.gravity must be positive"));
        }
        if !(analysis.max_spacing_ratio > 0.0) {
            return Err(WaveError::config("analysis.max_spacing_ratio must be positive"));
        }

        let threshold = self.calibration.r_squared_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(WaveError::config(format!(
                "calibration.r_squared_threshold must be in [0, 1], got {}",
                threshold
            )));
        }

        if !VALID_FORMATS.contains(&self.storage.default_format.as_str()) {
            return Err(WaveError::config(format!(
                "Invalid storage.default_format '{}'. Must be one of: {}",
                self.storage.default_format,
                VALID_FORMATS.join(", ")
            )));
        }

        Ok(())
    }
}

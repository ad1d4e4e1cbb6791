//! Synthetic probe signals.

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

/// One sinusoidal component of a synthetic channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DemoWaveform {
    /// Frequency in Hz
    pub frequency_hz: f64,
    /// Amplitude in volts
    pub amplitude: f64,
    /// Phase in radians
    #[serde(default)]
    pub phase: f64,
}

impl DemoWaveform {
    /// Create a component.
    pub fn new(frequency_hz: f64, amplitude: f64, phase: f64) -> Self {
        Self {
            frequency_hz,
            amplitude,
            phase,
        }
    }

    /// Value at time `t` seconds.
    #[inline]
    pub fn value_at(&self, t: f64) -> f64 {
        self.amplitude * (TAU * self.frequency_hz * t + self.phase).sin()
    }
}

/// Default signal for channel `index`: a 0.5 Hz, 0.5 V wave whose phase lags
/// by 0.6 rad per channel, as if the probes were spaced along the flume.
pub fn default_waveform(index: usize) -> Vec<DemoWaveform> {
    vec![DemoWaveform::new(0.5, 0.5, -0.6 * index as f64)]
}

/// Sum of the components at time `t`.
pub fn sum_at(components: &[DemoWaveform], t: f64) -> f64 {
    components.iter().map(|w| w.value_at(t)).sum()
}

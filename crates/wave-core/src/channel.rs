//! Per-sensor channel configuration.
//!
//! A [`ChannelConfig`] binds one analog input of the board to one physical
//! sensor in the flume together with the linear calibration that turns the
//! measured voltage into an engineering value (water surface elevation for
//! wave gauges). Sessions take a copy of their channel list on `configure()`
//! so a configuration is fixed for the lifetime of a session.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{WaveError, WaveResult};

/// Input voltage range of an analog channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VoltageRange {
    /// -10V to +10V
    #[default]
    #[serde(rename = "bipolar_10v")]
    Bipolar10V,
    /// -5V to +5V
    #[serde(rename = "bipolar_5v")]
    Bipolar5V,
    /// -1V to +1V
    #[serde(rename = "bipolar_1v")]
    Bipolar1V,
    /// 0V to +10V
    #[serde(rename = "unipolar_10v")]
    Unipolar10V,
    /// 0V to +5V
    #[serde(rename = "unipolar_5v")]
    Unipolar5V,
}

impl VoltageRange {
    /// Every range wave-lab knows about.
    pub const ALL: [VoltageRange; 5] = [
        Self::Bipolar10V,
        Self::Bipolar5V,
        Self::Bipolar1V,
        Self::Unipolar10V,
        Self::Unipolar5V,
    ];

    /// Lower limit in volts.
    pub fn min(&self) -> f64 {
        match self {
            Self::Bipolar10V => -10.0,
            Self::Bipolar5V => -5.0,
            Self::Bipolar1V => -1.0,
            Self::Unipolar10V | Self::Unipolar5V => 0.0,
        }
    }

    /// Upper limit in volts.
    pub fn max(&self) -> f64 {
        match self {
            Self::Bipolar10V | Self::Unipolar10V => 10.0,
            Self::Bipolar5V | Self::Unipolar5V => 5.0,
            Self::Bipolar1V => 1.0,
        }
    }

    /// Width of the range in volts.
    pub fn span(&self) -> f64 {
        self.max() - self.min()
    }

    /// Check if a voltage lies inside the range.
    pub fn contains(&self, voltage: f64) -> bool {
        voltage >= self.min() && voltage <= self.max()
    }

    /// Saturate a voltage at the range limits, like an ADC does.
    pub fn clamp(&self, voltage: f64) -> f64 {
        voltage.clamp(self.min(), self.max())
    }

    /// Match board-reported limits to a known range.
    ///
    /// Boards report their ranges as floating point limits, sometimes with a
    /// few millivolts of slop; anything within 1% of the span matches.
    pub fn from_limits(min: f64, max: f64) -> Option<Self> {
        Self::ALL.into_iter().find(|range| {
            let tol = range.span() * 0.01;
            (range.min() - min).abs() <= tol && (range.max() - max).abs() <= tol
        })
    }

    /// Human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Bipolar10V => "±10V",
            Self::Bipolar5V => "±5V",
            Self::Bipolar1V => "±1V",
            Self::Unipolar10V => "0-10V",
            Self::Unipolar5V => "0-5V",
        }
    }
}

impl fmt::Display for VoltageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Kind of sensor attached to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    /// Resistance or capacitance wave-height probe
    #[default]
    WaveGauge,
    /// Submerged pressure transducer
    PressureTransducer,
    /// Paddle or model displacement sensor
    Displacement,
    /// Anything else
    Generic,
}

/// Configuration of one acquisition channel.
///
/// Serialized as `{id, name, sensor_type, voltage_range, gain, offset}`.
/// `gain` is volts per engineering unit and `offset` is the voltage at zero,
/// as produced by the calibration regression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Hardware channel index on the board
    pub id: u32,
    /// Display name (e.g. "WG1")
    pub name: String,
    /// Attached sensor
    #[serde(default)]
    pub sensor_type: SensorType,
    /// Input range the board is programmed with
    #[serde(default)]
    pub voltage_range: VoltageRange,
    /// Calibration gain (volts per unit)
    #[serde(default = "default_gain")]
    pub gain: f64,
    /// Calibration offset (volts)
    #[serde(default)]
    pub offset: f64,
}

fn default_gain() -> f64 {
    1.0
}

impl ChannelConfig {
    /// Create an uncalibrated wave-gauge channel on the default range.
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            sensor_type: SensorType::default(),
            voltage_range: VoltageRange::default(),
            gain: default_gain(),
            offset: 0.0,
        }
    }

    /// Set the sensor type.
    pub fn with_sensor_type(mut self, sensor_type: SensorType) -> Self {
        self.sensor_type = sensor_type;
        self
    }

    /// Set the voltage range.
    pub fn with_voltage_range(mut self, range: VoltageRange) -> Self {
        self.voltage_range = range;
        self
    }

    /// Set the calibration.
    pub fn with_calibration(mut self, gain: f64, offset: f64) -> Self {
        self.gain = gain;
        self.offset = offset;
        self
    }

    /// Convert a measured voltage into engineering units.
    pub fn to_engineering(&self, volts: f64) -> f64 {
        (volts - self.offset) / self.gain
    }

    /// Validate a single channel.
    pub fn validate(&self) -> WaveResult<()> {
        if self.name.trim().is_empty() {
            return Err(WaveError::config(format!(
                "Channel {} has an empty name",
                self.id
            )));
        }
        if !self.gain.is_finite() || self.gain == 0.0 {
            return Err(WaveError::config(format!(
                "Channel '{}' has invalid gain {}",
                self.name, self.gain
            )));
        }
        if !self.offset.is_finite() {
            return Err(WaveError::config(format!(
                "Channel '{}' has invalid offset {}",
                self.name, self.offset
            )));
        }
        Ok(())
    }
}

/// Validate an ordered channel list independent of any backend.
///
/// The list must be non-empty, every channel valid, and hardware ids unique.
pub fn validate_channel_list(channels: &[ChannelConfig]) -> WaveResult<()> {
    if channels.is_empty() {
        return Err(WaveError::config("At least one channel is required"));
    }

    let mut ids = HashSet::new();
    for channel in channels {
        channel.validate()?;
        if !ids.insert(channel.id) {
            return Err(WaveError::config(format!(
                "Duplicate channel id {}",
                channel.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voltage_range_limits() {
        assert_eq!(VoltageRange::Bipolar10V.min(), -10.0);
        assert_eq!(VoltageRange::Bipolar10V.span(), 20.0);
        assert_eq!(VoltageRange::Unipolar5V.min(), 0.0);
        assert!(VoltageRange::Bipolar1V.contains(-0.5));
        assert!(!VoltageRange::Unipolar10V.contains(-0.1));
        assert_eq!(VoltageRange::Bipolar5V.clamp(7.3), 5.0);
    }

    #[test]
    fn test_voltage_range_from_limits() {
        assert_eq!(
            VoltageRange::from_limits(-10.0, 10.0),
            Some(VoltageRange::Bipolar10V)
        );
        // 16-bit boards often report one code short of the nominal limit
        assert_eq!(
            VoltageRange::from_limits(-5.0, 4.99985),
            Some(VoltageRange::Bipolar5V)
        );
        assert_eq!(VoltageRange::from_limits(-2.5, 2.5), None);
    }

    #[test]
    fn test_channel_schema() {
        let channel = ChannelConfig::new(3, "WG4").with_calibration(0.5, 0.1);
        let json = serde_json::to_value(&channel).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["name"], "WG4");
        assert_eq!(json["sensor_type"], "wave_gauge");
        assert_eq!(json["voltage_range"], "bipolar_10v");
        assert_eq!(json["gain"], 0.5);

        let parsed: ChannelConfig =
            serde_json::from_str(r#"{"id": 1, "name": "WG2"}"#).unwrap();
        assert_eq!(parsed.gain, 1.0);
        assert_eq!(parsed.offset, 0.0);
    }

    #[test]
    fn test_to_engineering() {
        let channel = ChannelConfig::new(0, "WG1").with_calibration(2.0, 1.0);
        assert!((channel.to_engineering(5.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_channel_validation() {
        assert!(ChannelConfig::new(0, "WG1").validate().is_ok());
        assert!(ChannelConfig::new(0, "  ").validate().is_err());
        assert!(ChannelConfig::new(0, "WG1")
            .with_calibration(0.0, 0.0)
            .validate()
            .is_err());
        assert!(ChannelConfig::new(0, "WG1")
            .with_calibration(1.0, f64::NAN)
            .validate()
            .is_err());
    }

    #[test]
    fn test_channel_list_validation() {
        assert!(validate_channel_list(&[]).is_err());

        let dup = vec![ChannelConfig::new(0, "WG1"), ChannelConfig::new(0, "WG2")];
        assert!(validate_channel_list(&dup).is_err());

        let ok = vec![ChannelConfig::new(0, "WG1"), ChannelConfig::new(1, "WG2")];
        assert!(validate_channel_list(&ok).is_ok());
    }
}

//! Least-squares fit of `measured = gain * reference + offset`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use wave_core::config::WaveConfig;
use wave_core::{ChannelConfig, WaveError, WaveResult};

/// Default minimum acceptable R².
pub const DEFAULT_R_SQUARED_THRESHOLD: f64 = 0.98;

/// One reference/measurement pair, e.g. probe immersion depth in metres
/// against the averaged probe voltage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    /// Known physical value
    pub reference: f64,
    /// Sensor reading at that value
    pub measured: f64,
}

impl CalibrationPoint {
    /// Create a point.
    pub fn new(reference: f64, measured: f64) -> Self {
        Self {
            reference,
            measured,
        }
    }
}

impl From<(f64, f64)> for CalibrationPoint {
    fn from((reference, measured): (f64, f64)) -> Self {
        Self::new(reference, measured)
    }
}

/// Fit quality below the configured threshold.
///
/// Carried on the result; the operator decides whether to accept it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[error("calibration R² {r_squared:.4} below threshold {threshold:.4}")]
pub struct CalibrationQualityWarning {
    /// Achieved R²
    pub r_squared: f64,
    /// Threshold it was checked against
    pub threshold: f64,
}

/// A computed calibration. Immutable; rerun the regression to change it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    sensor_id: String,
    gain: f64,
    offset: f64,
    r_squared: f64,
    points: Vec<CalibrationPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    quality_warning: Option<CalibrationQualityWarning>,
}

impl CalibrationResult {
    /// Sensor this calibration belongs to.
    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    /// Volts per engineering unit.
    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// Reading at zero reference.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Coefficient of determination.
    pub fn r_squared(&self) -> f64 {
        self.r_squared
    }

    /// Points the fit was computed from.
    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    /// Set when R² fell below the engine threshold.
    pub fn quality_warning(&self) -> Option<&CalibrationQualityWarning> {
        self.quality_warning.as_ref()
    }

    /// Whether the fit met the threshold.
    pub fn meets_threshold(&self) -> bool {
        self.quality_warning.is_none()
    }

    /// Reading predicted for `reference`.
    pub fn predict(&self, reference: f64) -> f64 {
        self.gain * reference + self.offset
    }

    /// Engineering value for a reading.
    pub fn to_reference(&self, measured: f64) -> f64 {
        (measured - self.offset) / self.gain
    }

    /// `measured - predicted` for each point.
    pub fn residuals(&self) -> Vec<f64> {
        self.points
            .iter()
            .map(|p| p.measured - self.predict(p.reference))
            .collect()
    }

    /// Copy gain and offset into a channel configuration.
    pub fn apply_to(&self, channel: &mut ChannelConfig) -> WaveResult<()> {
        if self.gain == 0.0 || !self.gain.is_finite() {
            return Err(WaveError::config(format!(
                "Calibration for '{}' has unusable gain {}",
                self.sensor_id, self.gain
            )));
        }
        channel.gain = self.gain;
        channel.offset = self.offset;
        Ok(())
    }
}

/// Regression with a quality threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationEngine {
    r_squared_threshold: f64,
}

impl Default for CalibrationEngine {
    fn default() -> Self {
        Self {
            r_squared_threshold: DEFAULT_R_SQUARED_THRESHOLD,
        }
    }
}

impl CalibrationEngine {
    /// Engine flagging fits with R² below `r_squared_threshold`.
    pub fn new(r_squared_threshold: f64) -> WaveResult<Self> {
        if !(0.0..=1.0).contains(&r_squared_threshold) {
            return Err(WaveError::config(format!(
                "R² threshold must be within 0-1, got {}",
                r_squared_threshold
            )));
        }
        Ok(Self {
            r_squared_threshold,
        })
    }

    /// Engine using the `calibration` section of `config`.
    pub fn from_config(config: &WaveConfig) -> WaveResult<Self> {
        Self::new(config.calibration.r_squared_threshold)
    }

    /// Configured threshold.
    pub fn r_squared_threshold(&self) -> f64 {
        self.r_squared_threshold
    }

    /// Fit `points` for `sensor_id`.
    pub fn calibrate(
        &self,
        sensor_id: impl Into<String>,
        points: &[CalibrationPoint],
    ) -> WaveResult<CalibrationResult> {
        let sensor_id = sensor_id.into();
        let fit = fit_line(points)?;

        let quality_warning = (fit.r_squared < self.r_squared_threshold).then(|| {
            CalibrationQualityWarning {
                r_squared: fit.r_squared,
                threshold: self.r_squared_threshold,
            }
        });
        if let Some(w) = &quality_warning {
            warn!(sensor_id = %sensor_id, r_squared = w.r_squared, threshold = w.threshold, "Low-quality calibration");
        }
        debug!(
            sensor_id = %sensor_id,
            gain = fit.gain,
            offset = fit.offset,
            r_squared = fit.r_squared,
            n_points = points.len(),
            "Computed calibration"
        );

        Ok(CalibrationResult {
            sensor_id,
            gain: fit.gain,
            offset: fit.offset,
            r_squared: fit.r_squared,
            points: points.to_vec(),
            quality_warning,
        })
    }
}

/// Fit with the default threshold.
pub fn regress(
    sensor_id: impl Into<String>,
    points: &[CalibrationPoint],
) -> WaveResult<CalibrationResult> {
    CalibrationEngine::default().calibrate(sensor_id, points)
}

struct LineFit {
    gain: f64,
    offset: f64,
    r_squared: f64,
}

fn fit_line(points: &[CalibrationPoint]) -> WaveResult<LineFit> {
    if points.len() < 2 {
        return Err(WaveError::config(format!(
            "Calibration needs at least 2 points, got {}",
            points.len()
        )));
    }
    if let Some(p) = points
        .iter()
        .find(|p| !p.reference.is_finite() || !p.measured.is_finite())
    {
        return Err(WaveError::config(format!(
            "Non-finite calibration point ({}, {})",
            p.reference, p.measured
        )));
    }
    let first = points[0].reference;
    if points.iter().all(|p| p.reference == first) {
        return Err(WaveError::config(
            "Calibration needs at least two distinct reference values",
        ));
    }

    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.reference).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.measured).sum::<f64>() / n;

    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in points {
        let dx = p.reference - mean_x;
        let dy = p.measured - mean_y;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }

    let gain = sxy / sxx;
    let offset = mean_y - gain * mean_x;
    let ss_res: f64 = points
        .iter()
        .map(|p| {
            let r = p.measured - (gain * p.reference + offset);
            r * r
        })
        .sum();

    // Constant readings: perfect if the flat line goes through every point
    let scale = 1.0 + mean_y.abs();
    let r_squared = if syy <= f64::EPSILON * scale * scale * n {
        if ss_res <= f64::EPSILON * scale * scale * n {
            1.0
        } else {
            0.0
        }
    } else {
        (1.0 - ss_res / syy).clamp(0.0, 1.0)
    };

    Ok(LineFit {
        gain,
        offset,
        r_squared,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(pairs: &[(f64, f64)]) -> Vec<CalibrationPoint> {
        pairs.iter().copied().map(CalibrationPoint::from).collect()
    }

    #[test]
    fn test_exact_line() {
        let result = regress("WG1", &points(&[(0.0, 1.0), (1.0, 3.0), (2.0, 5.0)])).unwrap();
        assert!((result.gain() - 2.0).abs() < 1e-12);
        assert!((result.offset() - 1.0).abs() < 1e-12);
        assert!((result.r_squared() - 1.0).abs() < 1e-12);
        assert!(result.meets_threshold());
        assert_eq!(result.points().len(), 3);
        assert!(result.residuals().iter().all(|r| r.abs() < 1e-12));
    }

    #[test]
    fn test_rejects_degenerate_input() {
        assert!(matches!(
            regress("WG1", &points(&[(0.0, 1.0)])),
            Err(WaveError::Configuration(_))
        ));
        assert!(regress("WG1", &points(&[(1.0, 1.0), (1.0, 2.0), (1.0, 3.0)])).is_err());
        assert!(regress("WG1", &points(&[(0.0, 1.0), (1.0, f64::NAN)])).is_err());
        assert!(regress("WG1", &[]).is_err());
    }

    #[test]
    fn test_constant_measurement_is_exact_fit() {
        let result = regress("WG1", &points(&[(0.0, 2.0), (1.0, 2.0), (2.0, 2.0)])).unwrap();
        assert_eq!(result.gain(), 0.0);
        assert_eq!(result.r_squared(), 1.0);

        let mut channel = ChannelConfig::new(0, "WG1");
        assert!(result.apply_to(&mut channel).is_err());
    }

    #[test]
    fn test_noisy_fit_gets_warning_but_is_usable() {
        let result = regress(
            "WG2",
            &points(&[(0.0, 0.0), (1.0, 2.5), (2.0, 1.0), (3.0, 3.5)]),
        )
        .unwrap();
        let warning = result.quality_warning().copied().unwrap();
        assert!(warning.r_squared < DEFAULT_R_SQUARED_THRESHOLD);
        assert_eq!(warning.threshold, DEFAULT_R_SQUARED_THRESHOLD);
        assert!(warning.to_string().contains("below threshold"));

        let mut channel = ChannelConfig::new(1, "WG2");
        result.apply_to(&mut channel).unwrap();
        assert_eq!(channel.gain, result.gain());
        assert_eq!(channel.offset, result.offset());
    }

    #[test]
    fn test_engine_threshold() {
        assert!(CalibrationEngine::new(1.5).is_err());
        let lenient = CalibrationEngine::new(0.5).unwrap();
        let result = lenient
            .calibrate("WG2", &points(&[(0.0, 0.0), (1.0, 1.1), (2.0, 1.9), (3.0, 3.2)]))
            .unwrap();
        assert!(result.meets_threshold());
    }

    #[test]
    fn test_inverse_transform() {
        let result = regress("WG1", &points(&[(0.0, 0.5), (0.1, 1.5)])).unwrap();
        assert!((result.to_reference(1.0) - 0.05).abs() < 1e-12);
        assert!((result.predict(0.05) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_schema() {
        let result = regress("WG1", &points(&[(0.0, 1.0), (1.0, 3.0)])).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        for key in ["sensor_id", "gain", "offset", "r_squared", "points"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert!(json.get("quality_warning").is_none());
        assert_eq!(json["points"][1]["measured"], 3.0);
    }
}

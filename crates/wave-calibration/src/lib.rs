//! Sensor calibration for wave-lab.
//!
//! Each wave probe is calibrated by recording its voltage at several known
//! immersion depths and fitting `measured = gain * reference + offset`.
//! The fit is offline: points come from
//! `wave_acquisition::capture_calibration_point` or from a file, never from
//! the live acquisition loop.
//!
//! A poor fit does not fail. It carries a [`CalibrationQualityWarning`] and
//! the operator decides.
//!
//! ```
//! use wave_calibration::{regress, CalibrationPoint};
//!
//! let points = [(0.0, 1.0), (1.0, 3.0), (2.0, 5.0)].map(CalibrationPoint::from);
//! let result = regress("WG1", &points)?;
//! assert!((result.gain() - 2.0).abs() < 1e-12);
//! # Ok::<(), wave_core::WaveError>(())
//! ```

pub mod certificate;
pub mod regression;

pub use certificate::CalibrationCertificate;
pub use regression::{
    regress, CalibrationEngine, CalibrationPoint, CalibrationQualityWarning, CalibrationResult,
    DEFAULT_R_SQUARED_THRESHOLD,
};

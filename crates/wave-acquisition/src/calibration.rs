//! Calibration point capture from software-timed reads.

use std::thread;

use tracing::debug;
use wave_calibration::CalibrationPoint;
use wave_core::{DeviceBackend, FailureTracker, RetryDecision, RetryPolicy, WaveError, WaveResult};

/// Average `n_average` single reads of `channel_index` into a
/// `(reference, measured)` pair.
///
/// The backend must be open with its channels configured. Transient read
/// failures are retried under `policy`.
pub fn capture_calibration_point(
    backend: &mut dyn DeviceBackend,
    channel_index: usize,
    reference: f64,
    n_average: usize,
    policy: &RetryPolicy,
) -> WaveResult<CalibrationPoint> {
    if n_average == 0 {
        return Err(WaveError::config("At least one read is needed to average"));
    }
    if !reference.is_finite() {
        return Err(WaveError::config(format!(
            "Reference value must be finite, got {}",
            reference
        )));
    }

    let mut tracker = FailureTracker::new(policy.clone());
    let mut sum = 0.0;
    let mut taken = 0usize;
    while taken < n_average {
        match backend.read_single(channel_index) {
            Ok(volts) => {
                tracker.record_success();
                sum += volts;
                taken += 1;
            }
            Err(e) => match tracker.record_error(e) {
                RetryDecision::NoData => {}
                RetryDecision::Retry(delay) => thread::sleep(delay),
                RetryDecision::Escalate(err) => return Err(err),
            },
        }
    }

    let measured = sum / n_average as f64;
    debug!(
        backend = backend.name(),
        channel_index,
        reference,
        measured,
        n_average,
        "Captured calibration point"
    );
    Ok(CalibrationPoint::new(reference, measured))
}

//! Hard limits shared across wave-lab crates.

use std::time::Duration;

/// Upper bound on channels for any backend.
pub const MAX_CHANNELS: usize = 64;

/// Fastest acquisition loop cadence.
pub const MIN_CADENCE: Duration = Duration::from_millis(1);

/// Slowest acquisition loop cadence.
pub const MAX_CADENCE: Duration = Duration::from_secs(1);

/// Shortest transform the spectral processor accepts.
pub const MIN_FFT_LEN: usize = 4;

/// Largest ring buffer, in frames.
pub const MAX_RING_FRAMES: usize = 1 << 26;

/// Loop cadence for a read chunk of `buffer_size` scans at `sample_rate`.
pub fn cadence(buffer_size: usize, sample_rate: f64) -> Duration {
    if sample_rate <= 0.0 || !sample_rate.is_finite() {
        return MAX_CADENCE;
    }
    let secs = buffer_size as f64 / sample_rate;
    Duration::from_secs_f64(secs.clamp(MIN_CADENCE.as_secs_f64(), MAX_CADENCE.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cadence() {
        assert_eq!(cadence(100, 1000.0), Duration::from_millis(100));
        assert_eq!(cadence(1, 100_000.0), MIN_CADENCE);
        assert_eq!(cadence(10_000, 10.0), MAX_CADENCE);
        assert_eq!(cadence(10, 0.0), MAX_CADENCE);
    }
}

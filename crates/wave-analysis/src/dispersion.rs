//! Linear dispersion relation `ω² = g k tanh(k h)`.

use std::f64::consts::PI;

use wave_core::{WaveError, WaveResult};

const MAX_ITERATIONS: usize = 60;
const TOLERANCE: f64 = 1e-12;

/// Wavenumber in rad/m for a wave of `frequency` Hz over water `depth` metres
/// deep. `f64::INFINITY` depth gives the deep-water closed form.
///
/// Newton iteration kept inside the bracket
/// `[max(k_deep, k_shallow), k_deep / tanh(k_deep h)]`, falling back to
/// bisection whenever a step would leave it.
pub fn wavenumber(frequency: f64, depth: f64, gravity: f64) -> WaveResult<f64> {
    if !(frequency.is_finite() && frequency >= 0.0) {
        return Err(WaveError::config(format!(
            "frequency must be finite and non-negative, got {}",
            frequency
        )));
    }
    if !(depth > 0.0) {
        return Err(WaveError::config(format!(
            "water depth must be positive, got {}",
            depth
        )));
    }
    if !(gravity.is_finite() && gravity > 0.0) {
        return Err(WaveError::config(format!(
            "gravity must be positive, got {}",
            gravity
        )));
    }
    if frequency == 0.0 {
        return Ok(0.0);
    }

    let omega = 2.0 * PI * frequency;
    let omega_sq = omega * omega;
    let k_deep = omega_sq / gravity;
    if depth.is_infinite() {
        return Ok(k_deep);
    }

    let k_shallow = omega / (gravity * depth).sqrt();
    let mut lo = k_deep.max(k_shallow);
    let mut hi = k_deep / (k_deep * depth).tanh();
    if hi < lo {
        // Both bounds coincide up to rounding
        hi = lo;
    }

    let residual = |k: f64| gravity * k * (k * depth).tanh() - omega_sq;
    let mut k = 0.5 * (lo + hi);
    for _ in 0..MAX_ITERATIONS {
        let f = residual(k);
        if f.abs() <= TOLERANCE * omega_sq {
            break;
        }
        if f > 0.0 {
            hi = k;
        } else {
            lo = k;
        }
        let kh = k * depth;
        let sech = 1.0 / kh.cosh();
        let slope = gravity * (kh.tanh() + kh * sech * sech);
        let next = k - f / slope;
        k = if next > lo && next < hi && next.is_finite() {
            next
        } else {
            0.5 * (lo + hi)
        };
        if hi - lo <= TOLERANCE * k {
            break;
        }
    }
    Ok(k)
}

/// Wavelength in metres; infinite at zero frequency.
pub fn wavelength(frequency: f64, depth: f64, gravity: f64) -> WaveResult<f64> {
    let k = wavenumber(frequency, depth, gravity)?;
    Ok(if k > 0.0 { 2.0 * PI / k } else { f64::INFINITY })
}

#[cfg(test)]
mod tests {
    use super::*;

    const G: f64 = 9.80665;

    #[test]
    fn test_satisfies_relation() {
        for &depth in &[0.05, 0.3, 0.5, 2.0, 50.0] {
            for &freq in &[0.05, 0.2, 0.5, 1.0, 2.0, 5.0] {
                let k = wavenumber(freq, depth, G).unwrap();
                let omega = 2.0 * PI * freq;
                let lhs = G * k * (k * depth).tanh();
                assert!(
                    (lhs - omega * omega).abs() <= 1e-9 * omega * omega,
                    "f={} h={} k={}",
                    freq,
                    depth,
                    k
                );
            }
        }
    }

    #[test]
    fn test_limits() {
        let omega = 2.0 * PI * 1.5;
        assert_eq!(wavenumber(1.5, f64::INFINITY, G).unwrap(), omega * omega / G);

        // Deep water: kh >> 1
        let k = wavenumber(3.0, 100.0, G).unwrap();
        let deep = (2.0 * PI * 3.0_f64).powi(2) / G;
        assert!((k - deep).abs() / deep < 1e-9);

        // Shallow water: kh << 1
        let k = wavenumber(0.01, 0.1, G).unwrap();
        let shallow = 2.0 * PI * 0.01 / (G * 0.1_f64).sqrt();
        assert!((k - shallow).abs() / shallow < 1e-3);
    }

    #[test]
    fn test_zero_frequency_and_wavelength() {
        assert_eq!(wavenumber(0.0, 1.0, G).unwrap(), 0.0);
        assert!(wavelength(0.0, 1.0, G).unwrap().is_infinite());
        let deep = wavelength(1.0, f64::INFINITY, G).unwrap();
        assert!((deep - G / (2.0 * PI)).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_invalid_input() {
        assert!(wavenumber(-1.0, 1.0, G).is_err());
        assert!(wavenumber(1.0, 0.0, G).is_err());
        assert!(wavenumber(1.0, f64::NAN, G).is_err());
        assert!(wavenumber(1.0, 1.0, 0.0).is_err());
    }
}

//! End to end: configuration, dispersion and separation on a synthetic flume
//! record with a partially reflecting beach.

use std::f64::consts::PI;

use wave_analysis::{
    spectrum_multi, wavenumber, GodaAnalyzer, GodaConfig, NoiseFloor, ProbeGeometry, Window,
};
use wave_core::config::WaveConfig;

const RATE: f64 = 50.0;
const SAMPLES: usize = 4096;
const DEPTH: f64 = 0.6;
const REFLECTION: f64 = 0.45;

fn record(geometry: &ProbeGeometry, gravity: f64) -> Vec<Vec<f64>> {
    // Bin-centred components between 0.6 and 1.1 Hz
    let bins: Vec<usize> = (50..=90).step_by(5).collect();
    geometry
        .positions()
        .iter()
        .map(|&x| {
            (0..SAMPLES)
                .map(|n| {
                    let t = n as f64 / RATE;
                    bins.iter()
                        .enumerate()
                        .map(|(j, &bin)| {
                            let f = bin as f64 * RATE / SAMPLES as f64;
                            let k = wavenumber(f, DEPTH, gravity).unwrap_or(0.0);
                            let w = 2.0 * PI * f;
                            let a = 0.02 + 0.002 * j as f64;
                            a * (w * t - k * x + j as f64).cos()
                                + REFLECTION * a * (w * t + k * x + 0.5 * j as f64).cos()
                        })
                        .sum::<f64>()
                })
                .collect()
        })
        .collect()
}

#[test]
fn test_separates_flume_record_from_default_config() {
    let config = WaveConfig::default();
    let goda = GodaConfig::from_config(&config)
        .unwrap()
        .with_window(Window::Rectangular)
        .with_band(0.6, 1.1);
    let analyzer = GodaAnalyzer::new(goda).unwrap();
    let geometry = ProbeGeometry::new(vec![0.0, 0.2, 0.5], DEPTH).unwrap();

    analyzer
        .validate_geometry(&geometry, RATE, SAMPLES, None)
        .unwrap();

    let series = record(&geometry, config.analysis.gravity);
    let result = analyzer.analyze(&series, RATE, &geometry).unwrap();

    let band = result.band_reflection(None).unwrap();
    assert!((band - REFLECTION).abs() < 0.01, "band reflection {}", band);

    let stats = result.statistics(None);
    assert!(stats.incident_hm0 > stats.reflected_hm0);
    assert!((stats.reflected_hm0 / stats.incident_hm0 - REFLECTION).abs() < 0.01);
    let peak = stats.peak_frequency.unwrap();
    assert!((peak - 90.0 * RATE / SAMPLES as f64).abs() < 1e-9);
}

#[test]
fn test_absolute_noise_floor_hides_weak_bins() {
    let geometry = ProbeGeometry::new(vec![0.0, 0.2, 0.5], DEPTH).unwrap();
    let series = record(&geometry, 9.80665);
    let strict = GodaConfig::default()
        .with_window(Window::Rectangular)
        .with_noise_floor(NoiseFloor::Absolute(1.0));
    let result = GodaAnalyzer::new(strict)
        .unwrap()
        .analyze(&series, RATE, &geometry)
        .unwrap();
    assert_eq!(result.confident_bins(), 0);
    assert!(result.reflection_coefficient().iter().all(|&r| r == 0.0));
}

#[test]
fn test_gauge_spectra_share_frequency_axis() {
    let geometry = ProbeGeometry::new(vec![0.0, 0.2, 0.5], DEPTH).unwrap();
    let series = record(&geometry, 9.80665);
    let multi = spectrum_multi(&series, RATE, Window::Hann).unwrap();
    assert_eq!(multi.n_channels(), 3);
    assert_eq!(multi.frequencies.len(), SAMPLES / 2 + 1);
}

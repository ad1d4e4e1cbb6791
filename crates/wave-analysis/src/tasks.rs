//! Dispatch onto tokio's blocking pool.
//!
//! The computations are pure, so cancelling one is just dropping its
//! [`JoinHandle`]: the result is discarded when the closure finishes. Every
//! function here must be called from within a tokio runtime.

use tokio::task::{self, JoinHandle};
use wave_core::WaveResult;

use crate::goda::{GodaAnalyzer, ProbeGeometry, WaveSpectrum};
use crate::spectrum::{MultiSpectrum, SpectralProcessor, Spectrum, SpectrumOptions};

/// Single-channel spectrum on the blocking pool.
pub fn spawn_spectrum(
    samples: Vec<f64>,
    sample_rate: f64,
    options: SpectrumOptions,
) -> JoinHandle<WaveResult<Spectrum>> {
    task::spawn_blocking(move || {
        SpectralProcessor::shared().spectrum(&samples, sample_rate, &options)
    })
}

/// Multi-channel spectrum on the blocking pool.
pub fn spawn_spectrum_multi(
    channels: Vec<Vec<f64>>,
    sample_rate: f64,
    options: SpectrumOptions,
) -> JoinHandle<WaveResult<MultiSpectrum>> {
    task::spawn_blocking(move || {
        SpectralProcessor::shared().spectrum_multi(&channels, sample_rate, &options)
    })
}

/// Goda separation on the blocking pool.
pub fn spawn_goda(
    analyzer: &GodaAnalyzer,
    series: Vec<Vec<f64>>,
    sample_rate: f64,
    geometry: ProbeGeometry,
) -> JoinHandle<WaveResult<WaveSpectrum>> {
    let analyzer = analyzer.clone();
    task::spawn_blocking(move || analyzer.analyze(&series, sample_rate, &geometry))
}

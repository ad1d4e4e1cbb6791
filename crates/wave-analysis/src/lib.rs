//! Spectral analysis for wave-lab.
//!
//! - [`spectrum`]: windowed one-sided spectra with cached FFT plans
//! - [`dispersion`]: linear water-wave dispersion
//! - [`goda`]: least-squares incident/reflected separation from three or more
//!   probes
//! - [`tasks`]: running the above on tokio's blocking pool
//!
//! ```
//! use wave_analysis::{spectrum, Window};
//!
//! let rate = 200.0;
//! let samples: Vec<f64> = (0..400)
//!     .map(|i| (2.0 * std::f64::consts::PI * 10.0 * i as f64 / rate).sin())
//!     .collect();
//! let sp = spectrum(&samples, rate, Window::Hann)?;
//! let (peak, _) = sp.peak().unwrap_or_default();
//! assert!((peak - 10.0).abs() <= sp.bin_width());
//! # Ok::<(), wave_core::WaveError>(())
//! ```

pub mod dispersion;
pub mod goda;
pub mod spectrum;
pub mod tasks;
pub mod window;

pub use dispersion::{wavelength, wavenumber};
pub use goda::{
    GodaAnalyzer, GodaConfig, NoiseFloor, ProbeGeometry, WaveSpectrum, WaveSpectrumOutput,
    WaveStatistics, MIN_PROBES,
};
pub use spectrum::{
    fourier_coefficients, spectrum, spectrum_multi, spectrum_with, FourierCoefficients,
    MultiSpectrum, SpectralProcessor, Spectrum, SpectrumOptions, SpectrumScaling,
};
pub use tasks::{spawn_goda, spawn_spectrum, spawn_spectrum_multi};
pub use window::Window;

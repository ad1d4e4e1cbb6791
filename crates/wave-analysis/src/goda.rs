//! Incident/reflected wave separation from an array of wave probes.
//!
//! Each probe's complex Fourier coefficient at a bin is modelled as
//! `B_m = A_i e^{-i k x_m} + A_r e^{+i k x_m}`: an incident wave travelling
//! towards increasing `x` (the reflector) plus a reflected wave travelling
//! back. With three or more probes the system is over-determined and solved
//! by least squares per bin.

use std::fmt;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use wave_core::config::{AnalysisSettings, WaveConfig};
use wave_core::{WaveError, WaveResult};

use crate::dispersion::{wavelength, wavenumber};
use crate::spectrum::{SpectralProcessor, SpectrumOptions};
use crate::window::Window;

/// Fewest probes the least-squares separation accepts.
pub const MIN_PROBES: usize = 3;

/// Probe positions along the flume and the still water depth.
///
/// Only relative positions matter for the reflection coefficient; phases of
/// the separated amplitudes are referenced to `x = 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeGeometry {
    positions: Vec<f64>,
    depth: f64,
}

impl ProbeGeometry {
    /// Positions in metres, in the same order as the probe series.
    pub fn new(positions: Vec<f64>, depth: f64) -> WaveResult<Self> {
        if positions.len() < MIN_PROBES {
            return Err(WaveError::config(format!(
                "Goda separation needs at least {} probes, got {}",
                MIN_PROBES,
                positions.len()
            )));
        }
        if let Some(bad) = positions.iter().find(|x| !x.is_finite()) {
            return Err(WaveError::config(format!(
                "probe position {} is not finite",
                bad
            )));
        }
        for (i, a) in positions.iter().enumerate() {
            if positions[i + 1..].contains(a) {
                return Err(WaveError::config(format!(
                    "two probes share position {} m",
                    a
                )));
            }
        }
        if !(depth > 0.0) {
            return Err(WaveError::config(format!(
                "water depth must be positive, got {}",
                depth
            )));
        }
        Ok(Self { positions, depth })
    }

    /// Probe positions in metres.
    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    /// Still water depth in metres.
    pub fn depth(&self) -> f64 {
        self.depth
    }

    /// Number of probes.
    pub fn n_probes(&self) -> usize {
        self.positions.len()
    }

    /// Largest gap between neighbouring probes.
    pub fn max_spacing(&self) -> f64 {
        let mut sorted = self.positions.clone();
        sorted.sort_by(f64::total_cmp);
        sorted
            .windows(2)
            .map(|w| w[1] - w[0])
            .fold(0.0, f64::max)
    }

    /// Distance between the outermost probes.
    pub fn span(&self) -> f64 {
        let (lo, hi) = self
            .positions
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| {
                (lo.min(x), hi.max(x))
            });
        hi - lo
    }

    /// 2-norm condition number of the transfer matrix at wavenumber `k`.
    ///
    /// The Gram matrix is `[[M, S], [S*, M]]` with `S = Σ e^{2ikx}`, whose
    /// eigenvalues are `M ± |S|`.
    pub fn condition_number(&self, k: f64) -> f64 {
        let m = self.positions.len() as f64;
        let s: Complex64 = self
            .positions
            .iter()
            .map(|&x| Complex64::from_polar(1.0, 2.0 * k * x))
            .sum();
        let lower = m - s.norm();
        if lower <= m * 1e-12 {
            f64::INFINITY
        } else {
            ((m + s.norm()) / lower).sqrt()
        }
    }
}

/// Incident energy below which a bin is low-confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum NoiseFloor {
    /// Fraction of the strongest incident bin energy
    Relative(f64),
    /// Absolute energy `|A_i|²` in units²
    Absolute(f64),
}

impl Default for NoiseFloor {
    fn default() -> Self {
        NoiseFloor::Relative(1e-3)
    }
}

impl NoiseFloor {
    fn threshold(self, max_energy: f64) -> f64 {
        match self {
            NoiseFloor::Relative(ratio) => ratio * max_energy,
            NoiseFloor::Absolute(energy) => energy,
        }
    }
}

/// Tunables for [`GodaAnalyzer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GodaConfig {
    /// Window applied to every probe series
    pub window: Window,
    /// Low-confidence cut on incident energy
    pub noise_floor: NoiseFloor,
    /// Largest acceptable transfer-matrix condition number
    pub condition_threshold: f64,
    /// Gravitational acceleration in m/s²
    pub gravity: f64,
    /// Largest neighbouring probe gap as a fraction of the shortest wavelength
    pub max_spacing_ratio: f64,
    /// Default band `(low, high)` in Hz for validation and averaging
    pub band: Option<(f64, f64)>,
}

impl Default for GodaConfig {
    fn default() -> Self {
        Self {
            window: Window::Hann,
            noise_floor: NoiseFloor::default(),
            condition_threshold: 10.0,
            gravity: 9.80665,
            max_spacing_ratio: 0.5,
            band: None,
        }
    }
}

impl GodaConfig {
    /// Build from the `analysis` section of the configuration.
    pub fn from_settings(settings: &AnalysisSettings) -> WaveResult<Self> {
        Ok(Self {
            window: settings.window.parse()?,
            noise_floor: NoiseFloor::Relative(settings.noise_floor_ratio),
            condition_threshold: settings.condition_threshold,
            gravity: settings.gravity,
            max_spacing_ratio: settings.max_spacing_ratio,
            band: None,
        })
    }

    /// Build from a loaded [`WaveConfig`].
    pub fn from_config(config: &WaveConfig) -> WaveResult<Self> {
        Self::from_settings(&config.analysis)
    }

    /// Set the default analysis band.
    pub fn with_band(mut self, low: f64, high: f64) -> Self {
        self.band = Some((low, high));
        self
    }

    /// Set the window.
    pub fn with_window(mut self, window: Window) -> Self {
        self.window = window;
        self
    }

    /// Set the noise floor.
    pub fn with_noise_floor(mut self, noise_floor: NoiseFloor) -> Self {
        self.noise_floor = noise_floor;
        self
    }

    /// Set the conditioning threshold.
    pub fn with_condition_threshold(mut self, threshold: f64) -> Self {
        self.condition_threshold = threshold;
        self
    }

    /// Reject values that make the separation meaningless.
    pub fn validate(&self) -> WaveResult<()> {
        if !(self.condition_threshold >= 1.0) {
            return Err(WaveError::config(format!(
                "condition threshold must be >= 1, got {}",
                self.condition_threshold
            )));
        }
        if !(self.gravity.is_finite() && self.gravity > 0.0) {
            return Err(WaveError::config("gravity must be positive"));
        }
        if !(self.max_spacing_ratio > 0.0) {
            return Err(WaveError::config("max spacing ratio must be positive"));
        }
        let floor = match self.noise_floor {
            NoiseFloor::Relative(r) | NoiseFloor::Absolute(r) => r,
        };
        if !(floor.is_finite() && floor >= 0.0) {
            return Err(WaveError::config(format!(
                "noise floor must be non-negative, got {}",
                floor
            )));
        }
        if let Some(band) = self.band {
            check_band(band)?;
        }
        Ok(())
    }
}

fn check_band((low, high): (f64, f64)) -> WaveResult<()> {
    if !(low.is_finite() && high.is_finite() && low >= 0.0 && low < high) {
        return Err(WaveError::config(format!(
            "invalid frequency band [{}, {}] Hz",
            low, high
        )));
    }
    Ok(())
}

fn in_band(frequency: f64, band: Option<(f64, f64)>) -> bool {
    band.map_or(true, |(lo, hi)| frequency >= lo && frequency <= hi)
}

/// Working vectors reused for every bin of one analysis.
struct BinWorkspace {
    measured: Vec<Complex64>,
    towards: Vec<Complex64>,
    away: Vec<Complex64>,
}

impl BinWorkspace {
    fn new(n_probes: usize) -> Self {
        Self {
            measured: Vec::with_capacity(n_probes),
            towards: Vec::with_capacity(n_probes),
            away: Vec::with_capacity(n_probes),
        }
    }

    fn load(&mut self, geometry: &ProbeGeometry, k: f64, coefficients: impl Iterator<Item = Complex64>) {
        self.measured.clear();
        self.towards.clear();
        self.away.clear();
        self.measured.extend(coefficients);
        for &x in geometry.positions() {
            self.towards.push(Complex64::from_polar(1.0, -k * x));
            self.away.push(Complex64::from_polar(1.0, k * x));
        }
    }

    /// Least-squares `(A_i, A_r)` via the 2×2 normal equations.
    fn solve(&self) -> Option<(Complex64, Complex64)> {
        let m = self.measured.len() as f64;
        let s: Complex64 = self
            .towards
            .iter()
            .zip(&self.away)
            .map(|(t, a)| t.conj() * a)
            .sum();
        let det = m * m - s.norm_sqr();
        if det <= m * m * 1e-12 {
            return None;
        }
        let rhs_i: Complex64 = self
            .towards
            .iter()
            .zip(&self.measured)
            .map(|(t, b)| t.conj() * b)
            .sum();
        let rhs_r: Complex64 = self
            .away
            .iter()
            .zip(&self.measured)
            .map(|(a, b)| a.conj() * b)
            .sum();
        let incident = (rhs_i * m - s * rhs_r) / det;
        let reflected = (rhs_r * m - s.conj() * rhs_i) / det;
        Some((incident, reflected))
    }
}

/// Per-bin separation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveSpectrum {
    frequencies: Vec<f64>,
    incident_amplitude: Vec<f64>,
    reflected_amplitude: Vec<f64>,
    reflection_coefficient: Vec<f64>,
    condition_number: Vec<f64>,
    confidence: Vec<bool>,
    sample_rate: f64,
    nfft: usize,
    band: Option<(f64, f64)>,
}

/// Serialized view: `{freq_bins, reflection_coefficient, confidence}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveSpectrumOutput {
    /// Bin centre frequencies in Hz
    pub freq_bins: Vec<f64>,
    /// `|A_r| / |A_i|`, 0.0 on low-confidence bins
    pub reflection_coefficient: Vec<f64>,
    /// Whether each bin cleared the noise floor and conditioning gate
    pub confidence: Vec<bool>,
}

/// Spectral wave statistics over a band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveStatistics {
    /// Incident significant wave height `4 √m0`
    pub incident_hm0: f64,
    /// Reflected significant wave height
    pub reflected_hm0: f64,
    /// Frequency of the strongest incident bin
    pub peak_frequency: Option<f64>,
    /// `1 / peak_frequency`
    pub peak_period: Option<f64>,
    /// Energy-weighted reflection coefficient
    pub reflection: Option<f64>,
}

impl WaveSpectrum {
    /// Bin centre frequencies in Hz.
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    /// Incident amplitude per bin.
    pub fn incident_amplitude(&self) -> &[f64] {
        &self.incident_amplitude
    }

    /// Reflected amplitude per bin.
    pub fn reflected_amplitude(&self) -> &[f64] {
        &self.reflected_amplitude
    }

    /// Reflection coefficient per bin; 0.0 where not confident.
    pub fn reflection_coefficient(&self) -> &[f64] {
        &self.reflection_coefficient
    }

    /// Transfer-matrix condition number per bin.
    pub fn condition_number(&self) -> &[f64] {
        &self.condition_number
    }

    /// Confidence flag per bin.
    pub fn confidence(&self) -> &[bool] {
        &self.confidence
    }

    /// Sample rate of the probe series.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Transform length.
    pub fn nfft(&self) -> usize {
        self.nfft
    }

    /// Band configured on the analyzer, if any.
    pub fn band(&self) -> Option<(f64, f64)> {
        self.band
    }

    /// Number of confident bins.
    pub fn confident_bins(&self) -> usize {
        self.confidence.iter().filter(|&&c| c).count()
    }

    fn confident_in(&self, band: Option<(f64, f64)>) -> impl Iterator<Item = usize> + '_ {
        let band = band.or(self.band);
        (0..self.frequencies.len())
            .filter(move |&i| self.confidence[i] && in_band(self.frequencies[i], band))
    }

    /// Incident-energy-weighted mean reflection coefficient over the
    /// confident bins in `band` (the analyzer's band when `None`).
    pub fn band_reflection(&self, band: Option<(f64, f64)>) -> Option<f64> {
        let (weighted, total) = self.confident_in(band).fold((0.0, 0.0), |(w, t), i| {
            let energy = self.incident_amplitude[i].powi(2);
            (w + energy * self.reflection_coefficient[i], t + energy)
        });
        (total > 0.0).then(|| weighted / total)
    }

    /// Hm0, peak frequency and reflection over the confident bins in `band`.
    pub fn statistics(&self, band: Option<(f64, f64)>) -> WaveStatistics {
        let mut m0_incident = 0.0;
        let mut m0_reflected = 0.0;
        let mut peak: Option<(f64, f64)> = None;
        for i in self.confident_in(band) {
            let a_i = self.incident_amplitude[i];
            let a_r = self.reflected_amplitude[i];
            m0_incident += a_i * a_i / 2.0;
            m0_reflected += a_r * a_r / 2.0;
            if peak.map_or(true, |(_, best)| a_i > best) {
                peak = Some((self.frequencies[i], a_i));
            }
        }
        let peak_frequency = peak.map(|(f, _)| f);
        WaveStatistics {
            incident_hm0: 4.0 * m0_incident.sqrt(),
            reflected_hm0: 4.0 * m0_reflected.sqrt(),
            peak_frequency,
            peak_period: peak_frequency.filter(|f| *f > 0.0).map(|f| 1.0 / f),
            reflection: self.band_reflection(band),
        }
    }

    /// Output schema for reporting.
    pub fn to_output(&self) -> WaveSpectrumOutput {
        WaveSpectrumOutput {
            freq_bins: self.frequencies.clone(),
            reflection_coefficient: self.reflection_coefficient.clone(),
            confidence: self.confidence.clone(),
        }
    }
}

/// Least-squares incident/reflected separation.
#[derive(Debug, Clone, Default)]
pub struct GodaAnalyzer {
    config: GodaConfig,
}

impl GodaAnalyzer {
    /// Analyzer with validated `config`.
    pub fn new(config: GodaConfig) -> WaveResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Active configuration.
    pub fn config(&self) -> &GodaConfig {
        &self.config
    }

    /// Check that `geometry` separates every bin of an `n`-sample transform
    /// inside `band` (the configured band, else the whole spectrum).
    pub fn validate_geometry(
        &self,
        geometry: &ProbeGeometry,
        sample_rate: f64,
        n: usize,
        band: Option<(f64, f64)>,
    ) -> WaveResult<()> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) || n < 2 {
            return Err(WaveError::config(format!(
                "cannot validate geometry for {} samples at {} Hz",
                n, sample_rate
            )));
        }
        let band = band.or(self.config.band);
        if let Some(band) = band {
            check_band(band)?;
        }

        let df = sample_rate / n as f64;
        let mut highest: Option<f64> = None;
        for bin in 1..=n / 2 {
            let frequency = bin as f64 * df;
            if !in_band(frequency, band) {
                continue;
            }
            let k = wavenumber(frequency, geometry.depth(), self.config.gravity)?;
            let condition = geometry.condition_number(k);
            if condition > self.config.condition_threshold {
                return Err(WaveError::config(format!(
                    "probe geometry is ill-conditioned at {:.4} Hz (condition number {:.2} > {:.2})",
                    frequency, condition, self.config.condition_threshold
                )));
            }
            highest = Some(frequency);
        }

        let highest = highest.ok_or_else(|| {
            WaveError::config(format!("no frequency bins inside band {:?}", band))
        })?;
        let shortest = wavelength(highest, geometry.depth(), self.config.gravity)?;
        let limit = self.config.max_spacing_ratio * shortest;
        if geometry.max_spacing() > limit {
            return Err(WaveError::config(format!(
                "probe spacing {:.3} m exceeds {:.3} m ({} of the {:.3} m wavelength at {:.4} Hz)",
                geometry.max_spacing(),
                limit,
                self.config.max_spacing_ratio,
                shortest,
                highest
            )));
        }
        Ok(())
    }

    /// Separate incident and reflected spectra from one series per probe,
    /// in the same order as `geometry`.
    ///
    /// With a configured band, a geometry that fails [`validate_geometry`]
    /// for that band is rejected before any separation.
    ///
    /// [`validate_geometry`]: Self::validate_geometry
    pub fn analyze<C: AsRef<[f64]>>(
        &self,
        series: &[C],
        sample_rate: f64,
        geometry: &ProbeGeometry,
    ) -> WaveResult<WaveSpectrum> {
        if series.len() != geometry.n_probes() {
            return Err(WaveError::config(format!(
                "{} probe series for {} probe positions",
                series.len(),
                geometry.n_probes()
            )));
        }
        let len = series[0].as_ref().len();
        if let Some(i) = series.iter().position(|s| s.as_ref().len() != len) {
            return Err(WaveError::config(format!(
                "probe {} has {} samples, expected {}",
                i,
                series[i].as_ref().len(),
                len
            )));
        }

        let processor = SpectralProcessor::shared();
        let options = SpectrumOptions::new(self.config.window);
        let coefficients = series
            .iter()
            .map(|s| processor.fourier_coefficients(s.as_ref(), sample_rate, &options))
            .collect::<WaveResult<Vec<_>>>()?;
        if self.config.band.is_some() {
            self.validate_geometry(geometry, sample_rate, coefficients[0].nfft, None)?;
        }
        let frequencies = coefficients[0].frequencies.clone();
        let n_bins = frequencies.len();

        let mut incident = vec![0.0; n_bins];
        let mut reflected = vec![0.0; n_bins];
        let mut condition = vec![f64::INFINITY; n_bins];
        let mut conditioned = vec![false; n_bins];
        let mut workspace = BinWorkspace::new(geometry.n_probes());

        for bin in 0..n_bins {
            let k = wavenumber(frequencies[bin], geometry.depth(), self.config.gravity)?;
            condition[bin] = geometry.condition_number(k);
            if !(condition[bin] <= self.config.condition_threshold) {
                continue;
            }
            workspace.load(geometry, k, coefficients.iter().map(|c| c.coefficients[bin]));
            if let Some((a_i, a_r)) = workspace.solve() {
                incident[bin] = a_i.norm();
                reflected[bin] = a_r.norm();
                conditioned[bin] = true;
            }
        }

        let max_energy = incident
            .iter()
            .zip(&conditioned)
            .filter(|(_, ok)| **ok)
            .map(|(a, _)| a * a)
            .fold(0.0, f64::max);
        let floor = self.config.noise_floor.threshold(max_energy);

        let confidence: Vec<bool> = (0..n_bins)
            .map(|i| {
                let energy = incident[i] * incident[i];
                conditioned[i] && energy > 0.0 && energy >= floor
            })
            .collect();
        let reflection_coefficient = (0..n_bins)
            .map(|i| {
                if confidence[i] {
                    reflected[i] / incident[i]
                } else {
                    0.0
                }
            })
            .collect();

        let spectrum = WaveSpectrum {
            frequencies,
            incident_amplitude: incident,
            reflected_amplitude: reflected,
            reflection_coefficient,
            condition_number: condition,
            confidence,
            sample_rate,
            nfft: coefficients[0].nfft,
            band: self.config.band,
        };
        let confident = spectrum.confident_bins();
        if confident == 0 {
            warn!(
                probes = geometry.n_probes(),
                samples = len,
                "No confident bins in Goda separation"
            );
        } else {
            debug!(
                probes = geometry.n_probes(),
                samples = len,
                bins = n_bins,
                confident,
                "Separated incident and reflected spectra"
            );
        }
        Ok(spectrum)
    }
}

impl fmt::Display for WaveStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Hm0 incident {:.4} m, reflected {:.4} m",
            self.incident_hm0, self.reflected_hm0
        )?;
        if let Some(tp) = self.peak_period {
            write!(f, ", Tp {:.3} s", tp)?;
        }
        if let Some(r) = self.reflection {
            write!(f, ", Kr {:.3}", r)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const G: f64 = 9.80665;
    const FS: f64 = 32.0;
    const N: usize = 1024;

    struct Component {
        bin: usize,
        amplitude: f64,
        phase: f64,
    }

    /// Series for each probe from bin-centred incident components and
    /// a reflection of `r` with a frequency-dependent phase shift.
    fn synthesize(geometry: &ProbeGeometry, components: &[Component], r: f64) -> Vec<Vec<f64>> {
        geometry
            .positions()
            .iter()
            .map(|&x| {
                (0..N)
                    .map(|n| {
                        let t = n as f64 / FS;
                        components
                            .iter()
                            .map(|c| {
                                let f = c.bin as f64 * FS / N as f64;
                                let omega = 2.0 * PI * f;
                                let k = wavenumber(f, geometry.depth(), G).unwrap();
                                let shift = 0.4 + f;
                                c.amplitude * (omega * t - k * x + c.phase).cos()
                                    + r * c.amplitude * (omega * t + k * x + c.phase + shift).cos()
                            })
                            .sum::<f64>()
                    })
                    .collect()
            })
            .collect()
    }

    fn flume() -> ProbeGeometry {
        ProbeGeometry::new(vec![0.0, 0.25, 0.6], 0.5).unwrap()
    }

    fn unit_components() -> Vec<Component> {
        (16..=40)
            .step_by(4)
            .enumerate()
            .map(|(i, bin)| Component {
                bin,
                amplitude: 1.0,
                phase: 0.3 * i as f64,
            })
            .collect()
    }

    fn analyzer() -> GodaAnalyzer {
        GodaAnalyzer::new(GodaConfig::default().with_window(Window::Rectangular)).unwrap()
    }

    #[test]
    fn test_geometry_validation() {
        assert!(ProbeGeometry::new(vec![0.0, 0.3], 0.5).is_err());
        assert!(ProbeGeometry::new(vec![0.0, 0.3, 0.3], 0.5).is_err());
        assert!(ProbeGeometry::new(vec![0.0, 0.3, f64::NAN], 0.5).is_err());
        assert!(ProbeGeometry::new(vec![0.0, 0.3, 0.7], 0.0).is_err());

        let g = ProbeGeometry::new(vec![0.6, 0.0, 0.25], 0.5).unwrap();
        assert!((g.max_spacing() - 0.35).abs() < 1e-12);
        assert!((g.span() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_condition_number() {
        let g = flume();
        // k = 0: both waves look identical at every probe
        assert!(g.condition_number(0.0).is_infinite());
        let k = wavenumber(1.0, 0.5, G).unwrap();
        let c = g.condition_number(k);
        assert!(c > 1.0 && c < 2.0, "condition {}", c);
    }

    #[test]
    fn test_recovers_reflection_coefficient() {
        let geometry = flume();
        let series = synthesize(&geometry, &unit_components(), 0.3);
        let result = analyzer().analyze(&series, FS, &geometry).unwrap();

        for c in unit_components() {
            assert!(result.confidence()[c.bin], "bin {} not confident", c.bin);
            let r = result.reflection_coefficient()[c.bin];
            assert!((r - 0.3).abs() <= 0.05, "bin {}: R = {}", c.bin, r);
            assert!((result.incident_amplitude()[c.bin] - 1.0).abs() < 1e-6);
        }
        let band = result.band_reflection(Some((0.4, 1.3))).unwrap();
        assert!((band - 0.3).abs() <= 0.05, "band R = {}", band);
    }

    #[test]
    fn test_recovers_reflection_with_hann_window() {
        let geometry = flume();
        let series = synthesize(&geometry, &unit_components(), 0.3);
        let analyzer = GodaAnalyzer::new(GodaConfig::default()).unwrap();
        let result = analyzer.analyze(&series, FS, &geometry).unwrap();
        for c in unit_components() {
            let r = result.reflection_coefficient()[c.bin];
            assert!((r - 0.3).abs() <= 0.05, "bin {}: R = {}", c.bin, r);
        }
    }

    #[test]
    fn test_empty_bins_are_low_confidence() {
        let geometry = flume();
        let series = synthesize(&geometry, &unit_components(), 0.3);
        let result = analyzer().analyze(&series, FS, &geometry).unwrap();

        assert!(!result.confidence()[0]);
        assert!(!result.confidence()[18]);
        assert_eq!(result.reflection_coefficient()[18], 0.0);
        assert_eq!(result.confident_bins(), unit_components().len());

        let output = result.to_output();
        assert_eq!(output.freq_bins.len(), N / 2 + 1);
        let json = serde_json::to_value(&output).unwrap();
        assert!(json.get("freq_bins").is_some());
        assert!(json.get("reflection_coefficient").is_some());
        assert!(json.get("confidence").is_some());
    }

    #[test]
    fn test_band_without_confident_bins() {
        let geometry = flume();
        let series = synthesize(&geometry, &unit_components(), 0.3);
        let result = analyzer().analyze(&series, FS, &geometry).unwrap();
        assert_eq!(result.band_reflection(Some((5.0, 6.0))), None);
    }

    #[test]
    fn test_statistics() {
        let geometry = flume();
        let components = vec![
            Component { bin: 24, amplitude: 0.5, phase: 0.0 },
            Component { bin: 32, amplitude: 1.0, phase: 1.0 },
            Component { bin: 40, amplitude: 0.5, phase: 2.0 },
        ];
        let series = synthesize(&geometry, &components, 0.3);
        let result = analyzer().analyze(&series, FS, &geometry).unwrap();
        let stats = result.statistics(None);

        let m0: f64 = (0.25 + 1.0 + 0.25) / 2.0;
        assert!((stats.incident_hm0 - 4.0 * m0.sqrt()).abs() < 1e-6);
        assert!((stats.reflected_hm0 - 0.3 * stats.incident_hm0).abs() < 1e-6);
        assert_eq!(stats.peak_frequency, Some(1.0));
        assert_eq!(stats.peak_period, Some(1.0));
        assert!((stats.reflection.unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_mismatched_series_rejected() {
        let geometry = flume();
        let two = vec![vec![0.0; N]; 2];
        assert!(matches!(
            analyzer().analyze(&two, FS, &geometry),
            Err(WaveError::Configuration(_))
        ));
        let ragged = vec![vec![0.0; N], vec![0.0; N], vec![0.0; N - 1]];
        assert!(analyzer().analyze(&ragged, FS, &geometry).is_err());
    }

    #[test]
    fn test_validate_geometry_band() {
        let geometry = flume();
        let analyzer = analyzer();
        assert!(analyzer
            .validate_geometry(&geometry, FS, N, Some((0.5, 1.25)))
            .is_ok());
        assert!(matches!(
            analyzer.validate_geometry(&geometry, FS, N, None),
            Err(WaveError::Configuration(_))
        ));
        assert!(analyzer
            .validate_geometry(&geometry, FS, N, Some((0.5, 2.5)))
            .is_err());
        assert!(analyzer
            .validate_geometry(&geometry, FS, N, Some((1.0, 0.5)))
            .is_err());
    }

    #[test]
    fn test_analyze_rejects_ill_conditioned_band() {
        let clustered = ProbeGeometry::new(vec![0.0, 0.005, 0.01], 0.5).unwrap();
        let series = synthesize(&clustered, &unit_components(), 0.3);
        let banded = GodaAnalyzer::new(
            GodaConfig::default()
                .with_window(Window::Rectangular)
                .with_band(0.3, 1.3),
        )
        .unwrap();
        let err = banded.analyze(&series, FS, &clustered).unwrap_err();
        assert!(matches!(err, WaveError::Configuration(_)));
        assert!(err.to_string().contains("ill-conditioned"), "{}", err);

        // The same band passes on the flume layout
        let geometry = flume();
        let series = synthesize(&geometry, &unit_components(), 0.3);
        let ok = GodaAnalyzer::new(
            GodaConfig::default()
                .with_window(Window::Rectangular)
                .with_band(0.5, 1.25),
        )
        .unwrap();
        assert!(ok.analyze(&series, FS, &geometry).is_ok());
    }

    #[test]
    fn test_config_from_settings() {
        let mut settings = AnalysisSettings::default();
        settings.window = "blackman".into();
        settings.condition_threshold = 6.0;
        let config = GodaConfig::from_settings(&settings).unwrap();
        assert_eq!(config.window, Window::Blackman);
        assert_eq!(config.condition_threshold, 6.0);
        assert_eq!(config.noise_floor, NoiseFloor::Relative(1e-3));

        settings.window = "triangle".into();
        assert!(GodaConfig::from_settings(&settings).is_err());
        assert!(GodaAnalyzer::new(GodaConfig::default().with_condition_threshold(0.5)).is_err());
    }
}

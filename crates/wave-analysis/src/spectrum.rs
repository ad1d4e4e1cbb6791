//! One-sided spectra with cached FFT plans.
//!
//! Streaming consumers call the processor with the same chunk length over and
//! over, so plans and window coefficients are cached per length.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use num_complex::Complex64;
use parking_lot::{Mutex, RwLock};
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use wave_core::limits::MIN_FFT_LEN;
use wave_core::{WaveError, WaveResult};

use crate::window::Window;

/// How bin magnitudes are normalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectrumScaling {
    /// `2|X| / Σw`: a bin-centred sinusoid of amplitude A reads A
    #[default]
    Amplitude,
    /// `2|X|² / (fs Σw²)`, in units² per Hz
    PowerDensity,
}

/// Options for a single transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectrumOptions {
    /// Taper applied to the samples
    pub window: Window,
    /// Normalization of the output
    pub scaling: SpectrumScaling,
    /// Transform length; defaults to the input length. Longer inputs use
    /// their newest `nfft` samples.
    pub nfft: Option<usize>,
    /// Allow inputs shorter than `nfft` by appending zeros
    pub zero_pad: bool,
}

impl Default for SpectrumOptions {
    fn default() -> Self {
        Self::new(Window::default())
    }
}

impl SpectrumOptions {
    /// Amplitude spectrum over the whole input with `window`.
    pub fn new(window: Window) -> Self {
        Self {
            window,
            scaling: SpectrumScaling::Amplitude,
            nfft: None,
            zero_pad: false,
        }
    }

    /// Set the output scaling.
    pub fn with_scaling(mut self, scaling: SpectrumScaling) -> Self {
        self.scaling = scaling;
        self
    }

    /// Fix the transform length.
    pub fn with_nfft(mut self, nfft: usize) -> Self {
        self.nfft = Some(nfft);
        self
    }

    /// Permit zero-padding of short inputs.
    pub fn zero_padded(mut self) -> Self {
        self.zero_pad = true;
        self
    }
}

/// One-sided spectrum of a single channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    /// Bin centre frequencies in Hz, `nfft / 2 + 1` of them
    pub frequencies: Vec<f64>,
    /// Magnitude or power density per bin
    pub values: Vec<f64>,
    /// Sample rate of the input
    pub sample_rate: f64,
    /// Transform length
    pub nfft: usize,
    /// Window that was applied
    pub window: Window,
    /// Normalization of `values`
    pub scaling: SpectrumScaling,
}

impl Spectrum {
    /// Frequency resolution in Hz.
    pub fn bin_width(&self) -> f64 {
        self.sample_rate / self.nfft as f64
    }

    /// Strongest non-DC bin as `(frequency, value)`.
    pub fn peak(&self) -> Option<(f64, f64)> {
        peak_of(&self.frequencies, &self.values)
    }
}

/// One-sided spectra of several equally long channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiSpectrum {
    /// Bin centre frequencies shared by every channel
    pub frequencies: Vec<f64>,
    /// One column of values per channel
    pub channels: Vec<Vec<f64>>,
    /// Sample rate of the input
    pub sample_rate: f64,
    /// Transform length
    pub nfft: usize,
    /// Window that was applied
    pub window: Window,
    /// Normalization of the values
    pub scaling: SpectrumScaling,
}

impl MultiSpectrum {
    /// Number of channels.
    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    /// Spectrum of one channel.
    pub fn channel(&self, index: usize) -> Option<&[f64]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Strongest non-DC bin of one channel.
    pub fn peak(&self, index: usize) -> Option<(f64, f64)> {
        peak_of(&self.frequencies, self.channels.get(index)?)
    }
}

/// Amplitude-scaled complex coefficients: a bin-centred `A cos(ωt + φ)`
/// yields `A e^{iφ}` at its bin.
#[derive(Debug, Clone, PartialEq)]
pub struct FourierCoefficients {
    /// Bin centre frequencies in Hz
    pub frequencies: Vec<f64>,
    /// Complex amplitude per bin
    pub coefficients: Vec<Complex64>,
    /// Sample rate of the input
    pub sample_rate: f64,
    /// Transform length
    pub nfft: usize,
}

fn peak_of(frequencies: &[f64], values: &[f64]) -> Option<(f64, f64)> {
    let start = usize::from(values.len() > 1);
    values
        .iter()
        .enumerate()
        .skip(start)
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, &v)| (frequencies[i], v))
}

struct Transformed {
    bins: Vec<Complex64>,
    nfft: usize,
    window_sum: f64,
    window_sq_sum: f64,
}

/// Factor folding the negative-frequency half onto the positive one.
fn one_sided_factor(bin: usize, nfft: usize) -> f64 {
    if bin == 0 || (nfft % 2 == 0 && bin == nfft / 2) {
        1.0
    } else {
        2.0
    }
}

fn frequencies(n_bins: usize, nfft: usize, sample_rate: f64) -> Vec<f64> {
    let df = sample_rate / nfft as f64;
    (0..n_bins).map(|k| k as f64 * df).collect()
}

/// FFT front end with per-length plan and window caches.
///
/// Shareable across threads; lookups take a read lock and only a cache miss
/// touches the planner.
pub struct SpectralProcessor {
    planner: Mutex<FftPlanner<f64>>,
    plans: RwLock<HashMap<usize, Arc<dyn Fft<f64>>>>,
    windows: RwLock<HashMap<(Window, usize), Arc<[f64]>>>,
}

impl Default for SpectralProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SpectralProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralProcessor")
            .field("cached_plans", &self.cached_plans())
            .field("cached_windows", &self.windows.read().len())
            .finish()
    }
}

impl SpectralProcessor {
    /// Empty caches.
    pub fn new() -> Self {
        Self {
            planner: Mutex::new(FftPlanner::new()),
            plans: RwLock::new(HashMap::new()),
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// Process-wide instance used by the free functions.
    pub fn shared() -> &'static SpectralProcessor {
        static SHARED: OnceLock<SpectralProcessor> = OnceLock::new();
        SHARED.get_or_init(SpectralProcessor::new)
    }

    /// Number of distinct transform lengths planned so far.
    pub fn cached_plans(&self) -> usize {
        self.plans.read().len()
    }

    fn plan(&self, len: usize) -> Arc<dyn Fft<f64>> {
        if let Some(plan) = self.plans.read().get(&len) {
            return Arc::clone(plan);
        }
        let plan = self.planner.lock().plan_fft_forward(len);
        debug!(len, "Planned forward FFT");
        Arc::clone(self.plans.write().entry(len).or_insert(plan))
    }

    fn window(&self, kind: Window, len: usize) -> Arc<[f64]> {
        if let Some(w) = self.windows.read().get(&(kind, len)) {
            return Arc::clone(w);
        }
        let coefficients: Arc<[f64]> = kind.coefficients(len).into();
        Arc::clone(
            self.windows
                .write()
                .entry((kind, len))
                .or_insert(coefficients),
        )
    }

    fn transform(
        &self,
        samples: &[f64],
        sample_rate: f64,
        options: &SpectrumOptions,
    ) -> WaveResult<Transformed> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(WaveError::config(format!(
                "sample rate must be positive, got {}",
                sample_rate
            )));
        }
        if samples.is_empty() {
            return Err(WaveError::config("cannot transform an empty series"));
        }

        let n = samples.len();
        let nfft = options.nfft.unwrap_or(if options.zero_pad {
            n.max(MIN_FFT_LEN)
        } else {
            n
        });
        if nfft < MIN_FFT_LEN {
            return Err(WaveError::config(format!(
                "transform length {} is below the minimum of {}",
                nfft, MIN_FFT_LEN
            )));
        }
        if n < nfft && !options.zero_pad {
            return Err(WaveError::config(format!(
                "{} samples is shorter than the {}-point transform; enable zero_pad to pad explicitly",
                n, nfft
            )));
        }

        let used = &samples[n.saturating_sub(nfft)..];
        if let Some(bad) = used.iter().position(|v| !v.is_finite()) {
            return Err(WaveError::config(format!(
                "non-finite sample at index {}",
                n - used.len() + bad
            )));
        }

        let window = self.window(options.window, used.len());
        let window_sum: f64 = window.iter().sum();
        let window_sq_sum: f64 = window.iter().map(|w| w * w).sum();
        if window_sum <= 0.0 {
            return Err(WaveError::config(format!(
                "{} window over {} samples has no energy",
                options.window,
                used.len()
            )));
        }

        let mut buffer = vec![Complex64::new(0.0, 0.0); nfft];
        for ((slot, &x), &w) in buffer.iter_mut().zip(used).zip(window.iter()) {
            *slot = Complex64::new(x * w, 0.0);
        }
        self.plan(nfft).process(&mut buffer);
        buffer.truncate(nfft / 2 + 1);
        trace!(samples = used.len(), nfft, window = %options.window, "Computed FFT");

        Ok(Transformed {
            bins: buffer,
            nfft,
            window_sum,
            window_sq_sum,
        })
    }

    fn scaled_values(t: &Transformed, sample_rate: f64, scaling: SpectrumScaling) -> Vec<f64> {
        t.bins
            .iter()
            .enumerate()
            .map(|(k, x)| {
                let factor = one_sided_factor(k, t.nfft);
                match scaling {
                    SpectrumScaling::Amplitude => factor * x.norm() / t.window_sum,
                    SpectrumScaling::PowerDensity => {
                        factor * x.norm_sqr() / (sample_rate * t.window_sq_sum)
                    }
                }
            })
            .collect()
    }

    /// Spectrum of one channel.
    pub fn spectrum(
        &self,
        samples: &[f64],
        sample_rate: f64,
        options: &SpectrumOptions,
    ) -> WaveResult<Spectrum> {
        let t = self.transform(samples, sample_rate, options)?;
        Ok(Spectrum {
            frequencies: frequencies(t.bins.len(), t.nfft, sample_rate),
            values: Self::scaled_values(&t, sample_rate, options.scaling),
            sample_rate,
            nfft: t.nfft,
            window: options.window,
            scaling: options.scaling,
        })
    }

    /// Spectra of several channels of equal length.
    pub fn spectrum_multi<C: AsRef<[f64]>>(
        &self,
        channels: &[C],
        sample_rate: f64,
        options: &SpectrumOptions,
    ) -> WaveResult<MultiSpectrum> {
        let first = channels
            .first()
            .ok_or_else(|| WaveError::config("no channels to transform"))?;
        let len = first.as_ref().len();
        if let Some(i) = channels.iter().position(|c| c.as_ref().len() != len) {
            return Err(WaveError::config(format!(
                "channel {} has {} samples, expected {}",
                i,
                channels[i].as_ref().len(),
                len
            )));
        }

        let mut columns = Vec::with_capacity(channels.len());
        let mut nfft = 0;
        for channel in channels {
            let t = self.transform(channel.as_ref(), sample_rate, options)?;
            nfft = t.nfft;
            columns.push(Self::scaled_values(&t, sample_rate, options.scaling));
        }
        Ok(MultiSpectrum {
            frequencies: frequencies(nfft / 2 + 1, nfft, sample_rate),
            channels: columns,
            sample_rate,
            nfft,
            window: options.window,
            scaling: options.scaling,
        })
    }

    /// Complex amplitude-scaled coefficients; `options.scaling` is ignored.
    pub fn fourier_coefficients(
        &self,
        samples: &[f64],
        sample_rate: f64,
        options: &SpectrumOptions,
    ) -> WaveResult<FourierCoefficients> {
        let t = self.transform(samples, sample_rate, options)?;
        let coefficients = t
            .bins
            .iter()
            .enumerate()
            .map(|(k, &x)| x * (one_sided_factor(k, t.nfft) / t.window_sum))
            .collect::<Vec<_>>();
        Ok(FourierCoefficients {
            frequencies: frequencies(coefficients.len(), t.nfft, sample_rate),
            coefficients,
            sample_rate,
            nfft: t.nfft,
        })
    }
}

/// Amplitude spectrum of `samples` using the shared processor.
pub fn spectrum(samples: &[f64], sample_rate: f64, window: Window) -> WaveResult<Spectrum> {
    SpectralProcessor::shared().spectrum(samples, sample_rate, &SpectrumOptions::new(window))
}

/// [`spectrum`] with explicit options.
pub fn spectrum_with(
    samples: &[f64],
    sample_rate: f64,
    options: &SpectrumOptions,
) -> WaveResult<Spectrum> {
    SpectralProcessor::shared().spectrum(samples, sample_rate, options)
}

/// Amplitude spectra of `[samples × channels]` data given as channel columns.
pub fn spectrum_multi<C: AsRef<[f64]>>(
    channels: &[C],
    sample_rate: f64,
    window: Window,
) -> WaveResult<MultiSpectrum> {
    SpectralProcessor::shared().spectrum_multi(channels, sample_rate, &SpectrumOptions::new(window))
}

/// Complex coefficients using the shared processor.
pub fn fourier_coefficients(
    samples: &[f64],
    sample_rate: f64,
    options: &SpectrumOptions,
) -> WaveResult<FourierCoefficients> {
    SpectralProcessor::shared().fourier_coefficients(samples, sample_rate, options)
}

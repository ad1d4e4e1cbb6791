//! Synthetic DAQ board implementing [`DeviceBackend`].
//!
//! The demo board behaves like a hardware-timed card: once started, scan `n`
//! is "converted" at `n / sample_rate` seconds on the board clock, and
//! `read()` hands back every scan whose conversion time has passed, exactly
//! once. Signal values are deterministic sums of sinusoids plus seeded
//! uniform noise, saturated at the channel's voltage range.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace};
use wave_core::{
    BackendCapabilities, BoardInfo, ChannelConfig, DeviceBackend, SampleBlock, VoltageRange,
    WaveError, WaveResult,
};

use crate::common::{Clock, DemoRng, ErrorConfig, SystemClock};
use crate::waveform::{default_waveform, sum_at, DemoWaveform};

/// Channels on the demo board.
pub const DEMO_MAX_CHANNELS: usize = 16;
/// Slowest supported rate in Hz.
pub const DEMO_MIN_RATE: f64 = 1.0;
/// Fastest supported rate in Hz.
pub const DEMO_MAX_RATE: f64 = 100_000.0;

const BOARD_ID: &str = "demo0";
const BOARD_NAME: &str = "Wave Lab Demo Board";

/// Shared claim on one simulated board.
///
/// Two backends built with the same board behave like two processes opening
/// the same device file: only one can hold it.
#[derive(Debug, Default)]
pub struct DemoBoard {
    claimed: AtomicBool,
}

impl DemoBoard {
    /// A fresh, unclaimed board.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether some backend currently holds the board.
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }

    fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::SeqCst)
    }

    fn release(&self) {
        self.claimed.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct RunState {
    started_at: Duration,
    stopped_at: Option<Duration>,
    next_index: u64,
}

/// Scans completed after `elapsed` at `rate`.
fn scans_elapsed(elapsed: Duration, rate: f64) -> u64 {
    (elapsed.as_secs_f64() * rate + 1e-9).floor() as u64
}

/// Synthetic backend for development and tests.
#[derive(Debug)]
pub struct DemoBackend {
    name: String,
    available: bool,
    board: Arc<DemoBoard>,
    is_open: bool,
    clock: Arc<dyn Clock>,
    errors: ErrorConfig,
    noise: DemoRng,
    noise_amplitude: f64,
    dc_offset: f64,
    waveforms: HashMap<u32, Vec<DemoWaveform>>,
    channels: Vec<ChannelConfig>,
    signals: Vec<Vec<DemoWaveform>>,
    sample_rate: Option<f64>,
    buffer_size: usize,
    run: Option<RunState>,
}

impl DemoBackend {
    /// Backend with default signals on the system clock.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder.
    pub fn builder() -> DemoBackendBuilder {
        DemoBackendBuilder::default()
    }

    /// Whether sampling is in progress.
    pub fn is_running(&self) -> bool {
        self.run.as_ref().is_some_and(|r| r.stopped_at.is_none())
    }

    /// Configured read chunk in scans.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn sample(&self, signal: &[DemoWaveform], range: VoltageRange, t: f64) -> f64 {
        let mut value = self.dc_offset + sum_at(signal, t);
        if self.noise_amplitude > 0.0 {
            value += self.noise_amplitude * self.noise.next_symmetric();
        }
        range.clamp(value)
    }

    fn ensure_idle(&self, operation: &'static str) -> WaveResult<()> {
        if self.is_running() {
            return Err(WaveError::InvalidState {
                operation,
                state: "running".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for DemoBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBackend for DemoBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn detect_devices(&self) -> Vec<BoardInfo> {
        if self.available {
            vec![BoardInfo::new(BOARD_ID, BOARD_NAME)]
        } else {
            Vec::new()
        }
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            max_channels: DEMO_MAX_CHANNELS,
            min_sample_rate: DEMO_MIN_RATE,
            max_sample_rate: DEMO_MAX_RATE,
            voltage_ranges: VoltageRange::ALL.to_vec(),
            boards: self.detect_devices(),
        }
    }

    fn open(&mut self) -> bool {
        if self.is_open {
            return true;
        }
        if !self.available {
            debug!(backend = %self.name, "Demo board unavailable");
            return false;
        }
        if let Err(e) = self.errors.check_operation(&self.name, "open") {
            debug!(backend = %self.name, error = %e, "Demo board unreachable");
            return false;
        }
        if !self.board.claim() {
            debug!(backend = %self.name, "Demo board already claimed");
            return false;
        }
        self.is_open = true;
        info!(backend = %self.name, board = BOARD_NAME, "Opened demo board");
        true
    }

    fn close(&mut self) {
        if !self.is_open {
            return;
        }
        self.run = None;
        self.board.release();
        self.is_open = false;
        info!(backend = %self.name, "Closed demo board");
    }

    fn is_open(&self) -> bool {
        self.is_open
    }

    fn configure_channels(&mut self, channels: &[ChannelConfig]) -> WaveResult<()> {
        self.ensure_idle("configure channels")?;
        self.capabilities().validate_channels(channels)?;

        self.signals = channels
            .iter()
            .enumerate()
            .map(|(index, channel)| {
                self.waveforms
                    .get(&channel.id)
                    .cloned()
                    .unwrap_or_else(|| default_waveform(index))
            })
            .collect();
        self.channels = channels.to_vec();
        self.run = None;

        debug!(
            backend = %self.name,
            n_channels = channels.len(),
            "Configured demo channels"
        );
        Ok(())
    }

    fn configure_acquisition(&mut self, sample_rate: f64, buffer_size: usize) -> WaveResult<()> {
        self.ensure_idle("configure acquisition")?;
        self.capabilities().validate_rate(sample_rate)?;
        if buffer_size == 0 {
            return Err(WaveError::config("Buffer size must be greater than 0"));
        }
        self.sample_rate = Some(sample_rate);
        self.buffer_size = buffer_size;
        self.run = None;

        debug!(
            backend = %self.name,
            sample_rate,
            buffer_size,
            "Configured demo acquisition"
        );
        Ok(())
    }

    fn start(&mut self) -> WaveResult<()> {
        if !self.is_open {
            return Err(WaveError::InvalidState {
                operation: "start",
                state: "closed".to_string(),
            });
        }
        self.ensure_idle("start")?;
        if self.channels.is_empty() {
            return Err(WaveError::config("No channels configured"));
        }
        let Some(sample_rate) = self.sample_rate else {
            return Err(WaveError::config("Acquisition not configured"));
        };
        self.errors.check_operation(&self.name, "start")?;

        self.run = Some(RunState {
            started_at: self.clock.now(),
            stopped_at: None,
            next_index: 0,
        });

        info!(
            backend = %self.name,
            sample_rate,
            n_channels = self.channels.len(),
            "Started demo acquisition"
        );
        Ok(())
    }

    fn stop(&mut self) -> WaveResult<()> {
        let now = self.clock.now();
        if let Some(run) = self.run.as_mut() {
            if run.stopped_at.is_none() {
                run.stopped_at = Some(now);
                info!(backend = %self.name, "Stopped demo acquisition");
            }
        }
        Ok(())
    }

    fn read(&mut self) -> WaveResult<SampleBlock> {
        let n_channels = self.channels.len();
        let (Some(rate), Some(run)) = (self.sample_rate, self.run.as_ref()) else {
            return Ok(SampleBlock::new(n_channels));
        };

        let end = run.stopped_at.unwrap_or_else(|| self.clock.now());
        let from = run.next_index;
        let to = scans_elapsed(end.saturating_sub(run.started_at), rate).max(from);

        self.errors.check_operation(&self.name, "read")?;

        let mut block = SampleBlock::with_capacity(n_channels, (to - from) as usize);
        let mut scan = vec![0.0; n_channels];
        for n in from..to {
            let t = n as f64 / rate;
            for (c, (signal, channel)) in self.signals.iter().zip(&self.channels).enumerate() {
                scan[c] = self.sample(signal, channel.voltage_range, t);
            }
            block.push_scan(&scan)?;
        }

        if let Some(run) = self.run.as_mut() {
            run.next_index = to;
        }

        trace!(backend = %self.name, scans = to - from, "Read demo data");
        Ok(block)
    }

    fn read_single(&mut self, channel_index: usize) -> WaveResult<f64> {
        if !self.is_open {
            return Err(WaveError::InvalidState {
                operation: "read single sample",
                state: "closed".to_string(),
            });
        }
        let (Some(signal), Some(channel)) = (
            self.signals.get(channel_index),
            self.channels.get(channel_index),
        ) else {
            return Err(WaveError::config(format!(
                "Channel index {} not configured",
                channel_index
            )));
        };
        self.errors.check_operation(&self.name, "read_single")?;

        let t = self.clock.now().as_secs_f64();
        Ok(self.sample(signal, channel.voltage_range, t))
    }

    fn actual_sample_rate(&self) -> Option<f64> {
        self.sample_rate
    }
}

impl Drop for DemoBackend {
    fn drop(&mut self) {
        self.close();
    }
}

/// Builder for [`DemoBackend`].
#[derive(Debug)]
pub struct DemoBackendBuilder {
    name: String,
    available: bool,
    board: Option<Arc<DemoBoard>>,
    clock: Option<Arc<dyn Clock>>,
    errors: ErrorConfig,
    seed: Option<u64>,
    noise_amplitude: f64,
    dc_offset: f64,
    waveforms: HashMap<u32, Vec<DemoWaveform>>,
}

impl Default for DemoBackendBuilder {
    fn default() -> Self {
        Self {
            name: "demo".to_string(),
            available: true,
            board: None,
            clock: None,
            errors: ErrorConfig::none(),
            seed: Some(0),
            noise_amplitude: 0.01,
            dc_offset: 0.0,
            waveforms: HashMap::new(),
        }
    }
}

impl DemoBackendBuilder {
    /// Backend name used in logs and errors.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Simulate a machine without the driver layer.
    pub fn available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Share a board claim with other backends.
    pub fn board(mut self, board: Arc<DemoBoard>) -> Self {
        self.board = Some(board);
        self
    }

    /// Time source for the sample clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Injected failures.
    pub fn errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    /// Noise seed; `None` seeds from the OS.
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Peak noise amplitude in volts (0 disables noise).
    pub fn noise(mut self, amplitude: f64) -> Self {
        self.noise_amplitude = amplitude.max(0.0);
        self
    }

    /// Constant offset added to every channel, in volts.
    pub fn dc_offset(mut self, offset: f64) -> Self {
        self.dc_offset = offset;
        self
    }

    /// Signal components for a hardware channel id.
    pub fn waveform(mut self, channel_id: u32, components: Vec<DemoWaveform>) -> Self {
        self.waveforms.insert(channel_id, components);
        self
    }

    /// Build the backend.
    pub fn build(self) -> DemoBackend {
        DemoBackend {
            name: self.name,
            available: self.available,
            board: self.board.unwrap_or_else(DemoBoard::new),
            is_open: false,
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>),
            errors: self.errors,
            noise: DemoRng::new(self.seed),
            noise_amplitude: self.noise_amplitude,
            dc_offset: self.dc_offset,
            waveforms: self.waveforms,
            channels: Vec::new(),
            signals: Vec::new(),
            sample_rate: None,
            buffer_size: 1,
            run: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ErrorScenario, ManualClock};

    fn channels(n: u32) -> Vec<ChannelConfig> {
        (0..n)
            .map(|i| ChannelConfig::new(i, format!("WG{}", i + 1)))
            .collect()
    }

    fn manual_backend(clock: &Arc<ManualClock>) -> DemoBackend {
        let mut backend = DemoBackend::builder()
            .clock(clock.clone())
            .noise(0.0)
            .build();
        assert!(backend.open());
        backend.configure_channels(&channels(3)).unwrap();
        backend.configure_acquisition(100.0, 10).unwrap();
        backend
    }

    #[test]
    fn test_read_tracks_clock() {
        let clock = Arc::new(ManualClock::new());
        let mut backend = manual_backend(&clock);
        backend.start().unwrap();

        assert!(backend.read().unwrap().is_empty());

        clock.advance(Duration::from_millis(250));
        let block = backend.read().unwrap();
        assert_eq!(block.n_channels(), 3);
        assert_eq!(block.n_samples(), 25);

        // Nothing new without time passing
        assert!(backend.read().unwrap().is_empty());
    }

    #[test]
    fn test_stop_flushes_remainder_once() {
        let clock = Arc::new(ManualClock::new());
        let mut backend = manual_backend(&clock);
        backend.start().unwrap();

        clock.advance(Duration::from_millis(100));
        assert_eq!(backend.read().unwrap().n_samples(), 10);

        clock.advance(Duration::from_millis(55));
        backend.stop().unwrap();
        clock.advance(Duration::from_secs(5));

        assert_eq!(backend.read().unwrap().n_samples(), 5);
        assert!(backend.read().unwrap().is_empty());
        assert!(!backend.is_running());
    }

    #[test]
    fn test_signal_is_deterministic() {
        let clock = Arc::new(ManualClock::new());
        let make = || {
            let mut b = DemoBackend::builder()
                .clock(clock.clone())
                .seed(Some(9))
                .noise(0.05)
                .build();
            b.configure_channels(&channels(2)).unwrap();
            b.configure_acquisition(50.0, 5).unwrap();
            b
        };

        let mut a = make();
        assert!(a.open());
        a.start().unwrap();
        clock.advance(Duration::from_secs(1));
        let first = a.read().unwrap();
        a.close();

        clock.set(Duration::ZERO);
        let mut b = make();
        assert!(b.open());
        b.start().unwrap();
        clock.advance(Duration::from_secs(1));
        let second = b.read().unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_values_saturate_at_range() {
        let clock = Arc::new(ManualClock::new());
        let mut backend = DemoBackend::builder()
            .clock(clock.clone())
            .noise(0.0)
            .waveform(0, vec![DemoWaveform::new(1.0, 3.0, 0.0)])
            .build();
        assert!(backend.open());
        backend
            .configure_channels(&[
                ChannelConfig::new(0, "WG1").with_voltage_range(VoltageRange::Bipolar1V)
            ])
            .unwrap();
        backend.configure_acquisition(100.0, 10).unwrap();
        backend.start().unwrap();
        clock.advance(Duration::from_secs(1));

        let block = backend.read().unwrap();
        let samples = block.channel(0).unwrap();
        assert!(samples.iter().all(|v| (-1.0..=1.0).contains(v)));
        assert!(samples.iter().any(|v| *v == 1.0));
    }

    #[test]
    fn test_board_claim_is_exclusive() {
        let board = DemoBoard::new();
        let mut a = DemoBackend::builder().board(board.clone()).build();
        let mut b = DemoBackend::builder().board(board.clone()).build();

        assert!(a.open());
        assert!(a.open(), "open is idempotent");
        assert!(!b.open());

        a.close();
        a.close();
        assert!(b.open());
    }

    #[test]
    fn test_unavailable_board() {
        let mut backend = DemoBackend::builder().available(false).build();
        assert!(!backend.is_available());
        assert!(backend.detect_devices().is_empty());
        assert!(!backend.open());
    }

    #[test]
    fn test_configuration_limits() {
        let mut backend = DemoBackend::new();
        assert!(matches!(
            backend.configure_channels(&channels(17)),
            Err(WaveError::Configuration(_))
        ));
        assert!(backend.configure_acquisition(200_000.0, 10).is_err());
        assert!(backend.configure_acquisition(100.0, 0).is_err());
    }

    #[test]
    fn test_start_requires_open() {
        let mut backend = DemoBackend::new();
        backend.configure_channels(&channels(1)).unwrap();
        backend.configure_acquisition(10.0, 1).unwrap();
        assert!(matches!(
            backend.start(),
            Err(WaveError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_injected_read_failure_keeps_samples() {
        let clock = Arc::new(ManualClock::new());
        let mut backend = DemoBackend::builder()
            .clock(clock.clone())
            .errors(ErrorConfig::scenario(ErrorScenario::FailTimes {
                operation: "read",
                count: 1,
            }))
            .build();
        assert!(backend.open());
        backend.configure_channels(&channels(1)).unwrap();
        backend.configure_acquisition(100.0, 10).unwrap();
        backend.start().unwrap();

        clock.advance(Duration::from_millis(200));
        assert!(backend.read().unwrap_err().is_transient());
        assert_eq!(backend.read().unwrap().n_samples(), 20);
    }

    #[test]
    fn test_read_single() {
        let clock = Arc::new(ManualClock::new());
        let mut backend = DemoBackend::builder()
            .clock(clock.clone())
            .noise(0.0)
            .dc_offset(0.25)
            .waveform(0, Vec::new())
            .build();
        assert!(backend.read_single(0).is_err());
        assert!(backend.open());
        backend.configure_channels(&channels(1)).unwrap();
        assert!((backend.read_single(0).unwrap() - 0.25).abs() < 1e-12);
        assert!(backend.read_single(3).is_err());
    }
}

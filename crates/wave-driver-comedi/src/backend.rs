//! [`DeviceBackend`] over a Comedi board.
//!
//! The backend opens `/dev/comediN`, locks the analog input subdevice, and
//! streams with a hardware-timed command. Physical range limits reported by
//! the board are matched to [`VoltageRange`] values so channel configuration
//! is validated the same way as on the demo board.

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use wave_core::config::AcquisitionSettings;
use wave_core::{
    BackendCapabilities, BoardInfo, ChannelConfig, DeviceBackend, SampleBlock, VoltageRange,
    WaveError, WaveResult,
};

use crate::device::{AnalogInputInfo, ComediDevice};
use crate::error::ComediError;
use crate::streaming::{probe_max_rate, ChannelSpec, StreamAcquisition, StreamConfig};
use crate::sys::{ComediLib, AREF_GROUND, UNIT_VOLT};

/// Default device path.
pub const DEFAULT_DEVICE: &str = "/dev/comedi0";
/// Rate reported when the board cannot be probed.
pub const FALLBACK_MAX_RATE: f64 = 100_000.0;

const MAX_BOARDS: usize = 16;

struct OpenDevice {
    device: ComediDevice,
    ai: AnalogInputInfo,
    max_rate: f64,
}

/// Comedi-driven acquisition backend.
pub struct ComediBackend {
    name: String,
    device_path: String,
    read_timeout: Duration,
    open: Option<OpenDevice>,
    channels: Vec<ChannelConfig>,
    specs: Vec<ChannelSpec>,
    sample_rate: Option<f64>,
    buffer_size: usize,
    stream: Option<StreamAcquisition>,
    pending: Option<SampleBlock>,
    last_data_at: Option<Instant>,
}

impl ComediBackend {
    /// Backend for [`DEFAULT_DEVICE`].
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder.
    pub fn builder() -> ComediBackendBuilder {
        ComediBackendBuilder::default()
    }

    /// Device path this backend opens.
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// How long `read()` may see no data before reporting a timeout.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Whether a command is executing.
    pub fn is_running(&self) -> bool {
        self.stream.as_ref().is_some_and(StreamAcquisition::is_running)
    }

    fn range_index(ai: &AnalogInputInfo, range: VoltageRange) -> Option<u32> {
        ai.ranges
            .iter()
            .position(|r| {
                r.unit == UNIT_VOLT && VoltageRange::from_limits(r.min, r.max) == Some(range)
            })
            .map(|i| i as u32)
    }

    fn supported_ranges(ai: &AnalogInputInfo) -> Vec<VoltageRange> {
        let mut ranges: Vec<VoltageRange> = ai
            .ranges
            .iter()
            .filter(|r| r.unit == UNIT_VOLT)
            .filter_map(|r| VoltageRange::from_limits(r.min, r.max))
            .collect();
        ranges.dedup();
        ranges
    }

    fn require_open(&self, operation: &'static str) -> WaveResult<&OpenDevice> {
        self.open.as_ref().ok_or_else(|| WaveError::InvalidState {
            operation,
            state: "closed".to_string(),
        })
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

    fn wave_error(&self, error: ComediError) -> WaveError {
        error.into_wave_error(&self.name)
    }
}

impl Default for ComediBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBackend for ComediBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        ComediLib::is_available()
    }

    fn detect_devices(&self) -> Vec<BoardInfo> {
        let Ok(lib) = ComediLib::shared() else {
            return Vec::new();
        };
        (0..MAX_BOARDS)
            .map(|n| format!("/dev/comedi{}", n))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| match ComediDevice::open(lib.clone(), &path) {
                Ok(device) => Some(BoardInfo::new(path, device.board_name())),
                Err(e) if e.is_busy() => Some(BoardInfo::new(path, "busy")),
                Err(e) => {
                    debug!(path = %path, error = %e, "Skipping Comedi device");
                    None
                }
            })
            .collect()
    }

    fn capabilities(&self) -> BackendCapabilities {
        match &self.open {
            Some(open) => BackendCapabilities {
                max_channels: open.ai.n_channels as usize,
                min_sample_rate: 1.0,
                max_sample_rate: open.max_rate,
                voltage_ranges: Self::supported_ranges(&open.ai),
                boards: vec![BoardInfo::new(&self.device_path, open.device.board_name())],
            },
            None => BackendCapabilities {
                max_channels: 0,
                min_sample_rate: 1.0,
                max_sample_rate: FALLBACK_MAX_RATE,
                voltage_ranges: Vec::new(),
                boards: self.detect_devices(),
            },
        }
    }

    fn open(&mut self) -> bool {
        if self.open.is_some() {
            return true;
        }
        let lib = match ComediLib::shared() {
            Ok(lib) => lib,
            Err(e) => {
                debug!(backend = %self.name, error = %e, "comedilib unavailable");
                return false;
            }
        };
        let device = match ComediDevice::open(lib, &self.device_path) {
            Ok(device) => device,
            Err(e) => {
                warn!(backend = %self.name, path = %self.device_path, error = %e, "Failed to open Comedi device");
                return false;
            }
        };
        let ai = match device.analog_input() {
            Ok(ai) => ai,
            Err(e) => {
                warn!(backend = %self.name, error = %e, "No usable analog input");
                return false;
            }
        };
        if let Err(e) = device.lock(ai.subdevice) {
            warn!(backend = %self.name, error = %e, "Analog input is claimed elsewhere");
            return false;
        }

        let max_rate = match probe_max_rate(&device, ai.subdevice, 1) {
            Ok(rate) => rate,
            Err(e) => {
                debug!(error = %e, "Rate probe failed, using fallback");
                FALLBACK_MAX_RATE
            }
        };

        info!(
            backend = %self.name,
            path = %self.device_path,
            board = %device.board_name(),
            driver = %device.driver_name(),
            n_channels = ai.n_channels,
            resolution_bits = ai.resolution_bits(),
            max_rate,
            "Opened Comedi board"
        );
        self.open = Some(OpenDevice {
            device,
            ai,
            max_rate,
        });
        true
    }

    fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.stop() {
                warn!(backend = %self.name, error = %e, "Error stopping stream on close");
            }
        }
        self.pending = None;
        if let Some(open) = self.open.take() {
            open.device.unlock(open.ai.subdevice);
            info!(backend = %self.name, "Closed Comedi board");
        }
    }

    fn is_open(&self) -> bool {
        self.open.is_some()
    }

    fn configure_channels(&mut self, channels: &[ChannelConfig]) -> WaveResult<()> {
        self.ensure_idle("configure channels")?;
        let open = self.require_open("configure channels")?;
        self.capabilities().validate_channels(channels)?;

        let specs = channels
            .iter()
            .map(|channel| {
                Self::range_index(&open.ai, channel.voltage_range)
                    .map(|range| ChannelSpec {
                        channel: channel.id,
                        range,
                        aref: AREF_GROUND,
                    })
                    .ok_or_else(|| {
                        WaveError::config(format!(
                            "Channel '{}': board has no {} range",
                            channel.name, channel.voltage_range
                        ))
                    })
            })
            .collect::<WaveResult<Vec<_>>>()?;

        self.specs = specs;
        self.channels = channels.to_vec();
        self.stream = None;
        debug!(backend = %self.name, n_channels = channels.len(), "Configured Comedi channels");
        Ok(())
    }

    fn configure_acquisition(&mut self, sample_rate: f64, buffer_size: usize) -> WaveResult<()> {
        self.ensure_idle("configure acquisition")?;
        self.require_open("configure acquisition")?;
        self.capabilities().validate_rate(sample_rate)?;
        if buffer_size == 0 {
            return Err(WaveError::config("Buffer size must be greater than 0"));
        }
        self.sample_rate = Some(sample_rate);
        self.buffer_size = buffer_size;
        self.stream = None;
        Ok(())
    }

    fn start(&mut self) -> WaveResult<()> {
        self.ensure_idle("start")?;
        let open = self.require_open("start")?;
        if self.specs.is_empty() {
            return Err(WaveError::config("No channels configured"));
        }
        let Some(sample_rate) = self.sample_rate else {
            return Err(WaveError::config("Acquisition not configured"));
        };

        let config = StreamConfig {
            channels: self.specs.clone(),
            sample_rate,
            buffer_size: self.buffer_size,
        };
        let mut stream = StreamAcquisition::new(&open.device, &open.ai, config)
            .map_err(|e| self.wave_error(e))?;
        stream.start().map_err(|e| self.wave_error(e))?;

        self.stream = Some(stream);
        self.pending = None;
        self.last_data_at = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) -> WaveResult<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        if !stream.is_running() {
            return Ok(());
        }
        let remainder = stream.stop().map_err(|e| e.into_wave_error(&self.name))?;
        match self.pending.as_mut() {
            Some(pending) => pending.append(remainder)?,
            None => self.pending = Some(remainder),
        }
        Ok(())
    }

    fn read(&mut self) -> WaveResult<SampleBlock> {
        let n_channels = self.channels.len();
        let mut block = self
            .pending
            .take()
            .unwrap_or_else(|| SampleBlock::new(n_channels));

        let Some(stream) = self.stream.as_mut() else {
            return Ok(block);
        };
        if !stream.is_running() {
            return Ok(block);
        }

        let fresh = match stream.read_available() {
            Ok(fresh) => fresh,
            Err(e) => {
                if !block.is_empty() {
                    self.pending = Some(block);
                }
                return Err(e.into_wave_error(&self.name));
            }
        };

        let now = Instant::now();
        if fresh.is_empty() && block.is_empty() {
            let last = *self.last_data_at.get_or_insert(now);
            if now.duration_since(last) >= self.read_timeout {
                self.last_data_at = Some(now);
                return Err(WaveError::Timeout {
                    device: self.name.clone(),
                    timeout_ms: self.read_timeout.as_millis() as u64,
                });
            }
        } else {
            self.last_data_at = Some(now);
        }

        block.append(fresh)?;
        Ok(block)
    }

    fn read_single(&mut self, channel_index: usize) -> WaveResult<f64> {
        self.ensure_idle("read single sample")?;
        let open = self.require_open("read single sample")?;
        let Some(sp) = self.specs.get(channel_index) else {
            return Err(WaveError::config(format!(
                "Channel index {} not configured",
                channel_index
            )));
        };
        let range = open
            .ai
            .ranges
            .get(sp.range as usize)
            .copied()
            .ok_or_else(|| WaveError::config(format!("Range index {} not available", sp.range)))?;

        let raw = open
            .device
            .read_raw(open.ai.subdevice, sp.channel, sp.range, sp.aref)
            .map_err(|e| e.into_wave_error(&self.name))?;
        Ok(open.device.to_physical(raw, &range, open.ai.maxdata))
    }

    fn actual_sample_rate(&self) -> Option<f64> {
        self.stream
            .as_ref()
            .map(StreamAcquisition::actual_sample_rate)
            .or(self.sample_rate)
    }
}

impl Drop for ComediBackend {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ComediBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComediBackend")
            .field("name", &self.name)
            .field("device_path", &self.device_path)
            .field("open", &self.open.is_some())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Builder for [`ComediBackend`].
#[derive(Debug, Clone)]
pub struct ComediBackendBuilder {
    name: String,
    device_path: String,
    read_timeout: Duration,
}

impl Default for ComediBackendBuilder {
    fn default() -> Self {
        Self {
            name: "comedi".to_string(),
            device_path: DEFAULT_DEVICE.to_string(),
            read_timeout: Duration::from_millis(1000),
        }
    }
}

impl ComediBackendBuilder {
    /// Builder taking its read timeout from the acquisition settings.
    pub fn from_settings(settings: &AcquisitionSettings) -> Self {
        Self::default().read_timeout(settings.read_timeout())
    }

    /// Backend name used in logs and errors.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Device path, e.g. "/dev/comedi1".
    pub fn device(mut self, path: impl Into<String>) -> Self {
        self.device_path = path.into();
        self
    }

    /// How long `read()` may see no data before reporting a timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Build the backend. Nothing is opened until [`DeviceBackend::open`].
    pub fn build(self) -> ComediBackend {
        ComediBackend {
            name: self.name,
            device_path: self.device_path,
            read_timeout: self.read_timeout,
            open: None,
            channels: Vec::new(),
            specs: Vec::new(),
            sample_rate: None,
            buffer_size: 1,
            stream: None,
            pending: None,
            last_data_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::comedi_range;

    fn ai(ranges: Vec<comedi_range>) -> AnalogInputInfo {
        AnalogInputInfo {
            subdevice: 0,
            n_channels: 16,
            maxdata: 0xffff,
            flags: 0,
            ranges,
        }
    }

    fn volts(min: f64, max: f64) -> comedi_range {
        comedi_range {
            min,
            max,
            unit: UNIT_VOLT,
        }
    }

    #[test]
    fn test_read_timeout_from_settings() {
        let settings = AcquisitionSettings {
            read_timeout_ms: 250,
            ..AcquisitionSettings::default()
        };
        let backend = ComediBackendBuilder::from_settings(&settings)
            .device("/dev/comedi3")
            .build();
        assert_eq!(backend.read_timeout(), Duration::from_millis(250));
        assert_eq!(backend.device_path(), "/dev/comedi3");
        assert_eq!(
            ComediBackend::new().read_timeout(),
            AcquisitionSettings::default().read_timeout()
        );
    }

    #[test]
    fn test_range_matching() {
        let ai = ai(vec![volts(-10.0, 10.0), volts(-5.0, 5.0), volts(0.0, 10.0)]);
        assert_eq!(ComediBackend::range_index(&ai, VoltageRange::Bipolar10V), Some(0));
        assert_eq!(ComediBackend::range_index(&ai, VoltageRange::Unipolar10V), Some(2));
        assert_eq!(ComediBackend::range_index(&ai, VoltageRange::Bipolar1V), None);
        assert_eq!(
            ComediBackend::supported_ranges(&ai),
            vec![
                VoltageRange::Bipolar10V,
                VoltageRange::Bipolar5V,
                VoltageRange::Unipolar10V
            ]
        );
    }

    #[test]
    fn test_non_voltage_ranges_ignored() {
        let ai = ai(vec![comedi_range {
            min: 0.0,
            max: 20.0,
            unit: 1,
        }]);
        assert!(ComediBackend::supported_ranges(&ai).is_empty());
    }

    #[test]
    fn test_closed_backend_rejects_configuration() {
        let mut backend = ComediBackend::builder().device("/dev/does-not-exist").build();
        assert!(!backend.open());
        assert!(!backend.is_open());
        let err = backend
            .configure_channels(&[ChannelConfig::new(0, "WG1")])
            .unwrap_err();
        assert!(matches!(err, WaveError::InvalidState { .. }));
        assert!(backend.read().unwrap().is_empty());
        backend.close();
    }
}

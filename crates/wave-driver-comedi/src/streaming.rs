//! Hardware-timed scans using Comedi's command interface.
//!
//! A command is built, then passed through `comedi_command_test` until the
//! driver accepts it. The driver may coerce the scan period on the way; the
//! accepted `scan_begin_arg` is the rate the board really runs at. Once
//! started, the board fills a driver-managed DMA buffer that
//! [`StreamAcquisition::read_available`] drains without blocking.

use std::time::Instant;

use tracing::{debug, info, trace, warn};
use wave_core::SampleBlock;

use crate::device::{AnalogInputInfo, ComediDevice};
use crate::error::{ComediError, Result};
use crate::sys::{
    comedi_cmd, comedi_range, cr_pack, lsampl_t, AREF_GROUND, TRIG_COUNT, TRIG_NONE, TRIG_NOW,
    TRIG_TIMER,
};

/// Maximum command test passes before giving up.
const MAX_TEST_PASSES: usize = 20;

/// One scanned channel.
#[derive(Debug, Clone)]
pub struct ChannelSpec {
    /// Hardware channel number
    pub channel: u32,
    /// Range index
    pub range: u32,
    /// Analog reference
    pub aref: u32,
}

impl ChannelSpec {
    /// Ground-referenced channel on range `range`.
    pub fn new(channel: u32, range: u32) -> Self {
        Self {
            channel,
            range,
            aref: AREF_GROUND,
        }
    }

    fn pack(&self) -> u32 {
        cr_pack(self.channel, self.range, self.aref)
    }
}

/// Configuration for a streaming acquisition.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Channels to sample (in order)
    pub channels: Vec<ChannelSpec>,
    /// Per-channel sample rate in Hz
    pub sample_rate: f64,
    /// Scans per read chunk; sizes the read buffer
    pub buffer_size: usize,
}

impl StreamConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(ComediError::InvalidConfig {
                message: "At least one channel is required".to_string(),
            });
        }
        if !(self.sample_rate > 0.0 && self.sample_rate.is_finite()) {
            return Err(ComediError::InvalidConfig {
                message: format!("Invalid sample rate: {}", self.sample_rate),
            });
        }
        if self.buffer_size == 0 {
            return Err(ComediError::InvalidConfig {
                message: "Buffer size must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Scan period in nanoseconds.
    pub fn scan_interval_ns(&self) -> u32 {
        (1e9 / self.sample_rate).round().min(u32::MAX as f64) as u32
    }

    /// Conversion spacing within a scan, in nanoseconds.
    pub fn convert_interval_ns(&self) -> u32 {
        let n = self.channels.len() as u32;
        if n > 1 {
            self.scan_interval_ns() / n
        } else {
            0
        }
    }
}

/// Build a continuous, timer-driven command.
fn build_command(subdevice: u32, config: &StreamConfig, chanlist: &mut [u32]) -> comedi_cmd {
    let n_channels = chanlist.len() as u32;
    comedi_cmd {
        subdev: subdevice,
        flags: 0,
        start_src: TRIG_NOW,
        start_arg: 0,
        scan_begin_src: TRIG_TIMER,
        scan_begin_arg: config.scan_interval_ns(),
        convert_src: TRIG_TIMER,
        convert_arg: config.convert_interval_ns(),
        scan_end_src: TRIG_COUNT,
        scan_end_arg: n_channels,
        // TRIG_COUNT with 0 stops immediately; continuous needs TRIG_NONE
        stop_src: TRIG_NONE,
        stop_arg: 0,
        chanlist: chanlist.as_mut_ptr(),
        chanlist_len: n_channels,
        data: std::ptr::null_mut(),
        data_len: 0,
    }
}

/// Run the command test until the driver accepts the command.
fn test_command(device: &ComediDevice, cmd: &mut comedi_cmd) -> Result<()> {
    let mut last_result = 0;
    for pass in 0..MAX_TEST_PASSES {
        // SAFETY: cmd and its chanlist are valid for the call.
        let result =
            device.with_handle(|lib, handle| unsafe { (lib.comedi_command_test)(handle, cmd) });
        last_result = result;

        match result {
            0 => {
                debug!(pass, scan_begin_arg = cmd.scan_begin_arg, "Command test passed");
                return Ok(());
            }
            1..=5 => {
                debug!(
                    pass,
                    result,
                    scan_begin_arg = cmd.scan_begin_arg,
                    convert_arg = cmd.convert_arg,
                    "Command test adjusted parameters, retrying"
                );
            }
            _ if result < 0 => return Err(ComediError::from_errno(device.lib())),
            _ => {
                return Err(ComediError::CommandError {
                    code: result,
                    message: format!("Command test failed with unexpected code {}", result),
                })
            }
        }
    }

    Err(ComediError::CommandError {
        code: last_result,
        message: format!(
            "Command test did not converge after {} passes",
            MAX_TEST_PASSES
        ),
    })
}

/// Fastest per-channel rate the board accepts for `n_channels`.
///
/// Asks the driver to coerce an impossibly short scan period and reads back
/// what it settled on.
pub fn probe_max_rate(device: &ComediDevice, subdevice: u32, n_channels: usize) -> Result<f64> {
    let config = StreamConfig {
        channels: (0..n_channels.max(1) as u32)
            .map(|c| ChannelSpec::new(c, 0))
            .collect(),
        sample_rate: 1e9,
        buffer_size: 1,
    };
    let mut chanlist: Vec<u32> = config.channels.iter().map(ChannelSpec::pack).collect();
    let mut cmd = build_command(subdevice, &config, &mut chanlist);
    cmd.scan_begin_arg = 1;
    cmd.convert_arg = 1;
    test_command(device, &mut cmd)?;
    Ok(1e9 / cmd.scan_begin_arg.max(1) as f64)
}

/// Read buffer that holds a partial trailing scan until the rest arrives.
///
/// `read(2)` may end inside a scan. The leftover bytes stay at the front
/// so the next read continues the same scan and channels never shift.
#[derive(Debug)]
struct ScanBuffer {
    bytes: Vec<u8>,
    filled: usize,
    scan_bytes: usize,
}

impl ScanBuffer {
    fn new(capacity_scans: usize, scan_bytes: usize) -> Self {
        Self {
            bytes: vec![0u8; capacity_scans.max(1) * scan_bytes],
            filled: 0,
            scan_bytes,
        }
    }

    fn clear(&mut self) {
        self.filled = 0;
    }

    /// Bytes carried over from the previous read.
    fn carried(&self) -> usize {
        self.filled
    }

    /// How much to request from `available` driver bytes so the buffer
    /// ends on a scan boundary. Zero when no scan can complete yet.
    fn request_len(&self, available: usize) -> usize {
        let total = self.filled + available.min(self.bytes.len() - self.filled);
        (total - total % self.scan_bytes).saturating_sub(self.filled)
    }

    /// Writable space after the carried bytes.
    fn spare(&mut self, len: usize) -> &mut [u8] {
        let start = self.filled;
        &mut self.bytes[start..start + len]
    }

    /// Account for `n` bytes written into [`spare`](Self::spare).
    fn commit(&mut self, n: usize) {
        self.filled = (self.filled + n).min(self.bytes.len());
    }

    /// Every complete scan currently buffered.
    fn complete(&self) -> &[u8] {
        &self.bytes[..self.filled - self.filled % self.scan_bytes]
    }

    /// Drop the complete scans, keeping any partial one at the front.
    fn consume_complete(&mut self) {
        let complete = self.filled - self.filled % self.scan_bytes;
        self.bytes.copy_within(complete..self.filled, 0);
        self.filled -= complete;
    }
}

/// A running (or runnable) hardware-timed acquisition.
pub struct StreamAcquisition {
    device: ComediDevice,
    config: StreamConfig,
    subdevice: u32,
    cmd: comedi_cmd,
    chanlist: Vec<u32>,
    ranges: Vec<comedi_range>,
    maxdata: lsampl_t,
    use_lsampl: bool,
    read_buffer: ScanBuffer,
    actual_sample_rate: f64,
    running: bool,
    started_at: Option<Instant>,
    scans_acquired: u64,
}

// SAFETY: cmd.chanlist points into self.chanlist, which moves with the
// struct; the pointer is refreshed before every use.
unsafe impl Send for StreamAcquisition {}

impl StreamAcquisition {
    /// Prepare an acquisition on the analog input described by `ai`.
    ///
    /// The command is tested here, so the actual rate is known before
    /// [`start`](Self::start).
    pub fn new(device: &ComediDevice, ai: &AnalogInputInfo, config: StreamConfig) -> Result<Self> {
        config.validate()?;
        if !ai.supports_commands() {
            return Err(ComediError::NotSupported {
                message: format!(
                    "Subdevice {} does not support command-based acquisition",
                    ai.subdevice
                ),
            });
        }

        let ranges = config
            .channels
            .iter()
            .map(|ch| {
                ai.ranges.get(ch.range as usize).copied().ok_or_else(|| {
                    ComediError::InvalidConfig {
                        message: format!("Range index {} not available", ch.range),
                    }
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut chanlist: Vec<u32> = config.channels.iter().map(ChannelSpec::pack).collect();
        let mut cmd = build_command(ai.subdevice, &config, &mut chanlist);
        test_command(device, &mut cmd)?;

        let actual_sample_rate = 1e9 / cmd.scan_begin_arg.max(1) as f64;
        if (actual_sample_rate - config.sample_rate).abs() > 1e-9 * config.sample_rate {
            info!(
                requested = config.sample_rate,
                actual = actual_sample_rate,
                "Board coerced sample rate"
            );
        }

        let sample_size = if ai.uses_lsampl() { 4 } else { 2 };
        let read_buffer = ScanBuffer::new(config.buffer_size, config.channels.len() * sample_size);

        Ok(Self {
            device: device.clone(),
            subdevice: ai.subdevice,
            cmd,
            chanlist,
            ranges,
            maxdata: ai.maxdata,
            use_lsampl: ai.uses_lsampl(),
            read_buffer,
            actual_sample_rate,
            running: false,
            started_at: None,
            scans_acquired: 0,
            config,
        })
    }

    /// Rate the board runs at, after coercion.
    pub fn actual_sample_rate(&self) -> f64 {
        self.actual_sample_rate
    }

    /// Whether the command is executing.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Scans drained so far.
    pub fn scans_acquired(&self) -> u64 {
        self.scans_acquired
    }

    /// Execute the command.
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Err(ComediError::DeviceBusy {
                path: self.device.path().to_string(),
            });
        }

        self.cmd.chanlist = self.chanlist.as_mut_ptr();
        let cmd = &mut self.cmd;
        // SAFETY: cmd.chanlist points at self.chanlist for the call.
        let result = self
            .device
            .with_handle(|lib, handle| unsafe { (lib.comedi_command)(handle, cmd) });
        if result < 0 {
            return Err(ComediError::from_errno(self.device.lib()));
        }

        self.running = true;
        self.started_at = Some(Instant::now());
        self.scans_acquired = 0;
        self.read_buffer.clear();

        info!(
            subdevice = self.subdevice,
            sample_rate = self.actual_sample_rate,
            n_channels = self.config.channels.len(),
            "Started streaming acquisition"
        );
        Ok(())
    }

    /// Drain what the hardware finished, then cancel the command.
    pub fn stop(&mut self) -> Result<SampleBlock> {
        if !self.running {
            return Ok(SampleBlock::new(self.config.channels.len()));
        }

        let remainder = self.read_available();
        let subdevice = self.subdevice;
        // SAFETY: handle is valid.
        let result = self
            .device
            .with_handle(|lib, handle| unsafe { (lib.comedi_cancel)(handle, subdevice) });
        if result < 0 {
            warn!(
                error = %ComediError::from_errno(self.device.lib()),
                "Error cancelling acquisition"
            );
        }
        self.running = false;

        info!(scans = self.scans_acquired, "Stopped streaming acquisition");
        remainder
    }

    /// Every complete scan in the DMA buffer, in volts, without blocking.
    pub fn read_available(&mut self) -> Result<SampleBlock> {
        let n_channels = self.config.channels.len();
        let mut block = SampleBlock::new(n_channels);
        if !self.running {
            return Ok(block);
        }

        let subdevice = self.subdevice;

        loop {
            // SAFETY: handle is valid.
            let available = self.device.with_handle(|lib, handle| unsafe {
                (lib.comedi_get_buffer_contents)(handle, subdevice)
            });
            if available < 0 {
                return Err(ComediError::from_errno(self.device.lib()));
            }

            let wanted = self.read_buffer.request_len(available as usize);
            if wanted == 0 {
                break;
            }

            let fd = self.device.fileno();
            let spare = self.read_buffer.spare(wanted);
            // SAFETY: spare is a live slice of exactly `wanted` bytes.
            let n = unsafe { libc::read(fd, spare.as_mut_ptr() as *mut libc::c_void, wanted) };
            if n < 0 {
                let err = std::io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EAGAIN) => break,
                    Some(libc::EPIPE) => return Err(ComediError::BufferOverflow),
                    _ => {}
                }
                return Err(ComediError::Io(err));
            }
            let n = n as usize;
            // SAFETY: handle is valid.
            self.device.with_handle(|lib, handle| unsafe {
                (lib.comedi_mark_buffer_read)(handle, subdevice, n as u32)
            });

            self.read_buffer.commit(n);
            self.decode_into(&mut block, self.read_buffer.complete())?;
            self.read_buffer.consume_complete();
            if self.read_buffer.carried() > 0 {
                trace!(
                    carried = self.read_buffer.carried(),
                    "Partial scan kept for next read"
                );
            }
            if n < wanted {
                break;
            }
        }

        let scans = block.n_samples() as u64;
        self.scans_acquired += scans;
        if scans > 0 {
            trace!(scans, "Read streaming data");
        }
        Ok(block)
    }

    fn decode_into(&self, block: &mut SampleBlock, raw: &[u8]) -> Result<()> {
        let n_channels = self.config.channels.len();
        let sample_size = if self.use_lsampl { 4 } else { 2 };
        let mut scan = vec![0.0; n_channels];

        for raw_scan in raw.chunks_exact(n_channels * sample_size) {
            for (c, sample) in raw_scan.chunks_exact(sample_size).enumerate() {
                let code = if self.use_lsampl {
                    u32::from_ne_bytes([sample[0], sample[1], sample[2], sample[3]])
                } else {
                    u16::from_ne_bytes([sample[0], sample[1]]) as u32
                };
                scan[c] = self.device.to_physical(code, &self.ranges[c], self.maxdata);
            }
            block
                .push_scan(&scan)
                .map_err(|e| ComediError::InvalidConfig {
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }
}

impl Drop for StreamAcquisition {
    fn drop(&mut self) {
        if self.running {
            if let Err(e) = self.stop() {
                warn!("Error stopping acquisition on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::{cr_chan, cr_range};

    fn config(channels: &[u32], rate: f64) -> StreamConfig {
        StreamConfig {
            channels: channels.iter().map(|&c| ChannelSpec::new(c, 0)).collect(),
            sample_rate: rate,
            buffer_size: 64,
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(config(&[0, 1], 100.0).validate().is_ok());
        assert!(config(&[], 100.0).validate().is_err());
        assert!(config(&[0], 0.0).validate().is_err());
        let mut c = config(&[0], 10.0);
        c.buffer_size = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_scan_interval_calculation() {
        // 10 kHz = 100 us
        assert_eq!(config(&[0, 1], 10_000.0).scan_interval_ns(), 100_000);
        assert_eq!(config(&[0, 1], 10_000.0).convert_interval_ns(), 50_000);
        assert_eq!(config(&[0], 10_000.0).convert_interval_ns(), 0);
    }

    #[test]
    fn test_build_command_is_continuous() {
        let cfg = config(&[2, 5, 7], 100.0);
        let mut chanlist: Vec<u32> = cfg.channels.iter().map(ChannelSpec::pack).collect();
        let cmd = build_command(0, &cfg, &mut chanlist);

        assert_eq!(cmd.stop_src, TRIG_NONE);
        assert_eq!(cmd.scan_begin_src, TRIG_TIMER);
        assert_eq!(cmd.scan_begin_arg, 10_000_000);
        assert_eq!(cmd.scan_end_arg, 3);
        assert_eq!(cmd.chanlist_len, 3);
        assert_eq!(cr_chan(chanlist[1]), 5);
        assert_eq!(cr_range(chanlist[1]), 0);
    }

    /// Feed `reads` byte counts out of `stream` and collect decoded scans.
    fn replay(buffer: &mut ScanBuffer, stream: &[u8], reads: &[usize]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut offset = 0;
        for &n in reads {
            let available = stream.len() - offset;
            let wanted = buffer.request_len(available);
            let n = n.min(wanted);
            buffer.spare(wanted)[..n].copy_from_slice(&stream[offset..offset + n]);
            offset += n;
            buffer.commit(n);
            out.extend_from_slice(buffer.complete());
            buffer.consume_complete();
        }
        out
    }

    #[test]
    fn test_partial_scan_carried_to_next_read() {
        // 3 channels of 2 bytes; byte value encodes (scan, channel)
        let scan_bytes = 6;
        let stream: Vec<u8> = (0..10u8)
            .flat_map(|scan| (0..3u8).flat_map(move |c| [scan * 4 + c, 0xA0 | c]))
            .collect();
        let mut buffer = ScanBuffer::new(4, scan_bytes);

        // Reads that end one and five bytes into a scan
        let out = replay(&mut buffer, &stream, &[7, 13, 24, 24, 24]);
        assert_eq!(out.len() % scan_bytes, 0);
        assert_eq!(out, stream[..out.len()].to_vec());
        for scan in out.chunks_exact(scan_bytes) {
            for (c, sample) in scan.chunks_exact(2).enumerate() {
                assert_eq!(sample[1], 0xA0 | c as u8, "channel shifted");
            }
        }
        assert_eq!(out.len() + buffer.carried(), stream.len().min(7 + 13 + 24 * 3));
    }

    #[test]
    fn test_request_len_ends_on_scan_boundary() {
        let mut buffer = ScanBuffer::new(4, 6);
        assert_eq!(buffer.request_len(0), 0);
        assert_eq!(buffer.request_len(5), 0);
        assert_eq!(buffer.request_len(13), 12);
        // Capped by capacity
        assert_eq!(buffer.request_len(1000), 24);

        buffer.spare(4).copy_from_slice(&[1, 2, 3, 4]);
        buffer.commit(4);
        assert_eq!(buffer.carried(), 4);
        assert!(buffer.complete().is_empty());
        assert_eq!(buffer.request_len(1), 0);
        assert_eq!(buffer.request_len(2), 2);
        assert_eq!(buffer.request_len(1000), 20);

        buffer.clear();
        assert_eq!(buffer.carried(), 0);
    }
}

//! Bounded per-channel circular store shared between the acquisition worker
//! and its consumers.
//!
//! The worker is the only writer. Consumers never iterate live memory: they
//! take a [`BufferSnapshot`] (an owned copy made under the read lock), or ask
//! for everything after a cursor with [`RingBuffer::read_since`].
//!
//! Every frame gets a sequence number equal to its scan index since the
//! session started. Sequence numbers keep counting across evictions, so the
//! relation between hardware time and sample count survives an overflow.

use std::collections::VecDeque;

use parking_lot::RwLock;
use tracing::warn;
use wave_core::limits::MAX_RING_FRAMES;
use wave_core::{ChannelConfig, SampleBlock, SampleFrame, WaveError, WaveResult};

/// Outcome of one append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppendOutcome {
    /// Sequence number of the first appended frame
    pub first_sequence: u64,
    /// Frames appended
    pub appended: u64,
    /// Oldest frames overwritten to make room
    pub evicted: u64,
}

#[derive(Debug)]
struct RingInner {
    channels: Vec<VecDeque<f64>>,
    timestamps: VecDeque<f64>,
    /// Sequence number the next frame will get
    next_sequence: u64,
    overflow_count: u64,
}

impl RingInner {
    fn len(&self) -> usize {
        self.timestamps.len()
    }

    fn oldest_sequence(&self) -> u64 {
        self.next_sequence - self.len() as u64
    }

    fn copy_range(&self, skip: usize) -> BufferSnapshot {
        BufferSnapshot {
            channels: self
                .channels
                .iter()
                .map(|c| c.iter().skip(skip).copied().collect())
                .collect(),
            timestamps: self.timestamps.iter().skip(skip).copied().collect(),
            first_sequence: self.oldest_sequence() + skip as u64,
            overflow_count: self.overflow_count,
            total_frames: self.next_sequence,
        }
    }
}

/// Fixed-capacity multi-channel frame store.
#[derive(Debug)]
pub struct RingBuffer {
    n_channels: usize,
    capacity: usize,
    inner: RwLock<RingInner>,
}

impl RingBuffer {
    /// A ring holding at most `capacity` frames of `n_channels` values.
    pub fn new(n_channels: usize, capacity: usize) -> WaveResult<Self> {
        if n_channels == 0 {
            return Err(WaveError::config("Ring buffer needs at least one channel"));
        }
        if capacity == 0 || capacity > MAX_RING_FRAMES {
            return Err(WaveError::config(format!(
                "Ring capacity {} outside 1-{} frames",
                capacity, MAX_RING_FRAMES
            )));
        }
        Ok(Self {
            n_channels,
            capacity,
            inner: RwLock::new(RingInner {
                channels: (0..n_channels).map(|_| VecDeque::new()).collect(),
                timestamps: VecDeque::new(),
                next_sequence: 0,
                overflow_count: 0,
            }),
        })
    }

    /// Channels per frame.
    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    /// Maximum frames held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames currently held.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether no frames are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames overwritten before anyone could be sure to read them.
    pub fn overflow_count(&self) -> u64 {
        self.inner.read().overflow_count
    }

    /// Frames ever appended, including overwritten ones.
    pub fn total_frames(&self) -> u64 {
        self.inner.read().next_sequence
    }

    /// Sequence number the next appended frame will get.
    pub fn next_sequence(&self) -> u64 {
        self.inner.read().next_sequence
    }

    /// Append one frame.
    pub fn push(&self, frame: &SampleFrame) -> WaveResult<AppendOutcome> {
        if frame.values.len() != self.n_channels {
            return Err(self.width_error(frame.values.len()));
        }
        let mut inner = self.inner.write();
        let first_sequence = inner.next_sequence;
        let evicted = self.make_room(&mut inner, 1);
        for (column, &value) in inner.channels.iter_mut().zip(&frame.values) {
            column.push_back(value);
        }
        inner.timestamps.push_back(frame.timestamp);
        inner.next_sequence += 1;
        Ok(AppendOutcome {
            first_sequence,
            appended: 1,
            evicted,
        })
    }

    /// Append a block read from a backend, timestamping scan `n` of the
    /// session at `n / sample_rate` seconds.
    ///
    /// Never blocks on consumers and never grows past capacity. When the
    /// block alone exceeds capacity only its newest frames are kept; the
    /// others still count as appended and as evicted.
    pub fn append_block(&self, block: &SampleBlock, sample_rate: f64) -> WaveResult<AppendOutcome> {
        if block.n_channels() != self.n_channels {
            return Err(self.width_error(block.n_channels()));
        }
        if !(sample_rate > 0.0 && sample_rate.is_finite()) {
            return Err(WaveError::config(format!("Invalid sample rate: {}", sample_rate)));
        }

        let n = block.n_samples();
        let mut inner = self.inner.write();
        let first_sequence = inner.next_sequence;
        if n == 0 {
            return Ok(AppendOutcome {
                first_sequence,
                ..AppendOutcome::default()
            });
        }

        let skip = n.saturating_sub(self.capacity);
        let kept = n - skip;
        let mut evicted = self.make_room(&mut inner, kept);
        evicted += skip as u64;
        inner.overflow_count += skip as u64;

        for (column, source) in inner.channels.iter_mut().zip(block.channels()) {
            column.extend(source[skip..].iter().copied());
        }
        let start = first_sequence + skip as u64;
        inner
            .timestamps
            .extend((0..kept as u64).map(|i| (start + i) as f64 / sample_rate));
        inner.next_sequence += n as u64;

        if evicted > 0 {
            warn!(
                evicted,
                overflow_total = inner.overflow_count,
                "Ring buffer overflow, oldest frames overwritten"
            );
        }

        Ok(AppendOutcome {
            first_sequence,
            appended: n as u64,
            evicted,
        })
    }

    /// Owned copy of everything held.
    pub fn snapshot(&self) -> BufferSnapshot {
        self.inner.read().copy_range(0)
    }

    /// Frames with sequence number `>= cursor`.
    ///
    /// A cursor older than the oldest held frame means the consumer fell
    /// behind; [`ReadSince::missed`] says by how much.
    pub fn read_since(&self, cursor: u64) -> ReadSince {
        let inner = self.inner.read();
        let oldest = inner.oldest_sequence();
        let missed = oldest.saturating_sub(cursor);
        let from = cursor.clamp(oldest, inner.next_sequence);
        ReadSince {
            snapshot: inner.copy_range((from - oldest) as usize),
            missed,
            next_cursor: inner.next_sequence,
        }
    }

    /// Drop every frame and reset counters.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        for column in &mut inner.channels {
            column.clear();
        }
        inner.timestamps.clear();
        inner.next_sequence = 0;
        inner.overflow_count = 0;
    }

    fn make_room(&self, inner: &mut RingInner, incoming: usize) -> u64 {
        let excess = (inner.len() + incoming).saturating_sub(self.capacity);
        if excess == 0 {
            return 0;
        }
        for column in &mut inner.channels {
            column.drain(..excess);
        }
        inner.timestamps.drain(..excess);
        inner.overflow_count += excess as u64;
        excess as u64
    }

    fn width_error(&self, got: usize) -> WaveError {
        WaveError::config(format!(
            "Frame has {} channels, ring buffer has {}",
            got, self.n_channels
        ))
    }
}

/// Result of [`RingBuffer::read_since`].
#[derive(Debug, Clone)]
pub struct ReadSince {
    /// Frames at or after the cursor that are still held
    pub snapshot: BufferSnapshot,
    /// Frames between the cursor and the oldest held frame, lost to overflow
    pub missed: u64,
    /// Cursor to pass next time
    pub next_cursor: u64,
}

/// Owned, consistent copy of ring contents.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BufferSnapshot {
    channels: Vec<Vec<f64>>,
    timestamps: Vec<f64>,
    first_sequence: u64,
    overflow_count: u64,
    total_frames: u64,
}

impl BufferSnapshot {
    /// Number of channels.
    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    /// Frames in the snapshot.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the snapshot holds no frames.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Samples of one channel, in volts.
    pub fn channel(&self, index: usize) -> Option<&[f64]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// All channels, channel-major.
    pub fn channels(&self) -> &[Vec<f64>] {
        &self.channels
    }

    /// Seconds since session start, one per frame.
    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    /// Sequence number of the first frame.
    pub fn first_sequence(&self) -> u64 {
        self.first_sequence
    }

    /// Ring overflow count when the snapshot was taken.
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    /// Frames ever appended when the snapshot was taken.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Row view.
    pub fn frames(&self) -> Vec<SampleFrame> {
        self.timestamps
            .iter()
            .enumerate()
            .map(|(i, &timestamp)| SampleFrame {
                timestamp,
                values: self.channels.iter().map(|c| c[i]).collect(),
            })
            .collect()
    }

    /// Consume into channel-major vectors.
    pub fn into_channels(self) -> Vec<Vec<f64>> {
        self.channels
    }

    /// Apply each channel's gain and offset.
    pub fn to_engineering(&self, configs: &[ChannelConfig]) -> WaveResult<Vec<Vec<f64>>> {
        if configs.len() != self.channels.len() {
            return Err(WaveError::config(format!(
                "{} channel configs for {} channels",
                configs.len(),
                self.channels.len()
            )));
        }
        Ok(self
            .channels
            .iter()
            .zip(configs)
            .map(|(values, config)| values.iter().map(|&v| config.to_engineering(v)).collect())
            .collect())
    }

    /// The newest `n` frames (or all of them if fewer are held).
    pub fn latest(&self, n: usize) -> BufferSnapshot {
        let skip = self.len().saturating_sub(n);
        BufferSnapshot {
            channels: self.channels.iter().map(|c| c[skip..].to_vec()).collect(),
            timestamps: self.timestamps[skip..].to_vec(),
            first_sequence: self.first_sequence + skip as u64,
            overflow_count: self.overflow_count,
            total_frames: self.total_frames,
        }
    }
}

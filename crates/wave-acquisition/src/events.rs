//! Notifications published by the acquisition worker.
//!
//! Delivered over a [`tokio::sync::broadcast`] channel. A lagging receiver
//! loses notifications, never data: the ring buffer is the source of truth
//! and [`RingBuffer::read_since`](crate::RingBuffer::read_since) catches up.

use uuid::Uuid;

use crate::session::SessionState;

/// Broadcast channel depth.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// New frames reached the ring buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct DataAvailable {
    /// Session the frames belong to
    pub session_id: Uuid,
    /// Sequence number of the first new frame
    pub first_sequence: u64,
    /// Seconds since session start, one per new frame
    pub timestamps: Vec<f64>,
    /// Scans acquired so far
    pub total_samples: u64,
    /// Ring overflow count so far
    pub overflow_count: u64,
}

/// Everything a consumer can be told.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionEvent {
    /// New frames are readable
    DataAvailable(DataAvailable),
    /// The session changed state
    StateChanged {
        /// Session id
        session_id: Uuid,
        /// New state
        state: SessionState,
    },
}

//! Acquisition controller for wave-lab.
//!
//! An [`AcquisitionController`] owns one [`DeviceBackend`](wave_core::DeviceBackend)
//! and drives it through the session state machine. While running, a
//! dedicated worker thread reads the backend at a fixed cadence
//! (`buffer_size / sample_rate`), appends to the session's [`RingBuffer`]
//! and broadcasts [`AcquisitionEvent::DataAvailable`].
//!
//! Consumers (display, spectral analysis, storage) never touch live memory:
//! they take a [`BufferSnapshot`] or read after a cursor with
//! [`RingBuffer::read_since`].
//!
//! ```no_run
//! use wave_acquisition::{AcquisitionController, SessionConfig};
//! use wave_core::ChannelConfig;
//! use wave_driver_demo::DemoBackend;
//!
//! # fn example() -> wave_core::WaveResult<()> {
//! let mut controller = AcquisitionController::new(Box::new(DemoBackend::new()));
//! let channels = vec![ChannelConfig::new(0, "WG1"), ChannelConfig::new(1, "WG2")];
//! controller.configure(SessionConfig::new(channels, 100.0))?;
//! controller.start()?;
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! let session = controller.stop()?;
//! println!("{} samples", session.total_samples);
//! # Ok(())
//! # }
//! ```

mod calibration;
mod controller;
pub mod events;
pub mod ring_buffer;
pub mod session;
mod worker;

pub use calibration::capture_calibration_point;
pub use controller::AcquisitionController;
pub use events::{AcquisitionEvent, DataAvailable};
pub use ring_buffer::{AppendOutcome, BufferSnapshot, ReadSince, RingBuffer};
pub use session::{AcquisitionSession, SessionConfig, SessionState};

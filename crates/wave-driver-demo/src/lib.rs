//! Demo backend for wave-lab.
//!
//! A synthetic, hardware-timed DAQ board that implements
//! [`wave_core::DeviceBackend`]. It is what the acquisition pipeline runs on
//! during development and in tests, where it also serves as the oracle for
//! sample-count properties.
//!
//! # Behavior
//!
//! - 16 channels, 1 Hz to 100 kHz, every [`wave_core::VoltageRange`]
//! - Per-channel sums of sinusoids plus seeded uniform noise
//! - Sample clock from an injectable [`Clock`]; [`ManualClock`] gives exact counts
//! - Failures injected with [`ErrorConfig`]
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use wave_core::{ChannelConfig, DeviceBackend};
//! use wave_driver_demo::{DemoBackend, ManualClock};
//!
//! let clock = Arc::new(ManualClock::new());
//! let mut backend = DemoBackend::builder().clock(clock.clone()).build();
//! assert!(backend.open());
//! backend.configure_channels(&[ChannelConfig::new(0, "WG1")])?;
//! backend.configure_acquisition(100.0, 10)?;
//! backend.start()?;
//!
//! clock.advance(Duration::from_secs(2));
//! assert_eq!(backend.read()?.n_samples(), 200);
//! # Ok::<(), wave_core::WaveError>(())
//! ```

mod backend;
pub mod common;
mod waveform;

pub use backend::{
    DemoBackend, DemoBackendBuilder, DemoBoard, DEMO_MAX_CHANNELS, DEMO_MAX_RATE, DEMO_MIN_RATE,
};
pub use common::{Clock, DemoRng, ErrorConfig, ErrorScenario, ManualClock, SystemClock};
pub use waveform::DemoWaveform;

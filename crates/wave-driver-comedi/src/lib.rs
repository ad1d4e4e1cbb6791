//! Comedi backend for wave-lab.
//!
//! Drives DAQ cards supported by the Comedi kernel drivers (NI E/M-series,
//! Measurement Computing, Advantech and others). comedilib is loaded at
//! runtime, so this crate builds everywhere and [`ComediBackend::is_available`]
//! reports `false` on machines without it.
//!
//! # Layers
//!
//! - [`sys`] - raw types and the runtime-loaded function table
//! - [`ComediDevice`] - RAII device handle with serialized FFI access
//! - [`StreamAcquisition`] - hardware-timed command streaming
//! - [`ComediBackend`] - the [`wave_core::DeviceBackend`] implementation
//!
//! ```no_run
//! use wave_core::{ChannelConfig, DeviceBackend};
//! use wave_driver_comedi::ComediBackend;
//!
//! # fn example() -> wave_core::WaveResult<()> {
//! let mut backend = ComediBackend::builder().device("/dev/comedi0").build();
//! if backend.open() {
//!     backend.configure_channels(&[ChannelConfig::new(0, "WG1")])?;
//!     backend.configure_acquisition(100.0, 10)?;
//!     backend.start()?;
//!     let block = backend.read()?;
//!     println!("{} scans", block.n_samples());
//!     backend.stop()?;
//! }
//! # Ok(())
//! # }
//! ```

#![allow(unsafe_code)]

mod backend;
pub mod device;
pub mod error;
pub mod streaming;
pub mod sys;

pub use backend::{ComediBackend, ComediBackendBuilder, DEFAULT_DEVICE, FALLBACK_MAX_RATE};
pub use device::{AnalogInputInfo, ComediDevice};
pub use error::{ComediError, Result};
pub use streaming::{probe_max_rate, ChannelSpec, StreamAcquisition, StreamConfig};
pub use sys::ComediLib;

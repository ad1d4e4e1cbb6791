//! Core types and traits for wave-lab.
//!
//! This crate holds everything the hardware drivers, the acquisition
//! controller and the offline analysis crates agree on:
//!
//! - [`error`] - the shared [`WaveError`] taxonomy
//! - [`channel`] - per-sensor [`ChannelConfig`] and supported voltage ranges
//! - [`frame`] - [`SampleBlock`] (what a backend returns) and [`SampleFrame`]
//! - [`backend`] - the [`DeviceBackend`] contract and its capability descriptor
//! - [`retry`] - bounded backoff and consecutive-failure escalation
//! - [`config`] - layered configuration loaded with figment
//! - [`limits`] - hard limits shared across crates
//!
//! Nothing in here talks to hardware. Driver crates implement
//! [`DeviceBackend`]; everything downstream only sees the trait.

pub mod backend;
pub mod channel;
pub mod config;
pub mod error;
pub mod frame;
pub mod limits;
pub mod retry;

pub use backend::{BackendCapabilities, BoardInfo, DeviceBackend};
pub use channel::{ChannelConfig, SensorType, VoltageRange};
pub use config::WaveConfig;
pub use error::{WaveError, WaveResult};
pub use frame::{SampleBlock, SampleFrame};
pub use retry::{FailureTracker, RetryDecision, RetryPolicy};

//! Checksummed record storage for wave-lab.
//!
//! A record is a `[samples × channels]` float32 matrix plus metadata. Every
//! container stores a SHA-256 over the canonical bytes of both (see
//! [`digest`]), and nothing is returned from a read until it matches.
//!
//! ```no_run
//! use wave_storage::{read, verify_integrity, write, RecordMetadata, SampleMatrix};
//!
//! let data = SampleMatrix::from_channels(&[vec![0.0, 0.1], vec![0.2, 0.3]])?;
//! let meta = RecordMetadata::new(100.0, vec!["WG1".into(), "WG2".into()]);
//! write("data/run-001.wrec", &data, &meta)?;
//! assert!(verify_integrity("data/run-001.wrec")?);
//! let record = read("data/run-001.wrec")?;
//! assert_eq!(record.data, data);
//! # Ok::<(), wave_core::WaveError>(())
//! ```

pub mod binary;
pub mod digest;
#[cfg(feature = "storage_hdf5")]
pub mod hdf5_store;
mod record;
mod store;

pub use binary::BinaryStore;
#[cfg(feature = "storage_hdf5")]
pub use hdf5_store::Hdf5Store;
pub use record::{Record, RecordMetadata, SampleMatrix};
pub use store::{
    read, record_path, store_for_format, store_for_path, verify_integrity, write, RecordStore,
};

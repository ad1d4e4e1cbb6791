//! Container selection.

use std::path::{Path, PathBuf};

use wave_core::config::StorageSettings;
use wave_core::{WaveError, WaveResult};

use crate::binary::{self, BinaryStore};
use crate::record::{Record, RecordMetadata, SampleMatrix};

/// A checksummed on-disk container format.
pub trait RecordStore: Send + Sync {
    /// File extension without the dot.
    fn extension(&self) -> &'static str;

    /// Persist a record and return its hex SHA-256.
    fn write(&self, path: &Path, data: &SampleMatrix, metadata: &RecordMetadata) -> WaveResult<String>;

    /// Load a record, failing with [`WaveError::Integrity`] unless its digest
    /// matches.
    fn read(&self, path: &Path) -> WaveResult<Record>;

    /// `Ok(false)` when the record is corrupt or truncated; `Err` only when
    /// it cannot be opened at all.
    fn verify_integrity(&self, path: &Path) -> WaveResult<bool>;
}

/// Pick a container by file extension: `.wrec`, or `.h5`/`.hdf5` with the
/// `storage_hdf5` feature.
pub fn store_for_path(path: &Path) -> WaveResult<Box<dyn RecordStore>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        binary::EXTENSION | "h5" | "hdf5" => store_for_format(&ext),
        _ => Err(WaveError::config(format!(
            "no record container for '{}' (expected .{} or .h5)",
            path.display(),
            binary::EXTENSION
        ))),
    }
}

/// Pick a container by format name as used in `storage.default_format`.
pub fn store_for_format(format: &str) -> WaveResult<Box<dyn RecordStore>> {
    match format {
        binary::EXTENSION => Ok(Box::new(BinaryStore)),
        "h5" | "hdf5" => hdf5_store(),
        other => Err(WaveError::config(format!("unknown record format '{}'", other))),
    }
}

#[cfg(feature = "storage_hdf5")]
fn hdf5_store() -> WaveResult<Box<dyn RecordStore>> {
    Ok(Box::new(crate::hdf5_store::Hdf5Store))
}

#[cfg(not(feature = "storage_hdf5"))]
fn hdf5_store() -> WaveResult<Box<dyn RecordStore>> {
    Err(WaveError::config(
        "HDF5 records need wave-storage built with the storage_hdf5 feature",
    ))
}

/// `output_dir/<name>.<ext>` for the configured default format.
pub fn record_path(settings: &StorageSettings, name: &str) -> WaveResult<PathBuf> {
    let store = store_for_format(&settings.default_format)?;
    Ok(settings
        .output_dir
        .join(format!("{}.{}", name, store.extension())))
}

/// Write through the container chosen by `path`'s extension.
pub fn write(path: impl AsRef<Path>, data: &SampleMatrix, metadata: &RecordMetadata) -> WaveResult<String> {
    let path = path.as_ref();
    store_for_path(path)?.write(path, data, metadata)
}

/// Read through the container chosen by `path`'s extension.
pub fn read(path: impl AsRef<Path>) -> WaveResult<Record> {
    let path = path.as_ref();
    store_for_path(path)?.read(path)
}

/// Verify through the container chosen by `path`'s extension.
pub fn verify_integrity(path: impl AsRef<Path>) -> WaveResult<bool> {
    let path = path.as_ref();
    store_for_path(path)?.verify_integrity(path)
}

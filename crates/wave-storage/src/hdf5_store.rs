//! HDF5 container (`storage_hdf5` feature).
//!
//! One dataset `raw` of f32 shaped `[samples × channels]` with file
//! attributes `sample_rate`, `channel_names`, `created_at`, `sha256`, and
//! `metadata_json` holding the exact metadata bytes the digest covers.

use std::path::Path;

use chrono::{DateTime, Utc};
use hdf5::types::VarLenUnicode;
use hdf5::File;
use tracing::{debug, info, warn};
use wave_core::{WaveError, WaveResult};

use crate::digest;
use crate::record::{Record, RecordMetadata, SampleMatrix};
use crate::store::RecordStore;

/// File extension.
pub const EXTENSION: &str = "h5";

const DATASET: &str = "raw";

fn h5(e: hdf5::Error) -> WaveError {
    WaveError::Io(std::io::Error::other(e.to_string()))
}

fn corrupt(message: impl Into<String>) -> WaveError {
    WaveError::Integrity(message.into())
}

fn unicode(s: &str) -> WaveResult<VarLenUnicode> {
    s.parse::<VarLenUnicode>()
        .map_err(|e| WaveError::config(format!("cannot store '{}' in HDF5: {}", s, e)))
}

fn read_text(file: &File, name: &str) -> WaveResult<String> {
    let attr = file
        .attr(name)
        .map_err(|_| corrupt(format!("missing attribute '{}'", name)))?;
    let value = attr
        .read_scalar::<VarLenUnicode>()
        .map_err(|e| corrupt(format!("attribute '{}' unreadable: {}", name, e)))?;
    Ok(value.as_str().to_owned())
}

/// Digest-checked contents of an HDF5 record.
struct Loaded {
    metadata: RecordMetadata,
    n_samples: usize,
    n_channels: usize,
    values: Vec<f32>,
    sha256: String,
}

/// The plain attributes are read by other tools without the digest, so they
/// must agree with the hashed metadata.
fn check_layout_attributes(file: &File, metadata: &RecordMetadata) -> WaveResult<()> {
    let sample_rate = file
        .attr("sample_rate")
        .and_then(|a| a.read_scalar::<f64>())
        .map_err(|e| corrupt(format!("attribute 'sample_rate' unreadable: {}", e)))?;
    if sample_rate.to_bits() != metadata.sample_rate.to_bits() {
        return Err(corrupt(format!(
            "attribute 'sample_rate' is {}, hashed metadata says {}",
            sample_rate, metadata.sample_rate
        )));
    }

    let names = file
        .attr("channel_names")
        .and_then(|a| a.read_raw::<VarLenUnicode>())
        .map_err(|e| corrupt(format!("attribute 'channel_names' unreadable: {}", e)))?;
    if !names
        .iter()
        .map(VarLenUnicode::as_str)
        .eq(metadata.channel_names.iter().map(String::as_str))
    {
        return Err(corrupt("attribute 'channel_names' disagrees with hashed metadata"));
    }

    let created_at = read_text(file, "created_at")?;
    let parsed = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| corrupt(format!("attribute 'created_at' is not RFC 3339: {}", e)))?;
    if parsed.with_timezone(&Utc) != metadata.created_at {
        return Err(corrupt(format!(
            "attribute 'created_at' is {}, hashed metadata says {}",
            created_at,
            metadata.created_at.to_rfc3339()
        )));
    }
    Ok(())
}

fn load(path: &Path) -> WaveResult<Loaded> {
    let file = File::open(path).map_err(h5)?;
    let metadata_json = read_text(&file, "metadata_json")?;
    let sha256 = read_text(&file, "sha256")?;
    let stored = digest::from_hex(&sha256)?;

    let dataset = file
        .dataset(DATASET)
        .map_err(|_| corrupt(format!("missing dataset '{}'", DATASET)))?;
    let shape = dataset.shape();
    let (n_samples, n_channels) = match shape.as_slice() {
        [s, c] => (*s, *c),
        other => return Err(corrupt(format!("dataset '{}' has shape {:?}", DATASET, other))),
    };
    let values = dataset
        .read_raw::<f32>()
        .map_err(|e| corrupt(format!("dataset '{}' unreadable: {}", DATASET, e)))?;
    if values.len() != n_samples * n_channels {
        return Err(corrupt("dataset is truncated"));
    }

    let computed = digest::digest_parts(
        metadata_json.as_bytes(),
        n_samples as u64,
        n_channels as u64,
        &digest::payload_bytes(&values),
    );
    if computed != stored {
        return Err(corrupt(format!(
            "digest mismatch: stored {}, computed {}",
            sha256,
            digest::to_hex(&computed)
        )));
    }

    let metadata: RecordMetadata = serde_json::from_str(&metadata_json)
        .map_err(|e| corrupt(format!("metadata is not valid JSON: {}", e)))?;
    check_layout_attributes(&file, &metadata)?;

    Ok(Loaded {
        metadata,
        n_samples,
        n_channels,
        values,
        sha256,
    })
}

/// HDF5 record container.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hdf5Store;

impl RecordStore for Hdf5Store {
    fn extension(&self) -> &'static str {
        EXTENSION
    }

    fn write(&self, path: &Path, data: &SampleMatrix, metadata: &RecordMetadata) -> WaveResult<String> {
        metadata.validate_for(data)?;
        let metadata_bytes = digest::canonical_metadata(metadata)?;
        let metadata_json = String::from_utf8(metadata_bytes)
            .map_err(|e| WaveError::config(format!("metadata is not UTF-8: {}", e)))?;
        let sha256 = digest::to_hex(&digest::digest(metadata_json.as_bytes(), data));

        let file = File::create(path).map_err(h5)?;
        let dataset = file
            .new_dataset::<f32>()
            .shape([data.n_samples(), data.n_channels()])
            .create(DATASET)
            .map_err(h5)?;
        dataset.write_raw(data.values()).map_err(h5)?;

        file.new_attr::<f64>()
            .create("sample_rate")
            .map_err(h5)?
            .write_scalar(&metadata.sample_rate)
            .map_err(h5)?;
        let names = metadata
            .channel_names
            .iter()
            .map(|n| unicode(n))
            .collect::<WaveResult<Vec<_>>>()?;
        file.new_attr_builder()
            .with_data(names.as_slice())
            .create("channel_names")
            .map_err(h5)?;
        for (name, value) in [
            ("created_at", metadata.created_at.to_rfc3339()),
            ("sha256", sha256.clone()),
            ("metadata_json", metadata_json),
        ] {
            file.new_attr::<VarLenUnicode>()
                .create(name)
                .map_err(h5)?
                .write_scalar(&unicode(&value)?)
                .map_err(h5)?;
        }
        file.flush().map_err(h5)?;

        info!(
            path = %path.display(),
            samples = data.n_samples(),
            channels = data.n_channels(),
            sha256 = %sha256,
            "Wrote HDF5 wave record"
        );
        Ok(sha256)
    }

    fn read(&self, path: &Path) -> WaveResult<Record> {
        let loaded = load(path)?;
        let metadata = loaded.metadata;
        let data = SampleMatrix::new(loaded.n_samples, loaded.n_channels, loaded.values)
            .map_err(|e| corrupt(e.to_string()))?;
        metadata
            .validate_for(&data)
            .map_err(|e| corrupt(e.to_string()))?;
        debug!(path = %path.display(), samples = data.n_samples(), "Read HDF5 wave record");
        Ok(Record {
            data,
            metadata,
            sha256: loaded.sha256,
        })
    }

    fn verify_integrity(&self, path: &Path) -> WaveResult<bool> {
        if !path.exists() {
            return Err(WaveError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )));
        }
        match load(path) {
            Ok(_) => Ok(true),
            Err(WaveError::Integrity(reason)) => {
                warn!(path = %path.display(), %reason, "HDF5 record failed integrity check");
                Ok(false)
            }
            // A file that exists but HDF5 cannot open is corrupt
            Err(WaveError::Io(e)) => {
                warn!(path = %path.display(), error = %e, "HDF5 record unreadable");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> (SampleMatrix, RecordMetadata) {
        let data = SampleMatrix::from_channels(&[vec![0.1, 0.2, 0.3], vec![-1.0, 0.0, 1.0]]).unwrap();
        let meta = RecordMetadata::new(50.0, vec!["WG1".into(), "WG2".into()]);
        (data, meta)
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.h5");
        let (data, meta) = record();
        let sha = Hdf5Store.write(&path, &data, &meta).unwrap();
        let back = Hdf5Store.read(&path).unwrap();
        assert_eq!(back.data, data);
        assert_eq!(back.metadata, meta);
        assert_eq!(back.sha256, sha);
        assert!(Hdf5Store.verify_integrity(&path).unwrap());
    }

    #[test]
    fn test_edited_layout_attributes_fail_verification() {
        let dir = tempfile::tempdir().unwrap();
        let (data, meta) = record();

        let path = dir.path().join("rate.h5");
        Hdf5Store.write(&path, &data, &meta).unwrap();
        {
            let file = File::open_rw(&path).unwrap();
            file.attr("sample_rate").unwrap().write_scalar(&100.0f64).unwrap();
        }
        assert!(!Hdf5Store.verify_integrity(&path).unwrap());
        assert!(matches!(Hdf5Store.read(&path), Err(WaveError::Integrity(_))));

        let path = dir.path().join("names.h5");
        Hdf5Store.write(&path, &data, &meta).unwrap();
        {
            let file = File::open_rw(&path).unwrap();
            let swapped = [unicode("WG2").unwrap(), unicode("WG1").unwrap()];
            file.attr("channel_names").unwrap().write(&swapped[..]).unwrap();
        }
        assert!(!Hdf5Store.verify_integrity(&path).unwrap());

        let path = dir.path().join("created.h5");
        Hdf5Store.write(&path, &data, &meta).unwrap();
        {
            let file = File::open_rw(&path).unwrap();
            file.attr("created_at")
                .unwrap()
                .write_scalar(&unicode("2001-01-01T00:00:00+00:00").unwrap())
                .unwrap();
        }
        assert!(!Hdf5Store.verify_integrity(&path).unwrap());
    }

    #[test]
    fn test_edited_dataset_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.h5");
        let (data, meta) = record();
        Hdf5Store.write(&path, &data, &meta).unwrap();
        {
            let file = File::open_rw(&path).unwrap();
            let ds = file.dataset(DATASET).unwrap();
            let mut values = ds.read_raw::<f32>().unwrap();
            values[2] += 1.0;
            ds.write_raw(&values).unwrap();
        }
        assert!(!Hdf5Store.verify_integrity(&path).unwrap());
        assert!(matches!(Hdf5Store.read(&path), Err(WaveError::Integrity(_))));
    }
}

//! Error types shared across wave-lab.
//!
//! [`WaveError`] is the one taxonomy every crate reports in. Driver crates
//! keep their own richer error enums and convert into it at the
//! [`DeviceBackend`](crate::backend::DeviceBackend) boundary.
//!
//! ## Categories
//!
//! - **Permanent**: `HardwareUnavailable`, `Configuration`, `Integrity`,
//!   `InvalidState`. Retrying cannot help; the operation that raised them
//!   does not proceed.
//! - **Transient**: `DeviceCommunication`, `Timeout`. The acquisition loop
//!   retries these locally with bounded backoff (see [`crate::retry`]) and
//!   only escalates after repeated consecutive failures.
//! - **Counted**: `BufferOverflow` is normally carried as a counter in session
//!   metadata. It only appears as an error when a backend has lost the
//!   relation between sample count and hardware time.
//!
//! Calibration quality warnings are data on the calibration result and never
//! appear here.

use thiserror::Error;

/// Convenience alias for results using [`WaveError`].
pub type WaveResult<T> = std::result::Result<T, WaveError>;

/// Primary error type for wave-lab.
#[derive(Error, Debug)]
pub enum WaveError {
    /// Driver library or board support is not present on this machine.
    #[error("Hardware unavailable: {0}")]
    HardwareUnavailable(String),

    /// A single transaction with the device failed.
    #[error("Device '{device}' communication error: {message}")]
    DeviceCommunication {
        /// Device or backend name
        device: String,
        /// Failure description from the driver
        message: String,
    },

    /// A bounded hardware read produced nothing within its timeout.
    #[error("Device '{device}' read timed out after {timeout_ms} ms")]
    Timeout {
        /// Device or backend name
        device: String,
        /// The timeout that elapsed
        timeout_ms: u64,
    },

    /// Invalid channel, acquisition, analysis or calibration setup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Samples were lost before they could be drained.
    #[error("Buffer overflow: {dropped} samples dropped")]
    BufferOverflow {
        /// Number of samples (per channel) known to be lost
        dropped: u64,
    },

    /// Stored content does not match its recorded digest.
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Operation not allowed in the current lifecycle state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// The rejected operation
        operation: &'static str,
        /// The state the caller was in
        state: String,
    },

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode or decode failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WaveError {
    /// Shorthand for [`WaveError::DeviceCommunication`].
    pub fn communication(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeviceCommunication {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Shorthand for [`WaveError::Configuration`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether the acquisition loop may retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DeviceCommunication { .. } | Self::Timeout { .. })
    }

    /// Whether this error ends the operation (or session) that raised it.
    pub fn is_fatal(&self) -> bool {
        !self.is_transient()
    }

    /// Whether this is a single read timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<figment::Error> for WaveError {
    fn from(err: figment::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(WaveError::communication("demo", "glitch").is_transient());
        assert!(WaveError::Timeout {
            device: "demo".into(),
            timeout_ms: 100
        }
        .is_transient());

        assert!(WaveError::HardwareUnavailable("no lib".into()).is_fatal());
        assert!(WaveError::config("bad").is_fatal());
        assert!(WaveError::Integrity("digest".into()).is_fatal());
        assert!(WaveError::BufferOverflow { dropped: 3 }.is_fatal());
    }

    #[test]
    fn test_display_messages() {
        let err = WaveError::communication("/dev/comedi0", "EIO");
        assert_eq!(
            err.to_string(),
            "Device '/dev/comedi0' communication error: EIO"
        );

        let err = WaveError::InvalidState {
            operation: "start",
            state: "Idle".into(),
        };
        assert_eq!(err.to_string(), "Cannot start while Idle");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short");
        let err: WaveError = io.into();
        assert!(matches!(err, WaveError::Io(_)));
        assert!(err.is_fatal());
    }
}

//! Error types for Comedi operations.
//!
//! [`ComediError`] keeps the driver-level detail (errno, device path,
//! subdevice) and maps onto the shared [`WaveError`] categories at the
//! backend boundary.

use std::ffi::CStr;

use thiserror::Error;
use wave_core::WaveError;

use crate::sys::ComediLib;

/// Result type alias for Comedi operations.
pub type Result<T> = std::result::Result<T, ComediError>;

/// errno values comedilib reports through `comedi_errno()`.
const ENOENT: i32 = 2;
const EACCES: i32 = 13;
const EBUSY: i32 = 16;
const EPIPE: i32 = 32;

/// Errors that can occur when working with Comedi devices.
#[derive(Error, Debug)]
pub enum ComediError {
    /// comedilib could not be loaded
    #[error("comedilib not available: {message}")]
    LibraryMissing {
        /// Loader error
        message: String,
    },

    /// Device could not be opened (file not found, etc.)
    #[error("Failed to open device '{path}': {message}")]
    DeviceNotFound {
        /// Device path
        path: String,
        /// Reason
        message: String,
    },

    /// Permission denied when accessing the device
    #[error("Permission denied for device '{path}'. Check udev rules or run as root.")]
    PermissionDenied {
        /// Device path
        path: String,
    },

    /// Device or subdevice is already in use by another process
    #[error("Device '{path}' is busy (in use by another process)")]
    DeviceBusy {
        /// Device path
        path: String,
    },

    /// The board has no analog input subdevice usable for commands
    #[error("Operation not supported: {message}")]
    NotSupported {
        /// What is missing
        message: String,
    },

    /// Invalid configuration or parameter
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong
        message: String,
    },

    /// Command test did not converge or was rejected
    #[error("Command error (code {code}): {message}")]
    CommandError {
        /// Last command test result
        code: i32,
        /// Description
        message: String,
    },

    /// Driver buffer overran before it was drained
    #[error("Buffer overflow: data acquisition too slow")]
    BufferOverflow,

    /// I/O error reading the device file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Low-level comedilib error
    #[error("Comedi error ({errno}): {message}")]
    LibraryError {
        /// comedilib errno
        errno: i32,
        /// comedilib message
        message: String,
    },
}

impl ComediError {
    /// Build an error from the library's current errno.
    pub(crate) fn from_errno(lib: &ComediLib) -> Self {
        // SAFETY: comedi_errno has no preconditions.
        let errno = unsafe { (lib.comedi_errno)() };
        Self::from_errno_value(lib, errno)
    }

    /// Build an error from a specific errno value.
    pub(crate) fn from_errno_value(lib: &ComediLib, errno: i32) -> Self {
        if errno == EPIPE {
            return Self::BufferOverflow;
        }
        // SAFETY: comedi_strerror returns a static string or null.
        let message = unsafe {
            let ptr = (lib.comedi_strerror)(errno);
            if ptr.is_null() {
                "Unknown error".to_string()
            } else {
                CStr::from_ptr(ptr).to_string_lossy().into_owned()
            }
        };
        Self::LibraryError { errno, message }
    }

    /// Classify a failed `comedi_open`.
    pub(crate) fn from_open_errno(lib: &ComediLib, path: &str) -> Self {
        // SAFETY: comedi_errno has no preconditions.
        let errno = unsafe { (lib.comedi_errno)() };
        match errno {
            ENOENT => Self::DeviceNotFound {
                path: path.to_string(),
                message: "No such file or directory".to_string(),
            },
            EACCES => Self::PermissionDenied {
                path: path.to_string(),
            },
            EBUSY => Self::DeviceBusy {
                path: path.to_string(),
            },
            _ => Self::from_errno_value(lib, errno),
        }
    }

    /// Check if the device is busy.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::DeviceBusy { .. })
    }

    /// Convert into the shared taxonomy, naming the device.
    pub fn into_wave_error(self, device: &str) -> WaveError {
        match self {
            Self::LibraryMissing { .. } => WaveError::HardwareUnavailable(self.to_string()),
            Self::DeviceNotFound { .. } | Self::PermissionDenied { .. } => {
                WaveError::HardwareUnavailable(self.to_string())
            }
            Self::NotSupported { .. } | Self::InvalidConfig { .. } | Self::CommandError { .. } => {
                WaveError::Configuration(self.to_string())
            }
            Self::BufferOverflow => WaveError::BufferOverflow { dropped: 0 },
            Self::Io(e) => WaveError::communication(device, e.to_string()),
            Self::DeviceBusy { .. } | Self::LibraryError { .. } => {
                WaveError::communication(device, self.to_string())
            }
        }
    }
}

impl From<ComediError> for WaveError {
    fn from(err: ComediError) -> Self {
        err.into_wave_error("comedi")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_missing_is_permanent() {
        let err: WaveError = ComediError::LibraryMissing {
            message: "libcomedi.so.0: cannot open shared object file".into(),
        }
        .into();
        assert!(matches!(err, WaveError::HardwareUnavailable(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_library_error_is_transient() {
        let err = ComediError::LibraryError {
            errno: 5,
            message: "Input/output error".into(),
        }
        .into_wave_error("/dev/comedi0");
        assert!(err.is_transient());
        assert!(err.to_string().contains("/dev/comedi0"));
    }

    #[test]
    fn test_overflow_maps_to_buffer_overflow() {
        let err: WaveError = ComediError::BufferOverflow.into();
        assert!(matches!(err, WaveError::BufferOverflow { .. }));
    }

    #[test]
    fn test_command_error_is_configuration() {
        let err: WaveError = ComediError::CommandError {
            code: 3,
            message: "did not converge".into(),
        }
        .into();
        assert!(matches!(err, WaveError::Configuration(_)));
    }
}

//! RAII handle on a Comedi board.
//!
//! [`ComediDevice`] owns a `comedi_t*` and closes it on drop. All calls into
//! the handle go through [`ComediDevice::with_handle`], which serializes
//! them: comedilib handles are not thread-safe.

use std::ffi::{CStr, CString};
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ComediError, Result};
use crate::sys::{comedi_range, comedi_t, lsampl_t, ComediLib, COMEDI_SUBD_AI};

/// Analog input subdevice description.
#[derive(Debug, Clone)]
pub struct AnalogInputInfo {
    /// Subdevice index
    pub subdevice: u32,
    /// Number of channels
    pub n_channels: u32,
    /// Maximum raw code (e.g. 65535 for 16-bit)
    pub maxdata: lsampl_t,
    /// Subdevice flags (SDF_*)
    pub flags: u32,
    /// Ranges of channel 0, by range index
    pub ranges: Vec<comedi_range>,
}

impl AnalogInputInfo {
    /// Whether the subdevice supports asynchronous commands.
    pub fn supports_commands(&self) -> bool {
        self.flags & crate::sys::SDF_CMD != 0
    }

    /// Whether samples are 32-bit.
    pub fn uses_lsampl(&self) -> bool {
        self.flags & crate::sys::SDF_LSAMPL != 0
    }

    /// Resolution in bits (derived from maxdata).
    pub fn resolution_bits(&self) -> u32 {
        if self.maxdata == 0 {
            0
        } else {
            (self.maxdata as f64 + 1.0).log2() as u32
        }
    }
}

struct DeviceInner {
    lib: Arc<ComediLib>,
    handle: NonNull<comedi_t>,
    path: String,
    ffi_lock: Mutex<()>,
}

// SAFETY: every use of the non-thread-safe handle is serialized through
// ffi_lock.
unsafe impl Send for DeviceInner {}
unsafe impl Sync for DeviceInner {}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        debug!(path = %self.path, "Closing Comedi device");
        // SAFETY: handle is valid and owned by us.
        let result = unsafe { (self.lib.comedi_close)(self.handle.as_ptr()) };
        if result < 0 {
            warn!(path = %self.path, "Error closing Comedi device");
        }
    }
}

/// A safe wrapper around a Comedi device handle.
#[derive(Clone)]
pub struct ComediDevice {
    inner: Arc<DeviceInner>,
}

impl ComediDevice {
    /// Open a board by device path, e.g. "/dev/comedi0".
    pub fn open(lib: Arc<ComediLib>, path: &str) -> Result<Self> {
        let c_path = CString::new(path).map_err(|_| ComediError::InvalidConfig {
            message: format!("Invalid device path: {}", path),
        })?;

        // SAFETY: c_path is a valid null-terminated string.
        let handle = unsafe { (lib.comedi_open)(c_path.as_ptr()) };
        let Some(handle) = NonNull::new(handle) else {
            return Err(ComediError::from_open_errno(&lib, path));
        };

        info!(path = %path, "Opened Comedi device");

        Ok(Self {
            inner: Arc::new(DeviceInner {
                lib,
                handle,
                path: path.to_string(),
                ffi_lock: Mutex::new(()),
            }),
        })
    }

    /// Run `f` with exclusive access to the raw handle.
    pub(crate) fn with_handle<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&ComediLib, *mut comedi_t) -> R,
    {
        let _guard = self.inner.ffi_lock.lock();
        f(&self.inner.lib, self.inner.handle.as_ptr())
    }

    /// The loaded library.
    pub(crate) fn lib(&self) -> &ComediLib {
        &self.inner.lib
    }

    /// Path used to open this device.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Board name (e.g. "pci-6221").
    pub fn board_name(&self) -> String {
        self.with_handle(|lib, handle| {
            // SAFETY: handle is valid; the returned string is owned by comedilib.
            unsafe { c_string_or_unknown((lib.comedi_get_board_name)(handle)) }
        })
    }

    /// Driver name (e.g. "ni_pcimio").
    pub fn driver_name(&self) -> String {
        self.with_handle(|lib, handle| {
            // SAFETY: as for board_name.
            unsafe { c_string_or_unknown((lib.comedi_get_driver_name)(handle)) }
        })
    }

    /// Locate and describe the first analog input subdevice.
    pub fn analog_input(&self) -> Result<AnalogInputInfo> {
        self.with_handle(|lib, handle| {
            // SAFETY: handle is valid for the duration of the closure.
            unsafe {
                let subdevice = (lib.comedi_find_subdevice_by_type)(handle, COMEDI_SUBD_AI, 0);
                if subdevice < 0 {
                    return Err(ComediError::NotSupported {
                        message: format!("{} has no analog input subdevice", self.path()),
                    });
                }
                let subdevice = subdevice as u32;

                let n_channels = (lib.comedi_get_n_channels)(handle, subdevice);
                let flags = (lib.comedi_get_subdevice_flags)(handle, subdevice);
                if n_channels < 0 || flags < 0 {
                    return Err(ComediError::from_errno(lib));
                }
                let maxdata = (lib.comedi_get_maxdata)(handle, subdevice, 0);

                let n_ranges = (lib.comedi_get_n_ranges)(handle, subdevice, 0).max(0) as u32;
                let ranges = (0..n_ranges)
                    .filter_map(|r| {
                        let ptr = (lib.comedi_get_range)(handle, subdevice, 0, r);
                        ptr.as_ref().copied()
                    })
                    .collect();

                Ok(AnalogInputInfo {
                    subdevice,
                    n_channels: n_channels as u32,
                    maxdata,
                    flags: flags as u32,
                    ranges,
                })
            }
        })
    }

    /// Claim a subdevice for this process.
    pub fn lock(&self, subdevice: u32) -> Result<()> {
        self.with_handle(|lib, handle| {
            // SAFETY: handle is valid.
            let result = unsafe { (lib.comedi_lock)(handle, subdevice) };
            if result < 0 {
                return Err(ComediError::DeviceBusy {
                    path: self.path().to_string(),
                });
            }
            Ok(())
        })
    }

    /// Release a subdevice claimed with [`lock`](Self::lock).
    pub fn unlock(&self, subdevice: u32) {
        self.with_handle(|lib, handle| {
            // SAFETY: handle is valid.
            if unsafe { (lib.comedi_unlock)(handle, subdevice) } < 0 {
                warn!(path = %self.path(), subdevice, "Failed to unlock subdevice");
            }
        });
    }

    /// One software-timed conversion, returned as a raw code.
    pub fn read_raw(&self, subdevice: u32, channel: u32, range: u32, aref: u32) -> Result<lsampl_t> {
        self.with_handle(|lib, handle| {
            let mut data: lsampl_t = 0;
            // SAFETY: handle is valid and data outlives the call.
            let result =
                unsafe { (lib.comedi_data_read)(handle, subdevice, channel, range, aref, &mut data) };
            if result < 0 {
                return Err(ComediError::from_errno(lib));
            }
            Ok(data)
        })
    }

    /// Raw code to physical units through the board's range transfer function.
    pub fn to_physical(&self, raw: lsampl_t, range: &comedi_range, maxdata: lsampl_t) -> f64 {
        // SAFETY: comedi_to_phys only reads the range struct.
        unsafe { (self.lib().comedi_to_phys)(raw, range, maxdata) }
    }

    /// File descriptor for buffered reads.
    pub(crate) fn fileno(&self) -> i32 {
        // SAFETY: handle is valid.
        self.with_handle(|lib, handle| unsafe { (lib.comedi_fileno)(handle) })
    }
}

impl std::fmt::Debug for ComediDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComediDevice")
            .field("path", &self.inner.path)
            .finish()
    }
}

/// # Safety
/// `ptr` must be null or point to a null-terminated string.
unsafe fn c_string_or_unknown(ptr: *const std::ffi::c_char) -> String {
    if ptr.is_null() {
        "unknown".to_string()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

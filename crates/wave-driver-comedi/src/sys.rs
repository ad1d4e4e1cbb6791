//! Raw comedilib types and a runtime-loaded function table.
//!
//! comedilib is resolved with `libloading` the first time it is needed
//! instead of being linked at build time, so wave-lab builds and runs on
//! machines without it and [`ComediLib::shared`] simply reports the library
//! as missing.
//!
//! Search order: `$WAVELAB_COMEDI_LIB`, `libcomedi.so.0`, `libcomedi.so`.

#![allow(non_camel_case_types)]
#![allow(missing_docs)]

use std::ffi::{c_char, c_double, c_int, c_uint, c_void};
use std::sync::{Arc, OnceLock};

use libloading::Library;
use tracing::{debug, info};

use crate::error::ComediError;

/// Opaque comedilib device handle.
pub type comedi_t = c_void;
/// 32-bit sample.
pub type lsampl_t = c_uint;
/// 16-bit sample.
pub type sampl_t = u16;

/// Voltage range descriptor.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct comedi_range {
    /// Lower limit in physical units
    pub min: c_double,
    /// Upper limit in physical units
    pub max: c_double,
    /// Unit code (UNIT_volt, UNIT_mA, ...)
    pub unit: c_uint,
}

/// Asynchronous command.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct comedi_cmd {
    pub subdev: c_uint,
    pub flags: c_uint,
    pub start_src: c_uint,
    pub start_arg: c_uint,
    pub scan_begin_src: c_uint,
    pub scan_begin_arg: c_uint,
    pub convert_src: c_uint,
    pub convert_arg: c_uint,
    pub scan_end_src: c_uint,
    pub scan_end_arg: c_uint,
    pub stop_src: c_uint,
    pub stop_arg: c_uint,
    pub chanlist: *mut c_uint,
    pub chanlist_len: c_uint,
    pub data: *mut sampl_t,
    pub data_len: c_uint,
}

impl Default for comedi_cmd {
    fn default() -> Self {
        Self {
            subdev: 0,
            flags: 0,
            start_src: 0,
            start_arg: 0,
            scan_begin_src: 0,
            scan_begin_arg: 0,
            convert_src: 0,
            convert_arg: 0,
            scan_end_src: 0,
            scan_end_arg: 0,
            stop_src: 0,
            stop_arg: 0,
            chanlist: std::ptr::null_mut(),
            chanlist_len: 0,
            data: std::ptr::null_mut(),
            data_len: 0,
        }
    }
}

/// Analog input subdevice type.
pub const COMEDI_SUBD_AI: c_int = 1;

/// Analog references
pub const AREF_GROUND: c_uint = 0;
pub const AREF_COMMON: c_uint = 1;
pub const AREF_DIFF: c_uint = 2;

/// Trigger sources
pub const TRIG_NONE: c_uint = 0x0000_0001;
pub const TRIG_NOW: c_uint = 0x0000_0002;
pub const TRIG_TIMER: c_uint = 0x0000_0010;
pub const TRIG_COUNT: c_uint = 0x0000_0020;

/// Subdevice flags
pub const SDF_BUSY: c_uint = 0x0001;
pub const SDF_CMD: c_uint = 0x1000;
pub const SDF_LSAMPL: c_uint = 0x1000_0000;

/// Unit code for volts.
pub const UNIT_VOLT: c_uint = 0;

/// Pack channel, range, and analog reference into a chanlist entry.
#[inline]
pub fn cr_pack(chan: c_uint, rng: c_uint, aref: c_uint) -> c_uint {
    ((aref & 0x03) << 24) | ((rng & 0xff) << 16) | (chan & 0xffff)
}

/// Extract channel from a chanlist entry.
#[inline]
pub fn cr_chan(packed: c_uint) -> c_uint {
    packed & 0xffff
}

/// Extract range from a chanlist entry.
#[inline]
pub fn cr_range(packed: c_uint) -> c_uint {
    (packed >> 16) & 0xff
}

/// Extract analog reference from a chanlist entry.
#[inline]
pub fn cr_aref(packed: c_uint) -> c_uint {
    (packed >> 24) & 0x03
}

type FnOpen = unsafe extern "C" fn(*const c_char) -> *mut comedi_t;
type FnClose = unsafe extern "C" fn(*mut comedi_t) -> c_int;
type FnErrno = unsafe extern "C" fn() -> c_int;
type FnStrerror = unsafe extern "C" fn(c_int) -> *const c_char;
type FnName = unsafe extern "C" fn(*mut comedi_t) -> *const c_char;
type FnFindSubdevice = unsafe extern "C" fn(*mut comedi_t, c_int, c_uint) -> c_int;
type FnSubdevInt = unsafe extern "C" fn(*mut comedi_t, c_uint) -> c_int;
type FnChanInt = unsafe extern "C" fn(*mut comedi_t, c_uint, c_uint) -> c_int;
type FnGetRange =
    unsafe extern "C" fn(*mut comedi_t, c_uint, c_uint, c_uint) -> *mut comedi_range;
type FnGetMaxdata = unsafe extern "C" fn(*mut comedi_t, c_uint, c_uint) -> lsampl_t;
type FnDataRead =
    unsafe extern "C" fn(*mut comedi_t, c_uint, c_uint, c_uint, c_uint, *mut lsampl_t) -> c_int;
type FnToPhys = unsafe extern "C" fn(lsampl_t, *const comedi_range, lsampl_t) -> c_double;
type FnCommand = unsafe extern "C" fn(*mut comedi_t, *mut comedi_cmd) -> c_int;
type FnMarkRead = unsafe extern "C" fn(*mut comedi_t, c_uint, c_uint) -> c_int;
type FnFileno = unsafe extern "C" fn(*mut comedi_t) -> c_int;

/// comedilib entry points used by wave-lab.
pub struct ComediLib {
    pub comedi_open: FnOpen,
    pub comedi_close: FnClose,
    pub comedi_errno: FnErrno,
    pub comedi_strerror: FnStrerror,
    pub comedi_get_board_name: FnName,
    pub comedi_get_driver_name: FnName,
    pub comedi_find_subdevice_by_type: FnFindSubdevice,
    pub comedi_get_subdevice_flags: FnSubdevInt,
    pub comedi_get_n_channels: FnSubdevInt,
    pub comedi_get_n_ranges: FnChanInt,
    pub comedi_get_range: FnGetRange,
    pub comedi_get_maxdata: FnGetMaxdata,
    pub comedi_lock: FnSubdevInt,
    pub comedi_unlock: FnSubdevInt,
    pub comedi_data_read: FnDataRead,
    pub comedi_to_phys: FnToPhys,
    pub comedi_command: FnCommand,
    pub comedi_command_test: FnCommand,
    pub comedi_cancel: FnSubdevInt,
    pub comedi_get_buffer_contents: FnSubdevInt,
    pub comedi_mark_buffer_read: FnMarkRead,
    pub comedi_fileno: FnFileno,
    // Keeps every pointer above valid.
    _lib: Library,
}

/// Environment variable overriding the library path.
pub const LIB_ENV: &str = "WAVELAB_COMEDI_LIB";

const LIB_NAMES: [&str; 2] = ["libcomedi.so.0", "libcomedi.so"];

static SHARED: OnceLock<Result<Arc<ComediLib>, String>> = OnceLock::new();

macro_rules! symbol {
    ($lib:expr, $name:literal, $ty:ty) => {
        // SAFETY: the type alias matches the comedilib prototype; the pointer
        // is only used while `_lib` is alive.
        *unsafe { $lib.get::<$ty>(concat!($name, "\0").as_bytes()) }.map_err(|e| {
            ComediError::LibraryMissing {
                message: format!("symbol {}: {}", $name, e),
            }
        })?
    };
}

impl ComediLib {
    /// Process-wide library handle, loaded on first use.
    pub fn shared() -> Result<Arc<ComediLib>, ComediError> {
        SHARED
            .get_or_init(|| Self::load().map(Arc::new).map_err(|e| e.to_string()))
            .clone()
            .map_err(|message| ComediError::LibraryMissing { message })
    }

    /// Whether comedilib can be loaded on this machine.
    pub fn is_available() -> bool {
        Self::shared().is_ok()
    }

    fn open_library() -> Result<Library, ComediError> {
        let mut candidates: Vec<String> = Vec::new();
        if let Ok(path) = std::env::var(LIB_ENV) {
            candidates.push(path);
        }
        candidates.extend(LIB_NAMES.iter().map(|s| s.to_string()));

        let mut last_error = String::from("no candidates");
        for name in &candidates {
            // SAFETY: loading comedilib runs no initialisers beyond libc's.
            match unsafe { Library::new(name) } {
                Ok(lib) => {
                    info!(library = %name, "Loaded comedilib");
                    return Ok(lib);
                }
                Err(e) => {
                    debug!(library = %name, error = %e, "comedilib candidate not loadable");
                    last_error = e.to_string();
                }
            }
        }
        Err(ComediError::LibraryMissing {
            message: last_error,
        })
    }

    fn load() -> Result<Self, ComediError> {
        let lib = Self::open_library()?;
        Ok(Self {
            comedi_open: symbol!(lib, "comedi_open", FnOpen),
            comedi_close: symbol!(lib, "comedi_close", FnClose),
            comedi_errno: symbol!(lib, "comedi_errno", FnErrno),
            comedi_strerror: symbol!(lib, "comedi_strerror", FnStrerror),
            comedi_get_board_name: symbol!(lib, "comedi_get_board_name", FnName),
            comedi_get_driver_name: symbol!(lib, "comedi_get_driver_name", FnName),
            comedi_find_subdevice_by_type: symbol!(lib, "comedi_find_subdevice_by_type", FnFindSubdevice),
            comedi_get_subdevice_flags: symbol!(lib, "comedi_get_subdevice_flags", FnSubdevInt),
            comedi_get_n_channels: symbol!(lib, "comedi_get_n_channels", FnSubdevInt),
            comedi_get_n_ranges: symbol!(lib, "comedi_get_n_ranges", FnChanInt),
            comedi_get_range: symbol!(lib, "comedi_get_range", FnGetRange),
            comedi_get_maxdata: symbol!(lib, "comedi_get_maxdata", FnGetMaxdata),
            comedi_lock: symbol!(lib, "comedi_lock", FnSubdevInt),
            comedi_unlock: symbol!(lib, "comedi_unlock", FnSubdevInt),
            comedi_data_read: symbol!(lib, "comedi_data_read", FnDataRead),
            comedi_to_phys: symbol!(lib, "comedi_to_phys", FnToPhys),
            comedi_command: symbol!(lib, "comedi_command", FnCommand),
            comedi_command_test: symbol!(lib, "comedi_command_test", FnCommand),
            comedi_cancel: symbol!(lib, "comedi_cancel", FnSubdevInt),
            comedi_get_buffer_contents: symbol!(lib, "comedi_get_buffer_contents", FnSubdevInt),
            comedi_mark_buffer_read: symbol!(lib, "comedi_mark_buffer_read", FnMarkRead),
            comedi_fileno: symbol!(lib, "comedi_fileno", FnFileno),
            _lib: lib,
        })
    }
}

impl std::fmt::Debug for ComediLib {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComediLib").finish_non_exhaustive()
    }
}

//! C Bindings for GazeMemory
//!
//! Mirrors the classic eye-tracker SDK surface: status codes for
//! initialization, booleans for reads, and a thread-local error string.
//! Configuration comes from the `GAZE_MEMORY_*` environment variables.

use crate::config::TransportConfig;
use crate::error::InitializationStatus;
use crate::error_context;
use crate::handshake;
use crate::reader::GazeReader;
use crate::sample::GazeSample;
use crate::version::{ServiceVersion, HIGHEST_SUPPORTED_SERVICE_VERSION, LOWEST_SUPPORTED_SERVICE_VERSION};
use std::os::raw::c_char;
use std::ptr;
use std::time::Duration;

// Opaque handle
pub struct GazeReaderHandle(GazeReader);

#[no_mangle]
pub static GAZE_LOWEST_SUPPORTED_SERVICE_VERSION: ServiceVersion = LOWEST_SUPPORTED_SERVICE_VERSION;

#[no_mangle]
pub static GAZE_HIGHEST_SUPPORTED_SERVICE_VERSION: ServiceVersion = HIGHEST_SUPPORTED_SERVICE_VERSION;

/// Check whether the tracking service is running.
///
/// Does not check version compatibility.
#[no_mangle]
pub extern "C" fn gaze_is_service_available() -> bool {
    match TransportConfig::from_env() {
        Ok(config) => handshake::is_service_available(&config),
        Err(_) => false,
    }
}

/// Create a reader, waiting at most `timeout_ms` for the service
///
/// `*handle_out` is only written when `Success` is returned. A `timeout_ms`
/// of 0 leaves no time for the service to reply and yields `Timeout`.
///
/// # Safety
/// `handle_out` must be null or valid for writes
#[no_mangle]
pub unsafe extern "C" fn gaze_create_reader(
    handle_out: *mut *mut GazeReaderHandle,
    timeout_ms: u32,
) -> InitializationStatus {
    if handle_out.is_null() {
        error_context::record_message("gaze_create_reader: handle_out is null");
        return InitializationStatus::Failure;
    }

    let config = match TransportConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error_context::record_error(&e);
            return e.status();
        }
    };

    match GazeReader::connect(&config, Duration::from_millis(u64::from(timeout_ms))) {
        Ok(reader) => {
            *handle_out = Box::into_raw(Box::new(GazeReaderHandle(reader)));
            InitializationStatus::Success
        }
        Err(e) => e.status(),
    }
}

/// Destroy a reader and zero the caller's pointer
///
/// # Safety
/// `handle` must be null, or point to null or to a pointer returned by
/// `gaze_create_reader` that has not been destroyed through another copy
#[no_mangle]
pub unsafe extern "C" fn gaze_destroy_reader(handle: *mut *mut GazeReaderHandle) {
    if handle.is_null() {
        return;
    }
    let reader = std::mem::replace(&mut *handle, ptr::null_mut());
    if !reader.is_null() {
        drop(Box::from_raw(reader));
    }
}

/// Check for unread gaze data
///
/// # Safety
/// `handle` must be null or a live reader handle
#[no_mangle]
pub unsafe extern "C" fn gaze_is_data_available(handle: *const GazeReaderHandle) -> bool {
    match handle.as_ref() {
        Some(handle) => handle.0.is_data_available(),
        None => false,
    }
}

/// Read the sample after the last one read
///
/// # Safety
/// `handle` must be null or a live reader handle not used concurrently;
/// `out` must be null or valid for writes
#[no_mangle]
pub unsafe extern "C" fn gaze_try_read_next(
    handle: *mut GazeReaderHandle,
    out: *mut GazeSample,
) -> bool {
    read_into(handle, out, |reader| reader.try_read_next())
}

/// Jump to the newest sample and read it
///
/// # Safety
/// Same as [`gaze_try_read_next`]
#[no_mangle]
pub unsafe extern "C" fn gaze_try_read_latest(
    handle: *mut GazeReaderHandle,
    out: *mut GazeSample,
) -> bool {
    read_into(handle, out, |reader| reader.try_read_latest())
}

/// Repeat the last successfully read sample without advancing
///
/// # Safety
/// Same as [`gaze_try_read_next`]
#[no_mangle]
pub unsafe extern "C" fn gaze_try_read_last(
    handle: *mut GazeReaderHandle,
    out: *mut GazeSample,
) -> bool {
    read_into(handle, out, |reader| reader.try_read_last())
}

/// Thread-local, NUL-terminated description of the last failure (at most
/// 1024 bytes). Valid until the next failure on the same thread; do not free.
#[no_mangle]
pub extern "C" fn gaze_get_last_error_description() -> *const c_char {
    error_context::last_error_ptr()
}

unsafe fn read_into(
    handle: *mut GazeReaderHandle,
    out: *mut GazeSample,
    read: impl FnOnce(&mut GazeReader) -> Option<GazeSample>,
) -> bool {
    let (Some(handle), false) = (handle.as_mut(), out.is_null()) else {
        return false;
    };
    match read(&mut handle.0) {
        Some(sample) => {
            out.write(sample);
            true
        }
        None => false,
    }
}

//! Thread-local description of the last failure.
//!
//! Rust callers get the error value directly; this slot exists for the C
//! surface, where a status code is all a call can return. The buffer is
//! allocated once per thread and overwritten in place, so a pointer handed
//! out by [`last_error_ptr`] stays valid until the next failure recorded on
//! the same thread.

use std::cell::RefCell;
use std::error::Error;
use std::fmt::Write as _;
use std::os::raw::c_char;

/// Capacity of the description buffer, terminating NUL included
pub const MAX_ERROR_DESCRIPTION_LEN: usize = 1024;

thread_local! {
    static LAST_ERROR: RefCell<Box<[u8; MAX_ERROR_DESCRIPTION_LEN]>> =
        RefCell::new(Box::new([0u8; MAX_ERROR_DESCRIPTION_LEN]));
}

/// Store `error` and its source chain as the thread's last failure
pub fn record_error(error: &(dyn Error + 'static)) {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = write!(message, ": {cause}");
        source = cause.source();
    }
    record_message(&message);
}

/// Store a plain message as the thread's last failure
pub fn record_message(message: &str) {
    let limit = MAX_ERROR_DESCRIPTION_LEN - 1;
    let mut end = message.len().min(limit);
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    let bytes = &message.as_bytes()[..end];

    LAST_ERROR.with(|slot| {
        let mut buf = slot.borrow_mut();
        for (dst, &src) in buf.iter_mut().zip(bytes) {
            *dst = if src == 0 { b'?' } else { src };
        }
        buf[end] = 0;
    });
}

/// Last recorded failure on this thread, empty if none
pub fn last_error_description() -> String {
    LAST_ERROR.with(|slot| {
        let buf = slot.borrow();
        let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        String::from_utf8_lossy(&buf[..len]).into_owned()
    })
}

/// NUL-terminated view of the thread's buffer, for the C surface
pub(crate) fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|slot| slot.borrow().as_ptr().cast::<c_char>())
}

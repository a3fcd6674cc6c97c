// Helpers shared by everything that talks to the engine ABI

use crate::error::{Error, Result};
use medialink_engine::abi::mle_string_free;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::{self, AssertUnwindSafe};

/// Run `f` inside a callback invoked by the engine; a panic becomes `fallback`
pub(crate) fn guard<R>(fallback: R, f: impl FnOnce() -> R) -> R {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            log::error!("Panic in engine callback suppressed");
            fallback
        }
    }
}

/// Convert a caller string for the engine, rejecting empty and NUL-carrying input
pub(crate) fn to_cstring(text: &str, what: &str) -> Result<CString> {
    if text.is_empty() {
        return Err(Error::Argument(format!("{} must not be empty", what)));
    }
    CString::new(text).map_err(|_| Error::Argument(format!("{} contains a NUL byte", what)))
}

/// Copy an engine-owned string and free it
///
/// # Safety
/// `raw` must be null or a string returned by the engine that is not used again.
pub(crate) unsafe fn take_string(raw: *mut c_char) -> Option<String> {
    if raw.is_null() {
        return None;
    }
    let text = CStr::from_ptr(raw).to_string_lossy().into_owned();
    mle_string_free(raw);
    Some(text)
}

/// Borrow a string passed into a callback
///
/// # Safety
/// `raw` must be null or a valid C string for the duration of the call.
pub(crate) unsafe fn borrow_string(raw: *const c_char) -> String {
    if raw.is_null() {
        return String::new();
    }
    CStr::from_ptr(raw).to_string_lossy().into_owned()
}

//! FFI bindings for Deviation Flux
//!
//! This module provides C-compatible functions for calling the tracker and the
//! fusion engine from other languages. All functions exchange JSON as C strings
//! (null-terminated) and return allocated memory that must be freed by the
//! caller using `devflux_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use serde::Serialize;

use crate::baseline::LocalBaselineTracker;
use crate::error::DeviationError;
use crate::fusion::fuse;
use crate::types::{DailyObservation, DailyResult, FusionInput, UserTrackerState};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Convert a result into a C string, recording the error on failure
fn finish(result: Result<String, DeviationError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

#[derive(Serialize)]
struct LocalUpdateResponse {
    state: UserTrackerState,
    result: DailyResult,
}

fn local_update_json(state_json: &str, observation_json: &str) -> Result<String, DeviationError> {
    let state: UserTrackerState = serde_json::from_str(state_json)?;
    let observation: DailyObservation = serde_json::from_str(observation_json)?;
    let (state, result) = LocalBaselineTracker::default().update(&state, observation)?;
    Ok(serde_json::to_string(&LocalUpdateResponse { state, result })?)
}

fn fuse_json(input_json: &str) -> Result<String, DeviationError> {
    let input: FusionInput = serde_json::from_str(input_json)?;
    Ok(serde_json::to_string(&fuse(&input))?)
}

/// Advance a tracker state by one observation.
///
/// Returns `{"state": ..., "result": ...}`. Pass the returned state back on the
/// next day; persisting it is the caller's responsibility.
///
/// Always runs with the default `TrackerParams` (7-day warm-up). Config-file
/// overrides only apply to the CLI and the Rust API.
///
/// # Safety
/// - `state_json` and `observation_json` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `devflux_free_string`.
/// - Returns NULL on error; call `devflux_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn devflux_local_update(
    state_json: *const c_char,
    observation_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let state_str = match cstr_to_string(state_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid state string pointer");
            return ptr::null_mut();
        }
    };

    let observation_str = match cstr_to_string(observation_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid observation string pointer");
            return ptr::null_mut();
        }
    };

    finish(local_update_json(&state_str, &observation_str))
}

/// Create an empty tracker state JSON for a new user.
///
/// # Safety
/// - `user_id` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `devflux_free_string`.
#[no_mangle]
pub unsafe extern "C" fn devflux_new_state(user_id: *const c_char) -> *mut c_char {
    clear_last_error();

    let user = match cstr_to_string(user_id) {
        Some(s) => s,
        None => {
            set_last_error("Invalid user_id string pointer");
            return ptr::null_mut();
        }
    };

    finish(serde_json::to_string(&UserTrackerState::new(user)).map_err(DeviationError::from))
}

/// Fuse global and local deviations.
///
/// # Safety
/// - `input_json` must be a valid null-terminated C string holding a fusion input.
/// - Returns a newly allocated string that must be freed with `devflux_free_string`.
/// - Returns NULL on error; call `devflux_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn devflux_fuse(input_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let input_str = match cstr_to_string(input_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid input string pointer");
            return ptr::null_mut();
        }
    };

    finish(fuse_json(&input_str))
}

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local string that is valid until the next
///   FFI call on the same thread. Do NOT free this pointer.
/// - Returns NULL if there was no error.
#[no_mangle]
pub unsafe extern "C" fn devflux_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Free a string returned by Deviation Flux.
///
/// # Safety
/// - `s` must be a pointer returned by a Deviation Flux function, or NULL.
/// - Must not be called twice on the same pointer.
#[no_mangle]
pub unsafe extern "C" fn devflux_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

/// Get the Deviation Flux version string.
///
/// # Safety
/// - Returns a static string that must NOT be freed.
#[no_mangle]
pub unsafe extern "C" fn devflux_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::MIN_BASELINE_DAYS;

    unsafe fn take(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        devflux_free_string(ptr);
        s
    }

    #[test]
    fn test_ffi_local_update_cycle() {
        unsafe {
            let user = CString::new("ffi-user").unwrap();
            let mut state = take(devflux_new_state(user.as_ptr()));

            let observation = CString::new(
                r#"{"sleep_midpoint_min":700,"sleep_duration_min":420,"mean_med_time_min":480,"activity_load":300}"#,
            )
            .unwrap();

            for day in 1..=8 {
                let state_c = CString::new(state.clone()).unwrap();
                let response = take(devflux_local_update(state_c.as_ptr(), observation.as_ptr()));
                let value: serde_json::Value = serde_json::from_str(&response).unwrap();
                assert_eq!(value["result"]["day"], day);
                assert_eq!(value["result"]["ready"], day > MIN_BASELINE_DAYS);
                state = value["state"].to_string();
            }

            let value: serde_json::Value = serde_json::from_str(&state).unwrap();
            assert_eq!(value["baseline"]["sleep_midpoint_min"], 700.0);
        }
    }

    #[test]
    fn test_ffi_fuse() {
        unsafe {
            let input = CString::new(
                r#"{"global_deviation":1,"local_cumulative_deviation":9.0,"local_signal_ready":false,"days_since_account_creation":20}"#,
            )
            .unwrap();
            let output = take(devflux_fuse(input.as_ptr()));
            let value: serde_json::Value = serde_json::from_str(&output).unwrap();
            assert_eq!(value["final_deviation_score"], 0.9);
            assert_eq!(value["final_deviation"], 0);
        }
    }

    #[test]
    fn test_ffi_error_reporting() {
        unsafe {
            let bad = CString::new("not json").unwrap();
            assert!(devflux_fuse(bad.as_ptr()).is_null());
            assert!(!devflux_last_error().is_null());

            assert!(devflux_fuse(ptr::null()).is_null());
            let msg = CStr::from_ptr(devflux_last_error()).to_str().unwrap();
            assert_eq!(msg, "Invalid input string pointer");
        }
    }
}

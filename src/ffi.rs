//! FFI bindings for the adherence engine
//!
//! This module provides C-compatible functions so the presentation layer can
//! call the engine from other languages. All functions use C strings
//! (null-terminated) and return allocated memory that must be freed by the
//! caller using `adherence_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::TrendConfig;
use crate::pipeline::evaluate_request_json;
use crate::trend::TrendAnalyzer;
use crate::types::ComplianceScore;

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

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Evaluate an evaluation request JSON and return the report JSON.
///
/// # Safety
/// - `request_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `adherence_free_string`.
/// - Returns NULL on error; call `adherence_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn adherence_evaluate_json(request_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let json_str = match cstr_to_string(request_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid request string pointer");
            return ptr::null_mut();
        }
    };

    match evaluate_request_json(json_str) {
        Ok(report) => string_to_cstr(&report),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Incremental trend API
// ============================================================================

/// Opaque handle to an incremental trend analyzer
pub struct TrendAnalyzerHandle {
    analyzer: TrendAnalyzer,
}

/// Create a trend analyzer with default settings.
///
/// # Safety
/// - Returns a pointer that must be freed with `adherence_trend_free`.
#[no_mangle]
pub unsafe extern "C" fn adherence_trend_new() -> *mut TrendAnalyzerHandle {
    clear_last_error();
    let handle = Box::new(TrendAnalyzerHandle {
        analyzer: TrendAnalyzer::new(TrendConfig::default()),
    });
    Box::into_raw(handle)
}

/// Free a trend analyzer.
///
/// # Safety
/// - `analyzer` must be a pointer returned by `adherence_trend_new`, or NULL.
#[no_mangle]
pub unsafe extern "C" fn adherence_trend_free(analyzer: *mut TrendAnalyzerHandle) {
    if !analyzer.is_null() {
        drop(Box::from_raw(analyzer));
    }
}

/// Push one compliance score JSON and get the newest trend point JSON.
///
/// Returns the string `null` while there is not enough history.
///
/// # Safety
/// - `analyzer` must be a valid pointer returned by `adherence_trend_new`.
/// - `score_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `adherence_free_string`.
/// - Returns NULL on error; call `adherence_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn adherence_trend_push(
    analyzer: *mut TrendAnalyzerHandle,
    score_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if analyzer.is_null() {
        set_last_error("Null analyzer pointer");
        return ptr::null_mut();
    }
    let handle = &mut *analyzer;

    let json_str = match cstr_to_string(score_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid score string pointer");
            return ptr::null_mut();
        }
    };

    let score: ComplianceScore = match serde_json::from_str(&json_str) {
        Ok(score) => score,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    let point = match handle.analyzer.push(&score) {
        Ok(point) => point,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    match serde_json::to_string(&point) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Save analyzer state to JSON.
///
/// # Safety
/// - `analyzer` must be a valid pointer returned by `adherence_trend_new`.
/// - Returns a newly allocated string that must be freed with `adherence_free_string`.
#[no_mangle]
pub unsafe extern "C" fn adherence_trend_save(analyzer: *const TrendAnalyzerHandle) -> *mut c_char {
    clear_last_error();

    if analyzer.is_null() {
        set_last_error("Null analyzer pointer");
        return ptr::null_mut();
    }
    let handle = &*analyzer;

    match handle.analyzer.to_json() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Replace analyzer state with state previously saved by `adherence_trend_save`.
///
/// # Safety
/// - `analyzer` must be a valid pointer returned by `adherence_trend_new`.
/// - `state_json` must be a valid null-terminated C string.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn adherence_trend_load(
    analyzer: *mut TrendAnalyzerHandle,
    state_json: *const c_char,
) -> i32 {
    clear_last_error();

    if analyzer.is_null() {
        set_last_error("Null analyzer pointer");
        return -1;
    }
    let handle = &mut *analyzer;

    let json_str = match cstr_to_string(state_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid state string pointer");
            return -1;
        }
    };

    match TrendAnalyzer::from_json(&json_str) {
        Ok(restored) => {
            handle.analyzer = restored;
            0
        }
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by an adherence function.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by an adherence function, or NULL.
#[no_mangle]
pub unsafe extern "C" fn adherence_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - The returned pointer is valid until the next adherence call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn adherence_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn adherence_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score_json(day: u32, ratio: f64) -> CString {
        CString::new(format!(
            r#"{{"patient_id":"p1","device_id":"brace-1","period_start":"2024-02-{:02}","period_end":"2024-03-{:02}","achieved_minutes":0,"target_minutes":840,"ratio":{},"covered_days":7}}"#,
            day, day, ratio
        ))
        .unwrap()
    }

    #[test]
    fn test_ffi_evaluate_json() {
        let request = CString::new(
            r#"{
                "patient_id": "p1",
                "device_id": "brace-1",
                "timezone": "UTC",
                "events": [],
                "targets": [{"patient_id":"p1","device_id":"brace-1","daily_target_minutes":600,"effective_from":"2024-03-01"}],
                "period": {"start": "2024-03-01", "end": "2024-03-07"},
                "evaluated_at": "2024-03-08T06:00:00Z"
            }"#,
        )
        .unwrap();

        unsafe {
            let result = adherence_evaluate_json(request.as_ptr());
            assert!(!result.is_null());

            let result_str = CStr::from_ptr(result).to_str().unwrap();
            assert!(result_str.contains("\"severity\":\"critical\""));

            adherence_free_string(result);
        }
    }

    #[test]
    fn test_ffi_trend_lifecycle() {
        unsafe {
            let analyzer = adherence_trend_new();
            assert!(!analyzer.is_null());

            for (day, ratio) in [(1, 0.9), (2, 0.8), (3, 0.7)] {
                let json = score_json(day, ratio);
                let out = adherence_trend_push(analyzer, json.as_ptr());
                assert!(!out.is_null());
                assert_eq!(CStr::from_ptr(out).to_str().unwrap(), "null");
                adherence_free_string(out);
            }

            let state = adherence_trend_save(analyzer);
            assert!(!state.is_null());

            let restored = adherence_trend_new();
            assert_eq!(adherence_trend_load(restored, state), 0);
            adherence_free_string(state);

            let json = score_json(4, 0.6);
            let out = adherence_trend_push(restored, json.as_ptr());
            assert!(!out.is_null());
            let point: serde_json::Value =
                serde_json::from_str(CStr::from_ptr(out).to_str().unwrap()).unwrap();
            assert_eq!(point["period_end"], "2024-03-04");
            adherence_free_string(out);

            adherence_trend_free(analyzer);
            adherence_trend_free(restored);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let invalid_json = CString::new("not json").unwrap();
            let result = adherence_evaluate_json(invalid_json.as_ptr());
            assert!(result.is_null());

            let error = adherence_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(error_str.contains("Invalid JSON"));
        }
    }

    #[test]
    fn test_ffi_rejects_out_of_range_config() {
        let overrides = [
            r#"{"trend":{"trailing_days":9223372036854775807}}"#,
            r#"{"compliance":{"window_days":18446744073709551615}}"#,
        ];

        for config in overrides {
            let request = CString::new(format!(
                r#"{{"patient_id":"p1","device_id":"brace-1","events":[],"targets":[],"evaluated_at":"2024-03-08T06:00:00Z","config":{}}}"#,
                config
            ))
            .unwrap();

            unsafe {
                let result = adherence_evaluate_json(request.as_ptr());
                assert!(result.is_null());

                let error = adherence_last_error();
                assert!(!error.is_null());
                let error_str = CStr::from_ptr(error).to_str().unwrap();
                assert!(error_str.contains("Invalid configuration"));
            }
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = adherence_version();
            assert!(!version.is_null());
            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}

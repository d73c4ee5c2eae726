use std::ffi::{c_char, CStr, CString};
use std::path::PathBuf;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::pipeline::{CliOverrides, FormFiller, PipelineConfig};
use crate::progress::ConsoleProgress;

static LAST_ERROR: Lazy<Mutex<Option<CString>>> = Lazy::new(|| Mutex::new(None));

fn set_last_error(msg: &str) {
    let c = CString::new(msg.replace('\0', " ")).unwrap_or_default();
    let mut guard = LAST_ERROR.lock().unwrap_or_else(|e| e.into_inner());
    *guard = Some(c);
}

fn clear_last_error() {
    let mut guard = LAST_ERROR.lock().unwrap_or_else(|e| e.into_inner());
    *guard = None;
}

fn take_cstr(ptr: *const c_char, name: &str) -> Result<String, String> {
    if ptr.is_null() {
        return Err(format!("{name} is null"));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map(|s| s.to_string())
        .map_err(|_| format!("{name} is not valid UTF-8"))
}

/// Fills a DOCX from a JSON fill request (`{"fill key": "value"}`).
///
/// `config_path` may be null to use the usual config search. Returns 0 when
/// every key was applied, 1 when the output was written but some keys failed,
/// and another non-zero code on failure (see `ff_last_error_utf8()`).
#[no_mangle]
pub extern "C" fn ff_fill_docx(
    config_path: *const c_char,
    input_docx: *const c_char,
    values_json: *const c_char,
    output_docx: *const c_char,
) -> i32 {
    clear_last_error();
    let cfg_path = if config_path.is_null() {
        None
    } else {
        match take_cstr(config_path, "config_path") {
            Ok(v) => Some(PathBuf::from(v)),
            Err(e) => {
                set_last_error(&e);
                return 2;
            }
        }
    };
    let input = match take_cstr(input_docx, "input_docx") {
        Ok(v) => PathBuf::from(v),
        Err(e) => {
            set_last_error(&e);
            return 3;
        }
    };
    let values = match take_cstr(values_json, "values_json") {
        Ok(v) => PathBuf::from(v),
        Err(e) => {
            set_last_error(&e);
            return 4;
        }
    };
    let output = match take_cstr(output_docx, "output_docx") {
        Ok(v) => PathBuf::from(v),
        Err(e) => {
            set_last_error(&e);
            return 5;
        }
    };

    let cfg = match PipelineConfig::from_paths_and_args(
        &input,
        Some(&output),
        cfg_path,
        &CliOverrides::default(),
    ) {
        Ok(v) => v,
        Err(err) => {
            set_last_error(&format!("{err:#}"));
            return 10;
        }
    };

    let mut filler = FormFiller::new(cfg, ConsoleProgress::quiet());
    match filler.fill_docx(&input, &values, &output) {
        Ok(report) if report.all_succeeded() => 0,
        Ok(report) => {
            let failed: Vec<String> = report
                .outcomes
                .iter()
                .filter(|o| !o.success)
                .map(|o| match &o.error {
                    Some(e) => format!("{}: {e}", o.key),
                    None => o.key.clone(),
                })
                .collect();
            set_last_error(&format!(
                "{} of {} keys failed: {}",
                report.failed,
                report.outcomes.len(),
                failed.join("; ")
            ));
            1
        }
        Err(err) => {
            set_last_error(&format!("{err:#}"));
            11
        }
    }
}

/// Returns the last error message as a UTF-8 C string pointer (or null if none).
/// The pointer is valid until the next `ff_fill_docx` call.
#[no_mangle]
pub extern "C" fn ff_last_error_utf8() -> *const c_char {
    let guard = LAST_ERROR.lock().unwrap_or_else(|e| e.into_inner());
    match guard.as_ref() {
        Some(s) => s.as_ptr(),
        None => std::ptr::null(),
    }
}

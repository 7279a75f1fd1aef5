//! C FFI - stable C API over a process-wide bridge
//!
//! Design: one `Bridge` per process, built on first use from the
//! environment (`LATEBIND_CONFIG`, `LATEBIND_LOG_*`). Results cross the
//! boundary as a tagged `LatebindValue`; failures as an owned message.

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::ffi::{c_char, CStr, CString};
use std::ptr;

use crate::bridge::{Bridge, ModuleIdentity};
use crate::config::BridgeConfig;
use crate::diagnostics::EventLevel;
use crate::host::{BoxedKind, HostError, ManagedHost, ManagedValue, Primitive};
use crate::interop::SLOT_SIZE;
use crate::logging::{self, log_ffi_call, log_ffi_error, warn};

#[cfg(windows)]
pub type DefaultRuntime = crate::dispatch::com::ComRuntime;
#[cfg(not(windows))]
pub type DefaultRuntime = crate::dispatch::registry::InProcessRuntime;

static BRIDGE: OnceCell<Bridge<DefaultRuntime>> = OnceCell::new();
static LOG_SINK: RwLock<Option<LogCallback>> = parking_lot::const_rwlock(None);

/// Receives caller-facing log events (level bit, NUL-terminated text)
pub type LogCallback = extern "C" fn(level: u16, message: *const c_char);

pub const LATEBIND_OK: i32 = 0;
pub const LATEBIND_RAISED: i32 = 1;
pub const LATEBIND_BAD_INPUT: i32 = -1;

pub const LATEBIND_NOTHING: u32 = 0;
pub const LATEBIND_BOOLEAN: u32 = 1;
pub const LATEBIND_BYTE: u32 = 2;
pub const LATEBIND_SHORT: u32 = 3;
pub const LATEBIND_INTEGER: u32 = 4;
pub const LATEBIND_LONG: u32 = 5;
pub const LATEBIND_FLOAT: u32 = 6;
pub const LATEBIND_DOUBLE: u32 = 7;
pub const LATEBIND_STRING: u32 = 8;

/// Call result as seen from C
///
/// Integers and booleans use `int_value`, floating point uses
/// `float_value`, strings own `text` (free with `latebind_free_string`).
#[repr(C)]
#[derive(Debug)]
pub struct LatebindValue {
    pub kind: u32,
    pub int_value: i64,
    pub float_value: f64,
    pub text: *mut c_char,
}

impl LatebindValue {
    const NOTHING: Self = Self {
        kind: LATEBIND_NOTHING,
        int_value: 0,
        float_value: 0.0,
        text: ptr::null_mut(),
    };

    fn int(kind: u32, value: i64) -> Self {
        Self { kind, int_value: value, ..Self::NOTHING }
    }

    fn float(kind: u32, value: f64) -> Self {
        Self { kind, float_value: value, ..Self::NOTHING }
    }

    fn from_managed(value: Option<ManagedValue>) -> Self {
        match value {
            None => Self::NOTHING,
            Some(ManagedValue::Boolean(v)) => Self::int(LATEBIND_BOOLEAN, i64::from(v)),
            Some(ManagedValue::Byte(v)) => Self::int(LATEBIND_BYTE, i64::from(v)),
            Some(ManagedValue::Short(v)) => Self::int(LATEBIND_SHORT, i64::from(v)),
            Some(ManagedValue::Integer(v)) => Self::int(LATEBIND_INTEGER, i64::from(v)),
            Some(ManagedValue::Long(v)) => Self::int(LATEBIND_LONG, v),
            Some(ManagedValue::Float(v)) => Self::float(LATEBIND_FLOAT, f64::from(v)),
            Some(ManagedValue::Double(v)) => Self::float(LATEBIND_DOUBLE, v),
            Some(ManagedValue::String(text)) => Self {
                kind: LATEBIND_STRING,
                text: into_c_string(text),
                ..Self::NOTHING
            },
            // The converter never produces the remaining variants
            Some(_) => Self::NOTHING,
        }
    }
}

/// Host for C callers: plain values, log events forwarded to the callback
struct FfiHost;

impl ManagedHost for FfiHost {
    type Object = ManagedValue;
    type Exception = String;

    fn new_boxed(&self, kind: BoxedKind, value: Primitive) -> Result<ManagedValue, HostError> {
        ManagedValue::boxed(kind, value)
    }

    fn new_string(&self, text: &str) -> Result<ManagedValue, HostError> {
        Ok(ManagedValue::String(text.to_owned()))
    }

    fn log(&self, level: EventLevel, message: &str) {
        if let Some(sink) = *LOG_SINK.read() {
            if let Ok(text) = CString::new(message.replace('\0', " ")) {
                sink(level.bit(), text.as_ptr());
            }
        }
    }

    fn raise(&self, message: &str) -> String {
        message.to_owned()
    }
}

/// The process-wide bridge, built on first use
pub fn global() -> &'static Bridge<DefaultRuntime> {
    BRIDGE.get_or_init(|| {
        logging::init();
        let config = BridgeConfig::from_env().unwrap_or_else(|err| {
            warn!(target: "ffi", %err, "configuration ignored, using defaults");
            BridgeConfig::default()
        });
        Bridge::new(DefaultRuntime::default(), &config, ModuleIdentity::capture())
    })
}

fn into_c_string(text: String) -> *mut c_char {
    let text = if text.contains('\0') {
        text.replace('\0', " ")
    } else {
        text
    };
    CString::new(text).map_or(ptr::null_mut(), CString::into_raw)
}

/// Borrow a C string; `None` for null or non-UTF-8 input
///
/// # Safety
/// `text` must be null or point to a NUL-terminated string that outlives
/// the returned borrow.
unsafe fn borrow_str<'a>(text: *const c_char) -> Option<&'a str> {
    if text.is_null() {
        return None;
    }
    CStr::from_ptr(text).to_str().ok()
}

/// Invoke a member on a fresh instance of a class.
///
/// Returns `LATEBIND_OK` with `*out` filled, `LATEBIND_RAISED` with
/// `*error_out` holding the caller exception message, or
/// `LATEBIND_BAD_INPUT`. A null `threading_model` means multithreaded.
///
/// # Safety
/// String arguments must be null or NUL-terminated; `args` must be null or
/// valid for `args_len` bytes; `out` must be valid for writes; `error_out`
/// must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn latebind_invoke(
    threading_model: *const c_char,
    class_identity: *const c_char,
    member: *const c_char,
    args: *const u8,
    args_len: usize,
    out: *mut LatebindValue,
    error_out: *mut *mut c_char,
) -> i32 {
    log_ffi_call("latebind_invoke");

    let threading_model = if threading_model.is_null() {
        "MULTITHREADED"
    } else {
        match borrow_str(threading_model) {
            Some(text) => text,
            None => return bad_input("threading model is not UTF-8"),
        }
    };
    let (Some(class_identity), Some(member)) = (borrow_str(class_identity), borrow_str(member))
    else {
        return bad_input("class identity and member are required");
    };
    if out.is_null() {
        return bad_input("result pointer is null");
    }
    let args = if args.is_null() {
        None
    } else {
        Some(std::slice::from_raw_parts(args, args_len))
    };

    match global().invoke(&FfiHost, threading_model, class_identity, member, args) {
        Ok(value) => {
            out.write(LatebindValue::from_managed(value));
            LATEBIND_OK
        }
        Err(message) => {
            out.write(LatebindValue::NOTHING);
            if !error_out.is_null() {
                error_out.write(into_c_string(message));
            }
            LATEBIND_RAISED
        }
    }
}

/// Set the caller-facing diagnostic level mask
#[no_mangle]
pub extern "C" fn latebind_set_diagnostic_level(level: i16) {
    global().set_diagnostic_level(level);
}

/// Install (or clear, with null) the log event callback
#[no_mangle]
pub extern "C" fn latebind_set_log_callback(callback: Option<LogCallback>) {
    *LOG_SINK.write() = callback;
}

/// Write a complete 16-byte string slot for `text` into `out`.
///
/// The slot is single-use: the `latebind_invoke` call that receives it
/// releases the string, successful or not.
///
/// # Safety
/// `text` must be null or NUL-terminated; `out` must be valid for 16 bytes
/// of writes.
#[no_mangle]
pub unsafe extern "C" fn latebind_encode_string_handle(text: *const c_char, out: *mut u8) -> i32 {
    log_ffi_call("latebind_encode_string_handle");
    let Some(text) = borrow_str(text) else {
        return bad_input("string is null or not UTF-8");
    };
    if out.is_null() {
        return bad_input("output pointer is null");
    }
    let slot = global().encode_string_handle(text);
    ptr::copy_nonoverlapping(slot.as_ptr(), out, SLOT_SIZE);
    LATEBIND_OK
}

/// Free a string returned by this library
///
/// # Safety
/// `text` must be null or a pointer previously returned by this library and
/// not yet freed.
#[no_mangle]
pub unsafe extern "C" fn latebind_free_string(text: *mut c_char) {
    if !text.is_null() {
        drop(CString::from_raw(text));
    }
}

fn bad_input(reason: &str) -> i32 {
    log_ffi_error("latebind", reason);
    LATEBIND_BAD_INPUT
}

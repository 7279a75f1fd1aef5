//! Bridge context - one late-bound call from caller strings to caller object
//!
//! Design: all process-wide state lives in an explicitly constructed
//! `Bridge`. Resources of one call are RAII guards acquired in the order
//! session → arguments → object, so they drop in reverse on every path,
//! panics included.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::config::BridgeConfig;
use crate::diagnostics::{
    CallDiagnostics, DiagnosticLevel, Diagnostics, EventLevel, MessageArg, MessageId,
};
use crate::dispatch::{invoke_member, AutomationRuntime, ClassIdentity, Session};
use crate::errors::{BridgeError, BridgeResult};
use crate::host::{ManagedHost, ManagedValue};
use crate::interop::{
    release_slot_strings, to_managed_object, ArgumentList, Conversion, ConvertOptions,
    EncodeError, StringTable, SLOT_SIZE,
};
use crate::logging::{info_span, perf, trace};

/// Name of the image the bridge code was loaded from, captured once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleIdentity {
    name: String,
}

impl ModuleIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Path of the image containing this code.
    ///
    /// On Windows that is the bridge's own DLL when loaded as one. Elsewhere
    /// it is the host executable. Falls back to the crate name.
    pub fn capture() -> Self {
        let name = image_path()
            .or_else(|| {
                std::env::current_exe()
                    .ok()
                    .map(|path| path.display().to_string())
            })
            .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
        Self { name }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(windows)]
fn image_path() -> Option<String> {
    use std::ffi::OsString;
    use std::os::windows::ffi::OsStringExt;
    use std::ptr;
    use winapi::shared::minwindef::HMODULE;
    use winapi::um::libloaderapi::{
        GetModuleFileNameW, GetModuleHandleExW, GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS,
        GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
    };

    let anchor = image_path as fn() -> Option<String> as usize;
    let mut module: HMODULE = ptr::null_mut();
    // SAFETY: the anchor is an address inside this image; the refcount is untouched
    let found = unsafe {
        GetModuleHandleExW(
            GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS | GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
            anchor as *const u16,
            &mut module,
        )
    };
    if found == 0 {
        return None;
    }

    let mut buffer = vec![0u16; 32_768];
    // SAFETY: `buffer` is valid for `buffer.len()` UTF-16 units
    let len = unsafe { GetModuleFileNameW(module, buffer.as_mut_ptr(), buffer.len() as u32) };
    let len = len as usize;
    if len == 0 || len >= buffer.len() {
        return None;
    }
    Some(OsString::from_wide(&buffer[..len]).to_string_lossy().into_owned())
}

#[cfg(not(windows))]
fn image_path() -> Option<String> {
    None
}

/// Dispatch bridge over an automation runtime
pub struct Bridge<R: AutomationRuntime> {
    runtime: R,
    diagnostics: Diagnostics,
    strings: StringTable,
    module: ModuleIdentity,
    options: ConvertOptions,
}

impl<R: AutomationRuntime> Bridge<R> {
    pub fn new(runtime: R, config: &BridgeConfig, module: ModuleIdentity) -> Self {
        Self {
            runtime,
            diagnostics: Diagnostics::new(config.diagnostic_level()),
            strings: StringTable::new(),
            module,
            options: config.convert_options(),
        }
    }

    /// Default configuration, module identity of the running executable
    pub fn with_runtime(runtime: R) -> Self {
        Self::new(runtime, &BridgeConfig::default(), ModuleIdentity::capture())
    }

    #[inline]
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    #[inline]
    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    #[inline]
    pub fn module(&self) -> &ModuleIdentity {
        &self.module
    }

    #[inline]
    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    pub fn diagnostic_level(&self) -> DiagnosticLevel {
        self.diagnostics.level()
    }

    /// Replace the caller-facing level mask; later calls observe it
    pub fn set_diagnostic_level(&self, level: i16) {
        self.diagnostics.set_level(DiagnosticLevel(level as u16));
        trace!(target: "bridge", level = level as u16, "diagnostic level set");
    }

    /// A complete string slot referencing a newly allocated handle.
    ///
    /// The handle is single-use: the first call whose buffer carries the slot
    /// releases it when that call ends, whatever its outcome. Reusing the slot
    /// in a later call fails that argument with `E_INVALIDARG`. The table does
    /// not track which call allocated a handle, so a slot must not be shared
    /// between concurrent calls.
    pub fn encode_string_handle(&self, text: &str) -> [u8; SLOT_SIZE] {
        self.strings.encode(text)
    }

    /// Encode managed arguments (declaration order) into a buffer
    pub fn encode_arguments(&self, values: &[ManagedValue]) -> Result<Vec<u8>, EncodeError> {
        crate::interop::encode_arguments(&self.strings, values)
    }

    /// Invoke `member` on a fresh instance of `class_identity`.
    ///
    /// Every failure is logged (when its level is enabled) and surfaced as
    /// exactly one host exception. Empty, null and error results yield
    /// `Ok(None)`.
    pub fn invoke<H: ManagedHost + ?Sized>(
        &self,
        host: &H,
        threading_model: &str,
        class_identity: &str,
        member: &str,
        args: Option<&[u8]>,
    ) -> Result<Option<H::Object>, H::Exception> {
        let calls = self.diagnostics.snapshot();
        match self.guarded(host, &calls, threading_model, class_identity, member, args) {
            Ok(conversion) => Ok(conversion.into_option()),
            Err(err) => Err(self.surface(host, &calls, &err)),
        }
    }

    /// Same call, failures returned as `BridgeError` instead of raised
    pub fn try_invoke<H: ManagedHost + ?Sized>(
        &self,
        host: &H,
        threading_model: &str,
        class_identity: &str,
        member: &str,
        args: Option<&[u8]>,
    ) -> BridgeResult<Conversion<H::Object>> {
        let calls = self.diagnostics.snapshot();
        self.guarded(host, &calls, threading_model, class_identity, member, args)
    }

    fn guarded<H: ManagedHost + ?Sized>(
        &self,
        host: &H,
        calls: &CallDiagnostics,
        threading_model: &str,
        class_identity: &str,
        member: &str,
        args: Option<&[u8]>,
    ) -> BridgeResult<Conversion<H::Object>> {
        let _span = info_span!(
            target: "bridge",
            "invoke",
            model = threading_model,
            class = class_identity,
            member
        )
        .entered();
        let _perf = perf::track("invoke");

        catch_unwind(AssertUnwindSafe(|| {
            self.run(host, calls, threading_model, class_identity, member, args)
        }))
        .unwrap_or_else(|panic| {
            Err(BridgeError::UnexpectedFailure {
                detail: panic_detail(panic.as_ref()),
            })
        })
    }

    fn run<H: ManagedHost + ?Sized>(
        &self,
        host: &H,
        calls: &CallDiagnostics,
        threading_model: &str,
        class_identity: &str,
        member: &str,
        args: Option<&[u8]>,
    ) -> BridgeResult<Conversion<H::Object>> {
        calls.log_event(
            host,
            EventLevel::Success,
            MessageId::ModuleEntry,
            &[self.module.as_str().into()],
        );

        // No session, no decode: release the buffer's strings now
        let _session = Session::begin(&self.runtime, threading_model).map_err(|err| {
            release_slot_strings(args, &self.strings);
            err
        })?;

        let args = ArgumentList::decode(args, &self.strings)?;
        calls.log_event(host, EventLevel::Success, MessageId::ArgumentCount, &[args.len().into()]);

        let identity = ClassIdentity::parse(class_identity);
        let announce = match identity {
            ClassIdentity::Literal(_) => MessageId::ClassIdAndMember,
            ClassIdentity::ProgId(_) => MessageId::ProgIdAndMember,
        };
        calls.log_event(
            host,
            EventLevel::Information,
            announce,
            &[class_identity.into(), member.into()],
        );

        let class = identity
            .resolve(&self.runtime)
            .map_err(|status| BridgeError::ClassResolutionFailed {
                identity: class_identity.to_owned(),
                status,
            })?;

        let object = self
            .runtime
            .create_instance(&class)
            .map_err(|status| BridgeError::ActivationFailed {
                identity: class_identity.to_owned(),
                status,
            })?;

        let locale = self.runtime.user_default_locale();
        let result = invoke_member(&*object, member, &args, locale)?;

        let conversion = to_managed_object(host, &result, &self.options).map_err(|err| {
            BridgeError::ResultConversionFailed {
                tag: err.tag.0,
                identity: class_identity.to_owned(),
                member: member.to_owned(),
                status: err.status,
            }
        })?;

        calls.log_event(host, EventLevel::Success, MessageId::Success, &[]);
        Ok(conversion)
    }

    /// Log a failure at its level and turn it into the host's exception
    fn surface<H: ManagedHost + ?Sized>(
        &self,
        host: &H,
        calls: &CallDiagnostics,
        err: &BridgeError,
    ) -> H::Exception {
        let report = FailureReport::of(err);
        if let Some(level) = report.level {
            calls.log_event(host, level, report.id, &report.args);
        }
        calls.raise_caller_error(host, report.id, &report.args)
    }
}

/// How a failure is told to the caller
struct FailureReport {
    /// `None`: raised without a log event
    level: Option<EventLevel>,
    id: MessageId,
    args: Vec<MessageArg>,
}

impl FailureReport {
    fn of(err: &BridgeError) -> Self {
        use EventLevel::{Error, Warning};

        let (level, id, args) = match err {
            BridgeError::InitializationFailed { status } => (
                Some(Warning),
                MessageId::InitializeFailed,
                vec![MessageArg::Hex(status.code())],
            ),
            BridgeError::ClassResolutionFailed { identity, status } => {
                match ClassIdentity::parse(identity) {
                    ClassIdentity::Literal(_) => (
                        None,
                        MessageId::ClassIdParseFailed,
                        vec![MessageArg::Hex(status.code())],
                    ),
                    ClassIdentity::ProgId(_) => (
                        Some(Warning),
                        MessageId::ProgIdResolveFailed,
                        vec![MessageArg::Hex(status.code())],
                    ),
                }
            }
            BridgeError::ActivationFailed { identity, status } => (
                Some(Warning),
                MessageId::ActivationFailed,
                vec![identity.as_str().into(), MessageArg::Hex(status.code())],
            ),
            BridgeError::MemberNotFound { member, .. } => (
                Some(Warning),
                MessageId::MemberNotFound,
                vec![member.as_str().into()],
            ),
            BridgeError::ArgumentMismatch { member, status, index } => (
                None,
                MessageId::BadArgument,
                vec![(*index).into(), member.as_str().into(), MessageArg::Hex(status.code())],
            ),
            BridgeError::NativeException { member, code, source_text, description } => (
                None,
                MessageId::NativeException,
                vec![
                    member.as_str().into(),
                    (*code).into(),
                    source_text.as_str().into(),
                    description.as_str().into(),
                ],
            ),
            BridgeError::InvocationFailed { member, status } => (
                Some(Warning),
                MessageId::InvokeFailed,
                vec![member.as_str().into(), MessageArg::Hex(status.code())],
            ),
            BridgeError::ResultConversionFailed { tag, identity, member, .. } => (
                Some(Error),
                MessageId::ResultConversionFailed,
                vec![
                    MessageArg::Hex(u32::from(*tag)),
                    identity.as_str().into(),
                    member.as_str().into(),
                ],
            ),
            BridgeError::InvalidArgumentBuffer { length, slot_size } => (
                Some(Error),
                MessageId::InvalidArgumentBuffer,
                vec![(*length).into(), (*slot_size).into()],
            ),
            BridgeError::AllocationFailed => (Some(Error), MessageId::AllocationFailed, Vec::new()),
            BridgeError::UnexpectedFailure { detail } => (
                Some(Error),
                MessageId::UnexpectedFailure,
                vec![detail.as_str().into()],
            ),
        };

        Self { level, id, args }
    }
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

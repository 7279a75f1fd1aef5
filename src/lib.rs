//! latebind - call members of late-bound automation objects by name
//!
//! A caller hands over a threading model, a class identity, a member name
//! and a buffer of 16-byte typed argument slots; the bridge sets up the
//! threading session, activates the class, resolves and invokes the member
//! and converts the typed result back into a caller object.

// Core modules
pub mod errors;
pub mod logging;
pub mod config;
pub mod diagnostics;
pub mod host;
pub mod interop;
pub mod dispatch;
pub mod bridge;
pub mod ffi;

// Re-export commonly used items
pub use bridge::{Bridge, ModuleIdentity};
pub use config::{BridgeConfig, ConfigError};
pub use diagnostics::{DiagnosticLevel, Diagnostics, EventLevel, MessageId};
pub use dispatch::registry::{DispatchTable, Fault, InProcessRuntime};
pub use dispatch::{
    classify_member, invoke_member, AutomationRuntime, ClassId, ClassIdentity, Dispatch,
    DispParams, ExceptionInfo, InitFamily, InvokeError, Locale, MemberId, MemberKind, Session,
    SessionMode,
};
pub use errors::{BridgeError, BridgeResult, Hresult};
pub use host::{BoxedKind, CallerException, ManagedHost, ManagedValue, Primitive, ValueHost};
pub use interop::{
    encode_arguments, release_slot_strings, to_managed_object, ArgumentBuilder, ArgumentList,
    Conversion, ConvertOptions, EncodeError, Int64Policy, Slot, StringHandle, StringTable,
    TypedValue, VarType, SLOT_SIZE,
};

//! Late-bound dispatch - resolve a member by name and call it
//!
//! Design: the automation object is a trait object; the bridge never knows
//! its concrete type, only the two operations every late-bound object has.

mod runtime;
mod session;
pub mod registry;
#[cfg(windows)]
pub mod com;

pub use runtime::{ApartmentModel, AutomationRuntime, ClassId, ClassIdentity};
pub use session::{InitFamily, Session, SessionMode};

use smallvec::SmallVec;

use crate::errors::{BridgeError, BridgeResult, Hresult};
use crate::interop::{ArgumentList, TypedValue};
use crate::logging::{log_dispatch_call, log_dispatch_return};

/// How a member is called
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Method,
    PropertyGet,
    PropertySet,
}

impl MemberKind {
    /// Native dispatch flag
    pub const fn flags(self) -> u16 {
        match self {
            Self::Method => 0x1,
            Self::PropertyGet => 0x2,
            Self::PropertySet => 0x4,
        }
    }
}

/// Member name with its call kind, prefix stripped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberCall<'a> {
    pub name: &'a str,
    pub kind: MemberKind,
}

/// Classify a member name by its `get_` / `set_` prefix. Never fails.
pub fn classify_member(member: &str) -> MemberCall<'_> {
    if let Some(name) = member.strip_prefix("get_") {
        MemberCall { name, kind: MemberKind::PropertyGet }
    } else if let Some(name) = member.strip_prefix("set_") {
        MemberCall { name, kind: MemberKind::PropertySet }
    } else {
        MemberCall { name: member, kind: MemberKind::Method }
    }
}

/// Member id resolved from a name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct MemberId(pub i32);

/// Named-argument id marking the value of a property put
pub const DISPID_PROPERTYPUT: MemberId = MemberId(-3);

/// Locale identifier used for name resolution and invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Locale(pub u32);

impl Locale {
    pub const USER_DEFAULT: Self = Self(0x0400);
}

/// Parameter block handed to the object
///
/// `args` keeps buffer order: the last declared argument comes first. For a
/// property put, `args[0]` is the assigned value and `named_args` holds the
/// single `DISPID_PROPERTYPUT` entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispParams {
    pub args: SmallVec<[TypedValue; 8]>,
    pub named_args: SmallVec<[MemberId; 1]>,
}

impl DispParams {
    /// Arguments in declaration order
    pub fn declared(&self) -> impl Iterator<Item = &TypedValue> {
        self.args.iter().rev()
    }

    pub fn is_property_put(&self) -> bool {
        self.named_args.as_slice() == [DISPID_PROPERTYPUT]
    }
}

/// Exception details filled in by the object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptionInfo {
    /// Detailed error code; zero when only `scode` is set
    pub wcode: u16,
    pub scode: i32,
    pub source: Option<String>,
    pub description: Option<String>,
}

/// Failed invocation, as reported by the object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeError {
    pub status: Hresult,
    pub exception: Option<ExceptionInfo>,
    /// Index into `DispParams::args` of the offending argument
    pub arg_err: u32,
}

impl InvokeError {
    pub fn status(status: Hresult) -> Self {
        Self { status, exception: None, arg_err: 0 }
    }

    pub fn exception(info: ExceptionInfo) -> Self {
        Self {
            status: Hresult::DISP_E_EXCEPTION,
            exception: Some(info),
            arg_err: 0,
        }
    }

    pub fn bad_argument(status: Hresult, arg_err: u32) -> Self {
        Self { status, exception: None, arg_err }
    }
}

/// A late-bound automation object
///
/// Dropping the box releases the object.
pub trait Dispatch {
    /// Resolve a bare member name
    fn id_of_name(&self, name: &str, locale: Locale) -> Result<MemberId, Hresult>;

    /// Call a resolved member
    fn invoke(
        &self,
        member: MemberId,
        locale: Locale,
        kind: MemberKind,
        params: &DispParams,
    ) -> Result<TypedValue, InvokeError>;
}

/// Resolve `member` on `object` and call it with `args`.
///
/// Returns the raw native result; converting it is the caller's business.
pub fn invoke_member<D: Dispatch + ?Sized>(
    object: &D,
    member: &str,
    args: &ArgumentList<'_>,
    locale: Locale,
) -> BridgeResult<TypedValue> {
    let call = classify_member(member);

    let id = object
        .id_of_name(call.name, locale)
        .map_err(|status| BridgeError::MemberNotFound {
            member: member.to_owned(),
            status,
        })?;

    let total = args.len();
    let mut params = DispParams::default();
    for (i, value) in args.typed_values().enumerate() {
        let value = value.map_err(|status| BridgeError::ArgumentMismatch {
            member: member.to_owned(),
            status,
            index: total - i,
        })?;
        params.args.push(value);
    }
    if call.kind == MemberKind::PropertySet {
        params.named_args.push(DISPID_PROPERTYPUT);
    }

    log_dispatch_call(member, total);
    let outcome = object.invoke(id, locale, call.kind, &params);
    log_dispatch_return(member, outcome.is_ok());

    outcome.map_err(|err| classify_failure(member, total, err))
}

/// Map a failed invocation onto the bridge taxonomy
pub fn classify_failure(member: &str, total: usize, err: InvokeError) -> BridgeError {
    match err.status {
        Hresult::DISP_E_EXCEPTION => {
            let info = err.exception.unwrap_or_default();
            let code = if info.wcode != 0 {
                u32::from(info.wcode)
            } else {
                info.scode as u32
            };
            BridgeError::NativeException {
                member: member.to_owned(),
                code,
                source_text: info.source.unwrap_or_default(),
                description: info.description.unwrap_or_default(),
            }
        }
        Hresult::DISP_E_TYPEMISMATCH | Hresult::DISP_E_PARAMNOTFOUND => {
            BridgeError::ArgumentMismatch {
                member: member.to_owned(),
                status: err.status,
                index: total.saturating_sub(err.arg_err as usize),
            }
        }
        status => BridgeError::InvocationFailed {
            member: member.to_owned(),
            status,
        },
    }
}

//! Type marshaling - native typed values to managed objects
//!
//! Design: one fixed mapping per tag, failure reported through the result
//! only. By-reference values are dereferenced up to a bounded depth.

use serde::{Deserialize, Serialize};

use super::types::{TypedValue, VarType};
use crate::errors::Hresult;
use crate::host::{BoxedKind, ManagedHost, Primitive};
use crate::logging::log_type_conversion;

/// How 64-bit integer tags reach the managed `Long`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Int64Policy {
    /// Full 64-bit value (unsigned values are bit-reinterpreted)
    #[default]
    Full,
    /// Only the low 32 bits, as the legacy bridge read them
    Legacy32,
}

/// Knobs for result conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertOptions {
    pub int64: Int64Policy,
    pub max_reference_depth: usize,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            int64: Int64Policy::Full,
            max_reference_depth: 8,
        }
    }
}

/// Outcome of a successful conversion
#[derive(Debug, Clone, PartialEq)]
pub enum Conversion<T> {
    /// A managed object was produced
    Object(T),
    /// Empty, null and error values produce no object
    Nothing,
}

impl<T> Conversion<T> {
    #[inline]
    pub fn object_produced(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    #[inline]
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Object(obj) => Some(obj),
            Self::Nothing => None,
        }
    }
}

/// Conversion failure: the offending tag and the status describing it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionError {
    pub tag: VarType,
    pub status: Hresult,
}

impl ConversionError {
    #[inline]
    fn bad_type(tag: VarType) -> Self {
        Self {
            tag,
            status: Hresult::DISP_E_BADVARTYPE,
        }
    }
}

/// Convert a native typed value into a managed object
pub fn to_managed_object<H: ManagedHost + ?Sized>(
    host: &H,
    value: &TypedValue,
    options: &ConvertOptions,
) -> Result<Conversion<H::Object>, ConversionError> {
    convert(host, value, options, 0).map_err(|mut err| {
        // Report the outer tag, not whatever the reference chain ended on
        err.tag = value.var_type();
        err
    })
}

fn convert<H: ManagedHost + ?Sized>(
    host: &H,
    value: &TypedValue,
    options: &ConvertOptions,
    depth: usize,
) -> Result<Conversion<H::Object>, ConversionError> {
    let tag = value.var_type();

    let (kind, primitive) = match value {
        TypedValue::Empty | TypedValue::Null | TypedValue::Error(_) => {
            return Ok(Conversion::Nothing)
        }
        TypedValue::I8(v) => (BoxedKind::Byte, Primitive::I8(*v)),
        TypedValue::I16(v) => (BoxedKind::Short, Primitive::I16(*v)),
        TypedValue::I32(v) | TypedValue::Int(v) => (BoxedKind::Integer, Primitive::I32(*v)),
        TypedValue::I64(v) => (BoxedKind::Long, Primitive::I64(narrow_i64(*v, options.int64))),
        TypedValue::U8(v) => (BoxedKind::Short, Primitive::I16(i16::from(*v))),
        TypedValue::U16(v) => (BoxedKind::Integer, Primitive::I32(i32::from(*v))),
        TypedValue::U32(v) | TypedValue::UInt(v) => {
            (BoxedKind::Long, Primitive::I64(i64::from(*v)))
        }
        TypedValue::U64(v) => (BoxedKind::Long, Primitive::I64(narrow_u64(*v, options.int64))),
        TypedValue::F32(v) => (BoxedKind::Float, Primitive::F32(*v)),
        TypedValue::F64(v) => (BoxedKind::Double, Primitive::F64(*v)),
        TypedValue::Bool(v) => (BoxedKind::Boolean, Primitive::Bool(*v)),
        TypedValue::String(text) => {
            log_type_conversion("BSTR", "String");
            return host
                .new_string(text)
                .map(Conversion::Object)
                .map_err(|_| ConversionError {
                    tag,
                    status: Hresult::E_OUTOFMEMORY,
                });
        }
        TypedValue::ByRef(inner) | TypedValue::VariantRef(inner) => {
            if depth >= options.max_reference_depth {
                return Err(ConversionError::bad_type(tag));
            }
            return convert(host, inner, options, depth + 1);
        }
        TypedValue::ByRefArray | TypedValue::Other(_) => {
            return Err(ConversionError::bad_type(tag));
        }
    };

    log_type_conversion(type_label(tag), kind.name());
    host.new_boxed(kind, primitive)
        .map(Conversion::Object)
        .map_err(|_| ConversionError {
            tag,
            status: Hresult::E_FAIL,
        })
}

#[inline]
fn narrow_i64(v: i64, policy: Int64Policy) -> i64 {
    match policy {
        Int64Policy::Full => v,
        Int64Policy::Legacy32 => i64::from(v as i32),
    }
}

#[inline]
fn narrow_u64(v: u64, policy: Int64Policy) -> i64 {
    match policy {
        Int64Policy::Full => v as i64,
        Int64Policy::Legacy32 => i64::from(v as u32),
    }
}

/// Short name of a variant tag (for logs and error messages)
pub const fn type_label(tag: VarType) -> &'static str {
    match tag {
        VarType::EMPTY => "EMPTY",
        VarType::NULL => "NULL",
        VarType::I2 => "I2",
        VarType::I4 => "I4",
        VarType::R4 => "R4",
        VarType::R8 => "R8",
        VarType::BSTR => "BSTR",
        VarType::ERROR => "ERROR",
        VarType::BOOL => "BOOL",
        VarType::VARIANT => "VARIANT",
        VarType::I1 => "I1",
        VarType::UI1 => "UI1",
        VarType::UI2 => "UI2",
        VarType::UI4 => "UI4",
        VarType::I8 => "I8",
        VarType::UI8 => "UI8",
        VarType::INT => "INT",
        VarType::UINT => "UINT",
        _ => "OTHER",
    }
}

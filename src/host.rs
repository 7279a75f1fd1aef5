//! Managed host - the caller's object model, log sink and exception surface
//!
//! The bridge never builds caller objects itself. It asks the host to box a
//! primitive through the boxed type's single-argument constructor, to build
//! a string, to record a log line and to produce an exception value.

use parking_lot::Mutex;
use std::fmt;
use thiserror::Error;

use crate::diagnostics::EventLevel;
use crate::logging::trace;

/// Boxed primitive types of the managed runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoxedKind {
    Boolean,
    Byte,
    Short,
    Integer,
    Long,
    Float,
    Double,
}

impl BoxedKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Boolean => "Boolean",
            Self::Byte => "Byte",
            Self::Short => "Short",
            Self::Integer => "Integer",
            Self::Long => "Long",
            Self::Float => "Float",
            Self::Double => "Double",
        }
    }
}

/// Constructor argument for a boxed primitive
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Primitive {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

/// Host-side failure while building an object
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("host could not construct {kind}: {reason}")]
pub struct HostError {
    pub kind: &'static str,
    pub reason: String,
}

/// The caller's runtime, as seen from the bridge
pub trait ManagedHost {
    type Object;
    type Exception;

    /// Box `value` as `kind` via its single-argument constructor
    fn new_boxed(&self, kind: BoxedKind, value: Primitive) -> Result<Self::Object, HostError>;

    /// Build a managed string
    fn new_string(&self, text: &str) -> Result<Self::Object, HostError>;

    /// Best-effort log sink; must not fail the call
    fn log(&self, level: EventLevel, message: &str);

    /// Produce the exception value handed back to the caller
    fn raise(&self, message: &str) -> Self::Exception;
}

/// A managed value, as produced and consumed by [`ValueHost`]
#[derive(Debug, Clone, PartialEq)]
pub enum ManagedValue {
    Null,
    Void,
    Boolean(bool),
    Byte(i8),
    Character(char),
    Short(i16),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Array(Vec<ManagedValue>),
    /// Instance of some other class, by class name
    Object(String),
}

impl ManagedValue {
    /// Box `value` as `kind`; the pair must match a constructor signature
    pub fn boxed(kind: BoxedKind, value: Primitive) -> Result<Self, HostError> {
        let boxed = match (kind, value) {
            (BoxedKind::Boolean, Primitive::Bool(v)) => Self::Boolean(v),
            (BoxedKind::Byte, Primitive::I8(v)) => Self::Byte(v),
            (BoxedKind::Short, Primitive::I16(v)) => Self::Short(v),
            (BoxedKind::Integer, Primitive::I32(v)) => Self::Integer(v),
            (BoxedKind::Long, Primitive::I64(v)) => Self::Long(v),
            (BoxedKind::Float, Primitive::F32(v)) => Self::Float(v),
            (BoxedKind::Double, Primitive::F64(v)) => Self::Double(v),
            (kind, value) => {
                return Err(HostError {
                    kind: kind.name(),
                    reason: format!("no constructor taking {:?}", value),
                })
            }
        };
        Ok(boxed)
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::Null => "null",
            Self::Void => "Void",
            Self::Boolean(_) => "Boolean",
            Self::Byte(_) => "Byte",
            Self::Character(_) => "Character",
            Self::Short(_) => "Short",
            Self::Integer(_) => "Integer",
            Self::Long(_) => "Long",
            Self::Float(_) => "Float",
            Self::Double(_) => "Double",
            Self::String(_) => "String",
            Self::Array(_) => "Array",
            Self::Object(name) => name,
        }
    }
}

impl fmt::Display for ManagedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("*null*"),
            Self::Void => f.write_str("void"),
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Byte(v) => write!(f, "{}", v),
            Self::Character(v) => write!(f, "{}", v),
            Self::Short(v) => write!(f, "{}", v),
            Self::Integer(v) => write!(f, "{}", v),
            Self::Long(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::String(v) => f.write_str(v),
            Self::Array(items) => write!(f, "[{} items]", items.len()),
            Self::Object(name) => write!(f, "<{}>", name),
        }
    }
}

/// Exception value produced by [`ValueHost`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CallerException {
    pub message: String,
}

/// In-process host that builds [`ManagedValue`]s and records log lines
#[derive(Debug, Default)]
pub struct ValueHost {
    log: Mutex<Vec<(EventLevel, String)>>,
}

impl ValueHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log lines delivered so far
    pub fn log_lines(&self) -> Vec<(EventLevel, String)> {
        self.log.lock().clone()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }
}

impl ManagedHost for ValueHost {
    type Object = ManagedValue;
    type Exception = CallerException;

    fn new_boxed(&self, kind: BoxedKind, value: Primitive) -> Result<ManagedValue, HostError> {
        ManagedValue::boxed(kind, value)
    }

    fn new_string(&self, text: &str) -> Result<ManagedValue, HostError> {
        Ok(ManagedValue::String(text.to_owned()))
    }

    fn log(&self, level: EventLevel, message: &str) {
        trace!(target: "host", ?level, text = message, "host log");
        self.log.lock().push((level, message.to_owned()));
    }

    fn raise(&self, message: &str) -> CallerException {
        CallerException {
            message: message.to_owned(),
        }
    }
}

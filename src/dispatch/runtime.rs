//! Automation runtime seam - threading initialization, class lookup, activation

use std::fmt;
use std::str::FromStr;

use super::{Dispatch, Locale};
use crate::errors::Hresult;

/// Concurrency model of the per-thread initialization primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApartmentModel {
    Multithreaded,
    ApartmentThreaded,
}

/// Platform services the bridge needs around one call
///
/// Two initialization families exist: the apartment family
/// (`initialize`/`uninitialize`) and the legacy single-apartment family
/// (`ole_initialize`/`ole_uninitialize`). Each successful initialization is
/// paired with exactly one matching teardown on the same thread.
pub trait AutomationRuntime: Send + Sync {
    fn initialize(&self, model: ApartmentModel) -> Hresult;
    fn uninitialize(&self);

    fn ole_initialize(&self) -> Hresult;
    fn ole_uninitialize(&self);

    /// Class id from its brace-delimited textual form
    fn class_id_from_string(&self, literal: &str) -> Result<ClassId, Hresult> {
        literal.parse().map_err(|_| Hresult::CO_E_CLASSSTRING)
    }

    /// Class id registered for a programmatic identifier
    fn class_id_from_prog_id(&self, prog_id: &str) -> Result<ClassId, Hresult>;

    /// Create an instance exposing the late-binding interface
    fn create_instance(&self, class: &ClassId) -> Result<Box<dyn Dispatch>, Hresult>;

    /// Locale used for name resolution and invocation
    fn user_default_locale(&self) -> Locale {
        Locale::USER_DEFAULT
    }
}

impl<R: AutomationRuntime + ?Sized> AutomationRuntime for std::sync::Arc<R> {
    fn initialize(&self, model: ApartmentModel) -> Hresult {
        (**self).initialize(model)
    }

    fn uninitialize(&self) {
        (**self).uninitialize()
    }

    fn ole_initialize(&self) -> Hresult {
        (**self).ole_initialize()
    }

    fn ole_uninitialize(&self) {
        (**self).ole_uninitialize()
    }

    fn class_id_from_string(&self, literal: &str) -> Result<ClassId, Hresult> {
        (**self).class_id_from_string(literal)
    }

    fn class_id_from_prog_id(&self, prog_id: &str) -> Result<ClassId, Hresult> {
        (**self).class_id_from_prog_id(prog_id)
    }

    fn create_instance(&self, class: &ClassId) -> Result<Box<dyn Dispatch>, Hresult> {
        (**self).create_instance(class)
    }

    fn user_default_locale(&self) -> Locale {
        (**self).user_default_locale()
    }
}

/// How the caller named the class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassIdentity<'a> {
    /// `{xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx}`
    Literal(&'a str),
    /// Programmatic identifier such as `Excel.Application`
    ProgId(&'a str),
}

impl<'a> ClassIdentity<'a> {
    /// A leading `{` marks a literal class id; anything else is a progid
    pub fn parse(text: &'a str) -> Self {
        if text.starts_with('{') {
            Self::Literal(text)
        } else {
            Self::ProgId(text)
        }
    }

    pub fn as_str(&self) -> &'a str {
        match self {
            Self::Literal(text) | Self::ProgId(text) => text,
        }
    }

    /// Resolve through the runtime's lookup primitives
    pub fn resolve<R: AutomationRuntime + ?Sized>(&self, runtime: &R) -> Result<ClassId, Hresult> {
        match self {
            Self::Literal(text) => runtime.class_id_from_string(text),
            Self::ProgId(text) => runtime.class_id_from_prog_id(text),
        }
    }
}

/// 128-bit class identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl ClassId {
    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self { data1, data2, data3, data4 }
    }
}

/// Malformed class id literal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassIdParseError;

impl fmt::Display for ClassIdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("malformed class id literal")
    }
}

impl std::error::Error for ClassIdParseError {}

impl FromStr for ClassId {
    type Err = ClassIdParseError;

    /// Parse `{8-4-4-4-12}` hex groups, braces required
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let inner = text
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or(ClassIdParseError)?;

        let groups: Vec<&str> = inner.split('-').collect();
        let widths = [8, 4, 4, 4, 12];
        if groups.len() != widths.len()
            || groups
                .iter()
                .zip(widths)
                .any(|(g, w)| g.len() != w || !g.bytes().all(|b| b.is_ascii_hexdigit()))
        {
            return Err(ClassIdParseError);
        }

        let hex32 = |s: &str| u32::from_str_radix(s, 16).map_err(|_| ClassIdParseError);
        let hex16 = |s: &str| u16::from_str_radix(s, 16).map_err(|_| ClassIdParseError);

        let mut data4 = [0u8; 8];
        let tail = format!("{}{}", groups[3], groups[4]);
        for (i, byte) in data4.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&tail[i * 2..i * 2 + 2], 16).map_err(|_| ClassIdParseError)?;
        }

        Ok(Self {
            data1: hex32(groups[0])?,
            data2: hex16(groups[1])?,
            data3: hex16(groups[2])?,
            data4,
        })
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

impl fmt::Debug for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassId({})", self)
    }
}

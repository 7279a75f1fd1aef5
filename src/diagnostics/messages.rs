//! Message catalog and positional formatting
//!
//! Templates use `%1` .. `%9` placeholders. `%%` renders a literal percent.

use std::fmt;

/// Message used whenever a template cannot be rendered
pub const FALLBACK_MESSAGE: &str = "Exception thrown by dispatch bridge";

/// Opaque template identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    ModuleEntry,
    ArgumentCount,
    InitializeFailed,
    ClassIdAndMember,
    ProgIdAndMember,
    ClassIdParseFailed,
    ProgIdResolveFailed,
    ActivationFailed,
    MemberNotFound,
    InvokeFailed,
    NativeException,
    BadArgument,
    ResultConversionFailed,
    InvalidArgumentBuffer,
    AllocationFailed,
    UnexpectedFailure,
    Success,
}

impl MessageId {
    pub const fn template(self) -> &'static str {
        match self {
            Self::ModuleEntry => "In module:%1",
            Self::ArgumentCount => "The number of parameters I got is: %1",
            Self::InitializeFailed => "Session initialize failed hr= 0x%1",
            Self::ClassIdAndMember => "Class id is:%1, member to execute is:%2",
            Self::ProgIdAndMember => "Progid is:%1, member to execute is:%2",
            Self::ClassIdParseFailed => "Failed to convert string to class id hr= 0x%1",
            Self::ProgIdResolveFailed => "Failed to convert progid to class id hr= 0x%1",
            Self::ActivationFailed => {
                "Failed to create instance of %1 with a dispatch interface hr=0x%2"
            }
            Self::MemberNotFound => "Failed to get member id for %1",
            Self::InvokeFailed => "Invoke of member %1 failed.  hr=0x%2",
            Self::NativeException => {
                "Dispatch bridge: member:%1 received error %2. Error source: %3\t. Description:%4"
            }
            Self::BadArgument => "Bad argument:%1 member %2.  hr=0x%3",
            Self::ResultConversionFailed => {
                "Failed to convert return value, variant type:0x%1, Object:%2, Method:%3"
            }
            Self::InvalidArgumentBuffer => {
                "Argument buffer of %1 bytes is not a multiple of the %2 byte slot size"
            }
            Self::AllocationFailed => "Insufficient resources: allocation failed.",
            Self::UnexpectedFailure => "An unexpected failure has occurred: %1",
            Self::Success => "Success! Return back to caller.",
        }
    }
}

/// One positional message argument
#[derive(Debug, Clone, PartialEq)]
pub enum MessageArg {
    Text(String),
    /// Rendered as lowercase hex without prefix
    Hex(u32),
    Unsigned(u64),
}

impl fmt::Display for MessageArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Hex(v) => write!(f, "{:x}", v),
            Self::Unsigned(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for MessageArg {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for MessageArg {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<usize> for MessageArg {
    fn from(v: usize) -> Self {
        Self::Unsigned(v as u64)
    }
}

impl From<u32> for MessageArg {
    fn from(v: u32) -> Self {
        Self::Unsigned(u64::from(v))
    }
}

/// Placeholder that could not be filled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatError {
    pub placeholder: usize,
}

/// Render `template` with positional `args`
pub fn try_format(template: &str, args: &[MessageArg]) -> Result<String, FormatError> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            Some(d @ '1'..='9') => {
                chars.next();
                let index = d as usize - '0' as usize;
                let arg = args.get(index - 1).ok_or(FormatError { placeholder: index })?;
                out.push_str(&arg.to_string());
            }
            _ => out.push('%'),
        }
    }

    Ok(out)
}

/// Render a catalog message, falling back to a fixed text on failure
pub fn format_message(id: MessageId, args: &[MessageArg]) -> String {
    match try_format(id.template(), args) {
        Ok(text) if !text.is_empty() => text,
        _ => FALLBACK_MESSAGE.to_owned(),
    }
}

//! Error taxonomy for the dispatch bridge
//!
//! Every failure is detected where it happens, carried as a `BridgeError`
//! and only turned into a caller exception at the outermost boundary.

use std::fmt;
use thiserror::Error;

/// Native status code (HRESULT layout: negative means failure)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Hresult(pub i32);

impl Hresult {
    pub const S_OK: Self = Self(0);
    pub const S_FALSE: Self = Self(1);
    pub const E_UNEXPECTED: Self = Self(0x8000_FFFF_u32 as i32);
    pub const E_NOTIMPL: Self = Self(0x8000_4001_u32 as i32);
    pub const E_FAIL: Self = Self(0x8000_4005_u32 as i32);
    pub const E_OUTOFMEMORY: Self = Self(0x8007_000E_u32 as i32);
    pub const E_INVALIDARG: Self = Self(0x8007_0057_u32 as i32);
    pub const DISP_E_UNKNOWNINTERFACE: Self = Self(0x8002_0001_u32 as i32);
    pub const DISP_E_MEMBERNOTFOUND: Self = Self(0x8002_0003_u32 as i32);
    pub const DISP_E_PARAMNOTFOUND: Self = Self(0x8002_0004_u32 as i32);
    pub const DISP_E_TYPEMISMATCH: Self = Self(0x8002_0005_u32 as i32);
    pub const DISP_E_UNKNOWNNAME: Self = Self(0x8002_0006_u32 as i32);
    pub const DISP_E_BADVARTYPE: Self = Self(0x8002_0008_u32 as i32);
    pub const DISP_E_EXCEPTION: Self = Self(0x8002_0009_u32 as i32);
    pub const DISP_E_BADPARAMCOUNT: Self = Self(0x8002_000E_u32 as i32);
    pub const RPC_E_CHANGED_MODE: Self = Self(0x8001_0106_u32 as i32);
    pub const REGDB_E_CLASSNOTREG: Self = Self(0x8004_0154_u32 as i32);
    pub const CO_E_CLASSSTRING: Self = Self(0x8004_01F3_u32 as i32);
    pub const CO_E_NOTINITIALIZED: Self = Self(0x8004_01F0_u32 as i32);

    #[inline]
    pub const fn is_success(self) -> bool {
        self.0 >= 0
    }

    #[inline]
    pub const fn is_failure(self) -> bool {
        self.0 < 0
    }

    /// Status as the unsigned code printed in messages
    #[inline]
    pub const fn code(self) -> u32 {
        self.0 as u32
    }

    /// `Ok(())` for success codes, `Err(self)` otherwise
    #[inline]
    pub fn ok(self) -> Result<(), Hresult> {
        if self.is_success() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for Hresult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.code())
    }
}

impl fmt::Debug for Hresult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hresult({})", self)
    }
}

impl From<u32> for Hresult {
    fn from(code: u32) -> Self {
        Self(code as i32)
    }
}

/// Every way a bridge call can fail
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    #[error("session initialization failed: {status}")]
    InitializationFailed { status: Hresult },

    #[error("class identity '{identity}' could not be resolved: {status}")]
    ClassResolutionFailed { identity: String, status: Hresult },

    #[error("activation of '{identity}' failed: {status}")]
    ActivationFailed { identity: String, status: Hresult },

    #[error("member '{member}' not found")]
    MemberNotFound { member: String, status: Hresult },

    #[error("bad argument {index} for member '{member}': {status}")]
    ArgumentMismatch {
        member: String,
        status: Hresult,
        /// 1-based position in declaration order
        index: usize,
    },

    #[error("member '{member}' raised error {code}: {source_text} {description}")]
    NativeException {
        member: String,
        code: u32,
        source_text: String,
        description: String,
    },

    #[error("invocation of '{member}' failed: {status}")]
    InvocationFailed { member: String, status: Hresult },

    #[error("result of '{member}' on '{identity}' not convertible (variant type 0x{tag:x}): {status}")]
    ResultConversionFailed {
        tag: u16,
        identity: String,
        member: String,
        status: Hresult,
    },

    #[error("argument buffer of {length} bytes is not a multiple of {slot_size}")]
    InvalidArgumentBuffer { length: usize, slot_size: usize },

    #[error("insufficient resources: allocation failed")]
    AllocationFailed,

    #[error("unexpected failure: {detail}")]
    UnexpectedFailure { detail: String },
}

impl BridgeError {
    /// Native status carried by the failure, when there is one
    pub fn status(&self) -> Option<Hresult> {
        match self {
            Self::InitializationFailed { status }
            | Self::ClassResolutionFailed { status, .. }
            | Self::ActivationFailed { status, .. }
            | Self::MemberNotFound { status, .. }
            | Self::ArgumentMismatch { status, .. }
            | Self::InvocationFailed { status, .. }
            | Self::ResultConversionFailed { status, .. } => Some(*status),
            Self::NativeException { code, .. } => Some(Hresult::from(*code)),
            Self::AllocationFailed => Some(Hresult::E_OUTOFMEMORY),
            Self::InvalidArgumentBuffer { .. } | Self::UnexpectedFailure { .. } => None,
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

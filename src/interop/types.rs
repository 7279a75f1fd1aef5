//! Variant type tags and the typed value model
//!
//! Wire layout of one argument slot (16 bytes, little endian):
//! - bytes 0..2: variant type tag
//! - bytes 2..8: reserved
//! - bytes 8..16: payload

use crate::errors::Hresult;

/// Size in bytes of one encoded variant slot
pub const SLOT_SIZE: usize = 16;

const TAG_OFFSET: usize = 0;
const PAYLOAD_OFFSET: usize = 8;

/// Automation variant type tag
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct VarType(pub u16);

impl VarType {
    pub const EMPTY: Self = Self(0);
    pub const NULL: Self = Self(1);
    pub const I2: Self = Self(2);
    pub const I4: Self = Self(3);
    pub const R4: Self = Self(4);
    pub const R8: Self = Self(5);
    pub const CY: Self = Self(6);
    pub const DATE: Self = Self(7);
    pub const BSTR: Self = Self(8);
    pub const DISPATCH: Self = Self(9);
    pub const ERROR: Self = Self(10);
    pub const BOOL: Self = Self(11);
    pub const VARIANT: Self = Self(12);
    pub const UNKNOWN: Self = Self(13);
    pub const DECIMAL: Self = Self(14);
    pub const I1: Self = Self(16);
    pub const UI1: Self = Self(17);
    pub const UI2: Self = Self(18);
    pub const UI4: Self = Self(19);
    pub const I8: Self = Self(20);
    pub const UI8: Self = Self(21);
    pub const INT: Self = Self(22);
    pub const UINT: Self = Self(23);

    pub const ARRAY: u16 = 0x2000;
    pub const BYREF: u16 = 0x4000;
    pub const TYPEMASK: u16 = 0x0FFF;

    #[inline]
    pub const fn is_byref(self) -> bool {
        self.0 & Self::BYREF != 0
    }

    #[inline]
    pub const fn is_array(self) -> bool {
        self.0 & Self::ARRAY != 0
    }

    /// Tag with the by-reference and array flags stripped
    #[inline]
    pub const fn base(self) -> Self {
        Self(self.0 & Self::TYPEMASK)
    }

    #[inline]
    pub const fn by_ref(self) -> Self {
        Self(self.0 | Self::BYREF)
    }
}

impl core::fmt::Debug for VarType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "VarType(0x{:04x})", self.0)
    }
}

/// Native typed value (the decoded form of a variant)
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Empty,
    Null,
    Error(i32),
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Int(i32),
    UInt(u32),
    F32(f32),
    F64(f64),
    String(String),
    /// By-reference wrapper, dereferenced before classification
    ByRef(Box<TypedValue>),
    /// Array passed by reference; recognized, never converted
    ByRefArray,
    /// Reference to a nested variant
    VariantRef(Box<TypedValue>),
    /// Any tag the bridge does not model
    Other(VarType),
}

impl TypedValue {
    /// Variant tag this value would carry on the wire
    pub fn var_type(&self) -> VarType {
        match self {
            Self::Empty => VarType::EMPTY,
            Self::Null => VarType::NULL,
            Self::Error(_) => VarType::ERROR,
            Self::Bool(_) => VarType::BOOL,
            Self::I8(_) => VarType::I1,
            Self::I16(_) => VarType::I2,
            Self::I32(_) => VarType::I4,
            Self::I64(_) => VarType::I8,
            Self::U8(_) => VarType::UI1,
            Self::U16(_) => VarType::UI2,
            Self::U32(_) => VarType::UI4,
            Self::U64(_) => VarType::UI8,
            Self::Int(_) => VarType::INT,
            Self::UInt(_) => VarType::UINT,
            Self::F32(_) => VarType::R4,
            Self::F64(_) => VarType::R8,
            Self::String(_) => VarType::BSTR,
            Self::ByRef(inner) => inner.var_type().by_ref(),
            Self::ByRefArray => VarType(VarType::BYREF | VarType::ARRAY | VarType::VARIANT.0),
            Self::VariantRef(_) => VarType::VARIANT.by_ref(),
            Self::Other(vt) => *vt,
        }
    }

    #[inline]
    pub fn is_nothing(&self) -> bool {
        matches!(self, Self::Empty | Self::Null | Self::Error(_))
    }
}

impl Default for TypedValue {
    #[inline]
    fn default() -> Self {
        Self::Empty
    }
}

/// One raw 16-byte argument slot, uninterpreted
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(C, align(8))]
pub struct Slot {
    bytes: [u8; SLOT_SIZE],
}

impl Slot {
    #[inline]
    pub const fn zeroed() -> Self {
        Self { bytes: [0; SLOT_SIZE] }
    }

    #[inline]
    pub fn from_bytes(bytes: &[u8; SLOT_SIZE]) -> Self {
        Self { bytes: *bytes }
    }

    /// Build a slot from a tag and the first bytes of a payload
    pub fn with_payload(vt: VarType, payload: &[u8]) -> Self {
        debug_assert!(payload.len() <= SLOT_SIZE - PAYLOAD_OFFSET);
        let mut slot = Self::zeroed();
        slot.bytes[TAG_OFFSET..TAG_OFFSET + 2].copy_from_slice(&vt.0.to_le_bytes());
        slot.bytes[PAYLOAD_OFFSET..PAYLOAD_OFFSET + payload.len()].copy_from_slice(payload);
        slot
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; SLOT_SIZE] {
        &self.bytes
    }

    #[inline]
    pub fn var_type(&self) -> VarType {
        VarType(u16::from_le_bytes([self.bytes[TAG_OFFSET], self.bytes[TAG_OFFSET + 1]]))
    }

    #[inline]
    fn payload<const N: usize>(&self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[PAYLOAD_OFFSET..PAYLOAD_OFFSET + N]);
        out
    }

    #[inline]
    pub fn payload_u64(&self) -> u64 {
        u64::from_le_bytes(self.payload::<8>())
    }

    /// Interpret the slot as a typed value.
    ///
    /// String payloads are opaque handles, looked up through `strings`.
    /// By-reference slots, arrays included, cannot cross a byte buffer and
    /// are rejected with `DISP_E_BADVARTYPE`.
    pub fn to_typed_value(
        &self,
        strings: &dyn Fn(u64) -> Option<String>,
    ) -> Result<TypedValue, Hresult> {
        let vt = self.var_type();

        if vt.is_byref() || vt.is_array() {
            return Err(Hresult::DISP_E_BADVARTYPE);
        }

        let value = match vt {
            VarType::EMPTY => TypedValue::Empty,
            VarType::NULL => TypedValue::Null,
            VarType::ERROR => TypedValue::Error(i32::from_le_bytes(self.payload::<4>())),
            VarType::BOOL => TypedValue::Bool(i16::from_le_bytes(self.payload::<2>()) != 0),
            VarType::I1 => TypedValue::I8(i8::from_le_bytes(self.payload::<1>())),
            VarType::I2 => TypedValue::I16(i16::from_le_bytes(self.payload::<2>())),
            VarType::I4 => TypedValue::I32(i32::from_le_bytes(self.payload::<4>())),
            VarType::I8 => TypedValue::I64(i64::from_le_bytes(self.payload::<8>())),
            VarType::UI1 => TypedValue::U8(self.payload::<1>()[0]),
            VarType::UI2 => TypedValue::U16(u16::from_le_bytes(self.payload::<2>())),
            VarType::UI4 => TypedValue::U32(u32::from_le_bytes(self.payload::<4>())),
            VarType::UI8 => TypedValue::U64(self.payload_u64()),
            VarType::INT => TypedValue::Int(i32::from_le_bytes(self.payload::<4>())),
            VarType::UINT => TypedValue::UInt(u32::from_le_bytes(self.payload::<4>())),
            VarType::R4 => TypedValue::F32(f32::from_le_bytes(self.payload::<4>())),
            VarType::R8 => TypedValue::F64(f64::from_le_bytes(self.payload::<8>())),
            VarType::BSTR => {
                let text = strings(self.payload_u64()).ok_or(Hresult::E_INVALIDARG)?;
                TypedValue::String(text)
            }
            _ => return Err(Hresult::DISP_E_BADVARTYPE),
        };

        Ok(value)
    }
}

impl Default for Slot {
    #[inline]
    fn default() -> Self {
        Self::zeroed()
    }
}

impl core::fmt::Debug for Slot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Slot {{ vt: {:?}, payload: 0x{:016x} }}", self.var_type(), self.payload_u64())
    }
}

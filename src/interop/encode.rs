//! Argument encoding - managed values into the slot layout
//!
//! Arguments are laid out last-first, the order automation servers expect
//! positional arguments in.

use thiserror::Error;

use super::strings::{StringHandle, StringTable};
use super::types::{Slot, VarType, SLOT_SIZE};
use crate::host::ManagedValue;

/// A managed value with no slot encoding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("arrays are unsupported, type received: {type_name}")]
    ArrayUnsupported { type_name: String },
    #[error("unsupported data type received: {type_name}")]
    UnsupportedType { type_name: String },
}

/// Builds an argument buffer one value at a time
pub struct ArgumentBuilder<'t> {
    strings: &'t StringTable,
    slots: Vec<Slot>,
}

impl<'t> ArgumentBuilder<'t> {
    pub fn new(strings: &'t StringTable) -> Self {
        Self {
            strings,
            slots: Vec::new(),
        }
    }

    pub fn with_capacity(strings: &'t StringTable, capacity: usize) -> Self {
        Self {
            strings,
            slots: Vec::with_capacity(capacity),
        }
    }

    /// Append the next argument (declaration order)
    pub fn push(&mut self, value: &ManagedValue) -> Result<&mut Self, EncodeError> {
        let slot = self.encode(value)?;
        self.slots.push(slot);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Produce the buffer, last argument first.
    ///
    /// String handles now belong to whichever call decodes the buffer.
    pub fn finish(mut self) -> Vec<u8> {
        let slots = std::mem::take(&mut self.slots);
        let mut out = Vec::with_capacity(slots.len() * SLOT_SIZE);
        for slot in slots.iter().rev() {
            out.extend_from_slice(slot.as_bytes());
        }
        out
    }

    fn encode(&self, value: &ManagedValue) -> Result<Slot, EncodeError> {
        let slot = match value {
            ManagedValue::Null | ManagedValue::Void => Slot::with_payload(VarType::NULL, &[]),
            ManagedValue::Boolean(v) => {
                let fill = if *v { 0xff } else { 0 };
                Slot::with_payload(VarType::BOOL, &[fill; 4])
            }
            ManagedValue::Integer(v) => Slot::with_payload(VarType::I4, &v.to_le_bytes()),
            ManagedValue::Short(v) => Slot::with_payload(VarType::I2, &v.to_le_bytes()),
            // No native long in the automation subset: promote to double
            ManagedValue::Long(v) => Slot::with_payload(VarType::R8, &(*v as f64).to_le_bytes()),
            ManagedValue::Float(v) => Slot::with_payload(VarType::R4, &v.to_le_bytes()),
            ManagedValue::Double(v) => Slot::with_payload(VarType::R8, &v.to_le_bytes()),
            ManagedValue::Byte(v) => Slot::with_payload(VarType::UI1, &[*v as u8]),
            ManagedValue::Character(c) => Slot::with_payload(VarType::UI1, &[*c as u32 as u8]),
            ManagedValue::String(text) => {
                let handle = self.strings.allocate(text);
                Slot::with_payload(VarType::BSTR, &handle.0.to_le_bytes())
            }
            ManagedValue::Array(_) => {
                return Err(EncodeError::ArrayUnsupported {
                    type_name: value.type_name().to_owned(),
                })
            }
            ManagedValue::Object(name) => {
                return Err(EncodeError::UnsupportedType {
                    type_name: name.clone(),
                })
            }
        };
        Ok(slot)
    }
}

impl Drop for ArgumentBuilder<'_> {
    fn drop(&mut self) {
        // Abandoned builder: nobody will decode these strings
        for slot in &self.slots {
            if slot.var_type() == VarType::BSTR {
                self.strings.release(StringHandle(slot.payload_u64()));
            }
        }
    }
}

/// Encode a whole argument list (declaration order in, buffer order out)
pub fn encode_arguments(
    strings: &StringTable,
    values: &[ManagedValue],
) -> Result<Vec<u8>, EncodeError> {
    let mut builder = ArgumentBuilder::with_capacity(strings, values.len());
    for value in values {
        builder.push(value)?;
    }
    Ok(builder.finish())
}

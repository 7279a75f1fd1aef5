//! Interoperability - typed values crossing the bridge
//!
//! Design: fixed-size slots on the wire, a recursive enum in memory.
//!
//! Architecture:
//! - `types.rs` - variant tags, `TypedValue`, raw `Slot`
//! - `decode.rs` - caller buffer → call-owned `ArgumentList`
//! - `encode.rs` - managed values → caller buffer
//! - `strings.rs` - string handles referenced from slots
//! - `marshal.rs` - `TypedValue` → managed object

mod types;
mod decode;
mod encode;
mod strings;
mod marshal;

pub use types::{Slot, TypedValue, VarType, SLOT_SIZE};
pub use decode::{release_slot_strings, ArgumentList};
pub use encode::{encode_arguments, ArgumentBuilder, EncodeError};
pub use strings::{StringHandle, StringTable};
pub use marshal::{
    to_managed_object, type_label, Conversion, ConversionError, ConvertOptions, Int64Policy,
};

#[cfg(test)]
mod tests;

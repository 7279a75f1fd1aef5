//! Argument buffer decoding
//!
//! The caller's buffer is copied into call-owned storage before anything
//! looks at it; element tags are not validated until the values are used.

use super::strings::{StringHandle, StringTable};
use super::types::{Slot, TypedValue, VarType, SLOT_SIZE};
use crate::errors::{BridgeError, BridgeResult, Hresult};
use crate::logging::trace;

/// Decoded arguments of one call, in buffer order
///
/// String handles referenced by the slots belong to the call and are
/// released when the list is dropped.
pub struct ArgumentList<'t> {
    slots: Vec<Slot>,
    strings: &'t StringTable,
}

impl<'t> ArgumentList<'t> {
    /// Copy `bytes` into a call-owned argument list.
    ///
    /// An absent or empty buffer yields an empty list. A length that is not
    /// a whole number of slots is rejected.
    pub fn decode(bytes: Option<&[u8]>, strings: &'t StringTable) -> BridgeResult<Self> {
        let bytes = bytes.unwrap_or_default();

        if bytes.len() % SLOT_SIZE != 0 {
            release_slot_strings(Some(bytes), strings);
            return Err(BridgeError::InvalidArgumentBuffer {
                length: bytes.len(),
                slot_size: SLOT_SIZE,
            });
        }

        let count = bytes.len() / SLOT_SIZE;
        let mut slots = Vec::new();
        if slots.try_reserve_exact(count).is_err() {
            release_slot_strings(Some(bytes), strings);
            return Err(BridgeError::AllocationFailed);
        }

        for chunk in bytes.chunks_exact(SLOT_SIZE) {
            let mut raw = [0u8; SLOT_SIZE];
            raw.copy_from_slice(chunk);
            slots.push(Slot::from_bytes(&raw));
        }

        trace!(target: "interop", count, "argument buffer decoded");
        Ok(Self { slots, strings })
    }

    /// Empty list (zero-argument call)
    pub fn empty(strings: &'t StringTable) -> Self {
        Self { slots: Vec::new(), strings }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Interpret slot `index`; `None` when out of range
    pub fn typed_value(&self, index: usize) -> Option<Result<TypedValue, Hresult>> {
        let strings = self.strings;
        self.slots
            .get(index)
            .map(|slot| slot.to_typed_value(&|id: u64| strings.resolve(StringHandle(id))))
    }

    /// Interpret every slot in order
    pub fn typed_values(&self) -> impl Iterator<Item = Result<TypedValue, Hresult>> + '_ {
        (0..self.slots.len()).filter_map(move |i| self.typed_value(i))
    }
}

/// Release the string handles named by the whole slots of a buffer that
/// never became an `ArgumentList`. Returns how many were live.
pub fn release_slot_strings(bytes: Option<&[u8]>, strings: &StringTable) -> usize {
    let bytes = bytes.unwrap_or_default();
    let released = bytes
        .chunks_exact(SLOT_SIZE)
        .filter_map(|chunk| <&[u8; SLOT_SIZE]>::try_from(chunk).ok())
        .map(Slot::from_bytes)
        .filter(|slot| slot.var_type() == VarType::BSTR)
        .filter(|slot| strings.release(StringHandle(slot.payload_u64())))
        .count();
    if released > 0 {
        trace!(target: "interop", released, "unused argument strings released");
    }
    released
}

impl Drop for ArgumentList<'_> {
    fn drop(&mut self) {
        for slot in &self.slots {
            if slot.var_type() == VarType::BSTR {
                self.strings.release(StringHandle(slot.payload_u64()));
            }
        }
        trace!(target: "interop", count = self.slots.len(), "argument buffer released");
    }
}

impl core::fmt::Debug for ArgumentList<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.slots.iter()).finish()
    }
}

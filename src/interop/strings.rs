//! String handles - opaque native strings passed inside argument slots
//!
//! A string argument cannot travel inside a 16-byte slot, so the caller first
//! registers the text and receives a handle; the slot carries the handle.
//! Handles are consumed by the call whose argument list references them.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{Slot, VarType, SLOT_SIZE};
use crate::logging::trace;

/// Opaque handle to a registered string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct StringHandle(pub u64);

/// Concurrent table of live string handles
#[derive(Debug)]
pub struct StringTable {
    next: AtomicU64,
    entries: DashMap<u64, String>,
}

impl StringTable {
    pub fn new() -> Self {
        Self {
            // 0 stays free so a zeroed slot never names a live string
            next: AtomicU64::new(1),
            entries: DashMap::new(),
        }
    }

    /// Register `text` and return its handle
    pub fn allocate(&self, text: &str) -> StringHandle {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(id, text.to_owned());
        trace!(target: "interop", handle = id, len = text.len(), "string handle allocated");
        StringHandle(id)
    }

    /// Copy of the text behind `handle`
    pub fn resolve(&self, handle: StringHandle) -> Option<String> {
        self.entries.get(&handle.0).map(|entry| entry.value().clone())
    }

    /// Drop the text behind `handle`; unknown handles are ignored
    pub fn release(&self, handle: StringHandle) -> bool {
        let released = self.entries.remove(&handle.0).is_some();
        if released {
            trace!(target: "interop", handle = handle.0, "string handle released");
        }
        released
    }

    /// Number of live handles
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register `text` and package it as a complete string slot
    ///
    /// The slot is good for one call; decoding it hands the handle to that
    /// call's argument list.
    pub fn encode(&self, text: &str) -> [u8; SLOT_SIZE] {
        let handle = self.allocate(text);
        *Slot::with_payload(VarType::BSTR, &handle.0.to_le_bytes()).as_bytes()
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

//! Diagnostics - caller-facing event levels and message delivery
//!
//! Events are filtered by a bitmask the caller controls. Every event that
//! passes the mask is formatted from the message catalog and handed to the
//! host's log sink; all events are also mirrored into `tracing`.

mod messages;

pub use messages::{format_message, MessageArg, MessageId, FALLBACK_MESSAGE};

use std::sync::atomic::{AtomicU16, Ordering};

use crate::host::ManagedHost;
use crate::logging::{debug, error, info, warn};

/// Caller-facing event class (one bit each)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EventLevel {
    Information = 0x1000,
    Success = 0x100,
    Warning = 0x10,
    Error = 0x1,
}

impl EventLevel {
    #[inline]
    pub const fn bit(self) -> u16 {
        self as u16
    }
}

/// Bitmask of enabled event levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct DiagnosticLevel(pub u16);

impl DiagnosticLevel {
    pub const NONE: Self = Self(0);
    pub const ERROR: Self = Self(EventLevel::Error.bit());
    pub const WARNING: Self = Self(EventLevel::Warning.bit() | EventLevel::Error.bit());
    pub const SUCCESS: Self =
        Self(EventLevel::Success.bit() | EventLevel::Warning.bit() | EventLevel::Error.bit());
    pub const INFORMATION: Self = Self(
        EventLevel::Information.bit()
            | EventLevel::Success.bit()
            | EventLevel::Warning.bit()
            | EventLevel::Error.bit(),
    );

    /// Only the success bit
    pub const DEFAULT: Self = Self(EventLevel::Success.bit());

    #[inline]
    pub const fn enables(self, level: EventLevel) -> bool {
        self.0 & level.bit() != 0
    }

    /// Parse a level name (cumulative) or a decimal mask.
    ///
    /// Unrecognized input yields `ERROR`.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.eq_ignore_ascii_case("INFORMATION") {
            Self::INFORMATION
        } else if text.eq_ignore_ascii_case("SUCCESS") {
            Self::SUCCESS
        } else if text.eq_ignore_ascii_case("WARNING") {
            Self::WARNING
        } else if text.eq_ignore_ascii_case("ERROR") {
            Self::ERROR
        } else {
            text.parse::<i16>().map(|n| Self(n as u16)).unwrap_or(Self::ERROR)
        }
    }
}

impl Default for DiagnosticLevel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Shared diagnostic state of one bridge
#[derive(Debug)]
pub struct Diagnostics {
    level: AtomicU16,
}

impl Diagnostics {
    pub fn new(level: DiagnosticLevel) -> Self {
        Self {
            level: AtomicU16::new(level.0),
        }
    }

    #[inline]
    pub fn level(&self) -> DiagnosticLevel {
        DiagnosticLevel(self.level.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_level(&self, level: DiagnosticLevel) {
        self.level.store(level.0, Ordering::Release);
    }

    /// Snapshot for one call; the level does not change mid-call
    #[inline]
    pub fn snapshot(&self) -> CallDiagnostics {
        CallDiagnostics { level: self.level() }
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DiagnosticLevel::DEFAULT)
    }
}

/// Diagnostic level frozen for the duration of one call
#[derive(Debug, Clone, Copy)]
pub struct CallDiagnostics {
    level: DiagnosticLevel,
}

impl CallDiagnostics {
    pub fn new(level: DiagnosticLevel) -> Self {
        Self { level }
    }

    #[inline]
    pub fn level(&self) -> DiagnosticLevel {
        self.level
    }

    /// Format and deliver an event if its bit is enabled.
    ///
    /// Returns whether the host sink received it.
    pub fn log_event<H: ManagedHost + ?Sized>(
        &self,
        host: &H,
        level: EventLevel,
        id: MessageId,
        args: &[MessageArg],
    ) -> bool {
        let message = format_message(id, args);
        mirror(level, id, &message);

        if !self.level.enables(level) {
            return false;
        }
        host.log(level, &message);
        true
    }

    /// Format a message and turn it into the host's exception value
    pub fn raise_caller_error<H: ManagedHost + ?Sized>(
        &self,
        host: &H,
        id: MessageId,
        args: &[MessageArg],
    ) -> H::Exception {
        let message = format_message(id, args);
        debug!(target: "diagnostics", message_id = ?id, text = %message, "raising caller exception");
        host.raise(&message)
    }
}

fn mirror(level: EventLevel, id: MessageId, message: &str) {
    match level {
        EventLevel::Information => debug!(target: "diagnostics", message_id = ?id, "{}", message),
        EventLevel::Success => info!(target: "diagnostics", message_id = ?id, "{}", message),
        EventLevel::Warning => warn!(target: "diagnostics", message_id = ?id, "{}", message),
        EventLevel::Error => error!(target: "diagnostics", message_id = ?id, "{}", message),
    }
}

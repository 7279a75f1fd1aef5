//! Per-call threading session
//!
//! A `Session` exists only after initialization succeeded and tears down the
//! matching family exactly once when dropped, on every exit path.

use super::runtime::{ApartmentModel, AutomationRuntime};
use crate::errors::{BridgeError, BridgeResult};
use crate::logging::{log_session_begin, log_session_end};

/// Threading model requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionMode {
    #[default]
    Multithreaded,
    ApartmentThreaded,
    SingleApartmentThreaded,
}

impl SessionMode {
    /// Map a caller token (case-sensitive); unrecognized text is multithreaded
    pub fn from_token(token: &str) -> Self {
        match token {
            "APARTMENTTHREADED" => Self::ApartmentThreaded,
            "SINGLEAPARTMENTTHREADED" => Self::SingleApartmentThreaded,
            _ => Self::Multithreaded,
        }
    }

    pub const fn token(self) -> &'static str {
        match self {
            Self::Multithreaded => "MULTITHREADED",
            Self::ApartmentThreaded => "APARTMENTTHREADED",
            Self::SingleApartmentThreaded => "SINGLEAPARTMENTTHREADED",
        }
    }

    pub const fn family(self) -> InitFamily {
        match self {
            Self::Multithreaded | Self::ApartmentThreaded => InitFamily::Apartment,
            Self::SingleApartmentThreaded => InitFamily::Legacy,
        }
    }
}

/// Which initialization primitive pair a session used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitFamily {
    /// `initialize` / `uninitialize`
    Apartment,
    /// `ole_initialize` / `ole_uninitialize`
    Legacy,
}

impl InitFamily {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Apartment => "apartment",
            Self::Legacy => "legacy",
        }
    }
}

/// Active threading session, torn down on drop
pub struct Session<'r, R: AutomationRuntime + ?Sized> {
    runtime: &'r R,
    mode: SessionMode,
}

impl<'r, R: AutomationRuntime + ?Sized> Session<'r, R> {
    /// Initialize the calling thread for `token`'s mode
    pub fn begin(runtime: &'r R, token: &str) -> BridgeResult<Self> {
        let mode = SessionMode::from_token(token);
        Self::begin_mode(runtime, mode)
    }

    pub fn begin_mode(runtime: &'r R, mode: SessionMode) -> BridgeResult<Self> {
        let status = match mode {
            SessionMode::Multithreaded => runtime.initialize(ApartmentModel::Multithreaded),
            SessionMode::ApartmentThreaded => runtime.initialize(ApartmentModel::ApartmentThreaded),
            SessionMode::SingleApartmentThreaded => runtime.ole_initialize(),
        };

        // S_FALSE (already initialized) still needs its teardown
        status
            .ok()
            .map_err(|status| BridgeError::InitializationFailed { status })?;

        log_session_begin(mode.token(), mode.family().name());
        Ok(Self { runtime, mode })
    }

    #[inline]
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    #[inline]
    pub fn family(&self) -> InitFamily {
        self.mode.family()
    }

    /// End the session now instead of at scope exit
    pub fn end(self) {}
}

impl<R: AutomationRuntime + ?Sized> Drop for Session<'_, R> {
    fn drop(&mut self) {
        match self.family() {
            InitFamily::Apartment => self.runtime.uninitialize(),
            InitFamily::Legacy => self.runtime.ole_uninitialize(),
        }
        log_session_end(self.family().name());
    }
}

impl<R: AutomationRuntime + ?Sized> std::fmt::Debug for Session<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("mode", &self.mode).finish()
    }
}

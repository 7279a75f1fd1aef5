//! Logging infrastructure - structured tracing throughout the bridge
//!
//! Design: `tracing` everywhere, a subscriber installed at most once.
//! - Level and destination from `LATEBIND_LOG_*` variables
//! - Console or file output, human-readable or JSON
//! - An already-installed subscriber (the host's) is left alone
//!
//! Caller-facing events go through `diagnostics`; this module is for the
//! operator of the process.

use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

pub use tracing::{debug, error, info, info_span, trace, warn, Level};

/// Installed-once state; holds the file writer's flush guard
static LOGGER: OnceCell<Option<WorkerGuard>> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "latebind.log";

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Log file path; console when absent
    pub log_path: Option<String>,
    /// JSON lines instead of human-readable output
    pub json_format: bool,
    /// Show span events (enter/close)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // LATEBIND_LOG_LEVEL: trace, debug, info, warn, error
        if let Some(level) = lookup("LATEBIND_LOG_LEVEL") {
            config.level = parse_level(&level).unwrap_or(Level::WARN);
        }

        // LATEBIND_LOG_FILE: path to log file
        config.log_path = lookup("LATEBIND_LOG_FILE").filter(|p| !p.is_empty());

        config.json_format = lookup("LATEBIND_LOG_JSON").is_some();
        config.show_spans = lookup("LATEBIND_LOG_SPANS").is_some();

        config
    }

    /// Verbose config for debugging a host integration
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            log_path: Some(DEFAULT_LOG_FILE.to_string()),
            json_format: false,
            show_spans: true,
        }
    }
}

fn parse_level(text: &str) -> Option<Level> {
    match text.trim().to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize logging from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration
pub fn init_with_config(config: LogConfig) {
    LOGGER.get_or_init(|| {
        // Bridge events use short targets (dispatch, interop, ...), so the
        // fallback directive is a bare level
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let (writer, guard) = match config.log_path.as_deref() {
            Some(path) => {
                let (dir, file) = split_log_path(path);
                let appender = tracing_appender::rolling::never(dir, file);
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                (BoxMakeWriter::new(non_blocking), Some(guard))
            }
            None => (BoxMakeWriter::new(io::stdout), None),
        };

        let registry = tracing_subscriber::registry().with(env_filter);
        let installed = if config.json_format {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(writer)
                        .with_span_events(span_events)
                        .with_target(true),
                )
                .try_init()
        } else {
            registry
                .with(
                    fmt::layer()
                        .with_writer(writer)
                        .with_span_events(span_events)
                        .with_target(true)
                        .with_thread_ids(cfg!(debug_assertions))
                        .with_line_number(cfg!(debug_assertions)),
                )
                .try_init()
        };

        // The host process may already own the global subscriber
        if let Err(err) = installed {
            debug!(target: "logging", %err, "subscriber already installed");
        }
        guard
    });
}

fn split_log_path(path: &str) -> (&Path, &str) {
    let path = Path::new(path);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_LOG_FILE);
    (dir, file)
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER.get().is_some()
}

// ============================================================================
// Bridge-specific logging functions
// ============================================================================

/// Log a result conversion
#[inline]
pub fn log_type_conversion(from_type: &str, to_type: &str) {
    trace!(
        target: "interop",
        event = "type_conversion",
        from = from_type,
        to = to_type,
        "type conversion performed"
    );
}

/// Log the start of a native invocation
#[inline]
pub fn log_dispatch_call(member: &str, arg_count: usize) {
    debug!(
        target: "dispatch",
        event = "dispatch_call",
        member,
        args = arg_count,
        "invoking member"
    );
}

/// Log the end of a native invocation
#[inline]
pub fn log_dispatch_return(member: &str, succeeded: bool) {
    trace!(
        target: "dispatch",
        event = "dispatch_return",
        member,
        succeeded,
        "member returned"
    );
}

/// Log a session initialization
pub fn log_session_begin(mode: &str, family: &str) {
    debug!(
        target: "session",
        event = "session_begin",
        mode,
        family,
        "threading session initialized"
    );
}

/// Log a session teardown
pub fn log_session_end(family: &str) {
    debug!(
        target: "session",
        event = "session_end",
        family,
        "threading session torn down"
    );
}

/// Log an entry point call
pub fn log_ffi_call(fn_name: &str) {
    debug!(
        target: "ffi",
        event = "ffi_call",
        function = fn_name,
        "entry point called"
    );
}

/// Log an entry point rejecting its input
pub fn log_ffi_error(fn_name: &str, error: &str) {
    error!(
        target: "ffi",
        event = "ffi_error",
        function = fn_name,
        error,
        "entry point error"
    );
}

/// Performance tracking utilities
pub mod perf {
    use std::time::Instant;
    use tracing::debug;

    /// Track operation duration (returns guard that logs on drop)
    #[must_use]
    pub fn track(operation: &'static str) -> PerformanceGuard {
        PerformanceGuard {
            operation,
            start: Instant::now(),
        }
    }

    pub struct PerformanceGuard {
        operation: &'static str,
        start: Instant,
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            debug!(
                target: "perf",
                operation = self.operation,
                duration_us = self.start.elapsed().as_micros() as u64,
                "operation completed"
            );
        }
    }
}

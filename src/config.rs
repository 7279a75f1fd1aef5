//! Bridge configuration (TOML)
//!
//! ```toml
//! [diagnostics]
//! level = "SUCCESS"
//!
//! [dispatch]
//! int64_policy = "full"
//! max_reference_depth = 8
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::diagnostics::DiagnosticLevel;
use crate::interop::{ConvertOptions, Int64Policy};

/// Environment variable naming a configuration file
pub const CONFIG_ENV: &str = "LATEBIND_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Level name (INFORMATION, SUCCESS, WARNING, ERROR) or decimal mask.
    /// Absent means the success bit only.
    #[serde(default)]
    pub level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub int64_policy: Int64Policy,

    #[serde(default = "default_reference_depth")]
    pub max_reference_depth: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            int64_policy: Int64Policy::Full,
            max_reference_depth: default_reference_depth(),
        }
    }
}

fn default_reference_depth() -> usize { 8 }

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load the file named by `LATEBIND_CONFIG`, defaults when unset
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::load(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    /// Generate default configuration file content
    pub fn generate_default() -> String {
        r#"# latebind configuration

[diagnostics]
# INFORMATION, SUCCESS, WARNING, ERROR or a decimal bitmask
# (absent: success events only)
# level = "WARNING"

[dispatch]
# "full" or "legacy32" (64-bit results truncated to their low 32 bits)
int64_policy = "full"
max_reference_depth = 8
"#
        .to_string()
    }

    /// Initial caller-facing diagnostic level
    pub fn diagnostic_level(&self) -> DiagnosticLevel {
        self.diagnostics
            .level
            .as_deref()
            .map(DiagnosticLevel::parse)
            .unwrap_or_default()
    }

    /// Result conversion options
    pub fn convert_options(&self) -> ConvertOptions {
        ConvertOptions {
            int64: self.dispatch.int64_policy,
            max_reference_depth: self.dispatch.max_reference_depth,
        }
    }
}

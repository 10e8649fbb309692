//! Build configuration for the driver.
//!
//! The `build` subcommand assembles and links through an external C
//! toolchain. Which toolchain, and with what extra arguments, can be set
//! in a small TOML file; command-line flags override file values.

use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Configuration for the assemble-and-link step.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildConfig {
    /// Toolchain command used to assemble and link the emitted `.s`.
    pub cc: String,
    /// Keep the intermediate assembly file next to the output.
    pub keep_asm: bool,
    /// Extra arguments appended to the toolchain invocation.
    pub extra_cc_args: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            cc: "cc".to_string(),
            keep_asm: false,
            extra_cc_args: Vec::new(),
        }
    }
}

impl BuildConfig {
    /// Parse a build configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, String> {
        toml::from_str(toml_str).map_err(|e| format!("Failed to parse build config: {}", e))
    }

    /// Load a build configuration from a file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read build config '{}': {}", path.display(), e))?;
        Self::from_toml(&content)
    }
}

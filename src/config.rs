//! Analyzer configuration
//!
//! Values come from an optional TOML file and are then overridden by
//! command-line flags.
//!
//! ```
//! use memvis::config::AnalyzerConfig;
//!
//! let config = AnalyzerConfig::default();
//! assert_eq!(config.page_size_kb, 4);
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MemvisError, Result};
use crate::page_map::KIB;

/// Largest page size whose byte count still fits in a `u64`
pub const MAX_PAGE_SIZE_KB: u64 = u64::MAX / KIB;

/// Settings for one analysis run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Page size in kilobytes
    pub page_size_kb: u64,

    /// Report every page between the lowest and highest occupied page,
    /// and count them all when deciding whether to widen pages
    pub all_pages: bool,

    /// Never widen pages, whatever the page count
    pub force_page_size: bool,

    /// Line content separating snapshots inside a compressed trace
    pub snapshot_marker: Option<String>,

    /// Directory receiving the report artifacts
    pub output_dir: PathBuf,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            page_size_kb: 4,
            all_pages: false,
            force_page_size: false,
            snapshot_marker: None,
            output_dir: PathBuf::from("."),
        }
    }
}

impl AnalyzerConfig {
    /// Load from a TOML file; missing keys take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| MemvisError::StreamOpen {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| MemvisError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size_kb == 0 {
            return Err(MemvisError::Config(
                "page_size_kb must be at least 1".to_string(),
            ));
        }

        if self.page_size_kb > MAX_PAGE_SIZE_KB {
            return Err(MemvisError::Config(format!(
                "page_size_kb must be at most {}",
                MAX_PAGE_SIZE_KB
            )));
        }

        if self.snapshot_marker.as_deref() == Some("") {
            return Err(MemvisError::Config(
                "snapshot_marker must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

//! Error types for trace extraction, page mapping and report output
//!
//! Every failure is fatal for a run: the tool is a single-pass batch
//! analyzer and surfaces the offending file and line immediately.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while analyzing allocation traces
#[derive(Error, Debug)]
pub enum MemvisError {
    #[error("Failed to open trace stream {path}: {source}")]
    StreamOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read trace stream {path}: {source}")]
    StreamRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed allocation record in {source_name} at line {line_number}: {line}")]
    Parse {
        source_name: String,
        line_number: usize,
        line: String,
    },

    #[error("Zero-sized allocation in {source_name} at line {line_number}")]
    ZeroSize {
        source_name: String,
        line_number: usize,
    },

    #[error("Allocation in {source_name} at line {line_number} runs past the end of the address space")]
    AddressOverflow {
        source_name: String,
        line_number: usize,
    },

    #[error("Failed to write report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid configuration file {path}: {source}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl MemvisError {
    /// True for failures caused by the content of a trace rather than I/O
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::Parse { .. } | Self::ZeroSize { .. } | Self::AddressOverflow { .. }
        )
    }
}

/// Result type for memvis operations
pub type Result<T> = std::result::Result<T, MemvisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_names_line() {
        let err = MemvisError::Parse {
            source_name: "trace.log".to_string(),
            line_number: 12,
            line: "C1a LK=(garbage".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("trace.log"));
        assert!(msg.contains("line 12"));
        assert!(msg.contains("C1a LK=(garbage"));
        assert!(err.is_parse_error());
    }

    #[test]
    fn test_stream_open_is_not_parse_error() {
        let err = MemvisError::StreamOpen {
            path: PathBuf::from("/nonexistent"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(!err.is_parse_error());
        assert!(err.to_string().contains("/nonexistent"));
    }
}

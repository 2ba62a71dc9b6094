//! CLI argument parsing for memvis

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::config::AnalyzerConfig;

/// Output format for the run summary printed on stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "memvis")]
#[command(version)]
#[command(about = "Page occupancy and call-stack diffs for memory allocation traces", long_about = None)]
pub struct Cli {
    /// Trace files in chronological order (plain or gzip); "[a,b]" is also accepted
    #[arg(required = true, value_name = "FILES")]
    pub files: Vec<String>,

    /// Page size in KB (default: 4)
    #[arg(short = 'p', long = "page-size", value_name = "KB")]
    pub page_size: Option<u64>,

    /// Report every page between the lowest and highest occupied page
    #[arg(short = 'a', long = "all-pages")]
    pub all_pages: bool,

    /// Keep the page size even when the page count is large
    #[arg(long = "force-page-size")]
    pub force_page_size: bool,

    /// Line marker separating snapshots inside a compressed trace
    #[arg(short = 'm', long = "marker", value_name = "TEXT")]
    pub marker: Option<String>,

    /// Directory for report files (default: current directory)
    #[arg(short = 'o', long = "output-dir", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// TOML configuration file; command-line flags take precedence
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output format for the run summary
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Suppress progress messages on stderr
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}

impl Cli {
    /// Input paths, expanding the bracketed comma-separated form
    pub fn input_files(&self) -> Vec<PathBuf> {
        self.files
            .iter()
            .flat_map(|arg| {
                arg.trim_start_matches('[')
                    .trim_end_matches(']')
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Layer command-line flags over a base configuration
    pub fn apply_overrides(&self, mut config: AnalyzerConfig) -> AnalyzerConfig {
        if let Some(kb) = self.page_size {
            config.page_size_kb = kb;
        }
        if self.all_pages {
            config.all_pages = true;
        }
        if self.force_page_size {
            config.force_page_size = true;
        }
        if let Some(marker) = &self.marker {
            config.snapshot_marker = Some(marker.clone());
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        config
    }
}

//! Sequential analysis pipeline
//!
//! For every snapshot, in input order: extract, map pages, widen pages if
//! needed, write reports, then diff against the immediately preceding
//! snapshot. Only the previous snapshot's records survive from one step to
//! the next.

use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::allocation::Snapshot;
use crate::binner;
use crate::config::AnalyzerConfig;
use crate::differ;
use crate::error::Result;
use crate::extractor;
use crate::page_map::PageSet;
use crate::report::ReportWriter;

/// Per-snapshot outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotSummary {
    pub name: String,
    /// Disambiguated call-stack keys
    pub keys: usize,
    pub pages: usize,
    /// Page size used for the reports, after any widening
    pub page_size_kb: u64,
    pub widened: bool,
    pub occupied_bytes: u64,
    pub page_map: PathBuf,
}

/// Outcome of a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub snapshots: Vec<SnapshotSummary>,
    /// Transition entries written to the diff log
    pub transitions: usize,
}

impl RunSummary {
    /// Tabular text rendering
    pub fn to_text(&self) -> String {
        let mut out = format!(
            "{:<40} {:>8} {:>8} {:>10} {:>14}\n",
            "snapshot", "keys", "pages", "page size", "occupied"
        );
        for s in &self.snapshots {
            out.push_str(&format!(
                "{:<40} {:>8} {:>8} {:>8}KB {:>14}\n",
                s.name, s.keys, s.pages, s.page_size_kb, s.occupied_bytes
            ));
        }
        out.push_str(&format!(
            "{} snapshot(s), {} transition(s)\n",
            self.snapshots.len(),
            self.transitions
        ));
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Drives snapshots through mapping, binning, reporting and diffing
#[derive(Debug)]
pub struct Pipeline {
    config: AnalyzerConfig,
    writer: ReportWriter,
    quiet: bool,
}

impl Pipeline {
    /// Validate the configuration and prepare the output directory
    pub fn new(config: AnalyzerConfig, quiet: bool) -> Result<Self> {
        config.validate()?;
        let writer = ReportWriter::create(&config.output_dir)?;
        Ok(Self {
            config,
            writer,
            quiet,
        })
    }

    /// Analyze every file in order; each file yields one or more snapshots
    pub fn run(&self, files: &[PathBuf]) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut previous: Option<Snapshot> = None;

        for file in files {
            if !self.quiet {
                eprintln!("Opening file {}.", file.display());
            }
            let snapshots =
                extractor::extract_file(file, self.config.snapshot_marker.as_deref())?;

            for snapshot in snapshots {
                summary.snapshots.push(self.process(&snapshot)?);

                if let Some(prev) = &previous {
                    let report = differ::diff(
                        &prev.records,
                        &prev.name,
                        &snapshot.records,
                        &snapshot.name,
                    );
                    self.writer.write_diff(&report)?;
                    summary.transitions += report.len();
                }
                previous = Some(snapshot);
            }
        }

        info!(
            "Processed {} snapshot(s) with {} transition(s)",
            summary.snapshots.len(),
            summary.transitions
        );
        Ok(summary)
    }

    /// Map, bin and report one snapshot
    pub fn process(&self, snapshot: &Snapshot) -> Result<SnapshotSummary> {
        let pages = PageSet::from_records(&snapshot.records, self.config.page_size_kb);
        debug!(
            "{}: {} keys over {} pages",
            snapshot.name,
            snapshot.records.len(),
            pages.len()
        );
        let (pages, decision) =
            binner::apply(pages, self.config.all_pages, self.config.force_page_size);

        let page_map = self
            .writer
            .write_snapshot(snapshot, &pages, self.config.all_pages)?;
        if !self.quiet {
            eprintln!("Created {}.", page_map.display());
        }

        Ok(SnapshotSummary {
            name: snapshot.name.clone(),
            keys: snapshot.records.len(),
            pages: pages.len(),
            page_size_kb: pages.page_size_kb(),
            widened: decision.is_widened(),
            occupied_bytes: pages.occupied_bytes(),
            page_map,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{PERCENT_FILE, TRANSITION_FILE};

    fn config_for(dir: &std::path::Path) -> AnalyzerConfig {
        AnalyzerConfig {
            output_dir: dir.join("out"),
            ..AnalyzerConfig::default()
        }
    }

    #[test]
    fn test_two_files_produce_one_diff() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.log");
        let b = dir.path().join("b.log");
        std::fs::write(&a, "C1 LK=(0x0, 0x100)\n").unwrap();
        std::fs::write(&b, "C1 LK=(0x0, 0x200)\n").unwrap();

        let pipeline = Pipeline::new(config_for(dir.path()), true).unwrap();
        let summary = pipeline.run(&[a, b]).unwrap();

        assert_eq!(summary.snapshots.len(), 2);
        assert_eq!(summary.transitions, 1);
        assert_eq!(summary.snapshots[1].occupied_bytes, 512);

        let log = std::fs::read_to_string(dir.path().join("out").join(TRANSITION_FILE)).unwrap();
        assert!(log.contains("grew from 256 to 512 bytes"));
        assert!(dir.path().join("out/PageMap-a.log").exists());
        assert!(dir.path().join("out/PageMap-b.log").exists());
    }

    #[test]
    fn test_parse_failure_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.log");
        std::fs::write(&a, "C1 LK=(0x0, 16)\nC2 LK=(\n").unwrap();

        let pipeline = Pipeline::new(config_for(dir.path()), true).unwrap();
        let err = pipeline.run(&[a]).unwrap_err();
        assert!(err.is_parse_error());
        let percent = std::fs::read_to_string(dir.path().join("out").join(PERCENT_FILE)).unwrap();
        assert!(percent.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = AnalyzerConfig {
            page_size_kb: 0,
            ..config_for(dir.path())
        };
        assert!(Pipeline::new(config, true).is_err());
    }

    #[test]
    fn test_summary_renders_text_and_json() {
        let summary = RunSummary {
            snapshots: vec![SnapshotSummary {
                name: "a.log".to_string(),
                keys: 2,
                pages: 1,
                page_size_kb: 4,
                widened: false,
                occupied_bytes: 96,
                page_map: PathBuf::from("PageMap-a.log"),
            }],
            transitions: 0,
        };
        assert!(summary.to_text().contains("a.log"));
        let json = summary.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["snapshots"][0]["occupied_bytes"], 96);
    }
}

//! Plain-text report artifacts
//!
//! - `PageMap-<label>`: per-snapshot page layout with free-space statistics
//! - `PageData`: cumulative per-page byte-range listing
//! - `PercentPage`: cumulative per-page occupancy percentages
//! - `memMap`: cumulative transition log between adjacent snapshots
//!
//! The cumulative files are truncated when the writer is created and
//! appended to afterwards.

use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::allocation::Snapshot;
use crate::differ::DiffReport;
use crate::error::{MemvisError, Result};
use crate::page_map::{PageEntry, PageSegment, PageSet};

pub const PAGE_DATA_FILE: &str = "PageData";
pub const PERCENT_FILE: &str = "PercentPage";
pub const TRANSITION_FILE: &str = "memMap";
pub const PAGE_MAP_PREFIX: &str = "PageMap-";

fn report_pages(
    pages: &PageSet,
    all_pages: bool,
) -> Box<dyn Iterator<Item = Cow<'_, PageEntry>> + '_> {
    if all_pages {
        Box::new(pages.pages_in_span())
    } else {
        Box::new(pages.pages().map(Cow::Borrowed))
    }
}

/// Render the page map of one snapshot
pub fn render_page_map(pages: &PageSet, all_pages: bool) -> String {
    let mut out = String::new();

    for page in report_pages(pages, all_pages) {
        out.push_str(&format!("\nPage number:{:#x}\n", page.page_number()));
        out.push_str(&format!("Page starts at:{:#x}\n", page.start_address()));

        for segment in page.layout() {
            match segment {
                PageSegment::Free { len } => out.push_str(&format!("Free: {}\n", len)),
                PageSegment::Used { offset, len } => {
                    let last = offset + (len - 1);
                    out.push_str(&format!("\tStart: {:#x}. {} bytes long\n", offset, len));
                    // one past the last byte of the address space needs 65 bits
                    out.push_str(&format!(
                        "\tLast byte at: {:#x}. Finishes At: {:#x}\n",
                        last,
                        u128::from(last) + 1
                    ));
                }
            }
        }

        let stats = page.free_space();
        out.push_str(&format!("Page ends at: {:#x}\n", page.end_address()));
        out.push_str("Stats:\n");
        out.push_str(&format!(
            "\t{} total free in {} partitions.\n",
            stats.total_free, stats.partitions
        ));
        out.push_str(&format!(
            "\tBiggest Free: {}. Smallest Free: {}\n",
            stats.largest, stats.smallest
        ));
    }

    out
}

/// Render one snapshot's block of the byte-range listing
///
/// Offsets are relative to the start of each page; ends are inclusive.
pub fn render_page_data(name: &str, pages: &PageSet, all_pages: bool) -> String {
    let mut out = format!("\n{}", name);
    for page in report_pages(pages, all_pages) {
        let base = page.start_address();
        out.push_str(&format!("\n{:#x}: ", page.page_number()));
        for (offset, len) in page.ranges() {
            let rel = offset - base;
            out.push_str(&format!("{} - {},", rel, rel + (len - 1)));
        }
    }
    out.push('\n');
    out
}

/// Render one snapshot's block of the occupancy series
pub fn render_percent(name: &str, pages: &PageSet, all_pages: bool) -> String {
    let mut out = format!("{}\npage size: {}KB\n", name, pages.page_size_kb());
    for page in report_pages(pages, all_pages) {
        out.push_str(&format!(
            "{:#x},{}\n",
            page.page_number(),
            page.occupancy_percent()
        ));
    }
    out.push('\n');
    out
}

/// Writes report artifacts into one output directory
#[derive(Debug)]
pub struct ReportWriter {
    output_dir: PathBuf,
}

impl ReportWriter {
    /// Prepare the output directory and truncate the cumulative files
    pub fn create(output_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(output_dir).map_err(|source| MemvisError::Write {
            path: output_dir.to_path_buf(),
            source,
        })?;

        let writer = Self {
            output_dir: output_dir.to_path_buf(),
        };
        for name in [PAGE_DATA_FILE, PERCENT_FILE, TRANSITION_FILE] {
            let path = writer.path(name);
            File::create(&path).map_err(|source| MemvisError::Write { path, source })?;
        }
        debug!("Reports will be written to {}", output_dir.display());
        Ok(writer)
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.output_dir.join(file_name)
    }

    /// Path of the page map for a snapshot
    pub fn page_map_path(&self, snapshot: &Snapshot) -> PathBuf {
        self.path(&format!("{}{}", PAGE_MAP_PREFIX, snapshot.label()))
    }

    /// Write the page map and append the cumulative listings for one snapshot
    pub fn write_snapshot(
        &self,
        snapshot: &Snapshot,
        pages: &PageSet,
        all_pages: bool,
    ) -> Result<PathBuf> {
        let page_map = self.page_map_path(snapshot);
        info!("Creating {}", page_map.display());
        overwrite(&page_map, &render_page_map(pages, all_pages))?;

        append(
            &self.path(PAGE_DATA_FILE),
            &render_page_data(&snapshot.name, pages, all_pages),
        )?;
        append(
            &self.path(PERCENT_FILE),
            &render_percent(&snapshot.name, pages, all_pages),
        )?;
        Ok(page_map)
    }

    /// Append one transition block to the log
    pub fn write_diff(&self, report: &DiffReport) -> Result<()> {
        debug!(
            "Logging {} transitions {} -> {}",
            report.len(),
            report.first_name,
            report.second_name
        );
        append(&self.path(TRANSITION_FILE), &report.to_string())
    }
}

fn overwrite(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).map_err(|source| MemvisError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn append(path: &Path, contents: &str) -> Result<()> {
    let to_err = |source| MemvisError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(to_err)?;
    file.write_all(contents.as_bytes()).map_err(to_err)
}

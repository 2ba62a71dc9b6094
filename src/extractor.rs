//! Allocation extraction from trace logs
//!
//! Reads a plain or gzip-compressed trace, keeps only lines containing `LK`,
//! and parses each into a call-stack tag plus one or more `LK=(0xADDR, SIZE)`
//! records. Compressed streams can carry several snapshots separated by a
//! marker line.
//!
//! # Tag disambiguation
//!
//! Every relevant line creates a key `tag-N` where `N` is the line's index
//! within its snapshot. When the tag was already seen in the snapshot, the
//! line's records are also appended to the most recent key for that tag, so
//! both the extended earlier key and the fresh key can be looked up later.

use flate2::read::MultiGzDecoder;
use regex::Regex;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::allocation::{Allocation, CallStackEntry, Snapshot, SnapshotRecordSet, TagKey};
use crate::error::{MemvisError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

fn tag_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^C\d*\w").expect("regex"))
}

fn record_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"LK\s*=\s*\(\s*0[xX]([0-9a-fA-F]+)\s*,\s*(0[xX][0-9a-fA-F]+|\d+)\s*\)")
            .expect("regex")
    })
}

/// Why a relevant line could not be parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFault {
    /// Tag or allocation grammar did not match
    Malformed,
    /// A record declared a size of zero
    ZeroSize,
    /// A record's last byte lies beyond `u64::MAX`
    AddressOverflow,
}

/// A parsed `LK` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub tag: String,
    pub allocations: Vec<Allocation>,
}

/// Parse a single trace line
///
/// Returns `Ok(None)` for lines without `LK`. Every `LK=` opener on a
/// relevant line must be followed by a well-formed record.
pub fn parse_line(line: &str) -> std::result::Result<Option<ParsedLine>, LineFault> {
    if !line.contains("LK") {
        return Ok(None);
    }

    let line = line.trim_start();
    let tag = tag_pattern()
        .find(line)
        .ok_or(LineFault::Malformed)?
        .as_str()
        .to_string();

    let mut allocations = Vec::new();
    for caps in record_pattern().captures_iter(line) {
        let address = u64::from_str_radix(&caps[1], 16).map_err(|_| LineFault::Malformed)?;
        let size = parse_size(&caps[2]).ok_or(LineFault::Malformed)?;
        if size == 0 {
            return Err(LineFault::ZeroSize);
        }
        allocations.push(Allocation::new(address, size).ok_or(LineFault::AddressOverflow)?);
    }

    let declared = count_record_openers(line);
    if allocations.is_empty() || allocations.len() < declared {
        debug!(declared, parsed = allocations.len(), "rejecting LK line");
        return Err(LineFault::Malformed);
    }

    Ok(Some(ParsedLine { tag, allocations }))
}

/// Number of `LK` tokens followed (after optional spaces) by `=`
fn count_record_openers(line: &str) -> usize {
    line.match_indices("LK")
        .filter(|(idx, _)| line[idx + 2..].trim_start().starts_with('='))
        .count()
}

fn parse_size(text: &str) -> Option<u64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Accumulates one snapshot's records during a single pass
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    records: SnapshotRecordSet,
    latest: HashMap<String, TagKey>,
    lines_seen: usize,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a line of the snapshot and return its 1-based index
    pub fn next_line(&mut self) -> usize {
        self.lines_seen += 1;
        self.lines_seen
    }

    /// Record a parsed line seen at `line_index` within the snapshot
    pub fn record(&mut self, line_index: usize, parsed: ParsedLine) {
        let ParsedLine { tag, allocations } = parsed;

        if let Some(previous) = self.latest.get(&tag) {
            if let Some(entry) = self.records.get_mut(previous) {
                entry.extend(&allocations);
            }
        }

        let key = TagKey::new(tag.clone(), line_index);
        self.records
            .insert(key.clone(), CallStackEntry::new(allocations));
        self.latest.insert(tag, key);
    }

    pub fn lines_seen(&self) -> usize {
        self.lines_seen
    }

    /// Freeze the accumulated records
    pub fn finish(self) -> SnapshotRecordSet {
        self.records
    }
}

/// Extract every snapshot from a trace file
///
/// Gzip input is recognised by its magic bytes. The marker only splits
/// compressed streams; plain files always yield exactly one snapshot.
pub fn extract_file(path: &Path, marker: Option<&str>) -> Result<Vec<Snapshot>> {
    info!("Opening file {}", path.display());
    let file = File::open(path).map_err(|source| MemvisError::StreamOpen {
        path: path.to_path_buf(),
        source,
    })?;
    extract_bytes(file, &path.display().to_string(), marker)
}

/// Extract snapshots from an already-decoded line stream
///
/// Lines containing `marker` end the current snapshot. Segments without any
/// lines (leading or repeated markers) are dropped. When at least one marker
/// was seen, snapshots are named `source_name#n`.
pub fn extract_reader<R: BufRead>(
    mut reader: R,
    source_name: &str,
    marker: Option<&str>,
) -> Result<Vec<Snapshot>> {
    let mut segments = Vec::new();
    let mut builder = SnapshotBuilder::new();
    let mut split = false;
    let mut buf = Vec::new();
    let mut file_line = 0usize;

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|source| MemvisError::StreamRead {
                path: PathBuf::from(source_name),
                source,
            })?;
        if read == 0 {
            break;
        }
        file_line += 1;
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);

        if let Some(marker) = marker.filter(|m| line.contains(*m)) {
            debug!(line = file_line, marker, "snapshot boundary");
            split = true;
            let finished = std::mem::take(&mut builder);
            if finished.lines_seen() > 0 {
                segments.push(finished.finish());
            }
            continue;
        }

        let index = builder.next_line();
        match parse_line(line) {
            Ok(Some(parsed)) => builder.record(index, parsed),
            Ok(None) => {}
            Err(LineFault::Malformed) => {
                return Err(MemvisError::Parse {
                    source_name: source_name.to_string(),
                    line_number: file_line,
                    line: line.to_string(),
                })
            }
            Err(LineFault::ZeroSize) => {
                return Err(MemvisError::ZeroSize {
                    source_name: source_name.to_string(),
                    line_number: file_line,
                })
            }
            Err(LineFault::AddressOverflow) => {
                return Err(MemvisError::AddressOverflow {
                    source_name: source_name.to_string(),
                    line_number: file_line,
                })
            }
        }
    }

    if builder.lines_seen() > 0 || segments.is_empty() {
        segments.push(builder.finish());
    }

    let snapshots: Vec<Snapshot> = segments
        .into_iter()
        .enumerate()
        .map(|(n, records)| Snapshot {
            name: if split {
                format!("{}#{}", source_name, n)
            } else {
                source_name.to_string()
            },
            records,
        })
        .collect();

    info!(
        "Parsed {} snapshot(s) from {} ({} lines)",
        snapshots.len(),
        source_name,
        file_line
    );
    Ok(snapshots)
}

/// Read a whole trace from any reader, decompressing gzip when detected
pub fn extract_bytes<R: Read>(
    reader: R,
    source_name: &str,
    marker: Option<&str>,
) -> Result<Vec<Snapshot>> {
    let mut reader = BufReader::new(reader);
    let compressed = reader
        .fill_buf()
        .map_err(|source| MemvisError::StreamRead {
            path: PathBuf::from(source_name),
            source,
        })?
        .starts_with(&GZIP_MAGIC);
    if compressed {
        debug!("{} is gzip-compressed", source_name);
        extract_reader(BufReader::new(MultiGzDecoder::new(reader)), source_name, marker)
    } else {
        extract_reader(reader, source_name, None)
    }
}

//! memvis - page occupancy analysis for memory allocation traces
//!
//! This library parses allocation trace logs (plain or gzip-compressed) into
//! per-snapshot call-stack maps, lays the allocations out over fixed or
//! adaptively widened pages, and diffs call stacks between consecutive
//! snapshots.

pub mod allocation;
pub mod binner;
pub mod cli;
pub mod config;
pub mod differ;
pub mod error;
pub mod extractor;
pub mod page_map;
pub mod pipeline;
pub mod report;

pub use allocation::{Allocation, Snapshot, SnapshotRecordSet, TagKey};
pub use error::{MemvisError, Result};

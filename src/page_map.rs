//! Page mapping and free-space accounting
//!
//! Allocations are assigned to fixed-size pages. An allocation that crosses a
//! page boundary contributes a head fragment to its first page and a tail
//! fragment to its last page; any pages strictly in between are tracked as
//! fully occupied runs rather than split further.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use crate::allocation::{Allocation, SnapshotRecordSet};

/// Bytes per kilobyte for page size arithmetic
pub const KIB: u64 = 1024;

/// Part of an allocation that lands in one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    pub page: u64,
    pub offset: u64,
    pub len: u64,
}

/// Where an allocation lands relative to page boundaries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Entirely inside one page
    Single(Fragment),
    /// Crosses at least one boundary
    Straddle {
        head: Fragment,
        tail: Fragment,
        /// Pages strictly between head and tail (possibly empty)
        interior: RangeInclusive<u64>,
    },
}

/// Place an allocation against pages of `page_size` bytes
pub fn place(allocation: &Allocation, page_size: u64) -> Placement {
    let start_page = allocation.address / page_size;
    let last_byte = allocation.end_address();
    let end_page = last_byte / page_size;

    if start_page == end_page {
        return Placement::Single(Fragment {
            page: start_page,
            offset: allocation.address,
            len: allocation.size,
        });
    }

    let head = Fragment {
        page: start_page,
        offset: allocation.address,
        len: page_size - allocation.address % page_size,
    };
    let tail_start = end_page * page_size;
    // equals (address + size) mod page_size, or a whole page when the
    // allocation ends exactly on a boundary
    let tail = Fragment {
        page: end_page,
        offset: tail_start,
        len: last_byte - tail_start + 1,
    };
    Placement::Straddle {
        head,
        tail,
        interior: start_page + 1..=end_page - 1,
    }
}

/// One piece of a page's layout, in address order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSegment {
    Free { len: u64 },
    Used { offset: u64, len: u64 },
}

/// Free-space summary for one page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreeSpaceStats {
    pub total_free: u64,
    pub partitions: u64,
    pub largest: u64,
    pub smallest: u64,
}

/// Occupied ranges of one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageEntry {
    page_number: u64,
    page_size: u64,
    /// start offset -> occupied bytes within this page
    ranges: BTreeMap<u64, u64>,
}

impl PageEntry {
    pub fn new(page_number: u64, page_size: u64) -> Self {
        Self {
            page_number,
            page_size,
            ranges: BTreeMap::new(),
        }
    }

    /// A page covered end to end
    pub fn full(page_number: u64, page_size: u64) -> Self {
        let mut entry = Self::new(page_number, page_size);
        entry.fill();
        entry
    }

    /// Record an occupied range; on a shared start offset the longer length wins
    pub fn record(&mut self, offset: u64, len: u64) {
        debug_assert!(
            (self.start_address()..=self.end_address()).contains(&offset),
            "offset {offset:#x} outside page {:#x}",
            self.page_number
        );
        let slot = self.ranges.entry(offset).or_insert(0);
        *slot = (*slot).max(len);
    }

    fn fill(&mut self) {
        self.record(self.start_address(), self.extent());
    }

    pub fn page_number(&self) -> u64 {
        self.page_number
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn start_address(&self) -> u64 {
        self.page_number * self.page_size
    }

    /// Inclusive last byte of the page, clamped to the top of the address space
    pub fn end_address(&self) -> u64 {
        self.start_address().saturating_add(self.page_size - 1)
    }

    /// Bytes the page actually spans; shorter than the page size only for a
    /// page cut off by the end of the address space
    pub fn extent(&self) -> u64 {
        self.end_address() - self.start_address() + 1
    }

    /// Occupied start offsets in ascending order
    pub fn start_offsets(&self) -> impl Iterator<Item = u64> + '_ {
        self.ranges.keys().copied()
    }

    pub fn size_at(&self, offset: u64) -> Option<u64> {
        self.ranges.get(&offset).copied()
    }

    /// `(offset, len)` pairs in ascending offset order
    pub fn ranges(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.ranges.iter().map(|(&o, &l)| (o, l))
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Used ranges interleaved with the free gaps between them
    pub fn layout(&self) -> Vec<PageSegment> {
        let base = self.start_address();
        let extent = self.extent();
        let mut segments = Vec::with_capacity(self.ranges.len() * 2 + 1);
        // bytes from the page start known to be covered
        let mut covered = 0u64;

        for (offset, len) in self.ranges() {
            let rel = offset - base;
            if rel > covered {
                segments.push(PageSegment::Free { len: rel - covered });
            }
            segments.push(PageSegment::Used { offset, len });
            covered = covered.max(rel.saturating_add(len).min(extent));
        }
        if extent > covered {
            segments.push(PageSegment::Free {
                len: extent - covered,
            });
        }
        segments
    }

    pub fn free_space(&self) -> FreeSpaceStats {
        let mut stats = FreeSpaceStats::default();
        for segment in self.layout() {
            if let PageSegment::Free { len } = segment {
                stats.total_free += len;
                stats.partitions += 1;
                stats.largest = stats.largest.max(len);
                stats.smallest = if stats.partitions == 1 {
                    len
                } else {
                    stats.smallest.min(len)
                };
            }
        }
        stats
    }

    /// Bytes covered by at least one range
    pub fn occupied_bytes(&self) -> u64 {
        self.extent() - self.free_space().total_free
    }

    /// Rounded occupancy; any non-empty page reports at least 1
    pub fn occupancy_percent(&self) -> u64 {
        let mut percent = self.occupied_bytes() as f64 / self.extent() as f64 * 100.0;
        if percent > 0.0 && percent < 1.0 {
            percent += 0.5;
        }
        percent.round() as u64
    }
}

/// Pages of one snapshot, ordered by page number
///
/// Only pages holding a head, tail or single fragment get an entry. Pages
/// strictly inside a straddling allocation are kept as merged runs of page
/// numbers, so one allocation never costs more than two entries whatever its
/// size. Run pages count as fully occupied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSet {
    page_size: u64,
    pages: BTreeMap<u64, PageEntry>,
    /// first page -> last page of each disjoint interior run
    interior: BTreeMap<u64, u64>,
}

impl PageSet {
    pub fn new(page_size: u64) -> Self {
        Self {
            page_size,
            pages: BTreeMap::new(),
            interior: BTreeMap::new(),
        }
    }

    /// Map every allocation of a snapshot onto pages of `page_size_kb` kilobytes
    pub fn from_records(records: &SnapshotRecordSet, page_size_kb: u64) -> Self {
        Self::from_allocations(records.allocations(), page_size_kb.saturating_mul(KIB))
    }

    pub fn from_allocations<'a>(
        allocations: impl IntoIterator<Item = &'a Allocation>,
        page_size: u64,
    ) -> Self {
        let mut set = Self::new(page_size);
        for allocation in allocations {
            set.add(allocation);
        }
        set
    }

    /// Place one allocation into the set
    pub fn add(&mut self, allocation: &Allocation) {
        match place(allocation, self.page_size) {
            Placement::Single(fragment) => self.record(fragment),
            Placement::Straddle {
                head,
                tail,
                interior,
            } => {
                self.record(head);
                self.record(tail);
                if !interior.is_empty() {
                    self.cover_interior(*interior.start(), *interior.end());
                }
            }
        }
    }

    fn record(&mut self, fragment: Fragment) {
        let covered = self.is_interior(fragment.page);
        let page_size = self.page_size;
        let entry = self
            .pages
            .entry(fragment.page)
            .or_insert_with(|| PageEntry::new(fragment.page, page_size));
        entry.record(fragment.offset, fragment.len);
        if covered {
            entry.fill();
        }
    }

    /// Merge `first..=last` into the interior runs
    fn cover_interior(&mut self, mut first: u64, mut last: u64) {
        let touching: Vec<(u64, u64)> = self
            .interior
            .range(..=last.saturating_add(1))
            .rev()
            .take_while(|&(_, &end)| end.saturating_add(1) >= first)
            .map(|(&start, &end)| (start, end))
            .collect();
        for (start, end) in touching {
            self.interior.remove(&start);
            first = first.min(start);
            last = last.max(end);
        }
        self.interior.insert(first, last);

        for entry in self.pages.range_mut(first..=last).map(|(_, entry)| entry) {
            entry.fill();
        }
    }

    fn is_interior(&self, page_number: u64) -> bool {
        self.interior
            .range(..=page_number)
            .next_back()
            .is_some_and(|(_, &last)| page_number <= last)
    }

    /// Disjoint `(first, last)` page runs lying inside straddling allocations
    pub fn interior_runs(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.interior.iter().map(|(&first, &last)| (first, last))
    }

    pub(crate) fn insert_page(&mut self, mut entry: PageEntry) {
        if self.is_interior(entry.page_number()) {
            entry.fill();
        }
        self.pages.insert(entry.page_number(), entry);
    }

    /// Page size in bytes
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Page size in whole kilobytes
    pub fn page_size_kb(&self) -> u64 {
        self.page_size / KIB
    }

    pub fn get(&self, page_number: u64) -> Option<&PageEntry> {
        self.pages.get(&page_number)
    }

    /// Pages holding at least one fragment, in ascending order
    pub fn pages(&self) -> impl Iterator<Item = &PageEntry> {
        self.pages.values()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Lowest and highest occupied page numbers
    pub fn span(&self) -> Option<(u64, u64)> {
        let first = *self.pages.keys().next()?;
        let last = *self.pages.keys().next_back()?;
        Some((first, last))
    }

    /// Page count the binner compares against its threshold
    pub fn natural_page_count(&self, all_pages: bool) -> u64 {
        match (all_pages, self.span()) {
            (true, Some((first, last))) => last - first + 1,
            _ => self.pages.len() as u64,
        }
    }

    /// Every page from the lowest to the highest occupied one
    ///
    /// Interior run pages come out full; other gaps come out empty.
    pub fn pages_in_span(&self) -> impl Iterator<Item = Cow<'_, PageEntry>> {
        self.span()
            .into_iter()
            .flat_map(|(first, last)| first..=last)
            .map(move |n| match self.pages.get(&n) {
                Some(entry) => Cow::Borrowed(entry),
                None if self.is_interior(n) => Cow::Owned(PageEntry::full(n, self.page_size)),
                None => Cow::Owned(PageEntry::new(n, self.page_size)),
            })
    }

    /// Sum of occupied bytes, interior run pages included
    pub fn occupied_bytes(&self) -> u64 {
        let in_entries = self
            .pages
            .values()
            .map(PageEntry::occupied_bytes)
            .fold(0u64, u64::saturating_add);
        let run_pages_without_entry: u64 = self
            .interior_runs()
            .map(|(first, last)| {
                (last - first + 1) - self.pages.range(first..=last).count() as u64
            })
            .sum();
        in_entries.saturating_add(run_pages_without_entry.saturating_mul(self.page_size))
    }
}

//! Adaptive page binning
//!
//! When a snapshot touches more pages than the configured page size in bytes,
//! pages are regrouped into wider bins so reports stay readable. The widened
//! size is `page_size_kb + 4 * (page_count / (page_size_kb * 1024))`, and each
//! bin gathers `widened_kb / page_size_kb` consecutive original pages.

use std::collections::BTreeMap;
use tracing::info;

use crate::allocation::Allocation;
use crate::page_map::{PageEntry, PageSet, KIB};

/// Outcome of the widening check for one snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinningDecision {
    /// Page size requested by the configuration
    pub configured_kb: u64,
    /// Page size produced by the widening formula
    pub widened_kb: u64,
    /// Original pages folded into one bin
    pub pages_per_bin: u64,
}

impl BinningDecision {
    /// Decide whether to widen pages; deterministic in its three inputs
    pub fn decide(page_count: u64, page_size_kb: u64, force_page_size: bool) -> Self {
        let trigger = page_count / page_size_kb.saturating_mul(KIB);
        if trigger == 0 || force_page_size {
            return Self::unchanged(page_size_kb);
        }
        let widened_kb = page_size_kb + 4 * trigger;
        Self {
            configured_kb: page_size_kb,
            widened_kb,
            pages_per_bin: (widened_kb / page_size_kb).max(1),
        }
    }

    pub fn unchanged(page_size_kb: u64) -> Self {
        Self {
            configured_kb: page_size_kb,
            widened_kb: page_size_kb,
            pages_per_bin: 1,
        }
    }

    pub fn is_widened(&self) -> bool {
        self.pages_per_bin > 1
    }

    /// Effective size of one bin in kilobytes
    ///
    /// Equal to `widened_kb` whenever the configured size divides the
    /// widening step; otherwise bins stay aligned to whole original pages.
    pub fn bin_size_kb(&self) -> u64 {
        self.configured_kb * self.pages_per_bin
    }

    pub fn bin_size_bytes(&self) -> u64 {
        self.bin_size_kb() * KIB
    }

    /// Bin that an original page number falls into
    pub fn bin_of(&self, page_number: u64) -> u64 {
        page_number / self.pages_per_bin
    }
}

/// Regroup a page set according to `decision`
pub fn rebin(pages: &PageSet, decision: &BinningDecision) -> PageSet {
    if !decision.is_widened() {
        return pages.clone();
    }

    let bin_size = decision.bin_size_bytes();
    let mut bins: BTreeMap<u64, PageEntry> = BTreeMap::new();
    for page in pages.pages() {
        let bin = decision.bin_of(page.page_number());
        let entry = bins
            .entry(bin)
            .or_insert_with(|| PageEntry::new(bin, bin_size));
        for (offset, len) in page.ranges() {
            entry.record(offset, len);
        }
    }

    let mut rebinned = PageSet::new(bin_size);
    for entry in bins.into_values() {
        rebinned.insert_page(entry);
    }

    // interior runs are re-placed as one fully occupied byte range each
    let page_size = pages.page_size();
    for (first, last) in pages.interior_runs() {
        let run = (last - first + 1)
            .checked_mul(page_size)
            .and_then(|size| Allocation::new(first * page_size, size));
        if let Some(run) = run {
            rebinned.add(&run);
        }
    }
    rebinned
}

/// Check the page count and widen pages when needed
pub fn apply(
    pages: PageSet,
    all_pages: bool,
    force_page_size: bool,
) -> (PageSet, BinningDecision) {
    let page_count = pages.natural_page_count(all_pages);
    let decision = BinningDecision::decide(page_count, pages.page_size_kb(), force_page_size);
    if !decision.is_widened() {
        return (pages, decision);
    }

    info!(
        "{} pages exceed threshold; widening {}KB pages to {}KB bins",
        page_count,
        decision.configured_kb,
        decision.bin_size_kb()
    );
    let rebinned = rebin(&pages, &decision);
    (rebinned, decision)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc(address: u64, size: u64) -> Allocation {
        Allocation::new(address, size).unwrap()
    }

    #[test]
    fn test_below_threshold_keeps_size() {
        let d = BinningDecision::decide(4095, 4, false);
        assert_eq!(d, BinningDecision::unchanged(4));
        assert!(!d.is_widened());
    }

    #[test]
    fn test_threshold_widens() {
        let d = BinningDecision::decide(4096, 4, false);
        assert_eq!(d.widened_kb, 8);
        assert_eq!(d.pages_per_bin, 2);
        assert_eq!(d.bin_size_kb(), 8);

        let d = BinningDecision::decide(3 * 4096 + 7, 4, false);
        assert_eq!(d.widened_kb, 16);
        assert_eq!(d.pages_per_bin, 4);
    }

    #[test]
    fn test_force_flag_suppresses_widening() {
        let d = BinningDecision::decide(1 << 20, 4, true);
        assert_eq!(d, BinningDecision::unchanged(4));
    }

    #[test]
    fn test_uneven_configured_size_stays_page_aligned() {
        let d = BinningDecision::decide(3 * 1024, 3, false);
        assert_eq!(d.widened_kb, 7);
        assert_eq!(d.pages_per_bin, 2);
        assert_eq!(d.bin_size_kb(), 6);
    }

    #[test]
    fn test_rebin_merges_pages_and_recomputes_free_space() {
        let p = 4 * KIB;
        let set = PageSet::from_allocations(
            &[alloc(0, 1024), alloc(p, 1024), alloc(5 * p + 0x10, 16)],
            p,
        );
        let decision = BinningDecision {
            configured_kb: 4,
            widened_kb: 8,
            pages_per_bin: 2,
        };
        let rebinned = rebin(&set, &decision);
        assert_eq!(rebinned.page_size(), 2 * p);
        assert_eq!(rebinned.len(), 2);

        let bin0 = rebinned.get(0).unwrap();
        assert_eq!(bin0.occupied_bytes(), 2048);
        let stats = bin0.free_space();
        assert_eq!(stats.partitions, 2);
        assert_eq!(stats.total_free, 2 * p - 2048);

        let bin2 = rebinned.get(2).unwrap();
        assert_eq!(bin2.size_at(5 * p + 0x10), Some(16));
    }

    #[test]
    fn test_rebin_joins_split_fragments() {
        let p = 4 * KIB;
        let set = PageSet::from_allocations(&[alloc(p - 0x100, 0x200)], p);
        let decision = BinningDecision {
            configured_kb: 4,
            widened_kb: 8,
            pages_per_bin: 2,
        };
        let bin = rebin(&set, &decision);
        let stats = bin.get(0).unwrap().free_space();
        assert_eq!(stats.partitions, 2);
        assert_eq!(stats.total_free, 2 * p - 0x200);
    }

    #[test]
    fn test_rebin_keeps_interior_runs_full() {
        let p = 4 * KIB;
        let set = PageSet::from_allocations(&[alloc(0x800, 5 * p)], p);
        let decision = BinningDecision {
            configured_kb: 4,
            widened_kb: 8,
            pages_per_bin: 2,
        };
        let rebinned = rebin(&set, &decision);
        assert_eq!(rebinned.len(), 2);
        assert_eq!(rebinned.get(0).unwrap().occupied_bytes(), 6144);
        assert_eq!(rebinned.get(2).unwrap().occupied_bytes(), 6144);
        assert_eq!(rebinned.interior_runs().collect::<Vec<_>>(), vec![(1, 1)]);
        assert_eq!(rebinned.occupied_bytes(), 5 * p);
    }

    #[test]
    fn test_apply_forced_is_identity() {
        let set = PageSet::from_allocations(&[alloc(0, 16)], 1024);
        let (out, decision) = apply(set.clone(), true, true);
        assert_eq!(out, set);
        assert!(!decision.is_widened());
    }
}

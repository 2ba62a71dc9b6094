//! Property-based tests for the page-mapping and diff engine
//!
//! Core properties covered:
//! 1. Fragment lengths for single-page and straddling allocations
//! 2. Page entry offsets stay within their page, and one allocation
//!    never creates more than two page entries
//! 3. Occupancy never exceeds 100% and free space accounting balances
//! 4. Forced page size makes binning a no-op
//! 5. Diff pairs share tag text and never reuse a key
//! 6. The line parser never panics

use memvis::binner::{self, BinningDecision};
use memvis::differ::diff;
use memvis::extractor::{extract_reader, parse_line};
use memvis::page_map::{place, PageSet, Placement, KIB};
use memvis::Allocation;
use proptest::prelude::*;
use std::collections::HashSet;
use std::io::Cursor;

fn page_size() -> impl Strategy<Value = u64> {
    (1u64..=16).prop_map(|kb| kb * KIB)
}

fn allocation() -> impl Strategy<Value = Allocation> {
    (0u64..1 << 32, 1u64..1 << 16).prop_map(|(address, size)| Allocation { address, size })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_fragment_lengths(a in allocation(), p in page_size()) {
        match place(&a, p) {
            Placement::Single(fragment) => {
                prop_assert_eq!(a.address / p, (a.address + a.size - 1) / p);
                prop_assert_eq!(fragment.len, a.size);
                prop_assert_eq!(fragment.offset, a.address);
            }
            Placement::Straddle { head, tail, .. } => {
                prop_assert_eq!(head.len, p - a.address % p);
                let end = a.address + a.size;
                if end % p != 0 {
                    prop_assert_eq!(tail.len, end % p);
                } else {
                    prop_assert_eq!(tail.len, p);
                }
                prop_assert_eq!(tail.offset % p, 0);
            }
        }
    }

    #[test]
    fn prop_allocation_touches_at_most_two_entries(a in allocation(), p in page_size()) {
        let set = PageSet::from_allocations(&[a], p);
        prop_assert!(set.len() <= 2);
        prop_assert_eq!(set.occupied_bytes(), a.size);
    }

    #[test]
    fn prop_offsets_inside_their_page(
        allocs in prop::collection::vec(allocation(), 1..20),
        p in page_size(),
    ) {
        let set = PageSet::from_allocations(&allocs, p);
        for page in set.pages() {
            for offset in page.start_offsets() {
                prop_assert!(offset >= page.start_address());
                prop_assert!(offset <= page.end_address());
                prop_assert!(page.size_at(offset).is_some());
            }
        }
    }

    #[test]
    fn prop_occupancy_bounded(
        allocs in prop::collection::vec(allocation(), 1..20),
        p in page_size(),
    ) {
        let set = PageSet::from_allocations(&allocs, p);
        for page in set.pages() {
            let stats = page.free_space();
            prop_assert!(page.occupancy_percent() <= 100);
            prop_assert!(page.occupancy_percent() >= 1);
            prop_assert_eq!(page.occupied_bytes() + stats.total_free, p);
            prop_assert!(stats.smallest <= stats.largest);
        }
    }

    #[test]
    fn prop_forced_binning_is_identity(
        allocs in prop::collection::vec(allocation(), 1..20),
        all_pages in any::<bool>(),
        count in 0u64..1 << 24,
        kb in 1u64..=16,
    ) {
        prop_assert_eq!(
            BinningDecision::decide(count, kb, true),
            BinningDecision::unchanged(kb)
        );
        let set = PageSet::from_allocations(&allocs, kb * KIB);
        let (out, decision) = binner::apply(set.clone(), all_pages, true);
        prop_assert_eq!(out, set);
        prop_assert!(!decision.is_widened());
    }

    #[test]
    fn prop_widening_is_monotonic(count in 0u64..1 << 24, kb in 1u64..=16) {
        let decision = BinningDecision::decide(count, kb, false);
        prop_assert!(decision.widened_kb >= kb);
        prop_assert!(decision.bin_size_kb() >= kb);
        prop_assert_eq!(decision, BinningDecision::decide(count, kb, false));
    }

    #[test]
    fn prop_diff_pairs_share_tags(
        first in prop::collection::vec((0u8..6, 0u64..256, 1u64..64), 0..12),
        second in prop::collection::vec((0u8..6, 0u64..256, 1u64..64), 0..12),
    ) {
        let render = |lines: &[(u8, u64, u64)]| -> String {
            lines
                .iter()
                .map(|(tag, addr, size)| format!("C{}a LK=({:#x}, {})\n", tag, addr, size))
                .collect()
        };
        let a = extract_reader(Cursor::new(render(&first)), "a", None).unwrap().remove(0);
        let b = extract_reader(Cursor::new(render(&second)), "b", None).unwrap().remove(0);
        let report = diff(&a.records, "a", &b.records, "b");

        let mut used_first = HashSet::new();
        let mut used_second = HashSet::new();
        for (x, y) in report.pairs() {
            prop_assert_eq!(x.tag(), y.tag());
            prop_assert!(used_first.insert(x.clone()));
            prop_assert!(used_second.insert(y.clone()));
        }
    }

    #[test]
    fn prop_parse_line_never_panics(line in ".{0,80}") {
        let _ = parse_line(&line);
    }
}

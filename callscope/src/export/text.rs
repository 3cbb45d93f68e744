//! Plain-text reports

use std::fmt::Write;

use crate::resolver::ResolvedIndex;
use crate::trace_data::CallCounts;

/// One `caller -> callee (count)` line per arc, most frequent first
#[must_use]
pub fn render_pairs(calls: &CallCounts, index: &ResolvedIndex) -> String {
    let mut out = String::new();
    for record in calls.ranked() {
        let _ = writeln!(
            out,
            "{} -> {} ({})",
            index.display_name(record.caller),
            index.display_name(record.callee),
            record.count
        );
    }
    out
}

/// Call count histogram with right-aligned counts
#[must_use]
pub fn render_ranked(calls: &CallCounts, index: &ResolvedIndex) -> String {
    let ranked = calls.ranked();
    let total = calls.total_calls();
    // The total is never narrower than any single count
    let width = total.to_string().len().max("calls".len());

    let mut out = String::new();
    let _ = writeln!(out, "{:>width$}  arc", "calls");
    for record in &ranked {
        let _ = writeln!(
            out,
            "{:>width$}  {} -> {}",
            record.count,
            index.display_name(record.caller),
            index.display_name(record.callee)
        );
    }
    let _ = writeln!(out, "{total:>width$}  total ({} arcs)", ranked.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{AddressInfo, AddressStatus};

    fn index() -> ResolvedIndex {
        let resolved = |symbol: &str| AddressInfo {
            pathname: Some("/lib/libfoo.so".to_string()),
            offset: Some(0),
            symbol: symbol.to_string(),
            location: "foo.c:1".to_string(),
            status: AddressStatus::Resolved,
            error: None,
        };
        [(0x10, resolved("main")), (0x20, resolved("fib"))].into_iter().collect()
    }

    fn calls() -> CallCounts {
        let mut calls = CallCounts::new();
        calls.add(0x10, 0x20, 3);
        calls.add(0x20, 0x20, 120);
        calls.add(0x10, 0x99, 1);
        calls
    }

    #[test]
    fn test_pairs_use_symbols_and_hex_fallback() {
        let out = render_pairs(&calls(), &index());
        assert_eq!(out, "fib -> fib (120)\nmain -> fib (3)\nmain -> 0x99 (1)\n");
    }

    #[test]
    fn test_ranked_histogram_aligns_counts() {
        let out = render_ranked(&calls(), &index());
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[0], "calls  arc");
        assert_eq!(lines[1], "  120  fib -> fib");
        assert_eq!(lines[3], "    1  main -> 0x99");
        assert_eq!(lines[4], "  124  total (3 arcs)");
    }

    #[test]
    fn test_ranked_width_fits_the_total() {
        let mut calls = CallCounts::new();
        calls.add(0x20, 0x20, 99_999);
        calls.add(0x10, 0x20, 1);
        let out = render_ranked(&calls, &index());
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[0], " calls  arc");
        assert_eq!(lines[1], " 99999  fib -> fib");
        assert_eq!(lines[2], "     1  main -> fib");
        assert_eq!(lines[3], "100000  total (2 arcs)");
    }
}

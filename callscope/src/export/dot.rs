//! Graphviz report

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::resolver::ResolvedIndex;
use crate::trace_data::CallCounts;

/// Digraph with one edge per distinct `(caller, callee)` name pair
///
/// Arcs whose addresses map to the same pair of names are merged and their
/// counts summed.
#[must_use]
pub fn render(calls: &CallCounts, index: &ResolvedIndex) -> String {
    let mut edges: BTreeMap<(String, String), u64> = BTreeMap::new();
    for record in calls.ranked() {
        let key = (index.display_name(record.caller), index.display_name(record.callee));
        let total = edges.entry(key).or_insert(0);
        *total = total.saturating_add(record.count);
    }

    let mut out = String::from("digraph callscope {\n");
    for ((caller, callee), count) in &edges {
        let _ = writeln!(out, "    \"{}\" -> \"{}\" [label=\"{count}\"];", escape(caller), escape(callee));
    }
    out.push_str("}\n");
    out
}

fn escape(name: &str) -> String {
    name.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{AddressInfo, AddressStatus};

    #[test]
    fn test_escape_quotes_and_backslashes() {
        assert_eq!(escape(r#"operator"" \x"#), r#"operator\"\" \\x"#);
    }

    #[test]
    fn test_arcs_merge_per_symbol_pair() {
        let resolved = |symbol: &str| AddressInfo {
            pathname: Some("/lib/libfoo.so".to_string()),
            offset: Some(0),
            symbol: symbol.to_string(),
            location: "??:0".to_string(),
            status: AddressStatus::Resolved,
            error: None,
        };
        // Two call sites inside main
        let index: ResolvedIndex =
            [(0x10, resolved("main")), (0x14, resolved("main")), (0x20, resolved("fib"))]
                .into_iter()
                .collect();
        let mut calls = CallCounts::new();
        calls.add(0x10, 0x20, 2);
        calls.add(0x14, 0x20, 5);

        let out = render(&calls, &index);
        assert_eq!(out, "digraph callscope {\n    \"main\" -> \"fib\" [label=\"7\"];\n}\n");
    }
}

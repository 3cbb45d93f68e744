//! JSON report: `{"index": {...}, "calls": [...]}`

use serde::Serialize;

use crate::domain::ExportError;
use crate::resolver::ResolvedIndex;
use crate::trace_data::{CallCounts, CallRecord};

#[derive(Serialize)]
struct Report<'a> {
    /// Keyed by decimal runtime address
    index: &'a ResolvedIndex,
    calls: Vec<CallRecord>,
}

/// Pretty-printed JSON with a trailing newline
///
/// # Errors
/// Returns an error if serialization fails.
pub fn render(calls: &CallCounts, index: &ResolvedIndex) -> Result<String, ExportError> {
    let report = Report { index, calls: calls.ranked() };
    let mut text = serde_json::to_string_pretty(&report)?;
    text.push('\n');
    Ok(text)
}

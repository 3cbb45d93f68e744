//! Report export
//!
//! Renders the resolved call graph in one of several formats:
//! - **json**: address index plus ranked call list, for further processing
//! - **pairs**: one `caller -> callee (count)` line per arc
//! - **ranked**: call count histogram
//! - **dot**: Graphviz digraph, arcs merged per symbol pair
//!
//! Reports are rendered to a `String` first and written in one go, so a
//! failure never leaves a partial report behind.

pub mod dot;
pub mod json;
pub mod text;

use std::io::Write;
use std::path::Path;

use clap::ValueEnum;

use crate::domain::ExportError;
use crate::resolver::ResolvedIndex;
use crate::trace_data::CallCounts;

/// Output format of the report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    #[default]
    Json,
    Pairs,
    Ranked,
    Dot,
}

/// Render the report for `calls` using the symbols in `index`.
///
/// # Errors
/// Returns an error if JSON serialization fails.
pub fn render(
    format: ReportFormat,
    calls: &CallCounts,
    index: &ResolvedIndex,
) -> Result<String, ExportError> {
    match format {
        ReportFormat::Json => json::render(calls, index),
        ReportFormat::Pairs => Ok(text::render_pairs(calls, index)),
        ReportFormat::Ranked => Ok(text::render_ranked(calls, index)),
        ReportFormat::Dot => Ok(dot::render(calls, index)),
    }
}

/// Write a rendered report to `output`, or to stdout if `None`.
///
/// # Errors
/// Returns [`ExportError::Write`] if the destination cannot be written.
pub fn write_report(output: Option<&Path>, report: &str) -> Result<(), ExportError> {
    match output {
        Some(path) => std::fs::write(path, report)
            .map_err(|source| ExportError::Write { path: path.to_path_buf(), source }),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(report.as_bytes())
                .and_then(|()| stdout.flush())
                .map_err(|source| ExportError::Write { path: "<stdout>".into(), source })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_report_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        write_report(Some(&path), "a -> b (1)\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a -> b (1)\n");
    }

    #[test]
    fn test_write_report_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("report.txt");
        let err = write_report(Some(&path), "x").unwrap_err();
        assert!(err.to_string().contains("report.txt"));
    }
}

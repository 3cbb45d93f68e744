//! Call trace data model
//!
//! The instrumented runtime writes one record per distinct call arc to
//! `<profile>/calls`, little-endian:
//!
//! ```text
//! counted:  lr: u32 | pc: u32 | count: u64     (16 bytes)
//! pairs:    caller: u32 | callee: u32          (8 bytes, each counts once)
//! ```
//!
//! `lr` is the return address in the caller, `pc` the callee's entry.
//! Records may repeat an arc; counts are summed on load.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use clap::ValueEnum;
use log::info;
use serde::Serialize;

use crate::domain::TraceError;

/// On-disk layout of the `calls` file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum TraceFormat {
    /// 16-byte `{lr, pc, count}` records
    #[default]
    Counted,
    /// 8-byte `{caller, callee}` records
    Pairs,
}

impl TraceFormat {
    #[must_use]
    pub fn record_size(self) -> usize {
        match self {
            Self::Counted => 16,
            Self::Pairs => 8,
        }
    }
}

/// One caller → callee arc with its call count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CallRecord {
    #[serde(rename = "lr")]
    pub caller: u64,
    #[serde(rename = "pc")]
    pub callee: u64,
    pub count: u64,
}

/// Call counts aggregated per `(caller, callee)` arc
#[derive(Debug, Clone, Default)]
pub struct CallCounts {
    arcs: HashMap<(u64, u64), u64>,
}

impl CallCounts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a whole `calls` file image.
    ///
    /// `path` is only used for error reporting.
    ///
    /// # Errors
    /// Returns [`TraceError::PartialRecord`] if the data does not end on a
    /// record boundary.
    pub fn from_bytes(bytes: &[u8], format: TraceFormat, path: &Path) -> Result<Self, TraceError> {
        let record_size = format.record_size();
        let chunks = bytes.chunks_exact(record_size);
        let trailing = chunks.remainder().len();
        if trailing != 0 {
            return Err(TraceError::PartialRecord { path: path.to_path_buf(), trailing, record_size });
        }

        let mut counts = Self::new();
        for record in chunks {
            let caller = u64::from(le_u32(&record[0..4]));
            let callee = u64::from(le_u32(&record[4..8]));
            let count = match format {
                TraceFormat::Counted => le_u64(&record[8..16]),
                TraceFormat::Pairs => 1,
            };
            counts.add(caller, callee, count);
        }
        Ok(counts)
    }

    /// Read and decode a `calls` file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or ends mid-record.
    pub fn from_file(path: &Path, format: TraceFormat) -> Result<Self, TraceError> {
        let bytes = std::fs::read(path)
            .map_err(|source| TraceError::Read { path: path.to_path_buf(), source })?;
        let counts = Self::from_bytes(&bytes, format, path)?;
        info!(
            "Loaded {} call arcs ({} calls) from {}",
            counts.len(),
            counts.total_calls(),
            path.display()
        );
        Ok(counts)
    }

    pub fn add(&mut self, caller: u64, callee: u64, count: u64) {
        let total = self.arcs.entry((caller, callee)).or_insert(0);
        *total = total.saturating_add(count);
    }

    /// Every distinct address appearing as caller or callee
    #[must_use]
    pub fn addresses(&self) -> BTreeSet<u64> {
        self.arcs.keys().flat_map(|&(caller, callee)| [caller, callee]).collect()
    }

    /// Arcs by count descending, ties by `(caller, callee)` ascending
    #[must_use]
    pub fn ranked(&self) -> Vec<CallRecord> {
        let mut records: Vec<CallRecord> = self
            .arcs
            .iter()
            .map(|(&(caller, callee), &count)| CallRecord { caller, callee, count })
            .collect();
        records.sort_by(|a, b| {
            b.count.cmp(&a.count).then_with(|| (a.caller, a.callee).cmp(&(b.caller, b.callee)))
        });
        records
    }

    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.arcs.values().fold(0u64, |sum, count| sum.saturating_add(*count))
    }

    /// Number of distinct arcs
    #[must_use]
    pub fn len(&self) -> usize {
        self.arcs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counted(lr: u32, pc: u32, count: u64) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&lr.to_le_bytes());
        bytes.extend_from_slice(&pc.to_le_bytes());
        bytes.extend_from_slice(&count.to_le_bytes());
        bytes
    }

    #[test]
    fn test_counted_records_are_summed_per_arc() {
        let mut bytes = counted(0x40_0010, 0x40_0100, 3);
        bytes.extend(counted(0x40_0020, 0x40_0100, 5));
        bytes.extend(counted(0x40_0010, 0x40_0100, 4));

        let counts = CallCounts::from_bytes(&bytes, TraceFormat::Counted, Path::new("calls")).unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts.total_calls(), 12);

        let ranked = counts.ranked();
        assert_eq!(ranked[0], CallRecord { caller: 0x40_0010, callee: 0x40_0100, count: 7 });
        assert_eq!(ranked[1].count, 5);
    }

    #[test]
    fn test_pairs_format_counts_each_record_once() {
        let mut bytes = Vec::new();
        for (caller, callee) in [(1u32, 2u32), (1, 2), (3, 2)] {
            bytes.extend_from_slice(&caller.to_le_bytes());
            bytes.extend_from_slice(&callee.to_le_bytes());
        }
        let counts = CallCounts::from_bytes(&bytes, TraceFormat::Pairs, Path::new("calls")).unwrap();
        assert_eq!(counts.ranked()[0], CallRecord { caller: 1, callee: 2, count: 2 });
        assert_eq!(counts.addresses().into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_partial_trailing_record_is_rejected() {
        let mut bytes = counted(1, 2, 3);
        bytes.extend_from_slice(&[0, 1, 2]);
        let err = CallCounts::from_bytes(&bytes, TraceFormat::Counted, Path::new("calls")).unwrap_err();
        assert!(matches!(err, TraceError::PartialRecord { trailing: 3, record_size: 16, .. }));
    }

    #[test]
    fn test_ranking_ties_break_by_address() {
        let mut counts = CallCounts::new();
        counts.add(9, 1, 2);
        counts.add(2, 7, 2);
        counts.add(2, 3, 2);
        counts.add(1, 1, 10);
        let order: Vec<_> = counts.ranked().iter().map(|r| (r.caller, r.callee)).collect();
        assert_eq!(order, vec![(1, 1), (2, 3), (2, 7), (9, 1)]);
    }

    #[test]
    fn test_empty_file_has_no_arcs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calls");
        std::fs::write(&path, b"").unwrap();
        let counts = CallCounts::from_file(&path, TraceFormat::Counted).unwrap();
        assert!(counts.is_empty());
        assert!(counts.addresses().is_empty());
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let err = CallCounts::from_file(Path::new("/nonexistent/calls"), TraceFormat::Pairs)
            .unwrap_err();
        assert!(matches!(err, TraceError::Read { .. }));
    }

    #[test]
    fn test_call_record_serializes_with_trace_field_names() {
        let json = serde_json::to_string(&CallRecord { caller: 1, callee: 2, count: 3 }).unwrap();
        assert_eq!(json, r#"{"lr":1,"pc":2,"count":3}"#);
    }
}

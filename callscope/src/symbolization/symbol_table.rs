//! Function symbol tables from `nm --print-size`
//!
//! Used by the symbol-table backend: names come straight from the object's
//! symbol table, without source locations.

use std::path::Path;

use log::{debug, info};
use tokio::process::Command;

use super::tool::SymbolDumpTool;
use crate::domain::ToolError;

/// One sized symbol of an object file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    pub offset: u64,
    pub size: u64,
    pub name: String,
}

impl SymbolEntry {
    #[must_use]
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.offset && offset - self.offset < self.size
    }
}

/// Symbols of one object file, in dump order
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    entries: Vec<SymbolEntry>,
}

impl SymbolTable {
    #[must_use]
    pub fn from_entries(entries: Vec<SymbolEntry>) -> Self {
        Self { entries }
    }

    /// Parse `nm --print-size` output.
    ///
    /// Lines look like `0000000000001139 000000000000000b T main`. Lines without
    /// a size column (undefined or unsized symbols) are dropped since no offset
    /// can be attributed to them.
    #[must_use]
    pub fn parse_dump(text: &str) -> Self {
        Self { entries: text.lines().filter_map(parse_dump_line).collect() }
    }

    /// Run the symbol dump tool on `object` and parse its output.
    ///
    /// # Errors
    /// Returns an error if the tool cannot be spawned or exits unsuccessfully.
    pub async fn load(tool: &SymbolDumpTool, object: &Path) -> Result<Self, ToolError> {
        let output = Command::new(tool.program())
            .arg("--print-size")
            .arg(object)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ToolError::Spawn { command: tool.command().to_string(), source })?;

        if !output.status.success() {
            return Err(ToolError::Process {
                command: tool.command().to_string(),
                exit_code: output.status.code(),
            });
        }

        let table = Self::parse_dump(&String::from_utf8_lossy(&output.stdout));
        info!("{}: {} sized symbols", object.display(), table.len());
        Ok(table)
    }

    /// Name of the first symbol, in dump order, whose extent covers `offset`.
    ///
    /// Overlapping symbols (aliases, nested labels) resolve to whichever the
    /// dump listed first, so results are only as stable as the dump order.
    #[must_use]
    pub fn lookup(&self, offset: u64) -> Option<&str> {
        self.entries.iter().find(|entry| entry.contains(offset)).map(|entry| entry.name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_dump_line(line: &str) -> Option<SymbolEntry> {
    let mut fields = line.split_whitespace();
    let offset = u64::from_str_radix(fields.next()?, 16).ok()?;
    let size = u64::from_str_radix(fields.next()?, 16).ok()?;
    let kind = fields.next()?;
    // Without a size column the type letter lands here and the name shifts left
    if kind.chars().count() != 1 {
        debug!("Skipping unsized symbol line: {line}");
        return None;
    }
    let name = fields.collect::<Vec<_>>().join(" ");
    if name.is_empty() {
        return None;
    }
    Some(SymbolEntry { offset, size, name })
}

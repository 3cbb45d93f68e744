//! Memory map snapshot parsing and address translation
//!
//! The profiled process copies `/proc/self/maps` into the profile directory at
//! startup. Each line describes one mapping:
//!
//! ```text
//! 00400000-00452000 r-xp 00000000 08:02 173521      /usr/bin/app
//! ```
//!
//! [`RangeIndex`] keeps the (optionally filtered) mappings sorted by start
//! address so a runtime address can be turned into an object file and the
//! byte offset inside it.

use anyhow::{Context, Result};
use log::{debug, info};
use std::fs;
use std::path::Path;

use crate::domain::ParseError;

/// Access permissions of a mapping, parsed from the `rwxp` field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
    /// Copy-on-write (`p`) as opposed to shared (`s`)
    pub private: bool,
}

impl Permissions {
    fn parse(field: &str) -> Option<Self> {
        let bytes = field.as_bytes();
        if bytes.len() != 4 {
            return None;
        }
        let flag = |byte: u8, set: u8| match byte {
            b'-' => Some(false),
            b if b == set => Some(true),
            _ => None,
        };
        let private = match bytes[3] {
            b'p' => true,
            b's' => false,
            _ => return None,
        };
        Some(Self {
            read: flag(bytes[0], b'r')?,
            write: flag(bytes[1], b'w')?,
            execute: flag(bytes[2], b'x')?,
            private,
        })
    }
}

/// One mapping of the snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapRegion {
    pub start: u64,
    /// Exclusive
    pub end: u64,
    pub permissions: Permissions,
    pub offset: u64,
    pub dev: (u32, u32),
    pub inode: u64,
    /// Empty for anonymous mappings
    pub pathname: String,
}

/// Result of translating a runtime address through one mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLocation {
    pub pathname: String,
    pub file_offset: u64,
}

impl MapRegion {
    /// Parse one line of a maps snapshot.
    ///
    /// `line_number` is 1-based and only used for error reporting.
    ///
    /// # Errors
    /// Returns a [`ParseError`] if the line does not have the
    /// `start-end perms offset dev inode [pathname]` layout.
    pub fn from_line(line: &str, line_number: usize) -> Result<Self, ParseError> {
        let fail = |reason| ParseError { line: line_number, reason, text: line.to_string() };

        let (range, rest) = next_field(line).ok_or_else(|| fail("missing address range"))?;
        let (perms, rest) = next_field(rest).ok_or_else(|| fail("missing permissions"))?;
        let (offset, rest) = next_field(rest).ok_or_else(|| fail("missing offset"))?;
        let (dev, rest) = next_field(rest).ok_or_else(|| fail("missing device"))?;
        let (inode, rest) = next_field(rest).ok_or_else(|| fail("missing inode"))?;

        let (start, end) = range
            .split_once('-')
            .and_then(|(start, end)| Some((parse_hex(start)?, parse_hex(end)?)))
            .ok_or_else(|| fail("bad address range"))?;
        if end < start {
            return Err(fail("range ends before it starts"));
        }
        let permissions = Permissions::parse(perms).ok_or_else(|| fail("bad permissions"))?;
        let offset = parse_hex(offset).ok_or_else(|| fail("bad offset"))?;
        if offset.checked_add(end - start).is_none() {
            return Err(fail("offset overflows range"));
        }
        let dev = dev
            .split_once(':')
            .and_then(|(major, minor)| {
                Some((
                    u32::try_from(parse_hex(major)?).ok()?,
                    u32::try_from(parse_hex(minor)?).ok()?,
                ))
            })
            .ok_or_else(|| fail("bad device"))?;
        let inode = inode.parse::<u64>().map_err(|_| fail("bad inode"))?;

        Ok(Self {
            start,
            end,
            permissions,
            offset,
            dev,
            inode,
            pathname: rest.trim().to_string(),
        })
    }

    /// Check if an address falls within this mapping
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.permissions.execute
    }

    /// Translate a runtime address into a file offset of the backing object.
    ///
    /// `None` if the address lies outside this mapping or the offset does not
    /// fit in 64 bits.
    #[must_use]
    pub fn file_offset(&self, addr: u64) -> Option<u64> {
        if !self.contains(addr) {
            return None;
        }
        (addr - self.start).checked_add(self.offset)
    }
}

/// Sorted index over the mappings of one snapshot
#[derive(Debug, Clone, Default)]
pub struct RangeIndex {
    regions: Vec<MapRegion>,
    /// `max_end[i]` is the greatest `end` among `regions[..=i]`
    max_end: Vec<u64>,
}

impl RangeIndex {
    /// Build an index from snapshot lines, keeping regions accepted by `predicate`.
    ///
    /// Blank lines are ignored.
    ///
    /// # Errors
    /// Returns the first malformed line as a [`ParseError`].
    pub fn build<I, S, P>(lines: I, predicate: P) -> Result<Self, ParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        P: Fn(&MapRegion) -> bool,
    {
        let mut regions = Vec::new();
        for (idx, line) in lines.into_iter().enumerate() {
            let line = line.as_ref();
            if line.trim().is_empty() {
                continue;
            }
            let region = MapRegion::from_line(line, idx + 1)?;
            if predicate(&region) {
                regions.push(region);
            }
        }
        Ok(Self::from_regions(regions))
    }

    /// Build an index from already parsed regions.
    #[must_use]
    pub fn from_regions(mut regions: Vec<MapRegion>) -> Self {
        // Stable, so equal starts keep snapshot order
        regions.sort_by_key(|region| region.start);

        let mut max_end = Vec::with_capacity(regions.len());
        let mut running = 0;
        for region in &regions {
            running = running.max(region.end);
            max_end.push(running);
        }

        Self { regions, max_end }
    }

    /// Read and index a maps snapshot file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or contains a malformed line.
    pub fn from_file<P>(path: &Path, predicate: P) -> Result<Self>
    where
        P: Fn(&MapRegion) -> bool,
    {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let index = Self::build(text.lines(), predicate)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!("Loaded {} mappings from {}", index.len(), path.display());
        Ok(index)
    }

    /// Find the mapping containing `address`.
    ///
    /// For disjoint regions this is the region with the greatest start not
    /// above `address`. When regions overlap, the lowest-start region that
    /// contains the address wins, and among equal starts the earliest line.
    #[must_use]
    pub fn resolve(&self, address: u64) -> Option<&MapRegion> {
        let mut idx = self.regions.partition_point(|region| region.start <= address);
        let mut found = None;
        while idx > 0 {
            idx -= 1;
            if self.max_end[idx] <= address {
                break;
            }
            if self.regions[idx].contains(address) {
                found = Some(idx);
            }
        }
        found.map(|idx| &self.regions[idx])
    }

    /// Translate a runtime address to an object path and file offset.
    ///
    /// Returns `None` for addresses outside every indexed mapping.
    #[must_use]
    pub fn translate(&self, address: u64) -> Option<FileLocation> {
        let region = self.resolve(address)?;
        let location = FileLocation {
            pathname: region.pathname.clone(),
            file_offset: region.file_offset(address)?,
        };
        debug!("0x{address:x} -> {}+0x{:x}", location.pathname, location.file_offset);
        Some(location)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn regions(&self) -> impl Iterator<Item = &MapRegion> {
        self.regions.iter()
    }
}

/// Split off the next whitespace-delimited field, returning it and the remainder.
fn next_field(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    if text.is_empty() {
        return None;
    }
    Some(text.split_at(text.find(char::is_whitespace).unwrap_or(text.len())))
}

fn parse_hex(text: &str) -> Option<u64> {
    if text.is_empty() || text.len() > 16 {
        return None;
    }
    u64::from_str_radix(text, 16).ok()
}

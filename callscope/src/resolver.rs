//! Address resolution across all mapped objects
//!
//! [`AddressResolver`] takes the distinct runtime addresses of a call trace,
//! translates them through the [`RangeIndex`], groups the resulting file
//! offsets by object and runs one symbolization backend per object.
//!
//! Every address ends up in the [`ResolvedIndex`] with an explicit
//! [`AddressStatus`]; a failure on one object never affects another.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::domain::BackendError;
use crate::preflight::check_debug_symbols;
use crate::symbolization::{
    demangle_symbol, RangeIndex, Resolution, ResolutionPool, SymbolDumpTool, SymbolTable,
};

/// Rendered for any field that could not be determined
pub const UNKNOWN: &str = "?";

/// `addr2line` answer for an offset it has no information about
const TOOL_UNKNOWN: &str = "??";

/// Location reported by the symbol-table backend, which has no line info
const NO_LOCATION: &str = "??:0";

/// How file offsets are turned into symbols
#[derive(Debug, Clone)]
pub enum SymbolBackend {
    /// Long-lived `addr2line` processes; names and source locations
    Addr2line(ResolutionPool),
    /// One `nm` dump per object; names only
    SymbolDump(SymbolDumpTool),
}

impl SymbolBackend {
    fn name(&self) -> &'static str {
        match self {
            Self::Addr2line(_) => "addr2line",
            Self::SymbolDump(_) => "symbol-table",
        }
    }
}

/// Outcome of resolving one address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressStatus {
    /// The backend named the function
    Resolved,
    /// The backend ran but knows no symbol at this offset
    SymbolUnknown,
    /// The mapped object is absent from the object directory
    ObjectMissing,
    /// No mapping (or only an anonymous one) covers the address
    Unmapped,
    /// The backend returned nothing for this offset
    NotAttempted,
    /// The backend failed for the whole object
    SymbolizerFailed,
}

/// Index entry for one runtime address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressInfo {
    pub pathname: Option<String>,
    pub offset: Option<u64>,
    pub symbol: String,
    pub location: String,
    pub status: AddressStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AddressInfo {
    fn unmapped() -> Self {
        Self {
            pathname: None,
            offset: None,
            symbol: UNKNOWN.to_string(),
            location: UNKNOWN.to_string(),
            status: AddressStatus::Unmapped,
            error: None,
        }
    }

    fn pending(pathname: &str, offset: u64, status: AddressStatus) -> Self {
        Self {
            pathname: Some(pathname.to_string()),
            offset: Some(offset),
            symbol: UNKNOWN.to_string(),
            location: UNKNOWN.to_string(),
            status,
            error: None,
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.status == AddressStatus::Resolved
    }
}

/// Resolution result for every requested address, ordered by address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResolvedIndex {
    entries: BTreeMap<u64, AddressInfo>,
}

impl ResolvedIndex {
    #[must_use]
    pub fn get(&self, address: u64) -> Option<&AddressInfo> {
        self.entries.get(&address)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &AddressInfo)> {
        self.entries.iter().map(|(address, info)| (*address, info))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of addresses per status
    #[must_use]
    pub fn status_counts(&self) -> BTreeMap<AddressStatus, usize> {
        let mut counts = BTreeMap::new();
        for info in self.entries.values() {
            *counts.entry(info.status).or_insert(0) += 1;
        }
        counts
    }

    /// Symbol for `address` if it was resolved, otherwise the address in hex
    #[must_use]
    pub fn display_name(&self, address: u64) -> String {
        match self.entries.get(&address) {
            Some(info) if info.is_resolved() => info.symbol.clone(),
            _ => format!("0x{address:x}"),
        }
    }
}

impl FromIterator<(u64, AddressInfo)> for ResolvedIndex {
    fn from_iter<T: IntoIterator<Item = (u64, AddressInfo)>>(iter: T) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}

/// Turns runtime addresses into symbols, one object at a time
#[derive(Debug)]
pub struct AddressResolver {
    ranges: RangeIndex,
    objdir: PathBuf,
    backend: SymbolBackend,
    demangle: bool,
}

impl AddressResolver {
    #[must_use]
    pub fn new(ranges: RangeIndex, objdir: impl Into<PathBuf>, backend: SymbolBackend) -> Self {
        Self { ranges, objdir: objdir.into(), backend, demangle: false }
    }

    /// Demangle Rust symbol names in the results
    #[must_use]
    pub fn with_demangling(mut self, demangle: bool) -> Self {
        self.demangle = demangle;
        self
    }

    /// On-disk copy of a mapped object: `objdir/<basename>`
    #[must_use]
    pub fn object_path(&self, pathname: &str) -> PathBuf {
        let basename = Path::new(pathname).file_name().unwrap_or_else(|| OsStr::new(pathname));
        self.objdir.join(basename)
    }

    /// Resolve every distinct address.
    ///
    /// Never fails as a whole: per-object problems are logged and recorded in
    /// the address's [`AddressStatus`].
    pub async fn resolve<I>(&self, addresses: I) -> ResolvedIndex
    where
        I: IntoIterator<Item = u64>,
    {
        let mut entries = BTreeMap::new();
        // pathname -> offset -> addresses translating to it
        let mut objects: BTreeMap<String, BTreeMap<u64, Vec<u64>>> = BTreeMap::new();

        for address in addresses.into_iter().collect::<BTreeSet<_>>() {
            match self.ranges.translate(address) {
                Some(location) if !location.pathname.is_empty() => {
                    objects
                        .entry(location.pathname)
                        .or_default()
                        .entry(location.file_offset)
                        .or_default()
                        .push(address);
                }
                _ => {
                    debug!("0x{address:x} is outside every mapped object");
                    entries.insert(address, AddressInfo::unmapped());
                }
            }
        }

        info!(
            "Resolving {} addresses in {} objects with {}",
            entries.len() + objects.values().flat_map(BTreeMap::values).map(Vec::len).sum::<usize>(),
            objects.len(),
            self.backend.name()
        );

        for (pathname, offsets) in &objects {
            self.resolve_object(pathname, offsets, &mut entries).await;
        }

        ResolvedIndex { entries }
    }

    async fn resolve_object(
        &self,
        pathname: &str,
        offsets: &BTreeMap<u64, Vec<u64>>,
        entries: &mut BTreeMap<u64, AddressInfo>,
    ) {
        let object = self.object_path(pathname);
        let mut record = |status: AddressStatus, error: Option<&str>| {
            for (offset, addresses) in offsets {
                for address in addresses {
                    let mut info = AddressInfo::pending(pathname, *offset, status);
                    info.error = error.map(str::to_string);
                    entries.insert(*address, info);
                }
            }
        };

        if !object.exists() {
            warn!("SKIP {}: does not exist", object.display());
            record(AddressStatus::ObjectMissing, None);
            return;
        }

        inspect_object(&object).await;

        let answers = match self.run_backend(&object, offsets.keys().copied()).await {
            Ok(answers) => answers,
            Err(err) => {
                error!("{err}");
                record(AddressStatus::SymbolizerFailed, Some(&err.to_string()));
                return;
            }
        };

        let mut unknown = 0;
        for (offset, addresses) in offsets {
            let info = match answers.get(offset) {
                Some(answer) => {
                    let info = self.to_info(pathname, answer);
                    if info.status == AddressStatus::SymbolUnknown {
                        unknown += 1;
                    }
                    info
                }
                None => AddressInfo::pending(pathname, *offset, AddressStatus::NotAttempted),
            };
            for address in addresses {
                entries.insert(*address, info.clone());
            }
        }
        if unknown > 0 {
            debug!("{}: {unknown} offsets without a symbol", object.display());
        }
    }

    async fn run_backend(
        &self,
        object: &Path,
        offsets: impl Iterator<Item = u64>,
    ) -> Result<HashMap<u64, Resolution>, BackendError> {
        match &self.backend {
            SymbolBackend::Addr2line(pool) => Ok(pool.resolve(object, offsets).await?),
            SymbolBackend::SymbolDump(tool) => {
                let table = SymbolTable::load(tool, object).await?;
                Ok(offsets
                    .map(|offset| {
                        let symbol = table.lookup(offset).unwrap_or(TOOL_UNKNOWN).to_string();
                        (offset, Resolution { offset, symbol, location: NO_LOCATION.to_string() })
                    })
                    .collect())
            }
        }
    }

    fn to_info(&self, pathname: &str, answer: &Resolution) -> AddressInfo {
        let known = !answer.symbol.is_empty() && answer.symbol != TOOL_UNKNOWN;
        let symbol = match (known, self.demangle) {
            (false, _) => UNKNOWN.to_string(),
            (true, true) => demangle_symbol(&answer.symbol),
            (true, false) => answer.symbol.clone(),
        };
        AddressInfo {
            pathname: Some(pathname.to_string()),
            offset: Some(answer.offset),
            symbol,
            location: answer.location.clone(),
            status: if known { AddressStatus::Resolved } else { AddressStatus::SymbolUnknown },
            error: None,
        }
    }
}

/// Warn about stripped objects off the async runtime.
///
/// `None` if the object could not be inspected.
async fn inspect_object(object: &Path) -> Option<bool> {
    let path = object.to_path_buf();
    match tokio::task::spawn_blocking(move || check_debug_symbols(&path)).await {
        Ok(Ok(usable)) => Some(usable),
        Ok(Err(err)) => {
            debug!("Skipping debug info check: {err:#}");
            None
        }
        Err(join_err) if join_err.is_panic() => std::panic::resume_unwind(join_err.into_panic()),
        Err(_) => None,
    }
}

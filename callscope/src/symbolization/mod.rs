//! # Address Translation and Symbolization
//!
//! This module turns raw runtime addresses from a call trace into function
//! names and source locations, in two steps.
//!
//! ## 1. Runtime address → file offset
//!
//! Shared objects and PIE executables are loaded at randomized addresses, so
//! the trace's addresses mean nothing to the on-disk binaries. The profiled
//! process saved its `/proc/self/maps` at startup; [`RangeIndex`] finds the
//! mapping an address falls into and rebases it:
//!
//! ```text
//! 7f3a10000000-7f3a10021000 r-xp 00004000 fd:01 1234  /system/lib/libfoo.so
//!
//! address      = 0x7f3a10000480
//! file offset  = address - 0x7f3a10000000 + 0x4000 = 0x4480
//! ```
//!
//! ## 2. File offset → symbol
//!
//! Debug information is not parsed here. Two external-tool backends exist:
//!
//! - **`addr2line`** ([`ResolutionPool`]): one long-lived `addr2line -f -e <obj>`
//!   process per [`WorkerChannel`], fed offsets over stdin and answering with
//!   function name and `file:line`. Several channels share one object's batch.
//! - **symbol table** ([`SymbolTable`]): `nm --print-size <obj>` once per
//!   object, then an in-memory extent lookup. Names only, no locations.
//!
//! ## Module Structure
//!
//! - **`memory_maps`**: maps snapshot parsing, [`RangeIndex`]
//! - **`tool`**: tool lookup on `PATH` and per-channel limits
//! - **`worker_channel`**: one symbolizer subprocess with FIFO request pairing
//! - **`pool`**: fail-fast fan-out of one object's offsets over W channels
//! - **`symbol_table`**: `nm` output parsing and lookup

pub mod memory_maps;
pub mod pool;
pub mod symbol_table;
pub mod tool;
pub mod worker_channel;

pub use memory_maps::{FileLocation, MapRegion, Permissions, RangeIndex};
pub use pool::{OffsetCursor, ResolutionPool};
pub use symbol_table::{SymbolEntry, SymbolTable};
pub use tool::{SymbolDumpTool, SymbolizerTool, DEFAULT_MAX_IN_FLIGHT};
pub use worker_channel::{Resolution, WorkerChannel};

use rustc_demangle::demangle;

/// Demangle a Rust symbol name; other names come back unchanged
#[must_use]
pub fn demangle_symbol(symbol: &str) -> String {
    format!("{:#}", demangle(symbol))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demangle_rust_symbol() {
        assert_eq!(demangle_symbol("_ZN3foo3bar17h0123456789abcdefE"), "foo::bar");
    }

    #[test]
    fn test_demangle_leaves_c_names_alone() {
        assert_eq!(demangle_symbol("fib"), "fib");
        assert_eq!(demangle_symbol("??"), "??");
    }
}

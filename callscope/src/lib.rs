//! # callscope - Offline Call Graph Symbolization
//!
//! callscope turns the raw call trace of an `mcount`-instrumented native
//! program into a call graph with function names and source locations.
//!
//! The instrumented process writes a profile directory holding a copy of its
//! `/proc/self/maps` and a binary `calls` file of caller/callee address
//! pairs. Everything else happens offline, against unstripped copies of the
//! mapped objects.
//!
//! ## Architecture Overview
//!
//! ```text
//!  profile/maps ──► RangeIndex ─────────┐
//!                                       ▼
//!  profile/calls ──► CallCounts ──► AddressResolver ──► ResolvedIndex ──► export
//!                                       │
//!                      per object       ▼
//!              ┌────────────── SymbolBackend ──────────────┐
//!              │                                           │
//!      ResolutionPool                                SymbolTable
//!   W × WorkerChannel (addr2line)                  (nm --print-size)
//! ```
//!
//! ## Module Structure
//!
//! - [`symbolization`]: address translation and the two symbolizer backends
//!   - `memory_maps`: maps snapshot parsing, runtime address → file offset
//!   - `worker_channel`: one `addr2line` process with bounded in-flight requests
//!   - `pool`: fail-fast parallel resolution of one object's offsets
//!   - `symbol_table`: `nm` dump parsing and extent lookup
//!
//! - [`resolver`]: per-object orchestration and the per-address status
//!
//! - [`trace_data`]: `calls` file decoding and aggregation
//!
//! - [`export`]: JSON, text and Graphviz reports
//!
//! - [`cli`]: Command-line argument parsing and configuration
//!
//! - [`preflight`]: input validation with actionable messages
//!
//! - [`domain`]: Core domain types and errors
//!
//! ## Typical Usage
//!
//! ```bash
//! # JSON report using addr2line, one process per CPU for each object
//! callscope ./profile --objdir ./symbols -j 0 > report.json
//!
//! # Names only, from the symbol table, as a Graphviz graph
//! callscope ./profile --objdir ./symbols --backend symbol-table --format dot -o calls.dot
//! ```

pub mod cli;
pub mod domain;
pub mod export;
pub mod preflight;
pub mod resolver;
pub mod symbolization;
pub mod trace_data;

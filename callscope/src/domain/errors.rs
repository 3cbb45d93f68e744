//! Structured error types for callscope
//!
//! Using thiserror for automatic Display implementation and error chaining.

use std::path::PathBuf;

use thiserror::Error;

use super::types::{RequestState, WorkerId};

/// A memory-map snapshot line that does not match the `/proc/<pid>/maps` layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("maps line {line}: {reason}: {text:?}")]
pub struct ParseError {
    /// 1-based line number in the snapshot
    pub line: usize,
    pub reason: &'static str,
    pub text: String,
}

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Failed to read call trace {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Call trace {path} ends with a partial record ({trailing} of {record_size} bytes)")]
    PartialRecord { path: PathBuf, trailing: usize, record_size: usize },
}

/// Failures locating or running an external tool outside of a worker channel.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{command} not found in PATH")]
    NotFound {
        command: String,
        #[source]
        source: which::Error,
    },

    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with status {}", display_exit_code(*exit_code))]
    Process { command: String, exit_code: Option<i32> },
}

/// Failures of a single symbolizer worker channel.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("{command} not found")]
    ToolNotFound { command: String },

    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while {state}: {source}")]
    Io {
        state: RequestState,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Process ended unexpectedly with status {} ({outstanding} requests outstanding)",
        display_exit_code(*exit_code)
    )]
    Process { exit_code: Option<i32>, outstanding: usize },

    #[error("Unexpected symbolizer output while {state}: {detail}")]
    Protocol { state: RequestState, detail: String },

    #[error("Timed out after {seconds}s while {state}")]
    Timeout { state: RequestState, seconds: u64 },

    #[error("Cancelled after a sibling worker failed")]
    Cancelled,
}

/// The single aggregate error surfaced by a resolution pool.
#[derive(Error, Debug)]
#[error("Resolving {} failed in {worker}: {source}", object.display())]
pub struct PoolError {
    pub object: PathBuf,
    pub worker: WorkerId,
    #[source]
    pub source: ChannelError,
}

/// Per-object symbolization failure, from either backend.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Report rendering or writing failures.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to write report to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn display_exit_code(exit_code: Option<i32>) -> String {
    exit_code.map_or_else(|| "signal".to_string(), |code| code.to_string())
}

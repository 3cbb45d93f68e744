//! External tool configuration
//!
//! Both backends shell out: the symbolizer (`addr2line -f -e <object>`)
//! speaks a line protocol over stdin/stdout, the symbol dump
//! (`nm --print-size <object>`) is run once per object. Commands are looked
//! up on `PATH` once at startup so a missing tool fails before any work.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;

use crate::domain::ToolError;

/// Requests allowed in flight per symbolizer process
pub const DEFAULT_MAX_IN_FLIGHT: usize = 10;

/// A located address-to-line symbolizer command
#[derive(Debug, Clone)]
pub struct SymbolizerTool {
    command: String,
    program: PathBuf,
    max_in_flight: usize,
    read_timeout: Option<Duration>,
}

impl SymbolizerTool {
    /// Look up `command` on `PATH` (or check it directly if it contains a path separator).
    ///
    /// # Errors
    /// Returns [`ToolError::NotFound`] if the command cannot be located.
    pub fn locate(command: &str) -> Result<Self, ToolError> {
        Ok(Self {
            command: command.to_string(),
            program: locate_program(command)?,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            read_timeout: None,
        })
    }

    /// Bound the number of unanswered requests per process (at least 1).
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Give up on a worker whose next response line takes longer than `timeout`.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    #[must_use]
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Arguments binding one process to `object`
    #[must_use]
    pub fn args_for<'a>(&self, object: &'a Path) -> [&'a OsStr; 3] {
        [OsStr::new("-f"), OsStr::new("-e"), object.as_os_str()]
    }
}

/// A located symbol table dump command (`nm`-compatible)
#[derive(Debug, Clone)]
pub struct SymbolDumpTool {
    command: String,
    program: PathBuf,
}

impl SymbolDumpTool {
    /// # Errors
    /// Returns [`ToolError::NotFound`] if the command cannot be located.
    pub fn locate(command: &str) -> Result<Self, ToolError> {
        Ok(Self { command: command.to_string(), program: locate_program(command)? })
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }
}

fn locate_program(command: &str) -> Result<PathBuf, ToolError> {
    let program = which::which(command)
        .map_err(|source| ToolError::NotFound { command: command.to_string(), source })?;
    debug!("Located {command} at {}", program.display());
    Ok(program)
}

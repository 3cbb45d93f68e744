//! CLI argument definitions

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::export::ReportFormat;
use crate::trace_data::TraceFormat;

/// Symbolization backend selected on the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Long-lived addr2line processes (names and source locations)
    #[default]
    Addr2line,
    /// One nm dump per object (names only)
    SymbolTable,
}

#[derive(Parser, Debug)]
#[command(
    name = "callscope",
    version,
    about = "Resolve an mcount call trace into a symbolized call graph",
    after_help = "\
EXAMPLES:
    callscope ./profile --objdir ./symbols               JSON report on stdout
    callscope ./profile --objdir ./symbols -j 0 --format ranked
    callscope ./profile --backend symbol-table --nm nm --format dot -o calls.dot"
)]
pub struct Args {
    /// Profile directory written by the instrumented process (maps + calls)
    #[arg(value_name = "DIRECTORY")]
    pub directory: PathBuf,

    /// addr2line command used to symbolize offsets
    #[arg(long, value_name = "COMMAND", default_value = "arm-linux-androideabi-addr2line")]
    pub addr2line: String,

    /// Symbolizer processes per object (less than 1 = one per CPU)
    #[arg(short = 'j', value_name = "N", default_value = "1", allow_negative_numbers = true)]
    pub jobs: i64,

    /// Directory holding unstripped copies of the mapped objects
    #[arg(long, value_name = "DIRECTORY", default_value = ".")]
    pub objdir: PathBuf,

    /// How offsets are turned into symbols
    #[arg(long, value_enum, default_value_t = Backend::Addr2line)]
    pub backend: Backend,

    /// nm command used by the symbol-table backend
    #[arg(long, value_name = "COMMAND", default_value = "arm-linux-androideabi-nm")]
    pub nm: String,

    /// Record layout of the calls file
    #[arg(long, value_enum, default_value_t = TraceFormat::Counted)]
    pub trace_format: TraceFormat,

    /// Calls file to read instead of <DIRECTORY>/calls
    #[arg(long, value_name = "FILE")]
    pub calls: Option<PathBuf>,

    /// Index every mapping, not only executable ones
    #[arg(long)]
    pub all_mappings: bool,

    /// Report format
    #[arg(long, value_enum, default_value_t = ReportFormat::Json)]
    pub format: ReportFormat,

    /// Write the report to FILE instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Unanswered requests allowed per symbolizer process
    #[arg(long, value_name = "K", default_value = "10", value_parser = clap::value_parser!(u64).range(1..))]
    pub max_in_flight: u64,

    /// Give up on a symbolizer silent for S seconds (0 = wait forever)
    #[arg(long, value_name = "S", default_value = "0")]
    pub timeout_secs: u64,

    /// Demangle Rust symbol names
    #[arg(long)]
    pub demangle: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Memory map snapshot inside the profile directory
    #[must_use]
    pub fn maps_path(&self) -> PathBuf {
        self.directory.join("maps")
    }

    #[must_use]
    pub fn calls_path(&self) -> PathBuf {
        self.calls.clone().unwrap_or_else(|| self.directory.join("calls"))
    }

    /// Worker count for the resolution pool; 0 means one per CPU
    #[must_use]
    pub fn workers(&self) -> usize {
        usize::try_from(self.jobs).unwrap_or(0)
    }

    #[must_use]
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        usize::try_from(self.max_in_flight).unwrap_or(usize::MAX)
    }
}
